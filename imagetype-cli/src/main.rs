//! Imagetype CLI - product image classification pipeline tool.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use imagetype_core::{CandidateView, DEFAULT_PRODUCT_LIMIT};

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

#[derive(Parser)]
#[command(name = "imagetype")]
#[command(author, version, about = "Product image classification pipeline", long_about = None)]
#[command(after_help = exit_codes::HELP)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue one classification task per candidate product
    Push {
        /// Maximum number of products to read
        #[arg(short, long, default_value_t = DEFAULT_PRODUCT_LIMIT)]
        limit: u32,

        /// Candidate view: "new" (not yet classified) or "all"
        #[arg(long, default_value = "new")]
        view: CandidateView,

        /// Only products of this category
        #[arg(long)]
        product_type: Option<String>,

        /// Only products of these brands (repeatable)
        #[arg(long = "brand", value_name = "BRAND")]
        brands: Vec<String>,

        /// Only these offer ids (repeatable)
        #[arg(long = "offer-id", value_name = "OFFER_ID")]
        offer_ids: Vec<String>,

        /// List the candidates without touching the queue
        #[arg(long)]
        dry_run: bool,
    },

    /// Classify the images of one product and write the results
    Classify {
        /// Product JSON file ("-" reads stdin)
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the warehouse table schema for the image labels
    Schema {
        /// Wrap the schema as {"schema": "<json>"} for terraform's external data source
        #[arg(long)]
        terraform: bool,
    },
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Push {
            limit,
            view,
            product_type,
            brands,
            offer_ids,
            dry_run,
        } => {
            let args = commands::push::PushArgs {
                limit,
                view,
                product_type,
                brands,
                offer_ids,
                dry_run,
            };
            commands::push::execute(args, cli.quiet).await
        }
        Commands::Classify { file } => commands::classify::execute(file, cli.quiet).await,
        Commands::Schema { terraform } => commands::schema::execute(terraform),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose, cli.quiet);

    let exit = match run(cli).await {
        Ok(()) => ExitCode::success(),
        Err(e) => ExitCode::from_anyhow(&e),
    };

    if let Some(message) = &exit.message {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }
    std::process::exit(exit.code);
}
