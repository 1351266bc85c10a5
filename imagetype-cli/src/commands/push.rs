//! Push command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use imagetype_core::{
    token_source_from_env, CandidateView, Distributor, DistributorConfig, ProductFilter,
    RunOutcome,
};
use tracing::info;

/// Arguments of the push command.
pub struct PushArgs {
    pub limit: u32,
    pub view: CandidateView,
    pub product_type: Option<String>,
    pub brands: Vec<String>,
    pub offer_ids: Vec<String>,
    pub dry_run: bool,
}

impl PushArgs {
    fn filter(&self) -> Result<Option<ProductFilter>> {
        if self.product_type.is_none() && self.brands.is_empty() && self.offer_ids.is_empty() {
            return Ok(None);
        }
        let filter = ProductFilter::new(
            self.product_type.clone(),
            self.brands.clone(),
            self.offer_ids.clone(),
        )
        .map_err(imagetype_core::DistributeError::from)?;
        Ok(Some(filter))
    }
}

/// Execute the push command.
pub async fn execute(args: PushArgs, quiet: bool) -> Result<()> {
    let filter = args.filter()?;

    let config = DistributorConfig::from_env()?;
    let tokens = token_source_from_env()?;
    let distributor = Distributor::from_config(config, tokens)?;

    if args.dry_run {
        let products = distributor
            .fetch_candidates(args.limit, filter.as_ref(), args.view)
            .await
            .context("Failed to read candidates")?;
        info!(count = products.len(), "Dry run, queue untouched");
        if !quiet {
            for product in &products {
                println!("{}", product.to_json());
            }
        }
        return Ok(());
    }

    let outcome = distributor
        .run(args.limit, filter.as_ref(), args.view)
        .await
        .context("Distribution run failed")?;

    if quiet {
        return Ok(());
    }
    match outcome {
        RunOutcome::NothingToDo => {
            println!("{}", "No products to enqueue".yellow());
        }
        RunOutcome::Enqueued(report) => {
            println!(
                "   {} {} of {} product(s)",
                "Enqueued:".dimmed(),
                report.succeeded.to_string().green().bold(),
                report.total()
            );
            for failure in &report.failures {
                println!(
                    "   {} {} {}",
                    "✗".red(),
                    failure.offer_id.bold(),
                    failure.error.dimmed()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> PushArgs {
        PushArgs {
            limit: 10,
            view: CandidateView::New,
            product_type: None,
            brands: vec![],
            offer_ids: vec![],
            dry_run: false,
        }
    }

    #[test]
    fn test_no_criteria_means_no_filter() {
        assert!(args().filter().unwrap().is_none());
    }

    #[test]
    fn test_blank_brand_rejected() {
        let args = PushArgs {
            brands: vec!["".into()],
            ..args()
        };
        assert!(args.filter().is_err());
    }
}
