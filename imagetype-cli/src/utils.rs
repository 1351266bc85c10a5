//! Common utility functions shared across CLI commands.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use imagetype_core::Product;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr. `RUST_LOG` overrides the verbosity flags.
pub fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "imagetype_core=info,imagetype=info,warn",
        (false, _) => "imagetype_core=debug,imagetype=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Read a product from a JSON file, or from stdin when `path` is `-`.
pub fn load_product(path: &Path) -> Result<Product> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read product from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?
    };

    let product: Product = serde_json::from_str(&raw).context("Invalid product JSON")?;
    debug!(offer_id = %product.offer_id, images = product.image_links().len(), "Loaded product");
    Ok(product)
}
