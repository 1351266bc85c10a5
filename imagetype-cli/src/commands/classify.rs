//! Classify command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use imagetype_core::{token_source_from_env, Classifier, ClassifierConfig};
use tracing::info;

use crate::utils::load_product;

/// Execute the classify command.
pub async fn execute(file: PathBuf, quiet: bool) -> Result<()> {
    let product = load_product(&file)?;

    let config = ClassifierConfig::from_env()?;
    let tokens = token_source_from_env()?;
    let classifier = Classifier::from_config(&config, tokens)?;

    info!(offer_id = %product.offer_id, table = %classifier.table_id(), "Classifying product");
    let result = classifier
        .process(&product)
        .await
        .with_context(|| format!("Failed to classify product {}", product.offer_id))?;

    if !quiet {
        println!();
        println!(
            "   {} {}",
            "Product:".dimmed(),
            product.offer_id.bold()
        );
        if result.images.is_empty() {
            println!("   {}", "No images to classify".yellow());
        }
        for image in &result.images {
            let label = image
                .labeled_image
                .as_ref()
                .map(|l| l.image_type.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "   {} {:<14} {}x{}  {}",
                "•".green(),
                label.green().bold(),
                image.width,
                image.height,
                image.image_link.dimmed()
            );
        }
        println!();
        println!(
            "   {} {} row(s) written to {}",
            "Done:".dimmed(),
            result.images.len(),
            classifier.table_id()
        );
    }
    Ok(())
}
