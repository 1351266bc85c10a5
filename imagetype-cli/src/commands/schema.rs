//! Schema command implementation.

use anyhow::{Context, Result};
use imagetype_core::{table_schema_json, LabeledImage};

/// Execute the schema command.
///
/// Prints the BigQuery schema of the results table. With `terraform`, the
/// schema is wrapped as a JSON string value so terraform's `external` data
/// source can pass it to a table resource.
pub fn execute(terraform: bool) -> Result<()> {
    println!("{}", render(terraform)?);
    Ok(())
}

fn render(terraform: bool) -> Result<String> {
    let schema = table_schema_json::<LabeledImage>().context("Failed to build table schema")?;
    if terraform {
        Ok(serde_json::json!({ "schema": schema }).to_string())
    } else {
        Ok(schema)
    }
}
