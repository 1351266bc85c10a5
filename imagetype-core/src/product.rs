//! Product records and the candidate filter used by the distributor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A catalog item whose images are classified as one unit.
///
/// Serialized as a flat JSON object; this is the body of every queued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub offer_id: String,
    pub merchant_id: i64,
    pub aggregator_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub image_link: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub additional_image_links: Vec<String>,
}

impl Product {
    /// The primary link (when set) followed by the additional links.
    pub fn image_links(&self) -> Vec<&str> {
        self.image_link
            .iter()
            .chain(self.additional_image_links.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn to_json(&self) -> String {
        // A struct of strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("a product filter needs at least one of product_type, brands or offer_ids")]
    Empty,
}

/// Conjunctive predicate narrowing the distributor's candidate query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductFilter {
    product_type: Option<String>,
    brands: Vec<String>,
    offer_ids: Vec<String>,
}

impl ProductFilter {
    /// Blank strings are dropped; at least one criterion must remain.
    pub fn new(
        product_type: Option<String>,
        brands: Vec<String>,
        offer_ids: Vec<String>,
    ) -> Result<Self, FilterError> {
        let product_type = product_type.filter(|t| !t.trim().is_empty());
        let brands = non_blank(brands);
        let offer_ids = non_blank(offer_ids);

        if product_type.is_none() && brands.is_empty() && offer_ids.is_empty() {
            return Err(FilterError::Empty);
        }

        Ok(Self {
            product_type,
            brands,
            offer_ids,
        })
    }

    pub fn product_type(&self) -> Option<&str> {
        self.product_type.as_deref()
    }

    pub fn brands(&self) -> &[String] {
        &self.brands
    }

    pub fn offer_ids(&self) -> &[String] {
        &self.offer_ids
    }
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .collect()
}
