//! Text prompt for the batched image classification request.

use crate::product::Product;

/// Instruction template shipped with the crate.
pub const DEFAULT_TEMPLATE: &str = include_str!("../config/prompt.txt");

/// Build the prompt for `image_count` images of `product`.
///
/// Layout, one entry per line: positional markers (`image 1` .. `image N`),
/// the instruction template, then the product title and category when present.
pub fn build_prompt(template: &str, product: &Product, image_count: usize) -> String {
    let mut lines: Vec<String> = (1..=image_count).map(|i| format!("image {i}")).collect();

    lines.push(template.trim_end().to_string());
    if let Some(title) = &product.title {
        lines.push(format!("The product showcased by the images is: {title}"));
    }
    if let Some(product_type) = &product.product_type {
        lines.push(format!(
            "The category of the product shown in the images is: {product_type}"
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(title: Option<&str>, product_type: Option<&str>) -> Product {
        Product {
            offer_id: "sku-1".into(),
            merchant_id: 1,
            aggregator_id: 2,
            title: title.map(Into::into),
            product_type: product_type.map(Into::into),
            brand: None,
            image_link: None,
            additional_image_links: vec![],
        }
    }

    #[test]
    fn test_markers_precede_template() {
        let prompt = build_prompt("Classify.", &product(None, None), 3);
        assert_eq!(prompt, "image 1\nimage 2\nimage 3\nClassify.");
    }

    #[test]
    fn test_context_lines_follow_template() {
        let prompt = build_prompt("Classify.\n", &product(Some("Oak chair"), Some("Chairs")), 1);
        let lines: Vec<_> = prompt.lines().collect();
        assert_eq!(
            lines,
            [
                "image 1",
                "Classify.",
                "The product showcased by the images is: Oak chair",
                "The category of the product shown in the images is: Chairs",
            ]
        );
    }

    #[test]
    fn test_missing_title_keeps_category() {
        let prompt = build_prompt("T", &product(None, Some("Lamps")), 1);
        assert!(!prompt.contains("showcased"));
        assert!(prompt.ends_with("The category of the product shown in the images is: Lamps"));
    }

    #[test]
    fn test_default_template_mentions_every_category() {
        for image_type in crate::label::ImageType::ALL {
            assert!(DEFAULT_TEMPLATE.contains(image_type.as_str()));
        }
    }
}
