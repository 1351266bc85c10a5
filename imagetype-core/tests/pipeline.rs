//! End-to-end pipeline tests.
//!
//! Products travel the same path as in production: read from the warehouse
//! view by the distributor, serialized into queue tasks, then decoded from the
//! task body and classified. Every external system is an in-memory fake.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage};
use imagetype_core::mock::{MockImageFetcher, MockInference, MockTaskQueue, MockWarehouse};
use imagetype_core::{
    CandidateView, Classifier, Distributor, DistributorConfig, ImageType, Product, RunOutcome,
};
use serde_json::json;

/// Encode a solid test image in the given format.
fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encoding failed");
    bytes
}

fn distributor_config() -> DistributorConfig {
    DistributorConfig {
        project_id: "proj".into(),
        dataset_id: "catalog".into(),
        location: "us-central1".into(),
        queue_id: "image-products".into(),
        target_url: "https://classify.example/classify".parse().unwrap(),
    }
}

#[tokio::test]
async fn test_distributed_task_is_classified() {
    // Distributor side
    let view = MockWarehouse::new().with_rows(vec![json!({
        "offer_id": "sku-77",
        "merchant_id": 1001,
        "aggregator_id": 5,
        "title": "Walnut side table",
        "product_type": "Furniture > Tables",
        "brand": "Northwood",
        "image_link": null,
        "additional_image_links": ["https://img.example/a.jpg", "https://img.example/b.png"],
    })]);
    let queue = Arc::new(MockTaskQueue::new());
    let distributor = Distributor::new(Arc::new(view), queue.clone(), distributor_config());

    let outcome = distributor.run(10, None, CandidateView::New).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Enqueued(ref r) if r.succeeded == 1));

    // Classifier side, fed with the task body
    let (_, task) = queue.create_calls().remove(0);
    let product: Product = serde_json::from_slice(&task.body).unwrap();
    assert_eq!(product.image_link, None);

    let fetcher = MockImageFetcher::new()
        .with_image("https://img.example/a.jpg", encode(64, 48, ImageFormat::Jpeg), "image/jpeg")
        .with_image("https://img.example/b.png", encode(10, 10, ImageFormat::Png), "image/png; charset=binary");
    let inference = Arc::new(MockInference::labeling(ImageType::Lifestyle));
    let results = Arc::new(MockWarehouse::new());
    let classifier = Classifier::new(
        Arc::new(fetcher),
        inference.clone(),
        results.clone(),
        imagetype_core::prompt::DEFAULT_TEMPLATE,
        "proj.catalog.image_labels",
    )
    .unwrap();

    let classification = classifier.process(&product).await.unwrap();

    assert_eq!(classification.images.len(), 2);
    let request = &inference.requests()[0];
    assert!(request.prompt.starts_with("image 1\nimage 2\n"));
    assert!(request
        .prompt
        .ends_with("The category of the product shown in the images is: Furniture > Tables"));

    let (table, rows) = results.inserts().remove(0);
    assert_eq!(table, "proj.catalog.image_labels");
    assert_eq!(rows[0]["mime_type"], "image/jpeg");
    assert_eq!((rows[0]["width"].as_u64(), rows[0]["height"].as_u64()), (Some(64), Some(48)));
    assert_eq!(rows[1]["mime_type"], "image/png");
    assert_eq!(rows[1]["sha256_hash"].as_str().unwrap().len(), 64);
    assert!(rows.iter().all(|r| r["type"] == "lifestyle"));
    assert_eq!(inference.deleted().len(), 2);
}
