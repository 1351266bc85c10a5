//! API integration tests for imagetype-server.
//!
//! These tests drive the router end to end with in-memory fakes standing in
//! for the image host, Gemini, BigQuery and Cloud Tasks.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use imagetype_core::mock::{MockImageFetcher, MockInference, MockReply, MockTaskQueue, MockWarehouse};
use imagetype_core::{Classifier, Distributor, DistributorConfig, ImageType};
use serde_json::{json, Value};
use tower::ServiceExt;
use imagetype_server::{create_router, AppState};

const IMAGE_URL: &str = "https://img.example/chair.png";

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::new(width, height)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

struct Fakes {
    inference: Arc<MockInference>,
    warehouse: Arc<MockWarehouse>,
    queue: Arc<MockTaskQueue>,
}

fn classifier(inference: Arc<MockInference>, warehouse: Arc<MockWarehouse>) -> Classifier {
    let fetcher = MockImageFetcher::new().with_image(IMAGE_URL, png(4, 3), "image/png");
    Classifier::new(
        Arc::new(fetcher),
        inference,
        warehouse,
        "Classify each image.",
        "proj.catalog.image_labels",
    )
    .unwrap()
}

fn distributor(warehouse: Arc<MockWarehouse>, queue: Arc<MockTaskQueue>) -> Distributor {
    let config = DistributorConfig {
        project_id: "proj".into(),
        dataset_id: "catalog".into(),
        location: "europe-west1".into(),
        queue_id: "products".into(),
        target_url: "https://worker.example/classify".parse().unwrap(),
    };
    Distributor::new(warehouse, queue, config)
}

fn app_with(inference: MockInference, warehouse: MockWarehouse, queue: MockTaskQueue) -> (Router, Fakes) {
    let fakes = Fakes {
        inference: Arc::new(inference),
        warehouse: Arc::new(warehouse),
        queue: Arc::new(queue),
    };
    let state = AppState::new(
        Some(classifier(fakes.inference.clone(), fakes.warehouse.clone())),
        Some(distributor(fakes.warehouse.clone(), fakes.queue.clone())),
    );
    (create_router(state), fakes)
}

fn create_test_app() -> (Router, Fakes) {
    app_with(
        MockInference::labeling(ImageType::Silo),
        MockWarehouse::new(),
        MockTaskQueue::new(),
    )
}

fn product_body() -> String {
    json!({
        "offer_id": "sku-1",
        "merchant_id": 42,
        "aggregator_id": 7,
        "title": "Oak chair",
        "image_link": IMAGE_URL,
        "additional_image_links": [],
    })
    .to_string()
}

fn post(uri: &str, content_type: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body.into()).unwrap()
}

fn content_type(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_reports_flows() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["classifier"], true);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_health_degraded_without_flows() {
    let app = create_router(AppState::default());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["status"], "degraded");
}

// ============================================================================
// Classify
// ============================================================================

#[tokio::test]
async fn test_classify_success_writes_row() {
    let (app, fakes) = create_test_app();

    let response = app
        .oneshot(post("/classify", Some("application/json"), product_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");

    let inserts = fakes.warehouse.inserts();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].1[0]["type"], "silo");
    assert_eq!(inserts[0].1[0]["width"], 4);
    assert_eq!(fakes.inference.deleted().len(), 1);
}

#[tokio::test]
async fn test_classify_accepts_charset_parameter() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(post("/classify", Some("application/json; charset=utf-8"), product_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_classify_rejects_get() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(Request::builder().uri("/classify").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_classify_rejects_non_json_content_type() {
    let (app, fakes) = create_test_app();

    let response = app
        .oneshot(post("/classify", Some("text/plain"), product_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(content_type(&response).starts_with("text/plain"));
    assert_eq!(body_text(response).await, "Unsupported Media Type");
    assert!(fakes.inference.requests().is_empty());
}

#[tokio::test]
async fn test_classify_empty_object_is_bad_request() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(post("/classify", Some("application/json"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(content_type(&response).starts_with("text/plain"));
    assert_eq!(body_text(response).await, "Bad Request: No JSON data provided");
}

#[tokio::test]
async fn test_classify_malformed_json_is_bad_request() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(post("/classify", Some("application/json"), "{\"offer_id\": "))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response)
        .await
        .starts_with("Bad Request: Invalid JSON format: "));
}

#[tokio::test]
async fn test_classify_pipeline_failure_is_server_error() {
    let (app, fakes) = app_with(
        MockInference::new(MockReply::Text("[]".into())),
        MockWarehouse::new(),
        MockTaskQueue::new(),
    );

    let response = app
        .oneshot(post("/classify", Some("application/json"), product_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["code"], "INFERENCE_FAILED");
    // Uploaded file released even though classification failed.
    assert_eq!(fakes.inference.deleted().len(), 1);
    assert!(fakes.warehouse.inserts().is_empty());
}

#[tokio::test]
async fn test_classify_unconfigured_is_unavailable() {
    let app = create_router(AppState::default());

    let response = app
        .oneshot(post("/classify", Some("application/json"), product_body()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Push
// ============================================================================

fn candidate(offer_id: &str) -> Value {
    json!({
        "offer_id": offer_id,
        "merchant_id": 42,
        "aggregator_id": 7,
        "title": null,
        "product_type": null,
        "brand": null,
        "image_link": IMAGE_URL,
        "additional_image_links": null,
    })
}

#[tokio::test]
async fn test_push_without_body_uses_defaults() {
    let (app, fakes) = app_with(
        MockInference::labeling(ImageType::Silo),
        MockWarehouse::new().with_rows(vec![candidate("a"), candidate("b")]),
        MockTaskQueue::new(),
    );

    let response = app.oneshot(post("/push", None, Body::empty())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let query = &fakes.warehouse.queries()[0];
    assert!(query.sql.contains("get_new_products_view"));
    assert_eq!(fakes.queue.create_calls().len(), 2);
    assert_eq!(fakes.queue.list_calls()[0].1, 1);
}

#[tokio::test]
async fn test_push_with_filter_and_view() {
    let (app, fakes) = app_with(
        MockInference::labeling(ImageType::Silo),
        MockWarehouse::new().with_rows(vec![candidate("a")]),
        MockTaskQueue::new(),
    );

    let body = json!({"product_limit": 3, "view": "all", "offer_ids": ["a"]}).to_string();
    let response = app
        .oneshot(post("/push", Some("application/json"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let query = &fakes.warehouse.queries()[0];
    assert!(query.sql.contains("get_products_view"));
    assert!(query.sql.contains("offer_id IN UNNEST(@offer_ids)"));
}

#[tokio::test]
async fn test_push_refuses_busy_queue() {
    let (app, fakes) = app_with(
        MockInference::labeling(ImageType::Silo),
        MockWarehouse::new().with_rows(vec![candidate("a")]),
        MockTaskQueue::new().with_pending(2),
    );

    let response = app.oneshot(post("/push", None, Body::empty())).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["code"], "QUEUE_NOT_EMPTY");
    assert!(fakes.queue.create_calls().is_empty());
}

#[tokio::test]
async fn test_push_blank_filter_is_bad_request() {
    let (app, fakes) = create_test_app();

    let body = json!({"brands": [""]}).to_string();
    let response = app
        .oneshot(post("/push", Some("application/json"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(fakes.warehouse.queries().is_empty());
}
