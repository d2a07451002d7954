//! How lookup and persistence errors surface from identification.

mod helpers;

use std::sync::Arc;

use helpers::{image, recognition_for, seed_product, FailingProductStore, Stores};
use invex_identify::{
    Error, IdentificationConfig, IdentificationRequest, IdentificationStage,
    IdentificationStatus, MatchType, ProductDraft, ProductIdentificationOrchestrator,
    RecognitionData,
};
use invex_inference::mock::MockSignalExtractor;

fn draft() -> ProductDraft {
    ProductDraft::new(2).with_name("Bench vise").with_stock(3, 1)
}

fn orchestrator(
    stores: &Stores,
    extractor: MockSignalExtractor,
    products: FailingProductStore,
) -> ProductIdentificationOrchestrator {
    ProductIdentificationOrchestrator::new(
        Arc::new(extractor),
        Arc::new(products),
        stores.configs.clone(),
        IdentificationConfig::default(),
    )
}

#[tokio::test]
async fn test_non_infrastructure_tier_error_falls_through() {
    let stores = Stores::new();
    let photo = image("vise");
    let product = seed_product(
        &*stores.products,
        "Vise",
        RecognitionData {
            barcode: Some("5901234123457".into()),
            ..recognition_for(&photo)
        },
    )
    .await;

    let products = FailingProductStore::new(stores.products.clone())
        .failing("by_barcode", || Error::Serialization("corrupt barcode row".into()));
    let extractor = MockSignalExtractor::new().with_barcode(&photo, "5901234123457");
    let result = orchestrator(&stores, extractor, products)
        .identify_or_create(IdentificationRequest::new(photo).with_fallback(draft()))
        .await
        .unwrap();

    // The barcode tier counts as empty and the hash tier still matches.
    assert_eq!(result.status, IdentificationStatus::Identified);
    assert_eq!(result.match_type, Some(MatchType::ExactHash));
    assert_eq!(result.product.unwrap().id, product.id);
    assert_eq!(
        result.metadata.get("winning_tier"),
        Some(&serde_json::Value::from("EXACT_HASH"))
    );
    assert_eq!(stores.products.len().await, 1);
}

#[tokio::test]
async fn test_unavailable_store_aborts_with_error_status() {
    let stores = Stores::new();
    let products = FailingProductStore::new(stores.products.clone())
        .failing("by_image_hash", || Error::Unavailable("connection refused".into()));

    let result = orchestrator(&stores, MockSignalExtractor::new(), products)
        .identify_or_create(IdentificationRequest::new(image("offline")).with_fallback(draft()))
        .await
        .unwrap();

    assert_eq!(result.status, IdentificationStatus::Error);
    assert_eq!(result.stage, IdentificationStage::Extracted);
    assert_eq!(result.confidence, 0.0);
    assert!(result.requires_validation);
    assert!(result.product.is_none());
    assert!(result.details.contains("connection refused"));
    // Nothing is created when the chain could not run.
    assert!(stores.products.is_empty().await);
}

#[tokio::test]
async fn test_pool_timeout_aborts_with_error_status() {
    let stores = Stores::new();
    let photo = image("busy");
    let products = FailingProductStore::new(stores.products.clone())
        .failing("by_brand_and_model", || Error::Database(sqlx::Error::PoolTimedOut));
    let extractor = MockSignalExtractor::new().with_brand_model(&photo, "Irwin", "Record 6");

    let result = orchestrator(&stores, extractor, products)
        .identify_or_create(IdentificationRequest::new(photo).with_fallback(draft()))
        .await
        .unwrap();

    assert_eq!(result.status, IdentificationStatus::Error);
    assert!(result.details.contains("Product lookup failed"));
    assert!(stores.products.is_empty().await);
}

#[tokio::test]
async fn test_create_failure_propagates_without_product() {
    let stores = Stores::new();
    let products = FailingProductStore::new(stores.products.clone())
        .failing("create", || Error::Unavailable("primary is read-only".into()));

    let err = orchestrator(&stores, MockSignalExtractor::new(), products)
        .identify_or_create(IdentificationRequest::new(image("fresh")).with_fallback(draft()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unavailable(_)));
    assert!(stores.products.is_empty().await);
}

#[tokio::test]
async fn test_refresh_failure_keeps_identification() {
    let stores = Stores::new();
    let photo = image("shelf");
    seed_product(
        &*stores.products,
        "Clamp",
        RecognitionData {
            barcode: Some("4006381333931".into()),
            ..recognition_for(&image("catalog"))
        },
    )
    .await;

    let products = FailingProductStore::new(stores.products.clone())
        .failing("update", || Error::Unavailable("replica lag".into()));
    let extractor = MockSignalExtractor::new().with_barcode(&photo, "4006381333931");

    let result = orchestrator(&stores, extractor, products)
        .identify_or_create(IdentificationRequest::new(photo))
        .await
        .unwrap();

    assert_eq!(result.status, IdentificationStatus::Identified);
    assert_eq!(
        result.metadata.get("recognition_refreshed"),
        Some(&serde_json::Value::Bool(false))
    );
    let stored = stores.products.all().await.remove(0);
    assert_eq!(stored.recognition.unwrap().recognition_count, 1);
}
