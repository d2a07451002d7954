//! PostgreSQL repository tests.
//!
//! Require a migrated database at `DATABASE_URL` (default
//! `test_fixtures::DEFAULT_TEST_DATABASE_URL`). Run with
//! `cargo test -p invex-db -- --ignored`.

use std::sync::Arc;

use chrono::Utc;
use invex_db::test_fixtures::{test_database_url, unique_product};
use invex_db::{
    CorrectionType, Database, EmbeddingVector, Error, IdentificationThresholdConfig,
    NewValidation, ProductLookup, ThresholdConfigStore, ValidationSource, ValidationStore,
};

async fn setup_db() -> Database {
    let _ = dotenvy::dotenv();
    Database::connect(&test_database_url())
        .await
        .expect("Failed to connect to test database")
}

fn run_tag() -> String {
    format!("{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_create_and_lookup_by_hash() {
    let db = setup_db().await;
    let tag = run_tag();
    let created = db
        .products
        .create(unique_product("Fixture drill", &tag))
        .await
        .unwrap();

    let hash = created.image_hash().unwrap().to_string();
    let found = db.products.by_image_hash(&hash).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.name, "Fixture drill");
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_duplicate_hash_is_conflict() {
    let db = setup_db().await;
    let tag = run_tag();
    db.products
        .create(unique_product("First", &tag))
        .await
        .unwrap();

    let err = db
        .products
        .create(unique_product("Second", &tag))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {:?}", err);
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_vector_similarity_round_trip() {
    let db = setup_db().await;
    let tag = run_tag();
    let model = format!("fixture-model-{}", tag);

    let mut product = unique_product("Vector fixture", &tag);
    if let Some(r) = product.recognition.as_mut() {
        r.embedding = Some(vec![0.6, 0.8, 0.0]);
        r.embedding_model = Some(model.clone());
    }
    let created = db.products.create(product).await.unwrap();

    let query = EmbeddingVector::new(vec![0.6, 0.8, 0.0], model.clone(), 0.9);
    let hit = db
        .products
        .by_vector_similarity(&query, 0.9)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.product.id, created.id);
    assert!(hit.similarity > 0.99);
    assert_eq!(
        hit.product.recognition.unwrap().embedding,
        Some(vec![0.6, 0.8, 0.0])
    );

    let other = EmbeddingVector::new(vec![0.6, 0.8, 0.0], "unknown-model", 0.9);
    assert!(db
        .products
        .by_vector_similarity(&other, 0.5)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_concurrent_activation_leaves_one_active() {
    let db = Arc::new(setup_db().await);
    let mut ids = Vec::new();
    for _ in 0..4 {
        let saved = db
            .threshold_configs
            .save(&IdentificationThresholdConfig::default())
            .await
            .unwrap();
        ids.push(saved.id);
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|id| {
            let db = Arc::clone(&db);
            let id = *id;
            tokio::spawn(async move { db.threshold_configs.activate(id).await })
        })
        .collect();
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let active: Vec<_> = db
        .threshold_configs
        .all_ordered_by_accuracy()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.is_active)
        .collect();
    assert_eq!(active.len(), 1);
    assert!(ids.contains(&active[0].id));
}

#[tokio::test]
#[ignore = "requires PostgreSQL with pgvector"]
async fn test_validation_save_and_count_since() {
    let db = setup_db().await;
    let before = Utc::now();

    let saved = db
        .validations
        .save(NewValidation {
            image_hash: format!("sha256:validation-{}", run_tag()),
            suggested_product_id: None,
            actual_product_id: None,
            confidence_score: 0.7,
            match_type: None,
            similarity_score: None,
            was_correct: false,
            correction_type: CorrectionType::FalseNegative,
            validated_by: Some("tester".into()),
            feedback: None,
            source: ValidationSource::Manual,
            sale_id: None,
            stock_id: None,
        })
        .await
        .unwrap();
    assert_eq!(saved.correction_type, CorrectionType::FalseNegative);
    assert!(db.validations.count_since(Some(before)).await.unwrap() >= 1);
}
