//! Shared fixtures for engine integration tests.
//!
//! Everything runs against the in-memory stores and the mock extractor.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use invex_db::{MemoryProductStore, MemoryThresholdConfigStore, MemoryValidationStore};
use invex_identify::{
    compute_image_hash, EmbeddingVector, Error, IdentificationConfig, IdentificationThresholdConfig,
    NewProduct, Product, ProductIdentificationOrchestrator, ProductLookup, RecognitionData,
    Result, SignalExtractor, SimilarProduct, ThresholdConfigStore, ValidationFeedbackLoop,
};
use invex_inference::mock::MOCK_EMBED_MODEL;

/// PNG magic bytes followed by a tag, so distinct tags hash differently.
pub fn image(tag: &str) -> Vec<u8> {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

/// Recognition data keyed to the hash of `image`.
pub fn recognition_for(image: &[u8]) -> RecognitionData {
    let hash = compute_image_hash(image);
    RecognitionData {
        image_hash: Some(hash.clone()),
        last_recognition_hash: Some(hash),
        recognition_count: 1,
        last_recognition_at: Some(Utc::now()),
        ..Default::default()
    }
}

pub fn with_embedding(mut recognition: RecognitionData, values: Vec<f32>) -> RecognitionData {
    recognition.embedding = Some(values);
    recognition.embedding_model = Some(MOCK_EMBED_MODEL.to_string());
    recognition.embedding_confidence = Some(0.9);
    recognition
}

pub async fn seed_product(
    products: &dyn ProductLookup,
    name: &str,
    recognition: RecognitionData,
) -> Product {
    products
        .create(NewProduct {
            name: name.to_string(),
            description: None,
            category_id: 1,
            stock: 10,
            min_stock: 2,
            recognition: Some(recognition),
        })
        .await
        .expect("seed product")
}

/// Save and activate `config`.
pub async fn activate(
    configs: &dyn ThresholdConfigStore,
    config: IdentificationThresholdConfig,
) -> IdentificationThresholdConfig {
    let saved = configs.save(&config).await.expect("save config");
    configs.activate(saved.id).await.expect("activate config");
    configs.active().await.unwrap().expect("active config")
}

/// In-memory stores shared by an orchestrator and a feedback loop.
pub struct Stores {
    pub products: Arc<MemoryProductStore>,
    pub configs: Arc<MemoryThresholdConfigStore>,
    pub validations: Arc<MemoryValidationStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            products: Arc::new(MemoryProductStore::new()),
            configs: Arc::new(MemoryThresholdConfigStore::new()),
            validations: Arc::new(MemoryValidationStore::new()),
        }
    }

    pub fn orchestrator(
        &self,
        extractor: impl SignalExtractor + 'static,
        config: IdentificationConfig,
    ) -> ProductIdentificationOrchestrator {
        ProductIdentificationOrchestrator::new(
            Arc::new(extractor),
            self.products.clone(),
            self.configs.clone(),
            config,
        )
    }

    /// Feedback loop that retrains inline, so assertions see the result.
    pub fn feedback(&self, config: IdentificationConfig) -> ValidationFeedbackLoop {
        ValidationFeedbackLoop::new(
            self.validations.clone(),
            self.configs.clone(),
            config.with_retrain_in_background(false),
        )
    }
}

/// Product store whose first hash lookup misses, as if another writer
/// created the product between the chain's lookup and our insert.
pub struct RacingProductStore {
    inner: Arc<MemoryProductStore>,
    hash_lookups: AtomicUsize,
}

impl RacingProductStore {
    pub fn new(inner: Arc<MemoryProductStore>) -> Self {
        Self {
            inner,
            hash_lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProductLookup for RacingProductStore {
    async fn get(&self, id: i64) -> Result<Option<Product>> {
        self.inner.get(id).await
    }

    async fn by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        self.inner.by_barcode(barcode).await
    }

    async fn by_image_hash(&self, hash: &str) -> Result<Option<Product>> {
        if self.hash_lookups.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(None);
        }
        self.inner.by_image_hash(hash).await
    }

    async fn by_brand_and_model(&self, brand: &str, model: &str) -> Result<Vec<Product>> {
        self.inner.by_brand_and_model(brand, model).await
    }

    async fn by_exact_fields(
        &self,
        brand: Option<&str>,
        model: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        self.inner.by_exact_fields(brand, model, category).await
    }

    async fn by_vector_similarity(
        &self,
        embedding: &EmbeddingVector,
        threshold: f32,
    ) -> Result<Option<SimilarProduct>> {
        self.inner.by_vector_similarity(embedding, threshold).await
    }

    async fn by_tags_and_category(
        &self,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        self.inner.by_tags_and_category(tags, category).await
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        self.inner.create(product).await
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        self.inner.update(product).await
    }
}

/// Product store that fails chosen methods with a fresh error per call.
pub struct FailingProductStore {
    inner: Arc<MemoryProductStore>,
    failures: HashMap<&'static str, fn() -> Error>,
}

impl FailingProductStore {
    pub fn new(inner: Arc<MemoryProductStore>) -> Self {
        Self {
            inner,
            failures: HashMap::new(),
        }
    }

    /// Fail every call to `method` with `make()`.
    pub fn failing(mut self, method: &'static str, make: fn() -> Error) -> Self {
        self.failures.insert(method, make);
        self
    }

    fn check(&self, method: &str) -> Result<()> {
        match self.failures.get(method) {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProductLookup for FailingProductStore {
    async fn get(&self, id: i64) -> Result<Option<Product>> {
        self.check("get")?;
        self.inner.get(id).await
    }

    async fn by_barcode(&self, barcode: &str) -> Result<Option<Product>> {
        self.check("by_barcode")?;
        self.inner.by_barcode(barcode).await
    }

    async fn by_image_hash(&self, hash: &str) -> Result<Option<Product>> {
        self.check("by_image_hash")?;
        self.inner.by_image_hash(hash).await
    }

    async fn by_brand_and_model(&self, brand: &str, model: &str) -> Result<Vec<Product>> {
        self.check("by_brand_and_model")?;
        self.inner.by_brand_and_model(brand, model).await
    }

    async fn by_exact_fields(
        &self,
        brand: Option<&str>,
        model: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        self.check("by_exact_fields")?;
        self.inner.by_exact_fields(brand, model, category).await
    }

    async fn by_vector_similarity(
        &self,
        embedding: &EmbeddingVector,
        threshold: f32,
    ) -> Result<Option<SimilarProduct>> {
        self.check("by_vector_similarity")?;
        self.inner.by_vector_similarity(embedding, threshold).await
    }

    async fn by_tags_and_category(
        &self,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        self.check("by_tags_and_category")?;
        self.inner.by_tags_and_category(tags, category).await
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        self.check("create")?;
        self.inner.create(product).await
    }

    async fn update(&self, product: &Product) -> Result<Product> {
        self.check("update")?;
        self.inner.update(product).await
    }
}
