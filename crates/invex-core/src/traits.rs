//! Core traits for invex collaborators.
//!
//! The identification engine only talks to extraction backends and stores
//! through these interfaces, so PostgreSQL, in-memory and mock
//! implementations are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::*;

// =============================================================================
// EXTRACTION TRAITS
// =============================================================================

/// Turns raw image bytes into structured recognition signals.
#[async_trait]
pub trait SignalExtractor: Send + Sync {
    /// Extract signals from one image.
    ///
    /// `format` is an optional hint ("jpg", "image/png"); implementations
    /// sniff magic bytes first.
    async fn extract(&self, image: &[u8], format: Option<&str>) -> Result<RecognitionSignals>;

    /// Human-readable name of this extractor.
    fn name(&self) -> &str;
}

/// Finds individual product instances in a multi-object image.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects, returning each with its bounding box and cropped bytes.
    async fn detect(&self, image: &[u8], format: Option<&str>) -> Result<Vec<DetectedObject>>;
}

// =============================================================================
// STORE TRAITS
// =============================================================================

/// Catalog lookups used by the matching tiers, plus product persistence.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Product>>;

    async fn by_barcode(&self, barcode: &str) -> Result<Option<Product>>;

    async fn by_image_hash(&self, hash: &str) -> Result<Option<Product>>;

    /// Products whose recognition brand and model both match, case-insensitively.
    async fn by_brand_and_model(&self, brand: &str, model: &str) -> Result<Vec<Product>>;

    /// Products matching every provided field; `None` fields are not filtered.
    ///
    /// Returns nothing when all fields are `None`.
    async fn by_exact_fields(
        &self,
        brand: Option<&str>,
        model: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Product>>;

    /// Nearest neighbor with cosine similarity at or above `threshold`.
    ///
    /// Only products whose stored embedding came from the same model are
    /// compared.
    async fn by_vector_similarity(
        &self,
        embedding: &EmbeddingVector,
        threshold: f32,
    ) -> Result<Option<SimilarProduct>>;

    /// Products sharing at least one usage tag, narrowed to `category` when given.
    async fn by_tags_and_category(
        &self,
        tags: &[String],
        category: Option<&str>,
    ) -> Result<Vec<Product>>;

    /// Persist a new product.
    ///
    /// Returns `Error::Conflict` when another product already holds the same
    /// recognition image hash.
    async fn create(&self, product: NewProduct) -> Result<Product>;

    /// Overwrite a product's mutable fields, including recognition data.
    async fn update(&self, product: &Product) -> Result<Product>;
}

/// Versioned threshold configs with a single active entry.
#[async_trait]
pub trait ThresholdConfigStore: Send + Sync {
    async fn active(&self) -> Result<Option<IdentificationThresholdConfig>>;

    async fn get(&self, id: i64) -> Result<Option<IdentificationThresholdConfig>>;

    /// Insert (id 0) or update a config. Never changes which config is active.
    async fn save(&self, config: &IdentificationThresholdConfig) -> Result<IdentificationThresholdConfig>;

    /// Make `id` the only active config, atomically.
    async fn activate(&self, id: i64) -> Result<()>;

    /// All configs, best accuracy first.
    async fn all_ordered_by_accuracy(&self) -> Result<Vec<IdentificationThresholdConfig>>;

    /// Delete an inactive config. Deleting the active config is a `Conflict`.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Append-only log of human validations.
#[async_trait]
pub trait ValidationStore: Send + Sync {
    async fn save(&self, validation: NewValidation) -> Result<ProductIdentificationValidation>;

    /// Validations strictly after `since`; all of them when `None`.
    async fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<i64>;

    async fn find_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProductIdentificationValidation>>;

    async fn count_total(&self) -> Result<i64>;

    async fn count_correct(&self) -> Result<i64>;

    async fn count_improved(&self) -> Result<i64>;

    async fn count_false_positives(&self) -> Result<i64>;

    async fn count_false_negatives(&self) -> Result<i64>;

    /// Every validation, oldest first.
    async fn find_all(&self) -> Result<Vec<ProductIdentificationValidation>>;
}
