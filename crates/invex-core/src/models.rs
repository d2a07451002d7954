//! Core data models for invex.
//!
//! These types are shared across all invex crates and represent the product
//! identification domain: extracted signals, catalog products, match
//! candidates, identification outcomes, threshold configs and the human
//! feedback log.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Return the trimmed value when it is non-blank.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Append values missing from `target`, case-insensitively.
fn merge_unique(target: &mut Vec<String>, incoming: &[String]) {
    for value in incoming {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !target.iter().any(|v| v.eq_ignore_ascii_case(trimmed)) {
            target.push(trimmed.to_string());
        }
    }
}

/// Compute accuracy as `correct / total`, clamped to [0, 1].
///
/// Returns 0.0 when `total` is zero.
pub fn compute_accuracy(correct: i64, total: i64) -> f32 {
    if total <= 0 {
        return 0.0;
    }
    (correct as f64 / total as f64).clamp(0.0, 1.0) as f32
}

// =============================================================================
// SIGNAL TYPES
// =============================================================================

/// Opaque embedding blob tagged with the model that produced it.
///
/// The values are never interpreted by matching logic; they are only handed
/// to a similarity-search capability that understands the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EmbeddingVector {
    pub values: Vec<f32>,
    pub model: String,
    /// Extractor confidence in the embedding (0.0-1.0)
    pub confidence: f32,
}

impl EmbeddingVector {
    pub fn new(values: Vec<f32>, model: impl Into<String>, confidence: f32) -> Self {
        Self {
            values,
            model: model.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Barcode read from the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DetectedBarcode {
    pub value: String,
    /// Symbology, e.g. "EAN-13", "UPC-A", "QR"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Structured signals extracted from one image.
///
/// Transient: produced per request by a `SignalExtractor` and never persisted
/// as-is. Its processed fields land on `RecognitionData`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RecognitionSignals {
    /// Content hash of the raw image bytes
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
    /// Image quality (0.0-1.0)
    #[serde(default)]
    pub quality_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<DetectedBarcode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub logos: Vec<String>,
    #[serde(default)]
    pub detected_objects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_price_range: Option<String>,
    #[serde(default)]
    pub inferred_usage_tags: Vec<String>,
    /// Per-signal confidence, keyed by signal name ("vision", "embedding", ...)
    #[serde(default)]
    #[schema(value_type = Object)]
    pub confidence_breakdown: BTreeMap<String, f32>,
}

impl RecognitionSignals {
    /// Create an empty signal bundle for the given image hash.
    pub fn new(image_hash: impl Into<String>) -> Self {
        Self {
            image_hash: image_hash.into(),
            ..Default::default()
        }
    }

    /// Non-blank barcode value.
    pub fn barcode_value(&self) -> Option<&str> {
        self.barcode
            .as_ref()
            .map(|b| b.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// Non-blank image hash.
    pub fn hash(&self) -> Option<&str> {
        let hash = self.image_hash.trim();
        (!hash.is_empty()).then_some(hash)
    }

    pub fn brand(&self) -> Option<&str> {
        non_blank(&self.brand)
    }

    pub fn model(&self) -> Option<&str> {
        non_blank(&self.model)
    }

    pub fn category(&self) -> Option<&str> {
        non_blank(&self.inferred_category)
    }

    pub fn ocr(&self) -> Option<&str> {
        non_blank(&self.ocr_text)
    }

    /// Brand and model, only when both are present.
    pub fn brand_and_model(&self) -> Option<(&str, &str)> {
        Some((self.brand()?, self.model()?))
    }

    /// Non-empty embedding.
    pub fn usable_embedding(&self) -> Option<&EmbeddingVector> {
        self.embedding.as_ref().filter(|e| !e.is_empty())
    }

    /// Whether any vision field usable by the field-matching tier is present.
    pub fn has_vision_fields(&self) -> bool {
        self.brand().is_some() || self.model().is_some() || self.category().is_some()
    }

    /// Whether any matching tier can run at all.
    pub fn has_any_usable_signal(&self) -> bool {
        self.barcode_value().is_some()
            || self.hash().is_some()
            || self.has_vision_fields()
            || self.usable_embedding().is_some()
            || !self.inferred_usage_tags.is_empty()
    }

    /// Mean of the per-signal confidences, or the quality score when no
    /// breakdown is available.
    pub fn overall_confidence(&self) -> f32 {
        if self.confidence_breakdown.is_empty() {
            return self.quality_score.clamp(0.0, 1.0);
        }
        let sum: f32 = self.confidence_breakdown.values().sum();
        (sum / self.confidence_breakdown.len() as f32).clamp(0.0, 1.0)
    }
}

// =============================================================================
// PRODUCT TYPES
// =============================================================================

/// Recognition bundle stored on a catalog product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RecognitionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_confidence: Option<f32>,
    /// Hash of the image the product was first recognized from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    /// Hash of the most recent image that refined this bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recognition_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub logos: Vec<String>,
    #[serde(default)]
    pub detected_objects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_price_range: Option<String>,
    #[serde(default)]
    pub inferred_usage_tags: Vec<String>,
    /// Best identification confidence observed for this product
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_accuracy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recognition_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recognition_count: i32,
}

impl RecognitionData {
    /// Build the bundle stamped on a product created from `signals`.
    pub fn from_signals(signals: &RecognitionSignals, confidence: f32, now: DateTime<Utc>) -> Self {
        let embedding = signals.usable_embedding();
        Self {
            embedding: embedding.map(|e| e.values.clone()),
            embedding_model: embedding.map(|e| e.model.clone()),
            embedding_confidence: embedding.map(|e| e.confidence),
            image_hash: signals.hash().map(str::to_string),
            last_recognition_hash: signals.hash().map(str::to_string),
            barcode: signals.barcode_value().map(str::to_string),
            barcode_format: signals.barcode.as_ref().and_then(|b| b.format.clone()),
            brand: signals.brand().map(str::to_string),
            model: signals.model().map(str::to_string),
            ocr_text: signals.ocr().map(str::to_string),
            logos: signals.logos.clone(),
            detected_objects: signals.detected_objects.clone(),
            inferred_category: signals.category().map(str::to_string),
            inferred_price_range: non_blank(&signals.inferred_price_range).map(str::to_string),
            inferred_usage_tags: signals.inferred_usage_tags.clone(),
            recognition_accuracy: Some(confidence.clamp(0.0, 1.0)),
            quality_score: Some(signals.quality_score.clamp(0.0, 1.0)),
            last_recognition_at: Some(now),
            recognition_count: 1,
        }
    }

    /// Whether `hash` is the image this bundle was created or last refined from.
    pub fn has_seen(&self, hash: &str) -> bool {
        self.image_hash.as_deref() == Some(hash)
            || self.last_recognition_hash.as_deref() == Some(hash)
    }

    /// Fold a later recognition pass into this bundle.
    ///
    /// Stored embedding and quality only move to higher-confidence
    /// observations; blank fields are filled; list fields are unioned. A
    /// replay of an already-seen image hash is a no-op, so the recognition
    /// count increments once per distinct image. Returns whether anything
    /// changed.
    pub fn refine_with(
        &mut self,
        signals: &RecognitionSignals,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(hash) = signals.hash() else {
            return false;
        };
        if self.has_seen(hash) {
            return false;
        }

        self.recognition_count += 1;
        self.last_recognition_hash = Some(hash.to_string());
        self.last_recognition_at = Some(now);
        if self.image_hash.is_none() {
            self.image_hash = Some(hash.to_string());
        }

        if let Some(incoming) = signals.usable_embedding() {
            let stored = self.embedding_confidence.unwrap_or(f32::MIN);
            if self.embedding.is_none() || incoming.confidence > stored {
                self.embedding = Some(incoming.values.clone());
                self.embedding_model = Some(incoming.model.clone());
                self.embedding_confidence = Some(incoming.confidence);
            }
        }

        let quality = signals.quality_score.clamp(0.0, 1.0);
        if self.quality_score.map_or(true, |q| quality > q) {
            self.quality_score = Some(quality);
        }

        let confidence = confidence.clamp(0.0, 1.0);
        if self.recognition_accuracy.map_or(true, |a| confidence > a) {
            self.recognition_accuracy = Some(confidence);
        }

        if self.barcode.is_none() {
            self.barcode = signals.barcode_value().map(str::to_string);
            self.barcode_format = signals.barcode.as_ref().and_then(|b| b.format.clone());
        }
        if self.brand.is_none() {
            self.brand = signals.brand().map(str::to_string);
        }
        if self.model.is_none() {
            self.model = signals.model().map(str::to_string);
        }
        if self.inferred_category.is_none() {
            self.inferred_category = signals.category().map(str::to_string);
        }
        if self.inferred_price_range.is_none() {
            self.inferred_price_range =
                non_blank(&signals.inferred_price_range).map(str::to_string);
        }
        if self.ocr_text.is_none() {
            self.ocr_text = signals.ocr().map(str::to_string);
        }
        merge_unique(&mut self.logos, &signals.logos);
        merge_unique(&mut self.detected_objects, &signals.detected_objects);
        merge_unique(&mut self.inferred_usage_tags, &signals.inferred_usage_tags);

        true
    }
}

/// Persistent catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category_id: i64,
    pub stock: i32,
    pub min_stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition: Option<RecognitionData>,
}

impl Product {
    pub fn image_hash(&self) -> Option<&str> {
        self.recognition.as_ref()?.image_hash.as_deref()
    }

    pub fn barcode(&self) -> Option<&str> {
        self.recognition.as_ref()?.barcode.as_deref()
    }

    pub fn brand(&self) -> Option<&str> {
        self.recognition.as_ref()?.brand.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.recognition.as_ref()?.model.as_deref()
    }

    pub fn inferred_category(&self) -> Option<&str> {
        self.recognition.as_ref()?.inferred_category.as_deref()
    }

    pub fn logos(&self) -> &[String] {
        self.recognition
            .as_ref()
            .map(|r| r.logos.as_slice())
            .unwrap_or(&[])
    }
}

/// Payload for creating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NewProduct {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category_id: i64,
    #[serde(default)]
    pub stock: i32,
    #[serde(default)]
    pub min_stock: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition: Option<RecognitionData>,
}

impl NewProduct {
    /// Enforce the catalog invariants: non-blank name, positive category.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("product name must not be blank".into()));
        }
        if self.category_id <= 0 {
            return Err(Error::InvalidInput(format!(
                "category_id must be positive, got {}",
                self.category_id
            )));
        }
        if self.stock < 0 || self.min_stock < 0 {
            return Err(Error::InvalidInput("stock levels must not be negative".into()));
        }
        Ok(())
    }
}

/// Caller-supplied fallback fields used when an image creates a new product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProductDraft {
    /// Product name; derived from brand/model when blank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category_id: i64,
    #[serde(default)]
    pub initial_stock: i32,
    #[serde(default)]
    pub min_stock: i32,
}

impl ProductDraft {
    pub fn new(category_id: i64) -> Self {
        Self {
            category_id,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_stock(mut self, initial_stock: i32, min_stock: i32) -> Self {
        self.initial_stock = initial_stock;
        self.min_stock = min_stock;
        self
    }

    /// Build the creation payload, naming the product from the signals when
    /// the draft carries no name.
    pub fn into_new_product(
        self,
        signals: &RecognitionSignals,
        recognition: RecognitionData,
    ) -> NewProduct {
        let name = non_blank(&self.name)
            .map(str::to_string)
            .or_else(|| match (signals.brand(), signals.model()) {
                (Some(brand), Some(model)) => Some(format!("{} {}", brand, model)),
                (Some(brand), None) => Some(brand.to_string()),
                (None, Some(model)) => Some(model.to_string()),
                (None, None) => None,
            })
            .unwrap_or_else(|| defaults::UNNAMED_PRODUCT.to_string());

        NewProduct {
            name,
            description: self.description,
            category_id: self.category_id,
            stock: self.initial_stock,
            min_stock: self.min_stock,
            recognition: Some(recognition),
        }
    }
}

/// Result of a nearest-neighbor lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SimilarProduct {
    pub product: Product,
    /// Cosine similarity (0.0-1.0)
    pub similarity: f32,
}

// =============================================================================
// MATCH TYPES
// =============================================================================

/// Tier or combination that produced a candidate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    ExactBarcode,
    ExactHash,
    BrandModel,
    VisionMatch,
    VectorSimilarity,
    TagCategory,
    MultiFactor,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactBarcode => "EXACT_BARCODE",
            Self::ExactHash => "EXACT_HASH",
            Self::BrandModel => "BRAND_MODEL",
            Self::VisionMatch => "VISION_MATCH",
            Self::VectorSimilarity => "VECTOR_SIMILARITY",
            Self::TagCategory => "TAG_CATEGORY",
            Self::MultiFactor => "MULTI_FACTOR",
        }
    }

    /// Barcode and hash matches represent certainty, not probability.
    pub fn is_certainty(&self) -> bool {
        matches!(self, Self::ExactBarcode | Self::ExactHash)
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXACT_BARCODE" => Ok(Self::ExactBarcode),
            "EXACT_HASH" => Ok(Self::ExactHash),
            "BRAND_MODEL" => Ok(Self::BrandModel),
            "VISION_MATCH" => Ok(Self::VisionMatch),
            "VECTOR_SIMILARITY" => Ok(Self::VectorSimilarity),
            "TAG_CATEGORY" => Ok(Self::TagCategory),
            "MULTI_FACTOR" => Ok(Self::MultiFactor),
            other => Err(Error::InvalidInput(format!("Invalid match type: {}", other))),
        }
    }
}

/// One candidate produced by a matching tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct IdentificationMatch {
    pub product: Product,
    pub confidence: f32,
    pub match_type: MatchType,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, JsonValue>,
}

impl IdentificationMatch {
    pub fn new(
        product: Product,
        confidence: f32,
        match_type: MatchType,
        details: impl Into<String>,
    ) -> Self {
        Self {
            product,
            confidence,
            match_type,
            details: details.into(),
            similarity_score: None,
            metadata: Map::new(),
        }
    }

    pub fn with_similarity(mut self, similarity: f32) -> Self {
        self.similarity_score = Some(similarity);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// IDENTIFICATION OUTCOME TYPES
// =============================================================================

/// Terminal status of one identification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentificationStatus {
    Identified,
    PartialMatch,
    NewProductCreated,
    MultipleMatches,
    Error,
}

impl IdentificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identified => "IDENTIFIED",
            Self::PartialMatch => "PARTIAL_MATCH",
            Self::NewProductCreated => "NEW_PRODUCT_CREATED",
            Self::MultipleMatches => "MULTIPLE_MATCHES",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for IdentificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single identification.
///
/// `Pending → Extracted → Matched → Resolved → [Validated]`. Transitions only
/// move forward; nothing leaves `Validated`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationStage {
    Pending,
    Extracted,
    Matched,
    Resolved,
    Validated,
}

impl IdentificationStage {
    /// Whether `next` is a legal transition from this stage.
    pub fn can_advance_to(&self, next: IdentificationStage) -> bool {
        *self != Self::Validated && next > *self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Validated)
    }
}

/// Outcome of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProductIdentificationResult {
    pub identification_id: Uuid,
    pub status: IdentificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
    pub is_existing: bool,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    pub requires_validation: bool,
    pub details: String,
    #[serde(default)]
    pub alternative_matches: Vec<IdentificationMatch>,
    pub processing_time_ms: u64,
    pub stage: IdentificationStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, JsonValue>,
}

impl ProductIdentificationResult {
    /// An `ERROR` outcome: no product, zero confidence, review required.
    pub fn error(identification_id: Uuid, stage: IdentificationStage, details: impl Into<String>) -> Self {
        Self {
            identification_id,
            status: IdentificationStatus::Error,
            product: None,
            is_existing: false,
            confidence: 0.0,
            match_type: None,
            requires_validation: true,
            details: details.into(),
            alternative_matches: Vec::new(),
            processing_time_ms: 0,
            stage,
            image_hash: None,
            metadata: Map::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == IdentificationStatus::Error
    }
}

// =============================================================================
// THRESHOLD CONFIG
// =============================================================================

/// Versioned threshold tuning object. At most one is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct IdentificationThresholdConfig {
    /// Zero until persisted
    pub id: i64,
    pub barcode_threshold: f32,
    pub hash_threshold: f32,
    pub brand_model_threshold: f32,
    pub vision_match_threshold: f32,
    pub vector_similarity_threshold: f32,
    pub tag_category_threshold: f32,
    pub auto_approve_threshold: f32,
    pub manual_validation_threshold: f32,
    pub total_identifications: i64,
    pub correct_identifications: i64,
    pub false_positives: i64,
    pub false_negatives: i64,
    pub accuracy: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_training_at: Option<DateTime<Utc>>,
    pub training_samples: i64,
    pub model_version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for IdentificationThresholdConfig {
    fn default() -> Self {
        Self {
            id: 0,
            barcode_threshold: defaults::BARCODE_THRESHOLD,
            hash_threshold: defaults::HASH_THRESHOLD,
            brand_model_threshold: defaults::BRAND_MODEL_THRESHOLD,
            vision_match_threshold: defaults::VISION_MATCH_THRESHOLD,
            vector_similarity_threshold: defaults::VECTOR_SIMILARITY_THRESHOLD,
            tag_category_threshold: defaults::TAG_CATEGORY_THRESHOLD,
            auto_approve_threshold: defaults::AUTO_APPROVE_THRESHOLD,
            manual_validation_threshold: defaults::MANUAL_VALIDATION_THRESHOLD,
            total_identifications: 0,
            correct_identifications: 0,
            false_positives: 0,
            false_negatives: 0,
            accuracy: 0.0,
            last_training_at: None,
            training_samples: 0,
            model_version: defaults::THRESHOLD_MODEL_VERSION.to_string(),
            is_active: false,
            created_at: Utc::now(),
        }
    }
}

impl IdentificationThresholdConfig {
    /// Every threshold must lie in [0, 1] and manual validation must not
    /// exceed auto-approve.
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("barcode_threshold", self.barcode_threshold),
            ("hash_threshold", self.hash_threshold),
            ("brand_model_threshold", self.brand_model_threshold),
            ("vision_match_threshold", self.vision_match_threshold),
            ("vector_similarity_threshold", self.vector_similarity_threshold),
            ("tag_category_threshold", self.tag_category_threshold),
            ("auto_approve_threshold", self.auto_approve_threshold),
            ("manual_validation_threshold", self.manual_validation_threshold),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.manual_validation_threshold > self.auto_approve_threshold {
            return Err(Error::InvalidInput(format!(
                "manual_validation_threshold ({}) exceeds auto_approve_threshold ({})",
                self.manual_validation_threshold, self.auto_approve_threshold
            )));
        }
        if self.model_version.trim().is_empty() {
            return Err(Error::InvalidInput("model_version must not be blank".into()));
        }
        Ok(())
    }

    /// Minimum confidence a candidate of this tier needs to win its tier.
    pub fn tier_threshold(&self, match_type: MatchType) -> f32 {
        match match_type {
            MatchType::ExactBarcode => self.barcode_threshold,
            MatchType::ExactHash => self.hash_threshold,
            MatchType::BrandModel => self.brand_model_threshold,
            MatchType::VisionMatch => self.vision_match_threshold,
            MatchType::VectorSimilarity => self.vector_similarity_threshold,
            MatchType::TagCategory => self.tag_category_threshold,
            MatchType::MultiFactor => self.manual_validation_threshold,
        }
    }

    /// Auto-approve cutoff for a tier.
    ///
    /// Certainty tiers use their own threshold when it is lower than the
    /// global one, so raising the global cutoff for probabilistic tiers does
    /// not push barcode/hash matches into review.
    pub fn effective_auto_approve(&self, match_type: MatchType) -> f32 {
        match match_type {
            MatchType::ExactBarcode => self.auto_approve_threshold.min(self.barcode_threshold),
            MatchType::ExactHash => self.auto_approve_threshold.min(self.hash_threshold),
            _ => self.auto_approve_threshold,
        }
    }
}

// =============================================================================
// VALIDATION FEEDBACK
// =============================================================================

/// Classification of a human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionType {
    Correct,
    /// Suggested an existing product, but the image was something else
    FalsePositive,
    /// Failed to suggest an existing product that did match
    FalseNegative,
    /// Correct, with refined product details
    Improved,
}

impl CorrectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "CORRECT",
            Self::FalsePositive => "FALSE_POSITIVE",
            Self::FalseNegative => "FALSE_NEGATIVE",
            Self::Improved => "IMPROVED",
        }
    }
}

impl fmt::Display for CorrectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorrectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CORRECT" => Ok(Self::Correct),
            "FALSE_POSITIVE" => Ok(Self::FalsePositive),
            "FALSE_NEGATIVE" => Ok(Self::FalseNegative),
            "IMPROVED" => Ok(Self::Improved),
            other => Err(Error::InvalidInput(format!(
                "Invalid correction type: {}",
                other
            ))),
        }
    }
}

/// Where a validation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationSource {
    Sale,
    Stock,
    Manual,
}

impl ValidationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Stock => "STOCK",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for ValidationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALE" => Ok(Self::Sale),
            "STOCK" => Ok(Self::Stock),
            "MANUAL" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "Invalid validation source: {}",
                other
            ))),
        }
    }
}

/// Append-only feedback record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ProductIdentificationValidation {
    pub id: i64,
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_product_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_product_id: Option<i64>,
    pub confidence_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    pub was_correct: bool,
    pub correction_type: CorrectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<String>,
    pub validated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub source: ValidationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<i64>,
}

/// Payload for recording a human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NewValidation {
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_product_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_product_id: Option<i64>,
    pub confidence_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    pub was_correct: bool,
    pub correction_type: CorrectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub source: ValidationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<i64>,
}

impl NewValidation {
    /// Feedback for an identification, pre-filled from its result.
    pub fn for_result(
        result: &ProductIdentificationResult,
        correction_type: CorrectionType,
        source: ValidationSource,
    ) -> Self {
        Self {
            image_hash: result.image_hash.clone().unwrap_or_default(),
            suggested_product_id: result.product.as_ref().map(|p| p.id),
            actual_product_id: result.product.as_ref().map(|p| p.id),
            confidence_score: result.confidence,
            match_type: result.match_type,
            similarity_score: None,
            was_correct: matches!(
                correction_type,
                CorrectionType::Correct | CorrectionType::Improved
            ),
            correction_type,
            validated_by: None,
            feedback: None,
            source,
            sale_id: None,
            stock_id: None,
        }
    }

    pub fn with_actual_product(mut self, product_id: Option<i64>) -> Self {
        self.actual_product_id = product_id;
        self
    }

    pub fn with_validator(mut self, validated_by: impl Into<String>) -> Self {
        self.validated_by = Some(validated_by.into());
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_hash.trim().is_empty() {
            return Err(Error::InvalidInput("image_hash must not be blank".into()));
        }
        if !self.confidence_score.is_finite() || !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(Error::InvalidInput(format!(
                "confidence_score must be within [0, 1], got {}",
                self.confidence_score
            )));
        }
        if let Some(similarity) = self.similarity_score {
            if !similarity.is_finite() || !(0.0..=1.0).contains(&similarity) {
                return Err(Error::InvalidInput(format!(
                    "similarity_score must be within [0, 1], got {}",
                    similarity
                )));
            }
        }
        match (self.correction_type, self.was_correct) {
            (CorrectionType::Correct, false) => Err(Error::InvalidInput(
                "CORRECT validation must have was_correct = true".into(),
            )),
            (CorrectionType::FalsePositive | CorrectionType::FalseNegative, true) => {
                Err(Error::InvalidInput(format!(
                    "{} validation must have was_correct = false",
                    self.correction_type
                )))
            }
            _ => Ok(()),
        }
    }

    /// Materialize the stored record.
    pub fn into_validation(self, id: i64, validated_at: DateTime<Utc>) -> ProductIdentificationValidation {
        ProductIdentificationValidation {
            id,
            image_hash: self.image_hash,
            suggested_product_id: self.suggested_product_id,
            actual_product_id: self.actual_product_id,
            confidence_score: self.confidence_score,
            match_type: self.match_type,
            similarity_score: self.similarity_score,
            was_correct: self.was_correct,
            correction_type: self.correction_type,
            validated_by: self.validated_by,
            validated_at,
            feedback: self.feedback,
            source: self.source,
            sale_id: self.sale_id,
            stock_id: self.stock_id,
        }
    }
}

/// Accuracy summary over the feedback log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AccuracyMetrics {
    pub total: i64,
    pub correct: i64,
    /// Correct with refined details; included in `correct`
    pub improved: i64,
    pub false_positives: i64,
    pub false_negatives: i64,
    /// correct / total, 0.0 when total is 0
    pub accuracy: f32,
}

impl AccuracyMetrics {
    pub fn from_counts(
        total: i64,
        correct: i64,
        improved: i64,
        false_positives: i64,
        false_negatives: i64,
    ) -> Self {
        Self {
            total,
            correct,
            improved,
            false_positives,
            false_negatives,
            accuracy: compute_accuracy(correct, total),
        }
    }

    /// Tally a slice of validations.
    pub fn from_validations(validations: &[ProductIdentificationValidation]) -> Self {
        let total = validations.len() as i64;
        let correct = validations.iter().filter(|v| v.was_correct).count() as i64;
        let improved = validations
            .iter()
            .filter(|v| v.correction_type == CorrectionType::Improved)
            .count() as i64;
        let false_positives = validations
            .iter()
            .filter(|v| v.correction_type == CorrectionType::FalsePositive)
            .count() as i64;
        let false_negatives = validations
            .iter()
            .filter(|v| v.correction_type == CorrectionType::FalseNegative)
            .count() as i64;
        Self::from_counts(total, correct, improved, false_positives, false_negatives)
    }
}

// =============================================================================
// MULTI-OBJECT DETECTION
// =============================================================================

/// Axis-aligned bounding box in source image pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One object found by an object detector, with its cropped image bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub bounding_box: BoundingBox,
    /// Detector confidence (0.0-1.0)
    pub confidence: f32,
    pub image: Vec<u8>,
}

/// Identification outcome for one detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DetectedProductMatch {
    pub object_index: usize,
    pub label: String,
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    pub status: IdentificationStatus,
    pub detection_confidence: f32,
    pub identification_confidence: f32,
    /// detection_confidence × identification_confidence
    pub combined_confidence: f32,
}

/// Repeated detections of the same product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DetectedProductGroup {
    pub product: Product,
    pub quantity: usize,
    pub average_confidence: f32,
    pub detections: Vec<DetectedProductMatch>,
    pub is_confirmed: bool,
}

/// Result of a multi-object image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MultipleProductDetectionResult {
    pub groups: Vec<DetectedProductGroup>,
    pub matches: Vec<DetectedProductMatch>,
    pub total_detections: usize,
    pub unique_products: usize,
    pub unmatched_detections: usize,
    pub requires_validation: bool,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals_with_embedding(hash: &str, confidence: f32) -> RecognitionSignals {
        RecognitionSignals {
            embedding: Some(EmbeddingVector::new(vec![0.1, 0.2], "clip", confidence)),
            quality_score: confidence,
            ..RecognitionSignals::new(hash)
        }
    }

    #[test]
    fn test_compute_accuracy() {
        assert_eq!(compute_accuracy(0, 0), 0.0);
        assert!((compute_accuracy(7, 10) - 0.70).abs() < 1e-6);
        assert_eq!(compute_accuracy(12, 10), 1.0);
        assert_eq!(compute_accuracy(5, -1), 0.0);
    }

    #[test]
    fn test_signals_usable_detection() {
        let empty = RecognitionSignals::default();
        assert!(!empty.has_any_usable_signal());

        let blank_fields = RecognitionSignals {
            brand: Some("   ".into()),
            barcode: Some(DetectedBarcode {
                value: " ".into(),
                format: None,
            }),
            embedding: Some(EmbeddingVector::new(vec![], "clip", 0.9)),
            ..Default::default()
        };
        assert!(!blank_fields.has_any_usable_signal());

        let tags_only = RecognitionSignals {
            inferred_usage_tags: vec!["kitchen".into()],
            ..Default::default()
        };
        assert!(tags_only.has_any_usable_signal());
        assert!(RecognitionSignals::new("sha256:abc").has_any_usable_signal());
    }

    #[test]
    fn test_brand_and_model_requires_both() {
        let mut signals = RecognitionSignals::new("h");
        signals.brand = Some("Acme".into());
        assert!(signals.brand_and_model().is_none());
        signals.model = Some(" X1 ".into());
        assert_eq!(signals.brand_and_model(), Some(("Acme", "X1")));
    }

    #[test]
    fn test_overall_confidence_falls_back_to_quality() {
        let mut signals = RecognitionSignals::new("h");
        signals.quality_score = 0.4;
        assert!((signals.overall_confidence() - 0.4).abs() < 1e-6);

        signals.confidence_breakdown.insert("vision".into(), 0.8);
        signals.confidence_breakdown.insert("embedding".into(), 0.6);
        assert!((signals.overall_confidence() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_refine_never_downgrades_embedding() {
        let now = Utc::now();
        let mut data = RecognitionData::from_signals(&signals_with_embedding("h1", 0.9), 0.9, now);

        let changed = data.refine_with(&signals_with_embedding("h2", 0.5), 0.5, now);
        assert!(changed);
        assert_eq!(data.embedding_confidence, Some(0.9));
        assert_eq!(data.quality_score, Some(0.9));
        assert_eq!(data.recognition_accuracy, Some(0.9));
        assert_eq!(data.recognition_count, 2);
    }

    #[test]
    fn test_refine_upgrades_on_higher_confidence() {
        let now = Utc::now();
        let mut data = RecognitionData::from_signals(&signals_with_embedding("h1", 0.6), 0.6, now);
        let mut better = signals_with_embedding("h2", 0.95);
        better.embedding = Some(EmbeddingVector::new(vec![0.9, 0.9], "clip", 0.95));

        assert!(data.refine_with(&better, 0.95, now));
        assert_eq!(data.embedding, Some(vec![0.9, 0.9]));
        assert_eq!(data.embedding_confidence, Some(0.95));
        assert_eq!(data.image_hash.as_deref(), Some("h1"));
        assert_eq!(data.last_recognition_hash.as_deref(), Some("h2"));
    }

    #[test]
    fn test_refine_replay_is_noop() {
        let now = Utc::now();
        let signals = signals_with_embedding("h1", 0.7);
        let mut data = RecognitionData::from_signals(&signals, 0.7, now);

        assert!(!data.refine_with(&signals, 0.7, now));
        assert_eq!(data.recognition_count, 1);

        let second = signals_with_embedding("h2", 0.7);
        assert!(data.refine_with(&second, 0.7, now));
        assert!(!data.refine_with(&second, 0.7, now));
        assert_eq!(data.recognition_count, 2);
    }

    #[test]
    fn test_refine_fills_and_unions_fields() {
        let now = Utc::now();
        let mut data = RecognitionData::from_signals(&RecognitionSignals::new("h1"), 0.7, now);
        data.logos = vec!["Acme".into()];

        let incoming = RecognitionSignals {
            brand: Some("Acme".into()),
            logos: vec!["ACME".into(), "Bolt".into()],
            inferred_usage_tags: vec!["tools".into(), " ".into()],
            ..RecognitionSignals::new("h2")
        };
        data.refine_with(&incoming, 0.7, now);

        assert_eq!(data.brand.as_deref(), Some("Acme"));
        assert_eq!(data.logos, vec!["Acme".to_string(), "Bolt".to_string()]);
        assert_eq!(data.inferred_usage_tags, vec!["tools".to_string()]);
    }

    #[test]
    fn test_new_product_validation() {
        let mut product = NewProduct {
            name: "Cordless drill".into(),
            description: None,
            category_id: 3,
            stock: 0,
            min_stock: 0,
            recognition: None,
        };
        assert!(product.validate().is_ok());

        product.name = "  ".into();
        assert!(product.validate().is_err());

        product.name = "Drill".into();
        product.category_id = 0;
        assert!(product.validate().is_err());
    }

    #[test]
    fn test_draft_naming() {
        let mut signals = RecognitionSignals::new("h");
        signals.brand = Some("Acme".into());
        signals.model = Some("X1".into());

        let named = ProductDraft::new(2).with_name("Custom").into_new_product(
            &signals,
            RecognitionData::default(),
        );
        assert_eq!(named.name, "Custom");

        let derived = ProductDraft::new(2).into_new_product(&signals, RecognitionData::default());
        assert_eq!(derived.name, "Acme X1");

        let unnamed = ProductDraft::new(2)
            .into_new_product(&RecognitionSignals::new("h"), RecognitionData::default());
        assert_eq!(unnamed.name, defaults::UNNAMED_PRODUCT);
    }

    #[test]
    fn test_match_type_round_trip_strings() {
        for mt in [
            MatchType::ExactBarcode,
            MatchType::ExactHash,
            MatchType::BrandModel,
            MatchType::VisionMatch,
            MatchType::VectorSimilarity,
            MatchType::TagCategory,
            MatchType::MultiFactor,
        ] {
            assert_eq!(mt.as_str().parse::<MatchType>().unwrap(), mt);
            let json = serde_json::to_string(&mt).unwrap();
            assert_eq!(json, format!("\"{}\"", mt.as_str()));
        }
        assert!("FUZZY".parse::<MatchType>().is_err());
    }

    #[test]
    fn test_stage_transitions_forward_only() {
        use IdentificationStage::*;
        assert!(Pending.can_advance_to(Extracted));
        assert!(Extracted.can_advance_to(Resolved));
        assert!(Resolved.can_advance_to(Validated));
        assert!(!Resolved.can_advance_to(Matched));
        assert!(!Validated.can_advance_to(Validated));
        assert!(Resolved.is_terminal());
        assert!(!Matched.is_terminal());
    }

    #[test]
    fn test_threshold_config_defaults_valid() {
        let config = IdentificationThresholdConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_active);
        assert_eq!(config.model_version, defaults::THRESHOLD_MODEL_VERSION);
    }

    #[test]
    fn test_threshold_config_rejects_inverted_thresholds() {
        let config = IdentificationThresholdConfig {
            manual_validation_threshold: 0.95,
            auto_approve_threshold: 0.90,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let out_of_range = IdentificationThresholdConfig {
            vector_similarity_threshold: 1.2,
            ..Default::default()
        };
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_effective_auto_approve_keeps_certainty_tiers() {
        let config = IdentificationThresholdConfig {
            auto_approve_threshold: 0.99,
            barcode_threshold: 0.95,
            hash_threshold: 0.98,
            ..Default::default()
        };
        assert_eq!(config.effective_auto_approve(MatchType::ExactBarcode), 0.95);
        assert_eq!(config.effective_auto_approve(MatchType::ExactHash), 0.98);
        assert_eq!(config.effective_auto_approve(MatchType::VectorSimilarity), 0.99);
    }

    #[test]
    fn test_new_validation_consistency() {
        let base = NewValidation {
            image_hash: "sha256:abc".into(),
            suggested_product_id: Some(1),
            actual_product_id: Some(1),
            confidence_score: 0.8,
            match_type: Some(MatchType::VisionMatch),
            similarity_score: None,
            was_correct: true,
            correction_type: CorrectionType::Correct,
            validated_by: None,
            feedback: None,
            source: ValidationSource::Manual,
            sale_id: None,
            stock_id: None,
        };
        assert!(base.validate().is_ok());

        let inconsistent = NewValidation {
            was_correct: true,
            correction_type: CorrectionType::FalsePositive,
            ..base.clone()
        };
        assert!(inconsistent.validate().is_err());

        let bad_confidence = NewValidation {
            confidence_score: 1.5,
            ..base.clone()
        };
        assert!(bad_confidence.validate().is_err());

        let blank_hash = NewValidation {
            image_hash: " ".into(),
            ..base
        };
        assert!(blank_hash.validate().is_err());
    }

    #[test]
    fn test_accuracy_metrics_from_validations() {
        let now = Utc::now();
        let make = |i: i64, correction: CorrectionType| {
            NewValidation {
                image_hash: format!("h{}", i),
                suggested_product_id: None,
                actual_product_id: None,
                confidence_score: 0.5,
                match_type: None,
                similarity_score: None,
                was_correct: matches!(correction, CorrectionType::Correct | CorrectionType::Improved),
                correction_type: correction,
                validated_by: None,
                feedback: None,
                source: ValidationSource::Stock,
                sale_id: None,
                stock_id: None,
            }
            .into_validation(i, now)
        };
        let validations = vec![
            make(1, CorrectionType::Correct),
            make(2, CorrectionType::Improved),
            make(3, CorrectionType::FalsePositive),
            make(4, CorrectionType::FalseNegative),
        ];
        let metrics = AccuracyMetrics::from_validations(&validations);
        assert_eq!(metrics.total, 4);
        assert_eq!(metrics.correct, 2);
        assert_eq!(metrics.improved, 1);
        assert_eq!(metrics.false_positives, 1);
        assert_eq!(metrics.false_negatives, 1);
        assert!((metrics.accuracy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_error_result_shape() {
        let result = ProductIdentificationResult::error(
            Uuid::nil(),
            IdentificationStage::Pending,
            "image payload is empty",
        );
        assert!(result.is_error());
        assert!(result.requires_validation);
        assert!(result.product.is_none());
        assert_eq!(result.confidence, 0.0);
    }
}
