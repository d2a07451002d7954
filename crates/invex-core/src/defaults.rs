//! Centralized default constants for invex.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// TIER CONFIDENCES
// =============================================================================

/// Confidence assigned to an exact barcode match.
pub const BARCODE_MATCH_CONFIDENCE: f32 = 0.98;

/// Confidence assigned to an exact image-hash match (same photo re-scanned).
pub const HASH_MATCH_CONFIDENCE: f32 = 1.0;

/// Confidence assigned to a unique brand + model match.
pub const BRAND_MODEL_MATCH_CONFIDENCE: f32 = 0.88;

/// Confidence assigned to a tag/category fallback match.
pub const TAG_CATEGORY_MATCH_CONFIDENCE: f32 = 0.60;

/// Floor of the vision-field agreement score.
pub const VISION_MATCH_BASE_CONFIDENCE: f32 = 0.60;

/// Span added on top of the floor when every vision field agrees.
pub const VISION_MATCH_CONFIDENCE_SPAN: f32 = 0.40;

/// Vision agreement weight: brand.
pub const VISION_WEIGHT_BRAND: f32 = 0.35;

/// Vision agreement weight: model.
pub const VISION_WEIGHT_MODEL: f32 = 0.30;

/// Vision agreement weight: inferred category.
pub const VISION_WEIGHT_CATEGORY: f32 = 0.15;

/// Vision agreement weight: at least one shared logo.
pub const VISION_WEIGHT_LOGOS: f32 = 0.10;

/// Vision agreement weight: OCR text mentions the product name or brand.
pub const VISION_WEIGHT_OCR: f32 = 0.10;

// =============================================================================
// THRESHOLDS (bootstrap config)
// =============================================================================

/// Minimum confidence for a barcode match to be auto-approved.
pub const BARCODE_THRESHOLD: f32 = 0.95;

/// Minimum confidence for a hash match to be auto-approved.
pub const HASH_THRESHOLD: f32 = 0.98;

/// Minimum confidence for the brand + model tier to win.
pub const BRAND_MODEL_THRESHOLD: f32 = 0.85;

/// Minimum confidence for the vision-field tier to win.
pub const VISION_MATCH_THRESHOLD: f32 = 0.70;

/// Minimum cosine similarity for the vector tier.
pub const VECTOR_SIMILARITY_THRESHOLD: f32 = 0.80;

/// Minimum confidence for the tag/category tier to win.
pub const TAG_CATEGORY_THRESHOLD: f32 = 0.60;

/// Confidence at or above which a match needs no human review.
pub const AUTO_APPROVE_THRESHOLD: f32 = 0.90;

/// Confidence below which a candidate is not even offered as a suggestion.
pub const MANUAL_VALIDATION_THRESHOLD: f32 = 0.60;

/// Model version stamped on the bootstrap config.
pub const THRESHOLD_MODEL_VERSION: &str = "v1";

// =============================================================================
// RESOLVER
// =============================================================================

/// Two qualifying candidates closer than this are ambiguous.
pub const AMBIGUITY_MARGIN: f32 = 0.05;

/// Whether a below-threshold best candidate is surfaced as a suggestion
/// instead of being treated as no match.
pub const SURFACE_BEST_EFFORT: bool = false;

// =============================================================================
// RETRAINING
// =============================================================================

/// Validations that must accumulate since the last training before an
/// automatic retraining pass runs.
pub const MIN_TRAINING_SAMPLES: i64 = 50;

/// Maximum threshold shift produced by a window made entirely of one error kind.
pub const RETRAIN_LEARNING_RATE: f32 = 0.10;

/// Sensitivity of certainty tiers (barcode, hash) relative to probabilistic tiers.
pub const CERTAINTY_TIER_SENSITIVITY: f32 = 0.25;

/// Whether the post-validation retraining check runs on a spawned task.
pub const RETRAIN_IN_BACKGROUND: bool = true;

/// Lowest value retraining may assign to any threshold.
pub const THRESHOLD_FLOOR: f32 = 0.30;

/// Highest value retraining may assign to any threshold.
pub const THRESHOLD_CEILING: f32 = 0.99;

/// Minimum distance kept between manual-validation and auto-approve.
pub const MIN_THRESHOLD_GAP: f32 = 0.05;

// =============================================================================
// PIPELINE
// =============================================================================

/// Overall identification timeout in seconds.
pub const IDENTIFY_TIMEOUT_SECS: u64 = 60;

/// Timeout for a single extraction backend call in seconds.
pub const EXTRACT_TIMEOUT_SECS: u64 = 45;

/// Whether unmatched images create a new product by default.
pub const AUTO_CREATE: bool = true;

/// Name used for auto-created products when the caller gives none.
pub const UNNAMED_PRODUCT: &str = "Unidentified product";

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default vision model (Ollama).
pub const VISION_MODEL: &str = "qwen2.5vl:7b";

/// Default image embedding model identifier.
pub const IMAGE_EMBED_MODEL: &str = "clip-vit-b-32";

/// Env var naming the vision model.
pub const ENV_VISION_MODEL: &str = "INVEX_VISION_MODEL";

/// Env var naming the image embedding endpoint.
pub const ENV_EMBED_URL: &str = "INVEX_EMBED_URL";

/// Env var naming the image embedding model.
pub const ENV_EMBED_MODEL: &str = "INVEX_EMBED_MODEL";

/// Env var naming the object detection endpoint.
pub const ENV_DETECT_URL: &str = "INVEX_DETECT_URL";

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum pool connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;
