//! Structured logging schema and field name constants for invex.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query identifications, tiers and stores by the
//! same names everywhere.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, identification and retraining completions |
//! | DEBUG | Decision points: tier outcomes, resolver decisions, config choices |
//! | TRACE | Per-candidate iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID of a single identification run.
/// Format: UUIDv7 (time-ordered).
pub const IDENTIFICATION_ID: &str = "identification_id";

/// Subsystem originating the log event.
/// Values: "identify", "db", "inference", "feedback"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "chain", "resolver", "orchestrator", "grouper", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "identify_or_create", "detect_and_group", "retrain"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Product id being matched, created, or refreshed.
pub const PRODUCT_ID: &str = "product_id";

/// Threshold config id.
pub const CONFIG_ID: &str = "config_id";

/// Content hash of the submitted image.
pub const IMAGE_HASH: &str = "image_hash";

// ─── Matching fields ───────────────────────────────────────────────────────

/// Matching tier that produced the decision.
pub const MATCH_TYPE: &str = "match_type";

/// Terminal identification status.
pub const STATUS: &str = "status";

/// Confidence of the winning candidate.
pub const CONFIDENCE: &str = "confidence";

/// Number of candidates a tier or the chain produced.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Number of objects returned by the object detector.
pub const DETECTION_COUNT: &str = "detection_count";

// ─── Feedback fields ───────────────────────────────────────────────────────

/// Number of validations used by a retraining pass.
pub const SAMPLE_COUNT: &str = "sample_count";

/// Computed accuracy (0.0-1.0).
pub const ACCURACY: &str = "accuracy";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table or entity affected.
pub const DB_TABLE: &str = "db_table";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
