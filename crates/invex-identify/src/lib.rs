//! # invex-identify
//!
//! Product identification engine for invex.
//!
//! This crate provides:
//! - A fixed, ordered chain of matching tiers (barcode, hash, brand + model,
//!   vision fields, vector similarity, tags + category)
//! - Confidence resolution against versioned, tunable thresholds
//! - Identify-or-create orchestration with idempotent product creation
//! - Multi-object detection grouped by product
//! - Validation feedback and threshold retraining
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use invex_db::Database;
//! use invex_identify::{IdentificationConfig, IdentificationRequest, ProductIdentificationOrchestrator};
//! use invex_inference::{ExtractorConfig, PipelineSignalExtractor};
//!
//! let db = Database::connect_from_env().await?;
//! let extractor = PipelineSignalExtractor::from_config(&ExtractorConfig::from_env())?;
//! let orchestrator = ProductIdentificationOrchestrator::new(
//!     Arc::new(extractor),
//!     Arc::new(db.products),
//!     Arc::new(db.threshold_configs),
//!     IdentificationConfig::from_env(),
//! );
//!
//! let result = orchestrator
//!     .identify_or_create(IdentificationRequest::new(image_bytes))
//!     .await?;
//! println!("{} {:?}", result.status, result.product.map(|p| p.name));
//! ```

pub mod chain;
pub mod config;
pub mod feedback;
pub mod grouping;
pub mod orchestrator;
pub mod resolver;

// Re-export core types
pub use invex_core::*;

pub use chain::{rank, vision_agreement, ChainOutcome, MatchStrategyChain, MatchTier};
pub use config::IdentificationConfig;
pub use feedback::{next_model_version, retrain_thresholds, ValidationFeedbackLoop};
pub use grouping::{group_matches, MultipleDetectionGrouper};
pub use orchestrator::{IdentificationRequest, ProductIdentificationOrchestrator};
pub use resolver::{resolve, MatchDecision, Resolution, ResolverPolicy};
