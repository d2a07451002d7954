//! # invex-inference
//!
//! Signal extraction backends for invex.
//!
//! This crate provides:
//! - Ollama vision backend reading brand, model, OCR text, logos and tags
//! - HTTP image embedding client
//! - HTTP object detection client for multi-product photos
//! - `PipelineSignalExtractor`, running vision and embedding concurrently
//! - Mock extractor and detector (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use invex_inference::{ExtractorConfig, PipelineSignalExtractor};
//! use invex_core::SignalExtractor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = PipelineSignalExtractor::from_config(&ExtractorConfig::from_env())?;
//!     let signals = extractor.extract(&std::fs::read("drill.jpg")?, Some("jpg")).await?;
//!     println!("{:?}", signals.brand);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detection;
pub mod embedding;
pub mod extractor;
pub mod vision;

// Mock backends for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::ExtractorConfig;
pub use detection::HttpObjectDetector;
pub use embedding::{HttpImageEmbedder, ImageEmbeddingBackend};
pub use extractor::PipelineSignalExtractor;
pub use vision::{OllamaVisionBackend, VisionAnalysis, VisionBackend};
