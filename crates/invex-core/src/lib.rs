//! # invex-core
//!
//! Core types, traits, and abstractions for invex product identification.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other invex crates depend on.

pub mod defaults;
pub mod error;
pub mod image;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types
pub use error::{Error, Result};
pub use image::{compute_image_hash, detect_image_mime};
pub use models::*;
pub use traits::*;
