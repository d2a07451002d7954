//! Extraction backend configuration.
//!
//! Loaded from environment variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `OLLAMA_URL` | `http://127.0.0.1:11434` |
//! | `INVEX_VISION_MODEL` | `qwen2.5vl:7b` |
//! | `INVEX_EMBED_URL` | unset (no image embeddings) |
//! | `INVEX_EMBED_MODEL` | `clip-vit-b-32` |
//! | `INVEX_DETECT_URL` | unset (no object detection) |
//! | `INVEX_EXTRACT_TIMEOUT_SECS` | `45` |

use std::env;
use std::time::Duration;

use invex_core::defaults;
use invex_core::{Error, Result};
use tracing::debug;

/// Env var overriding the per-backend extraction timeout.
pub const ENV_EXTRACT_TIMEOUT_SECS: &str = "INVEX_EXTRACT_TIMEOUT_SECS";

/// Configuration for the extraction backends.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Base URL of the Ollama server hosting the vision model.
    pub ollama_url: String,
    /// Vision model used for brand/model/OCR analysis.
    pub vision_model: String,
    /// Image embedding sidecar endpoint; `None` disables embeddings.
    pub embed_url: Option<String>,
    /// Identifier of the image embedding model.
    pub embed_model: String,
    /// Object detection sidecar endpoint; `None` disables multi-object detection.
    pub detect_url: Option<String>,
    /// Timeout applied to each backend call.
    pub timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ollama_url: defaults::OLLAMA_URL.to_string(),
            vision_model: defaults::VISION_MODEL.to_string(),
            embed_url: None,
            embed_model: defaults::IMAGE_EMBED_MODEL.to_string(),
            detect_url: None,
            timeout: Duration::from_secs(defaults::EXTRACT_TIMEOUT_SECS),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ExtractorConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = non_empty_var("OLLAMA_URL") {
            config.ollama_url = url;
        }
        if let Some(model) = non_empty_var(defaults::ENV_VISION_MODEL) {
            config.vision_model = model;
        }
        config.embed_url = non_empty_var(defaults::ENV_EMBED_URL);
        if let Some(model) = non_empty_var(defaults::ENV_EMBED_MODEL) {
            config.embed_model = model;
        }
        config.detect_url = non_empty_var(defaults::ENV_DETECT_URL);
        if let Some(secs) = non_empty_var(ENV_EXTRACT_TIMEOUT_SECS).and_then(|v| v.parse().ok()) {
            config.timeout = Duration::from_secs(secs);
        }

        debug!(
            subsystem = "inference",
            component = "config",
            vision_model = %config.vision_model,
            embeddings = config.embed_url.is_some(),
            detection = config.detect_url.is_some(),
            "Loaded extractor config from environment"
        );
        config
    }

    pub fn with_ollama_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = url.into();
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    pub fn with_embed_url(mut self, url: impl Into<String>) -> Self {
        self.embed_url = Some(url.into());
        self
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_detect_url(mut self, url: impl Into<String>) -> Self {
        self.detect_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate URLs, model names and the timeout.
    pub fn validate(&self) -> Result<()> {
        check_url("OLLAMA_URL", &self.ollama_url)?;
        if let Some(url) = &self.embed_url {
            check_url(defaults::ENV_EMBED_URL, url)?;
        }
        if let Some(url) = &self.detect_url {
            check_url(defaults::ENV_DETECT_URL, url)?;
        }
        if self.vision_model.trim().is_empty() {
            return Err(Error::Config("vision model cannot be empty".to_string()));
        }
        if self.embed_model.trim().is_empty() {
            return Err(Error::Config("embedding model cannot be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("extraction timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn check_url(name: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must start with http:// or https://, got: {}",
            name, url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExtractorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.embed_url.is_none());
        assert!(config.detect_url.is_none());
        assert_eq!(config.timeout, Duration::from_secs(defaults::EXTRACT_TIMEOUT_SECS));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ExtractorConfig::default()
            .with_ollama_url("http://gpu:11434")
            .with_embed_url("http://clip:8091/embed")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(config.ollama_url, "http://gpu:11434");
        assert_eq!(config.embed_url.as_deref(), Some("http://clip:8091/embed"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ExtractorConfig::default()
            .with_ollama_url("gpu:11434")
            .validate()
            .is_err());
        assert!(ExtractorConfig::default()
            .with_detect_url("ftp://detector")
            .validate()
            .is_err());
        assert!(ExtractorConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ExtractorConfig::default()
            .with_vision_model(" ")
            .validate()
            .is_err());
    }
}
