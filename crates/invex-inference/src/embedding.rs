//! Image embedding backends.
//!
//! Image embeddings come from a sidecar service (e.g. a CLIP server) that
//! accepts a base64 image and returns one vector:
//!
//! ```text
//! POST {INVEX_EMBED_URL}
//! {"model": "clip-vit-b-32", "image": "<base64>", "mime_type": "image/jpeg"}
//! -> {"embedding": [0.1, ...], "model": "clip-vit-b-32", "confidence": 0.93}
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use invex_core::{EmbeddingVector, Error, Result};

use crate::config::ExtractorConfig;

/// Confidence assumed when the sidecar does not report one.
const DEFAULT_EMBEDDING_CONFIDENCE: f32 = 0.9;

/// Backend producing an embedding vector for an image.
#[async_trait]
pub trait ImageEmbeddingBackend: Send + Sync {
    /// Embed one image.
    async fn embed_image(&self, image_data: &[u8], mime_type: &str) -> Result<EmbeddingVector>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// HTTP client for an image embedding sidecar.
pub struct HttpImageEmbedder {
    url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageEmbedder {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(invex_core::defaults::EXTRACT_TIMEOUT_SECS),
        }
    }

    /// Create from config. Returns None when no embedding endpoint is configured.
    pub fn from_config(config: &ExtractorConfig) -> Option<Self> {
        let url = config.embed_url.clone()?;
        Some(Self::new(url, config.embed_model.clone()).with_timeout(config.timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct EmbedImageRequest<'a> {
    model: &'a str,
    image: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedImageResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[async_trait]
impl ImageEmbeddingBackend for HttpImageEmbedder {
    async fn embed_image(&self, image_data: &[u8], mime_type: &str) -> Result<EmbeddingVector> {
        use base64::Engine;
        let start = Instant::now();

        let request = EmbedImageRequest {
            model: &self.model,
            image: base64::engine::general_purpose::STANDARD.encode(image_data),
            mime_type,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Extraction(format!(
                "Embedding service returned {}: {}",
                status, body
            )));
        }

        let result: EmbedImageResponse = response.json().await.map_err(|e| {
            Error::Extraction(format!("Failed to parse embedding response: {}", e))
        })?;

        if result.embedding.is_empty() || result.embedding.iter().any(|v| !v.is_finite()) {
            return Err(Error::Extraction(
                "Embedding service returned an empty or non-finite vector".to_string(),
            ));
        }

        let model = result.model.unwrap_or_else(|| self.model.clone());
        let confidence = result
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_EMBEDDING_CONFIDENCE);

        debug!(
            subsystem = "inference",
            component = "embedding",
            op = "embed_image",
            model = %model,
            dimension = result.embedding.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Image embedded"
        );
        Ok(EmbeddingVector::new(result.embedding, model, confidence))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_url() {
        assert!(HttpImageEmbedder::from_config(&ExtractorConfig::default()).is_none());

        let config = ExtractorConfig::default()
            .with_embed_url("http://clip:8091/embed")
            .with_embed_model("siglip");
        let embedder = HttpImageEmbedder::from_config(&config).unwrap();
        assert_eq!(embedder.url, "http://clip:8091/embed");
        assert_eq!(embedder.model_name(), "siglip");
    }

    #[test]
    fn test_response_defaults() {
        let response: EmbedImageResponse =
            serde_json::from_str(r#"{"embedding": [0.5, 0.5]}"#).unwrap();
        assert_eq!(response.embedding, vec![0.5, 0.5]);
        assert!(response.model.is_none());
        assert!(response.confidence.is_none());
    }
}
