//! Object detection client.
//!
//! Talks to a detection sidecar that returns one entry per product instance:
//!
//! ```text
//! POST {INVEX_DETECT_URL}
//! {"image": "<base64>", "mime_type": "image/jpeg"}
//! -> {"objects": [{"label": "bottle", "confidence": 0.91,
//!                  "bbox": {"x": 10, "y": 20, "width": 64, "height": 128},
//!                  "crop": "<base64>"}]}
//! ```
//!
//! When the sidecar omits `crop`, the whole image is used for that object.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use invex_core::{detect_image_mime, BoundingBox, DetectedObject, Error, ObjectDetector, Result};

use crate::config::ExtractorConfig;

/// HTTP implementation of ObjectDetector.
pub struct HttpObjectDetector {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpObjectDetector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(invex_core::defaults::EXTRACT_TIMEOUT_SECS),
        }
    }

    /// Create from config. Returns None when no detection endpoint is configured.
    pub fn from_config(config: &ExtractorConfig) -> Option<Self> {
        let url = config.detect_url.clone()?;
        Some(Self::new(url).with_timeout(config.timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    objects: Vec<DetectedEntry>,
}

#[derive(Deserialize)]
struct DetectedEntry {
    #[serde(default)]
    label: String,
    confidence: f32,
    bbox: BoundingBox,
    #[serde(default)]
    crop: Option<String>,
}

#[async_trait]
impl ObjectDetector for HttpObjectDetector {
    async fn detect(&self, image: &[u8], format: Option<&str>) -> Result<Vec<DetectedObject>> {
        let start = Instant::now();
        let mime_type = detect_image_mime(image, format)?;

        let request = DetectRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            mime_type: &mime_type,
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
                "Detection service returned {}: {}",
                status, body
            )));
        }

        let result: DetectResponse = response.json().await.map_err(|e| {
            Error::Extraction(format!("Failed to parse detection response: {}", e))
        })?;

        let mut objects = Vec::with_capacity(result.objects.len());
        for (index, entry) in result.objects.into_iter().enumerate() {
            if !entry.confidence.is_finite() {
                warn!(
                    subsystem = "inference",
                    component = "detection",
                    object_index = index,
                    "Skipping detection with non-finite confidence"
                );
                continue;
            }
            let crop = match entry.crop {
                Some(encoded) => base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| Error::Extraction(format!("invalid crop for object {}: {}", index, e)))?,
                None => image.to_vec(),
            };
            objects.push(DetectedObject {
                label: entry.label,
                bounding_box: entry.bbox,
                confidence: entry.confidence.clamp(0.0, 1.0),
                image: crop,
            });
        }

        debug!(
            subsystem = "inference",
            component = "detection",
            op = "detect",
            detection_count = objects.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Object detection complete"
        );
        Ok(objects)
    }
}
