//! Mock extraction and detection backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use invex_inference::mock::{MockEmbeddingGenerator, MockSignalExtractor};
//!
//! #[tokio::test]
//! async fn identifies_by_barcode() {
//!     let extractor = MockSignalExtractor::new()
//!         .with_barcode(b"photo-1", "4006381333931")
//!         .with_embedding(b"photo-2", MockEmbeddingGenerator::generate("drill", 64));
//!
//!     let signals = extractor.extract(b"photo-1", None).await.unwrap();
//!     assert_eq!(signals.barcode_value(), Some("4006381333931"));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use invex_core::{
    compute_image_hash, DetectedBarcode, DetectedObject, EmbeddingVector, Error, ObjectDetector,
    RecognitionSignals, Result, SignalExtractor,
};

/// Model id stamped on mock embeddings.
pub const MOCK_EMBED_MODEL: &str = "mock-embed";

/// Recorded call for assertions.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub image_hash: String,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    /// Preset signals keyed by image hash.
    signals: HashMap<String, RecognitionSignals>,
    latency: Duration,
    fail_all: bool,
    failing: Vec<String>,
}

/// SignalExtractor returning preset signals per image.
///
/// Unknown images yield hash-only signals, so every image still carries its
/// deterministic content hash.
#[derive(Clone, Default)]
pub struct MockSignalExtractor {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockSignalExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the signals returned for `image`. The image hash is always
    /// recomputed from the bytes.
    pub fn with_signals(mut self, image: &[u8], signals: RecognitionSignals) -> Self {
        let hash = compute_image_hash(image);
        let signals = RecognitionSignals {
            image_hash: hash.clone(),
            ..signals
        };
        Arc::make_mut(&mut self.config).signals.insert(hash, signals);
        self
    }

    fn edit(mut self, image: &[u8], f: impl FnOnce(&mut RecognitionSignals)) -> Self {
        let hash = compute_image_hash(image);
        let entry = Arc::make_mut(&mut self.config)
            .signals
            .entry(hash.clone())
            .or_insert_with(|| RecognitionSignals::new(hash));
        f(entry);
        self
    }

    pub fn with_barcode(self, image: &[u8], barcode: impl Into<String>) -> Self {
        let value = barcode.into();
        self.edit(image, |s| {
            s.barcode = Some(DetectedBarcode {
                value,
                format: Some("EAN-13".to_string()),
            })
        })
    }

    pub fn with_brand_model(
        self,
        image: &[u8],
        brand: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let (brand, model) = (brand.into(), model.into());
        self.edit(image, |s| {
            s.brand = Some(brand);
            s.model = Some(model);
        })
    }

    pub fn with_embedding(self, image: &[u8], values: Vec<f32>) -> Self {
        self.edit(image, |s| {
            s.embedding = Some(EmbeddingVector::new(values, MOCK_EMBED_MODEL, 0.9));
            s.confidence_breakdown.insert("embedding".to_string(), 0.9);
        })
    }

    pub fn with_tags(self, image: &[u8], tags: &[&str], category: Option<&str>) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let category = category.map(str::to_string);
        self.edit(image, |s| {
            s.inferred_usage_tags = tags;
            s.inferred_category = category;
        })
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Fail every extraction.
    pub fn failing(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_all = true;
        self
    }

    /// Fail extractions of one specific image.
    pub fn failing_for(mut self, image: &[u8]) -> Self {
        Arc::make_mut(&mut self.config)
            .failing
            .push(compute_image_hash(image));
        self
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.call_log.lock().unwrap().clear()
    }

    fn log_call(&self, operation: &str, image_hash: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation: operation.to_string(),
            image_hash: image_hash.to_string(),
            timestamp: Instant::now(),
        });
    }
}

#[async_trait]
impl SignalExtractor for MockSignalExtractor {
    async fn extract(&self, image: &[u8], _format: Option<&str>) -> Result<RecognitionSignals> {
        let hash = compute_image_hash(image);
        self.log_call("extract", &hash);
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.config.fail_all || self.config.failing.contains(&hash) {
            return Err(Error::Extraction("simulated extraction failure".into()));
        }
        let mut signals = self
            .config
            .signals
            .get(&hash)
            .cloned()
            .unwrap_or_else(|| RecognitionSignals::new(hash));
        if signals.quality_score == 0.0 {
            signals.quality_score = 0.8;
        }
        Ok(signals)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// ObjectDetector returning a fixed list of objects for every image.
#[derive(Clone, Default)]
pub struct MockObjectDetector {
    objects: Arc<Vec<DetectedObject>>,
    fail: bool,
}

impl MockObjectDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one detected object whose crop is `crop`.
    pub fn with_object(mut self, label: impl Into<String>, confidence: f32, crop: &[u8]) -> Self {
        let index = self.objects.len() as f32;
        Arc::make_mut(&mut self.objects).push(DetectedObject {
            label: label.into(),
            bounding_box: invex_core::BoundingBox {
                x: index * 100.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
            confidence,
            image: crop.to_vec(),
        });
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl ObjectDetector for MockObjectDetector {
    async fn detect(&self, _image: &[u8], _format: Option<&str>) -> Result<Vec<DetectedObject>> {
        if self.fail {
            return Err(Error::Extraction("simulated detection failure".into()));
        }
        Ok(self.objects.as_ref().clone())
    }
}

/// Deterministic embedding vectors.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Same text, same unit vector.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    /// Unit vector whose cosine similarity to `base` is exactly `similarity`.
    ///
    /// `base` must be a non-zero vector of dimension at least 2.
    pub fn with_similarity(base: &[f32], similarity: f32) -> Vec<f32> {
        let mut unit = base.to_vec();
        Self::normalize(&mut unit);
        // Gram-Schmidt an axis that is not parallel to `base`.
        let axis = if unit[0].abs() < 0.9 { 0 } else { 1 };
        let mut ortho: Vec<f32> = unit.iter().map(|u| -unit[axis] * u).collect();
        ortho[axis] += 1.0;
        Self::normalize(&mut ortho);

        let s = similarity.clamp(-1.0, 1.0);
        let t = (1.0 - s * s).max(0.0).sqrt();
        unit.iter().zip(&ortho).map(|(u, o)| s * u + t * o).collect()
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag_a > 0.0 && mag_b > 0.0 {
            dot / (mag_a * mag_b)
        } else {
            0.0
        }
    }
}
