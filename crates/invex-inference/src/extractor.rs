//! Signal extraction pipeline.
//!
//! Runs the vision analysis and the image embedding concurrently and folds
//! both into one `RecognitionSignals`. Either backend may fail on its own;
//! extraction only fails when no backend produced anything.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use invex_core::{
    compute_image_hash, detect_image_mime, DetectedBarcode, Error, RecognitionSignals, Result,
    SignalExtractor,
};

use crate::config::ExtractorConfig;
use crate::embedding::{HttpImageEmbedder, ImageEmbeddingBackend};
use crate::vision::{OllamaVisionBackend, VisionAnalysis, VisionBackend};

/// Confidence assumed for a vision analysis that reports none.
const DEFAULT_VISION_CONFIDENCE: f32 = 0.5;

/// SignalExtractor combining a vision backend and an optional embedder.
pub struct PipelineSignalExtractor {
    vision: Arc<dyn VisionBackend>,
    embedder: Option<Arc<dyn ImageEmbeddingBackend>>,
    timeout: Duration,
}

impl PipelineSignalExtractor {
    pub fn new(vision: Arc<dyn VisionBackend>) -> Self {
        Self {
            vision,
            embedder: None,
            timeout: Duration::from_secs(invex_core::defaults::EXTRACT_TIMEOUT_SECS),
        }
    }

    /// Build the Ollama vision backend and, when configured, the HTTP embedder.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        config.validate()?;
        let mut extractor =
            Self::new(Arc::new(OllamaVisionBackend::from_config(config))).with_timeout(config.timeout);
        if let Some(embedder) = HttpImageEmbedder::from_config(config) {
            extractor = extractor.with_embedder(Arc::new(embedder));
        }
        Ok(extractor)
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn ImageEmbeddingBackend>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_vision(&self, image: &[u8], mime: &str) -> Result<VisionAnalysis> {
        match tokio::time::timeout(self.timeout, self.vision.analyze_product(image, mime)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "vision analysis exceeded {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    async fn run_embedding(
        &self,
        image: &[u8],
        mime: &str,
    ) -> Option<Result<invex_core::EmbeddingVector>> {
        let embedder = self.embedder.as_ref()?;
        Some(
            match tokio::time::timeout(self.timeout, embedder.embed_image(image, mime)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "image embedding exceeded {}s",
                    self.timeout.as_secs()
                ))),
            },
        )
    }
}

/// Fold a vision analysis into the signal bundle.
fn apply_vision(signals: &mut RecognitionSignals, analysis: VisionAnalysis) {
    let confidence = analysis.confidence.unwrap_or(DEFAULT_VISION_CONFIDENCE);
    signals.brand = analysis.brand;
    signals.model = analysis.model;
    signals.inferred_category = analysis.category;
    signals.ocr_text = analysis.ocr_text;
    signals.logos = analysis.logos;
    signals.detected_objects = analysis.objects;
    signals.inferred_price_range = analysis.price_range;
    signals.inferred_usage_tags = analysis.usage_tags;
    signals.barcode = analysis.barcode.map(|value| DetectedBarcode {
        value,
        format: analysis.barcode_format,
    });
    signals
        .confidence_breakdown
        .insert("vision".to_string(), confidence);
}

#[async_trait]
impl SignalExtractor for PipelineSignalExtractor {
    async fn extract(&self, image: &[u8], format: Option<&str>) -> Result<RecognitionSignals> {
        let start = Instant::now();
        let mime = detect_image_mime(image, format)?;
        let mut signals = RecognitionSignals::new(compute_image_hash(image));

        let (vision, embedding) =
            tokio::join!(self.run_vision(image, &mime), self.run_embedding(image, &mime));

        let mut failures = Vec::new();
        match vision {
            Ok(analysis) => apply_vision(&mut signals, analysis),
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "extractor",
                    model = %self.vision.model_name(),
                    error = %e,
                    "Vision analysis failed, continuing without vision fields"
                );
                failures.push(e);
            }
        }
        match embedding {
            Some(Ok(vector)) => {
                signals
                    .confidence_breakdown
                    .insert("embedding".to_string(), vector.confidence);
                signals.embedding = Some(vector);
            }
            Some(Err(e)) => {
                warn!(
                    subsystem = "inference",
                    component = "extractor",
                    error = %e,
                    "Image embedding failed, continuing without embedding"
                );
                failures.push(e);
            }
            None => {}
        }

        let attempted = 1 + usize::from(self.embedder.is_some());
        if failures.len() == attempted {
            // Every backend failed; surface the vision error.
            let first = failures.remove(0);
            return Err(match first {
                Error::Timeout(msg) => Error::Timeout(msg),
                other => Error::Extraction(format!("all extraction backends failed: {}", other)),
            });
        }

        signals.quality_score = signals.overall_confidence();

        debug!(
            subsystem = "inference",
            component = "extractor",
            op = "extract",
            image_hash = %signals.image_hash,
            mime_type = %mime,
            has_barcode = signals.barcode.is_some(),
            has_embedding = signals.embedding.is_some(),
            quality = signals.quality_score,
            duration_ms = start.elapsed().as_millis() as u64,
            "Signals extracted"
        );
        Ok(signals)
    }

    fn name(&self) -> &str {
        "pipeline"
    }
}
