//! Multi-object images: detect, identify each crop, group by product.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use invex_core::{
    DetectedObject, DetectedProductGroup, DetectedProductMatch, Error, IdentificationStage,
    IdentificationStatus, MultipleProductDetectionResult, ObjectDetector,
    ProductIdentificationResult, Result,
};

use crate::orchestrator::ProductIdentificationOrchestrator;

/// Identifies every object in an image and counts repeats of a product.
pub struct MultipleDetectionGrouper {
    detector: Arc<dyn ObjectDetector>,
    orchestrator: Arc<ProductIdentificationOrchestrator>,
}

impl MultipleDetectionGrouper {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        orchestrator: Arc<ProductIdentificationOrchestrator>,
    ) -> Self {
        Self {
            detector,
            orchestrator,
        }
    }

    /// Detect objects, identify each crop concurrently, and group matches.
    ///
    /// Crops are identified without creating products. A crop whose
    /// identification errors or finds nothing counts as unmatched.
    pub async fn detect_and_group(
        &self,
        image: &[u8],
        format_hint: Option<&str>,
        group_by_product: bool,
    ) -> Result<MultipleProductDetectionResult> {
        if image.is_empty() {
            return Err(Error::InvalidInput("image payload is empty".into()));
        }
        let start = Instant::now();

        let objects = self.detector.detect(image, format_hint).await?;
        debug!(
            subsystem = "identify",
            component = "grouper",
            detection_count = objects.len(),
            "Objects detected"
        );

        let identifications = join_all(
            objects
                .iter()
                .map(|object| self.orchestrator.identify_only(&object.image, None)),
        )
        .await;

        let matches: Vec<DetectedProductMatch> = objects
            .iter()
            .zip(identifications)
            .enumerate()
            .map(|(index, (object, identification))| {
                let identification = identification.unwrap_or_else(|e| {
                    warn!(
                        subsystem = "identify",
                        component = "grouper",
                        object_index = index,
                        error = %e,
                        "Crop identification failed"
                    );
                    ProductIdentificationResult::error(
                        Uuid::now_v7(),
                        IdentificationStage::Pending,
                        e.to_string(),
                    )
                });
                detection_match(index, object, identification)
            })
            .collect();

        let manual = self
            .orchestrator
            .active_thresholds()
            .await?
            .manual_validation_threshold;
        let groups = group_matches(&matches, group_by_product, manual);

        let unique_products = groups
            .iter()
            .map(|g| g.product.id)
            .collect::<BTreeSet<_>>()
            .len();
        let unmatched_detections = matches.iter().filter(|m| m.product.is_none()).count();
        let requires_validation = groups.iter().any(|g| !g.is_confirmed);
        let result = MultipleProductDetectionResult {
            total_detections: matches.len(),
            unique_products,
            unmatched_detections,
            requires_validation,
            processing_time_ms: start.elapsed().as_millis() as u64,
            groups,
            matches,
        };

        info!(
            subsystem = "identify",
            component = "grouper",
            op = "detect_and_group",
            detection_count = result.total_detections,
            unique_products = result.unique_products,
            unmatched = result.unmatched_detections,
            requires_validation = result.requires_validation,
            duration_ms = result.processing_time_ms,
            "Detection grouping complete"
        );
        Ok(result)
    }
}

fn detection_match(
    object_index: usize,
    object: &DetectedObject,
    identification: ProductIdentificationResult,
) -> DetectedProductMatch {
    let detection_confidence = object.confidence.clamp(0.0, 1.0);
    let (product, identification_confidence) = match identification.status {
        IdentificationStatus::Error => (None, 0.0),
        _ => match identification.product {
            Some(product) => (Some(product), identification.confidence),
            None => (None, 0.0),
        },
    };
    DetectedProductMatch {
        object_index,
        label: object.label.clone(),
        bounding_box: object.bounding_box,
        match_type: product.as_ref().and(identification.match_type),
        product,
        status: identification.status,
        detection_confidence,
        identification_confidence,
        combined_confidence: detection_confidence * identification_confidence,
    }
}

/// Build groups from matched detections, sorted by quantity desc then
/// product id asc.
pub fn group_matches(
    matches: &[DetectedProductMatch],
    group_by_product: bool,
    manual_validation_threshold: f32,
) -> Vec<DetectedProductGroup> {
    let matched = matches.iter().filter(|m| m.product.is_some());

    let buckets: Vec<Vec<&DetectedProductMatch>> = if group_by_product {
        let mut by_product: BTreeMap<i64, Vec<&DetectedProductMatch>> = BTreeMap::new();
        for m in matched {
            if let Some(product) = &m.product {
                by_product.entry(product.id).or_default().push(m);
            }
        }
        by_product.into_values().collect()
    } else {
        matched.map(|m| vec![m]).collect()
    };

    let mut groups: Vec<DetectedProductGroup> = buckets
        .into_iter()
        .filter_map(|bucket| {
            let product = bucket.first()?.product.clone()?;
            let quantity = bucket.len();
            let average_confidence =
                bucket.iter().map(|m| m.combined_confidence).sum::<f32>() / quantity as f32;
            Some(DetectedProductGroup {
                product,
                quantity,
                average_confidence,
                detections: bucket.into_iter().cloned().collect(),
                is_confirmed: average_confidence >= manual_validation_threshold,
            })
        })
        .collect();

    groups.sort_by(|a, b| {
        b.quantity
            .cmp(&a.quantity)
            .then_with(|| a.product.id.cmp(&b.product.id))
    });
    groups
}
