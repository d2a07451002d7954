//! End-to-end identification of a single product image.
//!
//! `identify_or_create` runs extraction, the match chain and the resolver,
//! then applies the two mutation paths: creating a product when nothing
//! matched, and refreshing the recognition data of an identified product.
//! Both are keyed by image hash, so replaying the same image is idempotent.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use invex_core::defaults;
use invex_core::{
    compute_image_hash, Error, IdentificationMatch, IdentificationStage, IdentificationStatus,
    IdentificationThresholdConfig, MatchType, ProductDraft, ProductIdentificationResult,
    ProductLookup, RecognitionData, RecognitionSignals, Result, SignalExtractor,
    ThresholdConfigStore,
};

use crate::chain::{MatchStrategyChain, MatchTier};
use crate::config::IdentificationConfig;
use crate::resolver::{resolve, MatchDecision, Resolution, ResolverPolicy};

/// One image to identify.
#[derive(Debug, Clone, Default)]
pub struct IdentificationRequest {
    pub image: Vec<u8>,
    /// Format hint such as "jpg" or "image/png"
    pub format_hint: Option<String>,
    /// Fields for a product created from this image
    pub fallback: Option<ProductDraft>,
}

impl IdentificationRequest {
    pub fn new(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_format_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }

    pub fn with_fallback(mut self, draft: ProductDraft) -> Self {
        self.fallback = Some(draft);
        self
    }
}

/// Extraction, matching and resolution for one image.
enum Analysis {
    /// Stopped early; the result is already an `ERROR`.
    Failed(ProductIdentificationResult),
    Resolved {
        signals: RecognitionSignals,
        thresholds: IdentificationThresholdConfig,
        resolution: Resolution,
        winning_tier: Option<MatchTier>,
    },
}

/// Drives the identification pipeline for single images.
pub struct ProductIdentificationOrchestrator {
    extractor: Arc<dyn SignalExtractor>,
    products: Arc<dyn ProductLookup>,
    configs: Arc<dyn ThresholdConfigStore>,
    chain: MatchStrategyChain,
    config: IdentificationConfig,
}

impl ProductIdentificationOrchestrator {
    pub fn new(
        extractor: Arc<dyn SignalExtractor>,
        products: Arc<dyn ProductLookup>,
        configs: Arc<dyn ThresholdConfigStore>,
        config: IdentificationConfig,
    ) -> Self {
        Self {
            extractor,
            chain: MatchStrategyChain::new(products.clone()),
            products,
            configs,
            config,
        }
    }

    pub fn config(&self) -> &IdentificationConfig {
        &self.config
    }

    fn policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            ambiguity_margin: self.config.ambiguity_margin,
            surface_best_effort: self.config.surface_best_effort,
        }
    }

    /// Active thresholds, or the defaults when nothing is active.
    pub async fn active_thresholds(&self) -> Result<IdentificationThresholdConfig> {
        match self.configs.active().await {
            Ok(Some(config)) => Ok(config),
            Ok(None) => {
                warn!(
                    subsystem = "identify",
                    component = "orchestrator",
                    "No active threshold config, using defaults"
                );
                Ok(IdentificationThresholdConfig::default())
            }
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => {
                warn!(
                    subsystem = "identify",
                    component = "orchestrator",
                    error = %e,
                    "Failed to load threshold config, using defaults"
                );
                Ok(IdentificationThresholdConfig::default())
            }
        }
    }

    /// Identify an image, creating a product when nothing matches and
    /// auto-create is enabled.
    ///
    /// Extraction failures, timeouts and invalid input come back as an
    /// `ERROR` result. Persistence failures while creating a product are
    /// returned as `Err`.
    pub async fn identify_or_create(
        &self,
        request: IdentificationRequest,
    ) -> Result<ProductIdentificationResult> {
        let identification_id = Uuid::now_v7();
        let start = Instant::now();
        let run = self.identify_inner(identification_id, &request, true);
        let result = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result?,
            Err(_) => ProductIdentificationResult::error(
                identification_id,
                IdentificationStage::Pending,
                format!(
                    "Identification timed out after {}s",
                    self.config.timeout.as_secs()
                ),
            ),
        };
        Ok(self.finish(result, &request.image, start, "identify_or_create"))
    }

    /// Extraction, matching and resolution only; never creates or updates.
    ///
    /// When nothing matches the result is a `PARTIAL_MATCH` without a product.
    pub async fn identify_only(
        &self,
        image: &[u8],
        format_hint: Option<&str>,
    ) -> Result<ProductIdentificationResult> {
        let identification_id = Uuid::now_v7();
        let start = Instant::now();
        let request = IdentificationRequest {
            image: image.to_vec(),
            format_hint: format_hint.map(str::to_string),
            fallback: None,
        };
        let run = self.identify_inner(identification_id, &request, false);
        let result = match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result?,
            Err(_) => ProductIdentificationResult::error(
                identification_id,
                IdentificationStage::Pending,
                format!(
                    "Identification timed out after {}s",
                    self.config.timeout.as_secs()
                ),
            ),
        };
        Ok(self.finish(result, image, start, "identify_only"))
    }

    /// Stamp timing and image hash, then log the outcome.
    fn finish(
        &self,
        mut result: ProductIdentificationResult,
        image: &[u8],
        start: Instant,
        op: &str,
    ) -> ProductIdentificationResult {
        result.processing_time_ms = start.elapsed().as_millis() as u64;
        if result.image_hash.is_none() && !image.is_empty() {
            result.image_hash = Some(compute_image_hash(image));
        }
        if result.is_error() {
            warn!(
                subsystem = "identify",
                component = "orchestrator",
                op,
                identification_id = %result.identification_id,
                stage = ?result.stage,
                details = %result.details,
                duration_ms = result.processing_time_ms,
                "Identification failed"
            );
        } else {
            info!(
                subsystem = "identify",
                component = "orchestrator",
                op,
                identification_id = %result.identification_id,
                status = %result.status,
                match_type = result.match_type.map(|m| m.as_str()).unwrap_or("none"),
                confidence = result.confidence,
                product_id = result.product.as_ref().map(|p| p.id),
                requires_validation = result.requires_validation,
                duration_ms = result.processing_time_ms,
                "Identification complete"
            );
        }
        result
    }

    async fn identify_inner(
        &self,
        identification_id: Uuid,
        request: &IdentificationRequest,
        mutate: bool,
    ) -> Result<ProductIdentificationResult> {
        let analysis = self
            .analyze(identification_id, &request.image, request.format_hint.as_deref())
            .await;
        let (signals, thresholds, resolution, winning_tier) = match analysis {
            Analysis::Failed(result) => return Ok(result),
            Analysis::Resolved {
                signals,
                thresholds,
                resolution,
                winning_tier,
            } => (signals, thresholds, resolution, winning_tier),
        };

        let mut result = match resolution {
            Resolution::Matched(decision) => {
                let identified = decision.status == IdentificationStatus::Identified;
                let mut result = matched_result(identification_id, decision);
                if mutate && identified {
                    self.refresh_recognition(&mut result, &signals).await;
                }
                result
            }
            Resolution::NoMatch if mutate && self.config.auto_create => {
                self.create_from_signals(identification_id, &signals, request.fallback.clone())
                    .await?
            }
            Resolution::NoMatch => unmatched_result(identification_id, &signals, mutate),
        };

        if let Some(tier) = winning_tier {
            result
                .metadata
                .insert("winning_tier".into(), JsonValue::from(tier.match_type().as_str()));
        }
        result.image_hash = signals.hash().map(str::to_string);
        result.metadata.insert(
            "signal_confidence".into(),
            JsonValue::from(signals.overall_confidence()),
        );
        result
            .metadata
            .insert("config_id".into(), JsonValue::from(thresholds.id));
        Ok(result)
    }

    /// Steps 1-5: validate input, extract, load thresholds, match, resolve.
    async fn analyze(
        &self,
        identification_id: Uuid,
        image: &[u8],
        format_hint: Option<&str>,
    ) -> Analysis {
        let failed = |stage, details: String| {
            Analysis::Failed(ProductIdentificationResult::error(
                identification_id,
                stage,
                details,
            ))
        };

        if image.is_empty() {
            return failed(IdentificationStage::Pending, "Image payload is empty".into());
        }

        let signals = match self.extractor.extract(image, format_hint).await {
            Ok(signals) => signals,
            Err(e) => {
                return failed(
                    IdentificationStage::Pending,
                    format!("Signal extraction failed: {}", e),
                )
            }
        };
        debug!(
            subsystem = "identify",
            component = "orchestrator",
            identification_id = %identification_id,
            image_hash = %signals.image_hash,
            extractor = self.extractor.name(),
            usable = signals.has_any_usable_signal(),
            "Signals extracted"
        );

        let thresholds = match self.active_thresholds().await {
            Ok(thresholds) => thresholds,
            Err(e) => {
                return failed(
                    IdentificationStage::Extracted,
                    format!("Threshold config unavailable: {}", e),
                )
            }
        };

        let outcome = match self.chain.run(&signals, &thresholds).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return failed(
                    IdentificationStage::Extracted,
                    format!("Product lookup failed: {}", e),
                )
            }
        };

        let resolution = match resolve(&outcome, &thresholds, &self.policy()) {
            Ok(resolution) => resolution,
            Err(e) => {
                return failed(IdentificationStage::Matched, format!("Scoring failed: {}", e))
            }
        };

        Analysis::Resolved {
            signals,
            thresholds,
            resolution,
            winning_tier: outcome.winning_tier,
        }
    }

    /// Fold the new signals into an identified product's recognition data.
    ///
    /// A refresh failure does not undo the identification; it is logged and
    /// noted in the result metadata.
    async fn refresh_recognition(
        &self,
        result: &mut ProductIdentificationResult,
        signals: &RecognitionSignals,
    ) {
        let Some(mut product) = result.product.clone() else {
            return;
        };
        let changed = product
            .recognition
            .get_or_insert_with(RecognitionData::default)
            .refine_with(signals, result.confidence, Utc::now());
        if !changed {
            return;
        }
        match self.products.update(&product).await {
            Ok(updated) => {
                debug!(
                    subsystem = "identify",
                    component = "orchestrator",
                    product_id = updated.id,
                    recognition_count = updated
                        .recognition
                        .as_ref()
                        .map(|r| r.recognition_count)
                        .unwrap_or_default(),
                    "Recognition data refreshed"
                );
                result.product = Some(updated);
                result
                    .metadata
                    .insert("recognition_refreshed".into(), JsonValue::Bool(true));
            }
            Err(e) => {
                warn!(
                    subsystem = "identify",
                    component = "orchestrator",
                    product_id = product.id,
                    error = %e,
                    "Failed to refresh recognition data"
                );
                result
                    .metadata
                    .insert("recognition_refreshed".into(), JsonValue::Bool(false));
            }
        }
    }

    /// Create a product from the signals and the caller's fallback fields.
    async fn create_from_signals(
        &self,
        identification_id: Uuid,
        signals: &RecognitionSignals,
        fallback: Option<ProductDraft>,
    ) -> Result<ProductIdentificationResult> {
        let Some(draft) = fallback else {
            let mut result = unmatched_result(identification_id, signals, true);
            result.details = "No matching product and no fallback fields to create one".into();
            return Ok(result);
        };

        let confidence = signals.overall_confidence();
        let recognition = RecognitionData::from_signals(signals, confidence, Utc::now());
        let new_product = draft.into_new_product(signals, recognition);
        if let Err(e) = new_product.validate() {
            return Ok(ProductIdentificationResult::error(
                identification_id,
                IdentificationStage::Matched,
                format!("Invalid fallback fields: {}", e),
            ));
        }

        match self.products.create(new_product).await {
            Ok(product) => {
                info!(
                    subsystem = "identify",
                    component = "orchestrator",
                    identification_id = %identification_id,
                    product_id = product.id,
                    image_hash = %signals.image_hash,
                    "Created product from unmatched image"
                );
                Ok(ProductIdentificationResult {
                    identification_id,
                    status: IdentificationStatus::NewProductCreated,
                    details: format!("Created new product '{}'", product.name),
                    product: Some(product),
                    is_existing: false,
                    confidence,
                    match_type: None,
                    requires_validation: false,
                    alternative_matches: Vec::new(),
                    processing_time_ms: 0,
                    stage: IdentificationStage::Resolved,
                    image_hash: None,
                    metadata: Map::new(),
                })
            }
            Err(Error::Conflict(msg)) => {
                // Someone else created this image's product first.
                let Some(hash) = signals.hash() else {
                    return Err(Error::Conflict(msg));
                };
                let Some(existing) = self.products.by_image_hash(hash).await? else {
                    return Err(Error::Conflict(msg));
                };
                debug!(
                    subsystem = "identify",
                    component = "orchestrator",
                    identification_id = %identification_id,
                    product_id = existing.id,
                    "Create lost a race on image hash, returning existing product"
                );
                let mut result = matched_result(
                    identification_id,
                    MatchDecision {
                        status: IdentificationStatus::Identified,
                        best: IdentificationMatch::new(
                            existing,
                            defaults::HASH_MATCH_CONFIDENCE,
                            MatchType::ExactHash,
                            "Product created concurrently from the same image",
                        ),
                        alternatives: Vec::new(),
                        requires_validation: false,
                        details: "Product created concurrently from the same image".into(),
                    },
                );
                result
                    .metadata
                    .insert("recovered_conflict".into(), JsonValue::Bool(true));
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }
}

fn matched_result(identification_id: Uuid, decision: MatchDecision) -> ProductIdentificationResult {
    let MatchDecision {
        status,
        best,
        alternatives,
        requires_validation,
        details,
    } = decision;
    let mut metadata = best.metadata.clone();
    if let Some(similarity) = best.similarity_score {
        metadata.insert("similarity_score".into(), JsonValue::from(similarity));
    }
    ProductIdentificationResult {
        identification_id,
        status,
        product: Some(best.product),
        is_existing: true,
        confidence: best.confidence,
        match_type: Some(best.match_type),
        requires_validation,
        details,
        alternative_matches: alternatives,
        processing_time_ms: 0,
        stage: IdentificationStage::Resolved,
        image_hash: None,
        metadata,
    }
}

/// No match and nothing created.
fn unmatched_result(
    identification_id: Uuid,
    signals: &RecognitionSignals,
    creation_allowed: bool,
) -> ProductIdentificationResult {
    let details = if !signals.has_any_usable_signal() {
        "No usable signal extracted from image"
    } else if creation_allowed {
        "No matching product; auto-create is disabled"
    } else {
        "No matching product"
    };
    ProductIdentificationResult {
        identification_id,
        status: IdentificationStatus::PartialMatch,
        product: None,
        is_existing: false,
        confidence: 0.0,
        match_type: None,
        requires_validation: true,
        details: details.into(),
        alternative_matches: Vec::new(),
        processing_time_ms: 0,
        stage: IdentificationStage::Resolved,
        image_hash: None,
        metadata: Map::new(),
    }
}
