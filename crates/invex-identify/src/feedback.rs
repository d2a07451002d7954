//! Validation feedback and threshold retraining.
//!
//! Every human review is appended to the validation log. Once enough
//! reviews have accumulated since the active config was trained, a new
//! config version is derived from the error rates in that window and
//! activated in a single store-level swap.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use invex_core::defaults;
use invex_core::{
    compute_accuracy, AccuracyMetrics, CorrectionType, Error, IdentificationStage,
    IdentificationThresholdConfig, NewValidation, ProductIdentificationResult,
    ProductIdentificationValidation, Result, ThresholdConfigStore, ValidationSource,
    ValidationStore,
};

use crate::config::IdentificationConfig;

/// Records validations and retrains thresholds from them.
#[derive(Clone)]
pub struct ValidationFeedbackLoop {
    validations: Arc<dyn ValidationStore>,
    configs: Arc<dyn ThresholdConfigStore>,
    config: IdentificationConfig,
    retrain_lock: Arc<Mutex<()>>,
}

impl ValidationFeedbackLoop {
    pub fn new(
        validations: Arc<dyn ValidationStore>,
        configs: Arc<dyn ThresholdConfigStore>,
        config: IdentificationConfig,
    ) -> Self {
        Self {
            validations,
            configs,
            config,
            retrain_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append a validation, then check whether retraining is due.
    ///
    /// The retraining check never fails the call: its errors are logged.
    pub async fn record_validation(
        &self,
        validation: NewValidation,
    ) -> Result<ProductIdentificationValidation> {
        validation.validate()?;
        let saved = self.validations.save(validation).await?;
        debug!(
            subsystem = "feedback",
            component = "feedback_loop",
            validation_id = saved.id,
            image_hash = %saved.image_hash,
            correction_type = %saved.correction_type,
            source = %saved.source,
            "Validation recorded"
        );

        if self.config.retrain_in_background {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.check_and_retrain().await {
                    warn!(
                        subsystem = "feedback",
                        component = "feedback_loop",
                        error = %e,
                        "Background retraining check failed"
                    );
                }
            });
        } else if let Err(e) = self.check_and_retrain().await {
            warn!(
                subsystem = "feedback",
                component = "feedback_loop",
                error = %e,
                "Retraining check failed"
            );
        }
        Ok(saved)
    }

    /// Record a review of `result` and move it to the validated stage.
    pub async fn validate_result(
        &self,
        result: &mut ProductIdentificationResult,
        correction_type: CorrectionType,
        source: ValidationSource,
    ) -> Result<ProductIdentificationValidation> {
        if !result.stage.can_advance_to(IdentificationStage::Validated) {
            return Err(Error::Conflict(format!(
                "identification {} cannot be validated from stage {:?}",
                result.identification_id, result.stage
            )));
        }
        let saved = self
            .record_validation(NewValidation::for_result(result, correction_type, source))
            .await?;
        result.stage = IdentificationStage::Validated;
        Ok(saved)
    }

    /// Accuracy over the whole validation log.
    pub async fn accuracy_metrics(&self) -> Result<AccuracyMetrics> {
        let total = self.validations.count_total().await?;
        let correct = self.validations.count_correct().await?;
        let improved = self.validations.count_improved().await?;
        let false_positives = self.validations.count_false_positives().await?;
        let false_negatives = self.validations.count_false_negatives().await?;
        Ok(AccuracyMetrics::from_counts(
            total,
            correct,
            improved,
            false_positives,
            false_negatives,
        ))
    }

    /// Retrain when more than `min_training_samples` validations arrived
    /// since the active config was trained.
    pub async fn check_and_retrain(&self) -> Result<Option<IdentificationThresholdConfig>> {
        let _guard = self.retrain_lock.lock().await;
        let active = self.ensure_active_config().await?;
        let pending = self.validations.count_since(active.last_training_at).await?;
        if pending <= self.config.min_training_samples {
            debug!(
                subsystem = "feedback",
                component = "feedback_loop",
                pending,
                required = self.config.min_training_samples,
                "Retraining not due"
            );
            return Ok(None);
        }
        self.retrain_from(active).await.map(Some)
    }

    /// Retrain from the active config regardless of sample count.
    pub async fn trigger_retraining(&self) -> Result<IdentificationThresholdConfig> {
        let _guard = self.retrain_lock.lock().await;
        let active = self.ensure_active_config().await?;
        self.retrain_from(active).await
    }

    /// The active config, saving and activating the defaults when none is
    /// active yet.
    pub async fn ensure_active_config(&self) -> Result<IdentificationThresholdConfig> {
        if let Some(active) = self.configs.active().await? {
            return Ok(active);
        }
        let saved = self
            .configs
            .save(&IdentificationThresholdConfig::default())
            .await?;
        self.configs.activate(saved.id).await?;
        info!(
            subsystem = "feedback",
            component = "feedback_loop",
            config_id = saved.id,
            model_version = %saved.model_version,
            "Activated default threshold config"
        );
        Ok(IdentificationThresholdConfig {
            is_active: true,
            ..saved
        })
    }

    async fn retrain_from(
        &self,
        base: IdentificationThresholdConfig,
    ) -> Result<IdentificationThresholdConfig> {
        let start = Instant::now();
        let window = self.validations.find_since(base.last_training_at).await?;
        let metrics = AccuracyMetrics::from_validations(&window);
        let candidate = retrain_thresholds(
            &base,
            &metrics,
            self.config.retrain_learning_rate,
            Utc::now(),
        );

        let saved = self.configs.save(&candidate).await?;
        self.configs.activate(saved.id).await?;

        info!(
            subsystem = "feedback",
            component = "feedback_loop",
            op = "retrain",
            config_id = saved.id,
            previous_config_id = base.id,
            model_version = %saved.model_version,
            training_samples = metrics.total,
            window_accuracy = metrics.accuracy,
            accuracy = saved.accuracy,
            auto_approve = saved.auto_approve_threshold,
            manual_validation = saved.manual_validation_threshold,
            duration_ms = start.elapsed().as_millis() as u64,
            "Threshold retraining complete"
        );
        Ok(IdentificationThresholdConfig {
            is_active: true,
            ..saved
        })
    }
}

/// Derive the next threshold config from `base` and the window's metrics.
///
/// A window dominated by false positives raises every threshold; one
/// dominated by false negatives lowers them. Barcode and hash thresholds
/// move at a quarter of the rate of the probabilistic tiers.
pub fn retrain_thresholds(
    base: &IdentificationThresholdConfig,
    window: &AccuracyMetrics,
    learning_rate: f32,
    now: DateTime<Utc>,
) -> IdentificationThresholdConfig {
    let shift = if window.total > 0 {
        let n = window.total as f32;
        learning_rate * (window.false_positives as f32 / n - window.false_negatives as f32 / n)
    } else {
        0.0
    };
    let adjust = |value: f32, sensitivity: f32| {
        (value + shift * sensitivity).clamp(defaults::THRESHOLD_FLOOR, defaults::THRESHOLD_CEILING)
    };
    let certainty = defaults::CERTAINTY_TIER_SENSITIVITY;

    let auto_approve = adjust(base.auto_approve_threshold, 1.0)
        .max(defaults::THRESHOLD_FLOOR + defaults::MIN_THRESHOLD_GAP);
    let manual_validation = adjust(base.manual_validation_threshold, 1.0)
        .min(auto_approve - defaults::MIN_THRESHOLD_GAP);

    let total_identifications = base.total_identifications + window.total;
    let correct_identifications = base.correct_identifications + window.correct;

    IdentificationThresholdConfig {
        id: 0,
        barcode_threshold: adjust(base.barcode_threshold, certainty),
        hash_threshold: adjust(base.hash_threshold, certainty),
        brand_model_threshold: adjust(base.brand_model_threshold, 1.0),
        vision_match_threshold: adjust(base.vision_match_threshold, 1.0),
        vector_similarity_threshold: adjust(base.vector_similarity_threshold, 1.0),
        tag_category_threshold: adjust(base.tag_category_threshold, 1.0),
        auto_approve_threshold: auto_approve,
        manual_validation_threshold: manual_validation,
        total_identifications,
        correct_identifications,
        false_positives: base.false_positives + window.false_positives,
        false_negatives: base.false_negatives + window.false_negatives,
        accuracy: compute_accuracy(correct_identifications, total_identifications),
        last_training_at: Some(now),
        training_samples: window.total,
        model_version: next_model_version(&base.model_version),
        is_active: false,
        created_at: now,
    }
}

/// `v1` → `v1+r1` → `v1+r2`.
pub fn next_model_version(version: &str) -> String {
    let version = version.trim();
    match version.rsplit_once("+r") {
        Some((base, round)) => match round.parse::<u32>() {
            Ok(round) => format!("{}+r{}", base, round + 1),
            Err(_) => format!("{}+r1", version),
        },
        None => format!("{}+r1", version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(total: i64, fp: i64, fn_: i64) -> AccuracyMetrics {
        AccuracyMetrics::from_counts(total, total - fp - fn_, 0, fp, fn_)
    }

    #[test]
    fn test_next_model_version() {
        assert_eq!(next_model_version("v1"), "v1+r1");
        assert_eq!(next_model_version("v1+r1"), "v1+r2");
        assert_eq!(next_model_version("v1+r9"), "v1+r10");
        assert_eq!(next_model_version("v2+rc"), "v2+rc+r1");
    }

    #[test]
    fn test_false_positives_raise_thresholds() {
        let base = IdentificationThresholdConfig::default();
        let next = retrain_thresholds(&base, &window(10, 5, 0), 0.1, Utc::now());
        // shift = 0.1 * 0.5 = 0.05
        assert!((next.vision_match_threshold - 0.75).abs() < 1e-5);
        assert!((next.auto_approve_threshold - 0.95).abs() < 1e-5);
        assert!((next.barcode_threshold - (0.95 + 0.0125)).abs() < 1e-5);
        assert_eq!(next.model_version, "v1+r1");
        assert_eq!(next.training_samples, 10);
        assert_eq!(next.total_identifications, 10);
        assert_eq!(next.correct_identifications, 5);
        assert!((next.accuracy - 0.5).abs() < 1e-6);
        assert!(next.validate().is_ok());
    }

    #[test]
    fn test_false_negatives_lower_thresholds() {
        let base = IdentificationThresholdConfig::default();
        let next = retrain_thresholds(&base, &window(10, 0, 10), 0.1, Utc::now());
        assert!((next.manual_validation_threshold - 0.5).abs() < 1e-5);
        assert!((next.auto_approve_threshold - 0.8).abs() < 1e-5);
        assert!((next.hash_threshold - 0.955).abs() < 1e-5);
    }

    #[test]
    fn test_empty_window_keeps_thresholds() {
        let base = IdentificationThresholdConfig::default();
        let next = retrain_thresholds(&base, &AccuracyMetrics::default(), 0.1, Utc::now());
        assert_eq!(next.auto_approve_threshold, base.auto_approve_threshold);
        assert_eq!(next.vector_similarity_threshold, base.vector_similarity_threshold);
        assert_eq!(next.accuracy, 0.0);
        assert!(next.last_training_at.is_some());
    }

    #[test]
    fn test_clamped_and_gap_kept() {
        let base = IdentificationThresholdConfig {
            auto_approve_threshold: 0.98,
            manual_validation_threshold: 0.97,
            tag_category_threshold: 0.32,
            ..Default::default()
        };
        let up = retrain_thresholds(&base, &window(4, 4, 0), 1.0, Utc::now());
        assert_eq!(up.auto_approve_threshold, defaults::THRESHOLD_CEILING);
        assert!(
            up.manual_validation_threshold
                <= up.auto_approve_threshold - defaults::MIN_THRESHOLD_GAP + 1e-6
        );

        let down = retrain_thresholds(&base, &window(4, 0, 4), 1.0, Utc::now());
        assert_eq!(down.tag_category_threshold, defaults::THRESHOLD_FLOOR);
        assert!(down.auto_approve_threshold >= defaults::THRESHOLD_FLOOR + defaults::MIN_THRESHOLD_GAP);
        assert!(down.validate().is_ok());
    }
}
