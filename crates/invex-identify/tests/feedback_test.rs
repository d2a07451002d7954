//! Validation feedback, accuracy and threshold retraining.

mod helpers;

use futures::future::join_all;

use helpers::{activate, image, recognition_for, seed_product, Stores};
use invex_identify::{
    compute_image_hash, CorrectionType, IdentificationConfig, IdentificationRequest,
    IdentificationStage, IdentificationThresholdConfig, MatchType, NewValidation,
    ThresholdConfigStore, ValidationSource, ValidationStore,
};
use invex_inference::mock::MockSignalExtractor;

fn validation(tag: &str, correction_type: CorrectionType) -> NewValidation {
    NewValidation {
        image_hash: compute_image_hash(tag.as_bytes()),
        suggested_product_id: Some(1),
        actual_product_id: Some(1),
        confidence_score: 0.8,
        match_type: Some(MatchType::VisionMatch),
        similarity_score: None,
        was_correct: matches!(
            correction_type,
            CorrectionType::Correct | CorrectionType::Improved
        ),
        correction_type,
        validated_by: Some("tester".into()),
        feedback: None,
        source: ValidationSource::Manual,
        sale_id: None,
        stock_id: None,
    }
}

#[tokio::test]
async fn test_accuracy_is_zero_without_validations() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default());

    let metrics = feedback.accuracy_metrics().await.unwrap();
    assert_eq!(metrics.total, 0);
    assert_eq!(metrics.accuracy, 0.0);
}

#[tokio::test]
async fn test_accuracy_seven_of_ten() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default());

    for i in 0..7 {
        feedback
            .record_validation(validation(&format!("ok-{}", i), CorrectionType::Correct))
            .await
            .unwrap();
    }
    for i in 0..3 {
        feedback
            .record_validation(validation(&format!("fp-{}", i), CorrectionType::FalsePositive))
            .await
            .unwrap();
    }

    let metrics = feedback.accuracy_metrics().await.unwrap();
    assert_eq!(metrics.total, 10);
    assert_eq!(metrics.correct, 7);
    assert_eq!(metrics.false_positives, 3);
    assert!((metrics.accuracy - 0.70).abs() < 1e-6);
}

#[tokio::test]
async fn test_inconsistent_validation_rejected() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default());

    let mut bad = validation("bad", CorrectionType::Correct);
    bad.was_correct = false;
    assert!(feedback.record_validation(bad).await.is_err());
    assert_eq!(stores.validations.count_total().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ensure_active_config_bootstraps_once() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default());

    let first = feedback.ensure_active_config().await.unwrap();
    let second = feedback.ensure_active_config().await.unwrap();
    assert!(first.is_active);
    assert_eq!(first.id, second.id);
    assert_eq!(first.model_version, "v1");
    assert_eq!(stores.configs.all_ordered_by_accuracy().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retrains_after_enough_samples() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default().with_min_training_samples(5));
    let base = feedback.ensure_active_config().await.unwrap();

    for i in 0..5 {
        feedback
            .record_validation(validation(&format!("fp-{}", i), CorrectionType::FalsePositive))
            .await
            .unwrap();
    }
    // Five is not more than five.
    assert_eq!(stores.configs.active().await.unwrap().unwrap().id, base.id);

    feedback
        .record_validation(validation("fp-5", CorrectionType::FalsePositive))
        .await
        .unwrap();

    let active = stores.configs.active().await.unwrap().unwrap();
    assert_ne!(active.id, base.id);
    assert_eq!(active.model_version, "v1+r1");
    assert_eq!(active.training_samples, 6);
    assert_eq!(active.false_positives, 6);
    assert!(active.auto_approve_threshold > base.auto_approve_threshold);
    assert!(active.last_training_at.is_some());
    assert_eq!(stores.configs.active_count().await, 1);

    // The window restarts after training.
    assert_eq!(feedback.check_and_retrain().await.unwrap(), None);
}

#[tokio::test]
async fn test_trigger_retraining_lowers_on_false_negatives() {
    let stores = Stores::new();
    let feedback = stores.feedback(IdentificationConfig::default());
    let base = feedback.ensure_active_config().await.unwrap();

    for i in 0..4 {
        feedback
            .record_validation(validation(&format!("fn-{}", i), CorrectionType::FalseNegative))
            .await
            .unwrap();
    }

    let retrained = feedback.trigger_retraining().await.unwrap();
    assert!(retrained.is_active);
    assert!(retrained.manual_validation_threshold < base.manual_validation_threshold);
    assert!(retrained.vision_match_threshold < base.vision_match_threshold);
    // Certainty tiers move less.
    let barcode_drop = base.barcode_threshold - retrained.barcode_threshold;
    let vision_drop = base.vision_match_threshold - retrained.vision_match_threshold;
    assert!(barcode_drop < vision_drop);

    let again = feedback.trigger_retraining().await.unwrap();
    assert_eq!(again.model_version, "v1+r2");
}

#[tokio::test]
async fn test_concurrent_activation_leaves_one_active() {
    let stores = Stores::new();
    let a = activate(&*stores.configs, IdentificationThresholdConfig::default()).await;
    let b = stores
        .configs
        .save(&IdentificationThresholdConfig::default())
        .await
        .unwrap();
    assert!(!b.is_active);

    stores.configs.activate(b.id).await.unwrap();
    assert_eq!(stores.configs.active_count().await, 1);
    assert_eq!(stores.configs.active().await.unwrap().unwrap().id, b.id);

    let configs = stores.configs.clone();
    let activations = (0..50).map(|i| {
        let configs = configs.clone();
        let id = if i % 2 == 0 { a.id } else { b.id };
        tokio::spawn(async move { configs.activate(id).await })
    });
    for handle in join_all(activations).await {
        handle.unwrap().unwrap();
    }
    assert_eq!(stores.configs.active_count().await, 1);

    // The active config cannot be deleted; the other one can.
    let active = stores.configs.active().await.unwrap().unwrap();
    let inactive = if active.id == a.id { b.id } else { a.id };
    assert!(matches!(
        stores.configs.delete(active.id).await,
        Err(invex_identify::Error::Conflict(_))
    ));
    stores.configs.delete(inactive).await.unwrap();
    assert_eq!(stores.configs.active_count().await, 1);
}

#[tokio::test]
async fn test_validate_result_advances_stage() {
    let stores = Stores::new();
    let photo = image("validated");
    seed_product(&*stores.products, "Clamp", recognition_for(&photo)).await;
    let orchestrator =
        stores.orchestrator(MockSignalExtractor::new(), IdentificationConfig::default());
    let feedback = stores.feedback(IdentificationConfig::default());

    let mut result = orchestrator
        .identify_or_create(IdentificationRequest::new(photo))
        .await
        .unwrap();
    let saved = feedback
        .validate_result(&mut result, CorrectionType::Correct, ValidationSource::Sale)
        .await
        .unwrap();

    assert_eq!(result.stage, IdentificationStage::Validated);
    assert_eq!(saved.match_type, Some(MatchType::ExactHash));
    assert!(saved.was_correct);

    // Validated is final.
    assert!(feedback
        .validate_result(&mut result, CorrectionType::Correct, ValidationSource::Sale)
        .await
        .is_err());
    assert_eq!(stores.validations.count_total().await.unwrap(), 1);
}
