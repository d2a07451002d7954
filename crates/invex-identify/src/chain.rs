//! Tiered match strategy chain.
//!
//! Tiers run in a fixed order, cheapest and most certain first. The first
//! tier that yields a qualifying candidate wins and later tiers are never
//! queried, so the vector search only runs when nothing cheaper matched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use invex_core::defaults;
use invex_core::{
    IdentificationMatch, IdentificationThresholdConfig, MatchType, Product, ProductLookup,
    RecognitionSignals, Result,
};

/// One matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTier {
    ExactBarcode,
    ExactHash,
    BrandModel,
    VisionMatch,
    VectorSimilarity,
    TagCategory,
}

impl MatchTier {
    /// Evaluation order. Must not be reordered.
    pub const ORDER: [MatchTier; 6] = [
        MatchTier::ExactBarcode,
        MatchTier::ExactHash,
        MatchTier::BrandModel,
        MatchTier::VisionMatch,
        MatchTier::VectorSimilarity,
        MatchTier::TagCategory,
    ];

    pub fn match_type(&self) -> MatchType {
        match self {
            Self::ExactBarcode => MatchType::ExactBarcode,
            Self::ExactHash => MatchType::ExactHash,
            Self::BrandModel => MatchType::BrandModel,
            Self::VisionMatch => MatchType::VisionMatch,
            Self::VectorSimilarity => MatchType::VectorSimilarity,
            Self::TagCategory => MatchType::TagCategory,
        }
    }

    /// Whether the signal this tier needs is present.
    pub fn applies_to(&self, signals: &RecognitionSignals) -> bool {
        match self {
            Self::ExactBarcode => signals.barcode_value().is_some(),
            Self::ExactHash => signals.hash().is_some(),
            Self::BrandModel => signals.brand_and_model().is_some(),
            Self::VisionMatch => signals.has_vision_fields(),
            Self::VectorSimilarity => signals.usable_embedding().is_some(),
            Self::TagCategory => signals
                .inferred_usage_tags
                .iter()
                .any(|t| !t.trim().is_empty()),
        }
    }

    /// Query the lookup and score what comes back.
    async fn candidates(
        &self,
        lookup: &dyn ProductLookup,
        signals: &RecognitionSignals,
        config: &IdentificationThresholdConfig,
    ) -> Result<Vec<IdentificationMatch>> {
        let candidates: Vec<IdentificationMatch> = match self {
            Self::ExactBarcode => {
                let Some(barcode) = signals.barcode_value() else {
                    return Ok(Vec::new());
                };
                lookup
                    .by_barcode(barcode)
                    .await?
                    .map(|p| {
                        IdentificationMatch::new(
                            p,
                            defaults::BARCODE_MATCH_CONFIDENCE,
                            MatchType::ExactBarcode,
                            format!("Barcode {} matches", barcode),
                        )
                        .with_metadata("barcode", barcode)
                    })
                    .into_iter()
                    .collect()
            }
            Self::ExactHash => {
                let Some(hash) = signals.hash() else {
                    return Ok(Vec::new());
                };
                lookup
                    .by_image_hash(hash)
                    .await?
                    .map(|p| {
                        IdentificationMatch::new(
                            p,
                            defaults::HASH_MATCH_CONFIDENCE,
                            MatchType::ExactHash,
                            "Identical image previously recognized",
                        )
                    })
                    .into_iter()
                    .collect()
            }
            Self::BrandModel => {
                let Some((brand, model)) = signals.brand_and_model() else {
                    return Ok(Vec::new());
                };
                lookup
                    .by_brand_and_model(brand, model)
                    .await?
                    .into_iter()
                    .map(|p| {
                        IdentificationMatch::new(
                            p,
                            defaults::BRAND_MODEL_MATCH_CONFIDENCE,
                            MatchType::BrandModel,
                            format!("Brand and model match: {} {}", brand, model),
                        )
                    })
                    .collect()
            }
            Self::VisionMatch => lookup
                .by_exact_fields(signals.brand(), signals.model(), signals.category())
                .await?
                .into_iter()
                .map(|p| {
                    let (confidence, agreeing) = vision_agreement(signals, &p);
                    IdentificationMatch::new(
                        p,
                        confidence,
                        MatchType::VisionMatch,
                        format!("Vision fields agree: {}", agreeing.join(", ")),
                    )
                    .with_metadata("agreeing_fields", agreeing)
                })
                .collect(),
            Self::VectorSimilarity => {
                let Some(embedding) = signals.usable_embedding() else {
                    return Ok(Vec::new());
                };
                lookup
                    .by_vector_similarity(embedding, config.vector_similarity_threshold)
                    .await?
                    .map(|similar| {
                        IdentificationMatch::new(
                            similar.product,
                            similar.similarity,
                            MatchType::VectorSimilarity,
                            format!("Embedding similarity {:.3}", similar.similarity),
                        )
                        .with_similarity(similar.similarity)
                        .with_metadata("embedding_model", embedding.model.as_str())
                    })
                    .into_iter()
                    .collect()
            }
            Self::TagCategory => lookup
                .by_tags_and_category(&signals.inferred_usage_tags, signals.category())
                .await?
                .into_iter()
                .map(|p| {
                    let shared = shared_tags(signals, &p);
                    IdentificationMatch::new(
                        p,
                        defaults::TAG_CATEGORY_MATCH_CONFIDENCE,
                        MatchType::TagCategory,
                        format!("Shares usage tags: {}", shared.join(", ")),
                    )
                    .with_metadata("shared_tags", shared)
                })
                .collect(),
        };
        Ok(rank(candidates))
    }
}

/// Score how many vision fields agree between the signals and a product.
///
/// `0.60 + 0.40 × Σ weights`, where brand 0.35, model 0.30, category 0.15,
/// a shared logo 0.10 and OCR mentioning the product name or brand 0.10.
/// Monotonic: an extra agreeing field never lowers the score.
pub fn vision_agreement(signals: &RecognitionSignals, product: &Product) -> (f32, Vec<&'static str>) {
    fn same(a: Option<&str>, b: Option<&str>) -> bool {
        matches!((a, b), (Some(a), Some(b)) if a.trim().eq_ignore_ascii_case(b.trim()))
    }

    let mut weight = 0.0;
    let mut agreeing = Vec::new();
    if same(signals.brand(), product.brand()) {
        weight += defaults::VISION_WEIGHT_BRAND;
        agreeing.push("brand");
    }
    if same(signals.model(), product.model()) {
        weight += defaults::VISION_WEIGHT_MODEL;
        agreeing.push("model");
    }
    if same(signals.category(), product.inferred_category()) {
        weight += defaults::VISION_WEIGHT_CATEGORY;
        agreeing.push("category");
    }
    let shares_logo = signals
        .logos
        .iter()
        .any(|l| product.logos().iter().any(|p| p.eq_ignore_ascii_case(l.trim())));
    if shares_logo {
        weight += defaults::VISION_WEIGHT_LOGOS;
        agreeing.push("logos");
    }
    if let Some(ocr) = signals.ocr() {
        let ocr = ocr.to_lowercase();
        let name = product.name.trim().to_lowercase();
        let mentions_name = !name.is_empty() && ocr.contains(&name);
        let mentions_brand = product
            .brand()
            .map(|b| b.trim().to_lowercase())
            .is_some_and(|b| !b.is_empty() && ocr.contains(&b));
        if mentions_name || mentions_brand {
            weight += defaults::VISION_WEIGHT_OCR;
            agreeing.push("ocr");
        }
    }

    let confidence = defaults::VISION_MATCH_BASE_CONFIDENCE
        + defaults::VISION_MATCH_CONFIDENCE_SPAN * weight;
    (confidence.clamp(0.0, 1.0), agreeing)
}

fn shared_tags(signals: &RecognitionSignals, product: &Product) -> Vec<String> {
    let stored = product
        .recognition
        .as_ref()
        .map(|r| r.inferred_usage_tags.as_slice())
        .unwrap_or(&[]);
    signals
        .inferred_usage_tags
        .iter()
        .filter(|t| stored.iter().any(|s| s.trim().eq_ignore_ascii_case(t.trim())))
        .cloned()
        .collect()
}

/// Deduplicate by product id (highest confidence kept), then sort by
/// confidence descending and product id ascending.
pub fn rank(candidates: Vec<IdentificationMatch>) -> Vec<IdentificationMatch> {
    let mut best: HashMap<i64, IdentificationMatch> = HashMap::new();
    for candidate in candidates {
        match best.get(&candidate.product.id) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                best.insert(candidate.product.id, candidate);
            }
        }
    }
    let mut ranked: Vec<IdentificationMatch> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.product.id.cmp(&b.product.id))
    });
    ranked
}

/// What the chain found.
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    /// Qualifying candidates of the winning tier, ranked.
    pub candidates: Vec<IdentificationMatch>,
    /// Tier that produced `candidates`.
    pub winning_tier: Option<MatchTier>,
    /// Best non-qualifying candidate per product from the tiers attempted.
    pub near_misses: Vec<IdentificationMatch>,
    /// Tiers whose signal was present, in evaluation order.
    pub tiers_attempted: Vec<MatchTier>,
}

impl ChainOutcome {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Runs the tiers against a product lookup.
#[derive(Clone)]
pub struct MatchStrategyChain {
    lookup: Arc<dyn ProductLookup>,
}

impl MatchStrategyChain {
    pub fn new(lookup: Arc<dyn ProductLookup>) -> Self {
        Self { lookup }
    }

    /// Run the tiers in order.
    ///
    /// Infrastructure errors abort with `Err`; any other lookup error is
    /// logged and the tier counts as having found nothing.
    pub async fn run(
        &self,
        signals: &RecognitionSignals,
        config: &IdentificationThresholdConfig,
    ) -> Result<ChainOutcome> {
        let start = Instant::now();
        let mut outcome = ChainOutcome::default();
        let mut near_misses = Vec::new();

        for tier in MatchTier::ORDER {
            if !tier.applies_to(signals) {
                continue;
            }
            outcome.tiers_attempted.push(tier);

            let candidates = match tier.candidates(self.lookup.as_ref(), signals, config).await {
                Ok(candidates) => candidates,
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    warn!(
                        subsystem = "identify",
                        component = "chain",
                        tier = ?tier,
                        error = %e,
                        "Tier lookup failed, treating as no match"
                    );
                    continue;
                }
            };

            for candidate in &candidates {
                trace!(
                    subsystem = "identify",
                    component = "chain",
                    tier = ?tier,
                    product_id = candidate.product.id,
                    confidence = candidate.confidence,
                    "Candidate"
                );
            }

            let qualifying = qualifying(tier, candidates, config, &mut near_misses);
            debug!(
                subsystem = "identify",
                component = "chain",
                tier = ?tier,
                candidate_count = qualifying.len(),
                "Tier evaluated"
            );
            if !qualifying.is_empty() {
                outcome.candidates = qualifying;
                outcome.winning_tier = Some(tier);
                break;
            }
        }

        outcome.near_misses = rank(near_misses);
        debug!(
            subsystem = "identify",
            component = "chain",
            op = "run",
            winning_tier = ?outcome.winning_tier,
            candidate_count = outcome.candidates.len(),
            near_miss_count = outcome.near_misses.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Match chain complete"
        );
        Ok(outcome)
    }
}

/// Split a tier's candidates into the qualifying set and near misses.
fn qualifying(
    tier: MatchTier,
    candidates: Vec<IdentificationMatch>,
    config: &IdentificationThresholdConfig,
    near_misses: &mut Vec<IdentificationMatch>,
) -> Vec<IdentificationMatch> {
    // Certainty tiers short-circuit regardless of threshold.
    if tier.match_type().is_certainty() {
        return candidates;
    }

    let threshold = config.tier_threshold(tier.match_type());
    let (passing, failing): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.confidence >= threshold);
    near_misses.extend(failing);

    // Brand + model only wins when it is unambiguous; otherwise the vision
    // tier disambiguates.
    if tier == MatchTier::BrandModel && passing.len() != 1 {
        near_misses.extend(passing);
        return Vec::new();
    }
    passing
}
