//! Confidence resolution: candidates + thresholds → terminal status.

use tracing::debug;

use invex_core::defaults;
use invex_core::{
    Error, IdentificationMatch, IdentificationStatus, IdentificationThresholdConfig, Result,
};

use crate::chain::ChainOutcome;

/// Tolerance for float noise when comparing confidence gaps.
const GAP_EPSILON: f32 = 1e-6;

/// Resolver knobs that are not part of the tunable threshold config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverPolicy {
    /// Candidates at most this far apart are ambiguous.
    pub ambiguity_margin: f32,
    /// Suggest the best candidate even when it falls below the
    /// manual-validation threshold.
    pub surface_best_effort: bool,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            ambiguity_margin: defaults::AMBIGUITY_MARGIN,
            surface_best_effort: defaults::SURFACE_BEST_EFFORT,
        }
    }
}

/// A decision on an existing product.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub status: IdentificationStatus,
    pub best: IdentificationMatch,
    pub alternatives: Vec<IdentificationMatch>,
    pub requires_validation: bool,
    pub details: String,
}

/// Resolver output.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing worth suggesting; the new-product policy applies.
    NoMatch,
    Matched(MatchDecision),
}

fn check_confidence(candidate: &IdentificationMatch) -> Result<()> {
    let c = candidate.confidence;
    if !c.is_finite() || !(0.0..=1.0).contains(&c) {
        return Err(Error::Scoring(format!(
            "{} candidate for product {} has invalid confidence {}",
            candidate.match_type, candidate.product.id, c
        )));
    }
    Ok(())
}

/// Decide the terminal status for a chain outcome.
///
/// Candidates are expected ranked (confidence desc, product id asc).
pub fn resolve(
    outcome: &ChainOutcome,
    config: &IdentificationThresholdConfig,
    policy: &ResolverPolicy,
) -> Result<Resolution> {
    for candidate in outcome.candidates.iter().chain(&outcome.near_misses) {
        check_confidence(candidate)?;
    }

    let manual = config.manual_validation_threshold;
    let remaining: Vec<&IdentificationMatch> = outcome
        .candidates
        .iter()
        .filter(|c| c.match_type.is_certainty() || c.confidence >= manual)
        .collect();

    let Some((&top, rest)) = remaining.split_first() else {
        return Ok(best_effort(outcome, policy));
    };
    let alternatives: Vec<IdentificationMatch> = rest.iter().map(|c| (*c).clone()).collect();

    let ambiguous = rest
        .first()
        .is_some_and(|second| top.confidence - second.confidence <= policy.ambiguity_margin + GAP_EPSILON);
    let auto_approve = config.effective_auto_approve(top.match_type);

    let decision = if ambiguous {
        MatchDecision {
            status: IdentificationStatus::MultipleMatches,
            best: top.clone(),
            details: format!(
                "{} candidates within {:.2} of each other, top {:.2}",
                remaining.len(),
                policy.ambiguity_margin,
                top.confidence
            ),
            alternatives,
            requires_validation: true,
        }
    } else if rest.is_empty() && top.confidence >= auto_approve {
        MatchDecision {
            status: IdentificationStatus::Identified,
            best: top.clone(),
            details: top.details.clone(),
            alternatives,
            requires_validation: false,
        }
    } else {
        let details = if top.confidence >= auto_approve {
            format!(
                "{} ({} other candidate(s) above manual validation)",
                top.details,
                rest.len()
            )
        } else {
            format!(
                "{} (confidence {:.2} below auto-approve {:.2})",
                top.details, top.confidence, auto_approve
            )
        };
        MatchDecision {
            status: IdentificationStatus::PartialMatch,
            best: top.clone(),
            details,
            alternatives,
            requires_validation: true,
        }
    };

    debug!(
        subsystem = "identify",
        component = "resolver",
        status = %decision.status,
        match_type = %decision.best.match_type,
        confidence = decision.best.confidence,
        product_id = decision.best.product.id,
        alternatives = decision.alternatives.len(),
        "Resolved"
    );
    Ok(Resolution::Matched(decision))
}

/// Nothing cleared the manual-validation threshold.
fn best_effort(outcome: &ChainOutcome, policy: &ResolverPolicy) -> Resolution {
    if !policy.surface_best_effort {
        debug!(
            subsystem = "identify",
            component = "resolver",
            "No candidate cleared manual validation"
        );
        return Resolution::NoMatch;
    }
    let mut pool: Vec<IdentificationMatch> = outcome
        .candidates
        .iter()
        .chain(&outcome.near_misses)
        .cloned()
        .collect();
    pool = crate::chain::rank(pool);
    if pool.is_empty() {
        return Resolution::NoMatch;
    }
    let best = pool.remove(0);
    debug!(
        subsystem = "identify",
        component = "resolver",
        product_id = best.product.id,
        confidence = best.confidence,
        "Surfacing best-effort suggestion"
    );
    Resolution::Matched(MatchDecision {
        status: IdentificationStatus::PartialMatch,
        details: format!("Best-effort suggestion: {}", best.details),
        best,
        alternatives: pool,
        requires_validation: true,
    })
}
