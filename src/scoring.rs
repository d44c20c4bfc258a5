use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{AbstainReason, Candidate, FeatureVector, ScoredCandidate};

/// Below this confidence a result abstains as `low_confidence`.
pub const MIN_CONFIDENCE: f64 = 0.4;
/// Below this top score a result abstains as `top_score_too_low`.
pub const MIN_TOP_SCORE: f64 = 0.3;
/// Candidates within this margin of the top score count toward a
/// multi-way tie.
pub const TIE_MARGIN: f64 = 0.02;
/// Three or more candidates inside the tie margin abstain the mention.
pub const TIE_CANDIDATES: usize = 3;

/// Immutable per-call weight table. Passed explicitly into every scoring
/// call; there is no process-wide settings object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub match_quality: f64,
    pub prominence: f64,
    pub publisher_prior: f64,
    pub co_mention_country: f64,
    pub hierarchical_containment: f64,
    pub geographic_proximity: f64,
    pub text_window_context: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        // Sums to 1.0 so default scores stay in [0,1].
        ScoringWeights {
            match_quality: 0.30,
            prominence: 0.40,
            publisher_prior: 0.06,
            co_mention_country: 0.06,
            hierarchical_containment: 0.06,
            geographic_proximity: 0.04,
            text_window_context: 0.08,
        }
    }
}

/// Weighted sum over the fixed feature shape.
pub fn score(features: &FeatureVector, weights: &ScoringWeights) -> f64 {
    weights.match_quality * features.match_quality
        + weights.prominence * features.prominence
        + weights.publisher_prior * features.publisher_prior
        + weights.co_mention_country * features.co_mention_country
        + weights.hierarchical_containment * features.hierarchical_containment
        + weights.geographic_proximity * features.geographic_proximity
        + weights.text_window_context * features.text_window_context
}

/// Total deterministic candidate order: score desc, prominence desc,
/// more specific kind first, place id asc. Identical inputs rank
/// identically regardless of their arrival order.
pub(crate) fn compare_candidates(
    score_a: f64,
    a: &Candidate,
    score_b: f64,
    b: &Candidate,
) -> Ordering {
    score_b
        .total_cmp(&score_a)
        .then_with(|| b.place.prominence.total_cmp(&a.place.prominence))
        .then_with(|| b.place.kind.specificity().cmp(&a.place.kind.specificity()))
        .then_with(|| a.place.id.cmp(&b.place.id))
}

/// Sorts scored candidates into the deterministic ranking order.
pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| compare_candidates(a.score, &a.candidate, b.score, &b.candidate));
    candidates
}

/// Confidence from the ranked score distribution. Monotone in the gap
/// between the top two scores and in the top score itself.
pub fn compute_confidence(ranked: &[ScoredCandidate]) -> f64 {
    confidence_from_scores(
        ranked.first().map(|c| c.score),
        ranked.get(1).map(|c| c.score),
    )
}

pub(crate) fn confidence_from_scores(top: Option<f64>, second: Option<f64>) -> f64 {
    let top = match top {
        Some(t) => t,
        None => return 0.0,
    };
    let second = match second {
        Some(s) => s,
        // Sole candidate: trust it only as far as its own score.
        None => return if top > 0.5 { 0.8 } else { 0.5 },
    };
    let gap = top - second;
    if gap > 0.20 && top > 0.70 {
        0.95
    } else if gap > 0.15 && top > 0.60 {
        0.85
    } else if gap > 0.10 && top > 0.50 {
        0.70
    } else if gap > 0.05 {
        0.50
    } else {
        0.30
    }
}

/// The abstention decision. Reasons are mutually exclusive; a tie is
/// checked ahead of the confidence floor it necessarily also trips, so
/// a three-way tie is reported as `multi_way_tie`.
pub fn abstain_reason(confidence: f64, ranked: &[ScoredCandidate]) -> Option<AbstainReason> {
    let top = match ranked.first() {
        Some(c) => c.score,
        None => return Some(AbstainReason::NoCandidates),
    };
    let near_top = ranked.iter().filter(|c| top - c.score <= TIE_MARGIN).count();
    if near_top >= TIE_CANDIDATES {
        return Some(AbstainReason::MultiWayTie);
    }
    if confidence < MIN_CONFIDENCE {
        return Some(AbstainReason::LowConfidence);
    }
    if top < MIN_TOP_SCORE {
        return Some(AbstainReason::TopScoreTooLow);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchType, Place, PlaceKind};

    fn scored(id: u64, kind: PlaceKind, prominence: f64, score: f64) -> ScoredCandidate {
        let place = Place {
            id,
            name: format!("place-{}", id),
            kind,
            country_code: "US".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            prominence,
        };
        ScoredCandidate {
            candidate: Candidate::new(place, MatchType::Exact),
            features: FeatureVector {
                match_quality: 0.95,
                prominence,
                publisher_prior: 0.5,
                co_mention_country: 0.5,
                hierarchical_containment: 0.3,
                geographic_proximity: 0.5,
                text_window_context: 0.3,
            },
            score,
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        let sum = w.match_quality
            + w.prominence
            + w.publisher_prior
            + w.co_mention_country
            + w.hierarchical_containment
            + w.geographic_proximity
            + w.text_window_context;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_weighted_sum() {
        let w = ScoringWeights::default();
        let c = scored(1, PlaceKind::Locality, 0.9, 0.0);
        let s = score(&c.features, &w);
        assert!(s > 0.0 && s <= 1.0);
        // All-ones vector scores exactly the weight sum.
        let ones = FeatureVector {
            match_quality: 1.0,
            prominence: 1.0,
            publisher_prior: 1.0,
            co_mention_country: 1.0,
            hierarchical_containment: 1.0,
            geographic_proximity: 1.0,
            text_window_context: 1.0,
        };
        assert!((score(&ones, &w) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rank_deterministic_under_permutation() {
        let a = scored(30, PlaceKind::Locality, 0.5, 0.7);
        let b = scored(10, PlaceKind::Locality, 0.5, 0.7);
        let c = scored(20, PlaceKind::Adm1, 0.5, 0.7);
        let d = scored(40, PlaceKind::Locality, 0.9, 0.7);

        let expect: Vec<u64> = vec![40, 10, 30, 20];
        let orders = [
            vec![a.clone(), b.clone(), c.clone(), d.clone()],
            vec![d.clone(), c.clone(), b.clone(), a.clone()],
            vec![c.clone(), a.clone(), d.clone(), b.clone()],
        ];
        for input in orders {
            let ids: Vec<u64> = rank(input).iter().map(|s| s.candidate.place.id).collect();
            assert_eq!(ids, expect);
        }
    }

    #[test]
    fn test_confidence_table() {
        assert_eq!(confidence_from_scores(None, None), 0.0);
        assert_eq!(confidence_from_scores(Some(0.7), None), 0.8);
        assert_eq!(confidence_from_scores(Some(0.4), None), 0.5);
        assert_eq!(confidence_from_scores(Some(0.75), Some(0.5)), 0.95);
        assert_eq!(confidence_from_scores(Some(0.65), Some(0.45)), 0.85);
        assert_eq!(confidence_from_scores(Some(0.55), Some(0.42)), 0.70);
        assert_eq!(confidence_from_scores(Some(0.45), Some(0.37)), 0.50);
        assert_eq!(confidence_from_scores(Some(0.45), Some(0.44)), 0.30);
    }

    #[test]
    fn test_confidence_monotonicity() {
        // Non-decreasing in gap, holding top fixed.
        for top in [0.45, 0.55, 0.65, 0.75, 0.9] {
            let mut last = 0.0;
            for gap_step in 0..40 {
                let gap = gap_step as f64 * 0.01;
                if gap > top {
                    break;
                }
                let c = confidence_from_scores(Some(top), Some(top - gap));
                assert!(c >= last, "confidence fell as gap grew (top={})", top);
                last = c;
            }
        }
        // Non-decreasing in top, holding gap fixed.
        for gap in [0.0, 0.06, 0.11, 0.16, 0.25] {
            let mut last = 0.0;
            for top_step in 0..60 {
                let top = 0.3 + top_step as f64 * 0.01;
                let c = confidence_from_scores(Some(top), Some(top - gap));
                assert!(c >= last, "confidence fell as top grew (gap={})", gap);
                last = c;
            }
        }
    }

    #[test]
    fn test_abstain_reasons() {
        // Empty ranking.
        assert_eq!(abstain_reason(0.0, &[]), Some(AbstainReason::NoCandidates));

        // Three candidates within the margin: multi-way tie, reported
        // ahead of the low-confidence floor it also trips.
        let tied = vec![
            scored(1, PlaceKind::Locality, 0.4, 0.55),
            scored(2, PlaceKind::Locality, 0.4, 0.545),
            scored(3, PlaceKind::Locality, 0.4, 0.54),
        ];
        let conf = compute_confidence(&tied);
        assert_eq!(abstain_reason(conf, &tied), Some(AbstainReason::MultiWayTie));

        // Top score too low, with enough of a gap to clear the
        // confidence floor.
        let weak = vec![
            scored(1, PlaceKind::Locality, 0.1, 0.25),
            scored(2, PlaceKind::Locality, 0.1, 0.10),
        ];
        let conf = compute_confidence(&weak);
        assert_eq!(abstain_reason(conf, &weak), Some(AbstainReason::TopScoreTooLow));

        // Weak top AND a close runner-up: the confidence floor wins.
        let weak_close = vec![
            scored(1, PlaceKind::Locality, 0.1, 0.25),
            scored(2, PlaceKind::Locality, 0.1, 0.21),
        ];
        let conf = compute_confidence(&weak_close);
        assert_eq!(abstain_reason(conf, &weak_close), Some(AbstainReason::LowConfidence));

        // Close two-way race: low confidence.
        let close = vec![
            scored(1, PlaceKind::Locality, 0.5, 0.60),
            scored(2, PlaceKind::Locality, 0.5, 0.59),
        ];
        let conf = compute_confidence(&close);
        assert_eq!(abstain_reason(conf, &close), Some(AbstainReason::LowConfidence));

        // Clear winner: no abstention.
        let clear = vec![
            scored(1, PlaceKind::Locality, 0.9, 0.80),
            scored(2, PlaceKind::Locality, 0.4, 0.50),
        ];
        let conf = compute_confidence(&clear);
        assert_eq!(abstain_reason(conf, &clear), None);
    }
}
