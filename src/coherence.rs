use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::scoring::{compare_candidates, confidence_from_scores};
use crate::store::GazetteerStore;
use crate::types::{
    Alternative, CoherenceChange, DisambiguationResult, Mention, PlaceSummary, ScoredCandidate,
};
use crate::TARGET_COHERENCE;

/// Maximum ranked alternatives carried on a result.
const MAX_ALTERNATIVES: usize = 5;

lazy_static! {
    /// Markers of legitimately multi-country reporting. Mentions whose
    /// surrounding text hits one of these are left out of the coherence
    /// vote and never adjusted.
    static ref INTERNATIONAL_KEYWORDS: HashSet<&'static str> = [
        "summit", "treaty", "bilateral", "multilateral", "delegation",
        "diplomatic", "embassy", "ambassador", "nato", "g7", "g20",
        "united nations", "security council", "accord", "sanctions",
        "foreign minister", "foreign ministers", "peace talks",
    ]
    .into_iter()
    .collect();
}

/// Coherence adjustment knobs.
#[derive(Debug, Clone)]
pub struct CoherenceConfig {
    /// Bonus for matching the dominant country, scaled by its vote share.
    pub country_bonus: f64,
    /// Bonus for sitting inside an already-resolved region.
    pub containment_bonus: f64,
    /// Vote share one country must exceed to dominate.
    pub dominance_threshold: f64,
    /// Results above this confidence are left alone.
    pub confidence_ceiling: f64,
    pub max_iterations: usize,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        CoherenceConfig {
            country_bonus: 0.15,
            containment_bonus: 0.10,
            dominance_threshold: 0.5,
            confidence_ceiling: 0.85,
            max_iterations: 3,
        }
    }
}

/// One mention's full Pass-1 output: the result handed to the caller
/// plus the complete ranking the coherence pass re-scores.
#[derive(Debug, Clone)]
pub struct MentionResolution {
    pub mention: Mention,
    pub ranked: Vec<ScoredCandidate>,
    pub result: DisambiguationResult,
    /// True when the mention's text window reads as international
    /// coverage; excluded from voting and adjustment.
    pub international: bool,
}

/// True when the window around a mention signals an international story.
pub(crate) fn is_international_window(window: &str) -> bool {
    let lowered = format!(" {} ", window.to_lowercase());
    INTERNATIONAL_KEYWORDS.iter().any(|kw| {
        lowered
            .match_indices(kw)
            .any(|(idx, _)| {
                let before = lowered[..idx].chars().next_back();
                let after = lowered[idx + kw.len()..].chars().next();
                !before.is_some_and(char::is_alphanumeric)
                    && !after.is_some_and(char::is_alphanumeric)
            })
    })
}

/// Adjusts an article's independently-scored results for cross-mention
/// geographic consistency. Iterates until the mention-to-place mapping
/// reaches a fixed point or the iteration cap; returns the number of
/// winner changes made. A containment-check failure withholds that one
/// bonus and never aborts the pass.
pub fn apply_coherence(
    resolutions: &mut [MentionResolution],
    store: &dyn GazetteerStore,
    config: &CoherenceConfig,
) -> usize {
    let mut changes = 0;

    for iteration in 0..config.max_iterations {
        let before: Vec<Option<u64>> = winner_mapping(resolutions);

        let dominant = dominant_country(resolutions, config);
        if let Some((country, strength)) = &dominant {
            debug!(
                target: TARGET_COHERENCE,
                "Iteration {}: dominant country {} with strength {:.2}",
                iteration, country, strength
            );
        }

        // Region winners anchor the containment bonus for other mentions.
        let regions: Vec<(usize, u64)> = resolutions
            .iter()
            .enumerate()
            .filter_map(|(idx, r)| {
                r.result
                    .resolved
                    .as_ref()
                    .filter(|p| p.kind.is_region())
                    .map(|p| (idx, p.id))
            })
            .collect();

        for idx in 0..resolutions.len() {
            let eligible = {
                let r = &resolutions[idx];
                !r.result.abstained
                    && !r.international
                    && r.result.confidence <= config.confidence_ceiling
                    && r.ranked.len() > 1
            };
            if !eligible {
                continue;
            }
            if adjust_one(resolutions, idx, &dominant, &regions, store, config) {
                changes += 1;
            }
        }

        if winner_mapping(resolutions) == before {
            debug!(
                target: TARGET_COHERENCE,
                "Converged after {} iteration(s)", iteration + 1
            );
            break;
        }
    }

    changes
}

fn winner_mapping(resolutions: &[MentionResolution]) -> Vec<Option<u64>> {
    resolutions
        .iter()
        .map(|r| r.result.resolved.as_ref().map(|p| p.id))
        .collect()
}

/// Confidence-weighted country vote over non-abstained, non-international
/// results; a country dominating more than the threshold share wins.
fn dominant_country(
    resolutions: &[MentionResolution],
    config: &CoherenceConfig,
) -> Option<(String, f64)> {
    let mut votes: HashMap<&str, f64> = HashMap::new();
    let mut total = 0.0;
    for r in resolutions {
        if r.result.abstained || r.international {
            continue;
        }
        if let Some(place) = &r.result.resolved {
            *votes.entry(place.country_code.as_str()).or_default() += r.result.confidence;
            total += r.result.confidence;
        }
    }
    if total <= 0.0 {
        return None;
    }
    votes
        .into_iter()
        .map(|(country, vote)| (country, vote / total))
        .filter(|(_, share)| *share > config.dominance_threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(country, share)| (country.to_string(), share))
}

/// Re-ranks one mention's candidates with coherence bonuses applied;
/// true when the winner changed.
fn adjust_one(
    resolutions: &mut [MentionResolution],
    idx: usize,
    dominant: &Option<(String, f64)>,
    regions: &[(usize, u64)],
    store: &dyn GazetteerStore,
    config: &CoherenceConfig,
) -> bool {
    let current_id = resolutions[idx].result.resolved.as_ref().map(|p| p.id);

    // Adjusted score per candidate, bonuses recomputed from base scores
    // each iteration.
    let mut adjusted: Vec<(f64, usize, bool, bool)> = Vec::new();
    for (cand_idx, sc) in resolutions[idx].ranked.iter().enumerate() {
        let mut adj = sc.score;
        let mut country_hit = false;
        let mut containment_hit = false;

        if let Some((country, strength)) = dominant {
            if sc.candidate.place.country_code == *country {
                adj += config.country_bonus * strength;
                country_hit = true;
            }
        }

        for (region_idx, region_id) in regions {
            if *region_idx == idx || sc.candidate.place.id == *region_id {
                continue;
            }
            match store.is_descendant_of(sc.candidate.place.id, *region_id) {
                Ok(true) => {
                    adj += config.containment_bonus;
                    containment_hit = true;
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    // Degrade locally: this candidate just misses the bonus.
                    debug!(
                        target: TARGET_COHERENCE,
                        "Containment check failed for place {}: {}",
                        sc.candidate.place.id, err
                    );
                }
            }
        }

        adjusted.push((adj, cand_idx, country_hit, containment_hit));
    }

    adjusted.sort_by(|a, b| {
        let ca = &resolutions[idx].ranked[a.1].candidate;
        let cb = &resolutions[idx].ranked[b.1].candidate;
        compare_candidates(a.0, ca, b.0, cb)
    });

    let (winner_score, winner_idx, country_hit, containment_hit) = adjusted[0];
    let winner_id = resolutions[idx].ranked[winner_idx].candidate.place.id;
    if Some(winner_id) == current_id {
        return false;
    }

    let resolution = &mut resolutions[idx];
    let winner_place = &resolution.ranked[winner_idx].candidate.place;
    let new_summary = PlaceSummary::from(winner_place);
    let previous = resolution.result.resolved.clone();

    let mut reasons = Vec::new();
    if country_hit {
        if let Some((country, _)) = dominant {
            reasons.push(format!("dominant_country={}", country));
        }
    }
    if containment_hit {
        reasons.push("region_containment".to_string());
    }
    let reason = if reasons.is_empty() {
        "re_ranked".to_string()
    } else {
        reasons.join("+")
    };

    info!(
        target: TARGET_COHERENCE,
        "Coherence change for '{}': {:?} -> {} ({})",
        resolution.mention.text,
        previous.as_ref().map(|p| p.id),
        winner_id,
        reason
    );

    // Keep the original starting point if this mention already flipped
    // in an earlier iteration.
    let original_from = resolution.result.coherence_change.take().map(|c| c.from);
    if let Some(previous) = previous {
        resolution.result.coherence_change = Some(CoherenceChange {
            from: original_from.unwrap_or(previous),
            to: new_summary.clone(),
            reason,
        });
    }

    let new_alternatives: Vec<Alternative> = adjusted
        .iter()
        .skip(1)
        .take(MAX_ALTERNATIVES)
        .map(|(adj, cand_idx, _, _)| Alternative {
            place: PlaceSummary::from(&resolution.ranked[*cand_idx].candidate.place),
            score: *adj,
        })
        .collect();
    resolution.result.resolved = Some(new_summary);
    resolution.result.score = winner_score;
    resolution.result.confidence =
        confidence_from_scores(Some(winner_score), adjusted.get(1).map(|a| a.0));
    resolution.result.alternatives = new_alternatives;

    true
}
