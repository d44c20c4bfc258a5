use tracing::debug;

use crate::normalizer::Normalizer;
use crate::store::GazetteerStore;
use crate::types::{ArticleContext, Candidate, FeatureVector, Mention};
use crate::TARGET_RESOLVER;

/// Value used when an optional context signal is absent entirely.
pub const NEUTRAL: f64 = 0.5;
/// Baseline for a candidate not contained in any resolved region.
pub const CONTAINMENT_BASELINE: f64 = 0.3;
/// Baseline when no context keywords match the text window.
pub const TEXT_WINDOW_BASELINE: f64 = 0.3;
/// Prior for a known publisher with no weight for the candidate's
/// country and no catch-all bucket: deliberately low, not neutral.
pub const UNLISTED_COUNTRY_PRIOR: f64 = 0.2;

/// Distance (km) thresholds and the proximity value below each;
/// monotonically decreasing, floor 0.2.
const PROXIMITY_STEPS: &[(f64, f64)] = &[
    (25.0, 1.0),
    (100.0, 0.9),
    (300.0, 0.75),
    (1000.0, 0.6),
    (3000.0, 0.4),
];
const PROXIMITY_FLOOR: f64 = 0.2;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Computes the fixed-shape feature vector for one (mention, candidate,
/// context) triple. Pure over its inputs and never fails: a store
/// failure on the containment or keyword path degrades that one feature
/// to its baseline.
pub fn compute_features(
    mention: &Mention,
    candidate: &Candidate,
    ctx: &ArticleContext,
    store: &dyn GazetteerStore,
) -> FeatureVector {
    let place = &candidate.place;

    FeatureVector {
        match_quality: candidate.match_type.base_quality(),
        prominence: place.prominence,
        publisher_prior: publisher_prior(ctx, &place.country_code),
        co_mention_country: co_mention_country(ctx, &place.country_code),
        hierarchical_containment: hierarchical_containment(ctx, place.id, store),
        geographic_proximity: geographic_proximity(ctx, place.latitude, place.longitude),
        text_window_context: text_window_context(mention, candidate, ctx, store),
    }
    .clamped()
}

/// The publisher's weight for the candidate's country; 0.5 for an
/// unknown publisher, then the profile's `*` bucket, then a low prior.
fn publisher_prior(ctx: &ArticleContext, country_code: &str) -> f64 {
    let profile = match &ctx.publisher {
        Some(p) if !p.unknown => p,
        _ => return NEUTRAL,
    };
    if let Some(weight) = profile.country_weights.get(country_code) {
        return *weight;
    }
    if let Some(other) = profile.country_weights.get("*") {
        return *other;
    }
    UNLISTED_COUNTRY_PRIOR
}

/// Confidence-weighted fraction of already-resolved mentions sharing the
/// candidate's country; neutral while nothing is resolved yet.
fn co_mention_country(ctx: &ArticleContext, country_code: &str) -> f64 {
    let total: f64 = ctx.resolved.iter().map(|a| a.confidence).sum();
    if total <= 0.0 {
        return NEUTRAL;
    }
    let matching: f64 = ctx
        .resolved
        .iter()
        .filter(|a| a.country_code == country_code)
        .map(|a| a.confidence)
        .sum();
    matching / total
}

/// 1.0 when the candidate sits inside any already-resolved region;
/// baseline otherwise, including when the containment check fails.
fn hierarchical_containment(ctx: &ArticleContext, place_id: u64, store: &dyn GazetteerStore) -> f64 {
    for region in ctx.resolved_regions() {
        match store.is_descendant_of(place_id, region.place_id) {
            Ok(true) => return 1.0,
            Ok(false) => {}
            Err(err) => {
                debug!(
                    target: TARGET_RESOLVER,
                    "Containment check failed for place {}: {}", place_id, err
                );
            }
        }
    }
    CONTAINMENT_BASELINE
}

/// Step function of great-circle distance to the nearest already
/// resolved place; neutral while nothing is resolved yet.
fn geographic_proximity(ctx: &ArticleContext, latitude: f64, longitude: f64) -> f64 {
    let nearest = ctx
        .resolved
        .iter()
        .map(|a| haversine_km(latitude, longitude, a.latitude, a.longitude))
        .fold(f64::INFINITY, f64::min);
    if nearest.is_infinite() {
        return NEUTRAL;
    }
    for (threshold, value) in PROXIMITY_STEPS {
        if nearest < *threshold {
            return *value;
        }
    }
    PROXIMITY_FLOOR
}

/// Sum of context-keyword strengths found in the window around the
/// mention, capped at 1.0; baseline with no matches or no window.
fn text_window_context(
    mention: &Mention,
    candidate: &Candidate,
    ctx: &ArticleContext,
    store: &dyn GazetteerStore,
) -> f64 {
    let window = match ctx.window(mention) {
        Some(w) if !w.is_empty() => w,
        _ => return TEXT_WINDOW_BASELINE,
    };
    let keywords = match store.context_keywords(candidate.place.id, &candidate.place.country_code)
    {
        Ok(k) => k,
        Err(err) => {
            debug!(
                target: TARGET_RESOLVER,
                "Context keyword lookup failed for place {}: {}", candidate.place.id, err
            );
            return TEXT_WINDOW_BASELINE;
        }
    };
    if keywords.is_empty() {
        return TEXT_WINDOW_BASELINE;
    }

    let normalizer = Normalizer::new();
    let haystack = format!(" {} ", normalizer.normalize(window, None));
    let mut signal = 0.0;
    let mut matched = false;
    for (keyword, strength) in keywords {
        let needle = format!(" {} ", normalizer.normalize(&keyword, None));
        if needle.trim().is_empty() {
            continue;
        }
        if haystack.contains(&needle) {
            signal += strength;
            matched = true;
        }
    }
    if matched {
        signal.min(1.0)
    } else {
        TEXT_WINDOW_BASELINE
    }
}

/// Great-circle distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
