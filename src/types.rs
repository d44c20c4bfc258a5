use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How specific a resolved place is, from whole countries down to
/// points of interest. Ordering matters for ranking tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceKind {
    Country,
    Adm1,
    Adm2,
    Adm3,
    Locality,
    Poi,
}

impl PlaceKind {
    /// Specificity rank used as a ranking tie-break: more specific kinds
    /// win over broader ones when scores and prominence are equal.
    pub fn specificity(&self) -> u8 {
        match self {
            PlaceKind::Country => 0,
            PlaceKind::Adm1 => 1,
            PlaceKind::Adm2 => 2,
            PlaceKind::Adm3 => 3,
            PlaceKind::Locality => 4,
            PlaceKind::Poi => 5,
        }
    }

    /// Administrative regions anchor the hierarchical-containment feature
    /// and the coherence containment bonus.
    pub fn is_region(&self) -> bool {
        matches!(self, PlaceKind::Adm1 | PlaceKind::Adm2 | PlaceKind::Adm3)
    }
}

impl fmt::Display for PlaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceKind::Country => write!(f, "country"),
            PlaceKind::Adm1 => write!(f, "adm1"),
            PlaceKind::Adm2 => write!(f, "adm2"),
            PlaceKind::Adm3 => write!(f, "adm3"),
            PlaceKind::Locality => write!(f, "locality"),
            PlaceKind::Poi => write!(f, "poi"),
        }
    }
}

/// A resolvable geographic entity, owned by the external gazetteer.
/// The core treats places as immutable, read-only inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: u64,
    /// Preferred display name.
    pub name: String,
    pub kind: PlaceKind,
    /// ISO 3166-1 alpha-2 code.
    pub country_code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Externally pre-normalized importance in [0,1]; the core treats it
    /// as an opaque input (population/admin-level/area derived upstream).
    pub prominence: f64,
}

/// Tier of a non-preferred name. Floors for alias matches are keyed off
/// this: official > common/abbrev > local > historic > misspelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    Official,
    Common,
    Abbrev,
    Local,
    Historic,
    Misspelling,
}

/// A text span hypothesized to name a place. Produced by an external NER
/// collaborator; consumed, never mutated, by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Pre-split qualifier ("Ontario" in "London, Ontario") when the NER
    /// layer provides one; otherwise the generator splits on a comma.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

impl Mention {
    pub fn new(text: &str, start: usize, end: usize) -> Self {
        Mention {
            text: text.to_string(),
            start,
            end,
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: &str) -> Self {
        self.qualifier = Some(qualifier.to_string());
        self
    }
}

/// How a candidate was matched. Each variant carries only the fields
/// relevant to that strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum MatchType {
    /// Mention plus qualifier, qualifier confirmed as an ancestor.
    Qualified { qualifier: String },
    /// Normalized mention equals a preferred name.
    Exact,
    /// Normalized mention equals a non-preferred name.
    Alias { kind: AliasKind },
    /// Mention is a prefix of a candidate name; ratio is mention length
    /// over matched name length.
    Prefix { ratio: f64 },
    /// Matched on one significant token of a multi-word mention.
    Compound { token: String },
}

impl MatchType {
    /// Base match quality in [0,1]. Every alias tier sits strictly below
    /// exact; prefix and compound sit below every alias tier.
    pub fn base_quality(&self) -> f64 {
        match self {
            MatchType::Qualified { .. } => 0.98,
            MatchType::Exact => 0.95,
            MatchType::Alias { kind } => match kind {
                AliasKind::Official => 0.90,
                AliasKind::Common => 0.85,
                AliasKind::Abbrev => 0.85,
                AliasKind::Local => 0.80,
                AliasKind::Historic => 0.72,
                AliasKind::Misspelling => 0.65,
            },
            MatchType::Prefix { ratio } => 0.35 + 0.25 * ratio.clamp(0.0, 1.0),
            MatchType::Compound { .. } => 0.30,
        }
    }
}

/// A place hypothesized to match a mention. Constructed fresh per
/// mention, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub place: Place,
    pub match_type: MatchType,
}

impl Candidate {
    pub fn new(place: Place, match_type: MatchType) -> Self {
        Candidate { place, match_type }
    }
}

/// Signals computed for one (mention, candidate, context) triple.
/// Pure function of its inputs; every field lies in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub match_quality: f64,
    pub prominence: f64,
    pub publisher_prior: f64,
    pub co_mention_country: f64,
    pub hierarchical_containment: f64,
    pub geographic_proximity: f64,
    pub text_window_context: f64,
}

impl FeatureVector {
    /// Clamp every field into [0,1]; the invariant callers rely on.
    pub fn clamped(mut self) -> Self {
        self.match_quality = self.match_quality.clamp(0.0, 1.0);
        self.prominence = self.prominence.clamp(0.0, 1.0);
        self.publisher_prior = self.publisher_prior.clamp(0.0, 1.0);
        self.co_mention_country = self.co_mention_country.clamp(0.0, 1.0);
        self.hierarchical_containment = self.hierarchical_containment.clamp(0.0, 1.0);
        self.geographic_proximity = self.geographic_proximity.clamp(0.0, 1.0);
        self.text_window_context = self.text_window_context.clamp(0.0, 1.0);
        self
    }
}

/// Candidate plus its feature vector and combined score. Transient;
/// ordering is the scorer's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub features: FeatureVector,
    pub score: f64,
}

/// Compact place description embedded in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSummary {
    pub id: u64,
    pub name: String,
    pub kind: PlaceKind,
    pub country_code: String,
    pub display_label: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&Place> for PlaceSummary {
    fn from(place: &Place) -> Self {
        PlaceSummary {
            id: place.id,
            name: place.name.clone(),
            kind: place.kind,
            country_code: place.country_code.clone(),
            display_label: format!("{} ({})", place.name, place.country_code),
            latitude: place.latitude,
            longitude: place.longitude,
        }
    }
}

/// Closed taxonomy of deliberate "no confident answer" outcomes.
/// `DeadlineExceeded` marks mentions never evaluated because the caller's
/// per-article deadline expired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstainReason {
    NoCandidates,
    LowConfidence,
    TopScoreTooLow,
    MultiWayTie,
    DeadlineExceeded,
}

impl fmt::Display for AbstainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstainReason::NoCandidates => write!(f, "no_candidates"),
            AbstainReason::LowConfidence => write!(f, "low_confidence"),
            AbstainReason::TopScoreTooLow => write!(f, "top_score_too_low"),
            AbstainReason::MultiWayTie => write!(f, "multi_way_tie"),
            AbstainReason::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

/// Record of a winner change made by the coherence pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceChange {
    pub from: PlaceSummary,
    pub to: PlaceSummary,
    pub reason: String,
}

/// A ranked alternative carried alongside the winning place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub place: PlaceSummary,
    pub score: f64,
}

/// The final decision for one mention — the only entity meant to outlive
/// the resolution call; handed to downstream persistence as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisambiguationResult {
    pub mention_text: String,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PlaceSummary>,
    pub confidence: f64,
    pub score: f64,
    pub alternatives: Vec<Alternative>,
    pub abstained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstain_reason: Option<AbstainReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coherence_change: Option<CoherenceChange>,
}

impl DisambiguationResult {
    /// An abstained result for a mention; `resolved` is always `None`.
    pub fn abstained(mention: &Mention, reason: AbstainReason, confidence: f64) -> Self {
        DisambiguationResult {
            mention_text: mention.text.clone(),
            start: mention.start,
            end: mention.end,
            resolved: None,
            confidence,
            score: 0.0,
            alternatives: Vec::new(),
            abstained: true,
            abstain_reason: Some(reason),
            coherence_change: None,
        }
    }
}

/// A publisher's historical country distribution. External value object;
/// the core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherProfile {
    pub domain: String,
    /// ISO country code -> weight in [0,1]. A `*` key, when present, is
    /// the catch-all bucket for countries not listed explicitly.
    pub country_weights: HashMap<String, f64>,
    /// True when no profile exists for the publisher at all.
    pub unknown: bool,
}

impl PublisherProfile {
    pub fn unknown(domain: &str) -> Self {
        PublisherProfile {
            domain: domain.to_string(),
            country_weights: HashMap::new(),
            unknown: true,
        }
    }
}

/// An already-resolved mention carried forward as context for later
/// mentions in the same article.
#[derive(Debug, Clone)]
pub struct ResolvedAnchor {
    pub place_id: u64,
    pub kind: PlaceKind,
    pub country_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
}

/// Accumulated state while resolving one article's mentions. Built
/// incrementally by the service; never shared across articles.
#[derive(Debug, Clone, Default)]
pub struct ArticleContext {
    pub publisher: Option<PublisherProfile>,
    pub resolved: Vec<ResolvedAnchor>,
    pub article_text: Option<String>,
    /// Radius in bytes of the text window inspected around each mention.
    pub window_radius: usize,
}

pub const DEFAULT_WINDOW_RADIUS: usize = 250;

impl ArticleContext {
    pub fn new() -> Self {
        ArticleContext {
            publisher: None,
            resolved: Vec::new(),
            article_text: None,
            window_radius: DEFAULT_WINDOW_RADIUS,
        }
    }

    pub fn with_publisher(mut self, profile: PublisherProfile) -> Self {
        self.publisher = Some(profile);
        self
    }

    pub fn with_article_text(mut self, text: &str) -> Self {
        self.article_text = Some(text.to_string());
        self
    }

    /// Anchors resolved to administrative regions, the only ones that
    /// feed the hierarchical-containment feature.
    pub fn resolved_regions(&self) -> impl Iterator<Item = &ResolvedAnchor> {
        self.resolved.iter().filter(|a| a.kind.is_region())
    }

    pub fn push_resolved(&mut self, anchor: ResolvedAnchor) {
        self.resolved.push(anchor);
    }

    /// The text window around a mention, clamped to char boundaries.
    /// Returns None when no article text was supplied.
    pub fn window(&self, mention: &Mention) -> Option<&str> {
        let text = self.article_text.as_deref()?;
        let radius = if self.window_radius == 0 {
            DEFAULT_WINDOW_RADIUS
        } else {
            self.window_radius
        };
        let mut start = mention.start.min(text.len()).saturating_sub(radius);
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = mention.end.saturating_add(radius).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        Some(&text[start..end])
    }
}

/// Article-level rollup produced after the coherence pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleSummary {
    /// Resolved-mention counts per country code.
    pub country_distribution: HashMap<String, usize>,
    /// Resolved-mention counts per place kind.
    pub kind_distribution: HashMap<String, usize>,
    /// Mean confidence over every mention, abstained included.
    pub mean_confidence: f64,
    pub resolved_count: usize,
    pub abstained_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(id: u64) -> Place {
        Place {
            id,
            name: "Testville".to_string(),
            kind: PlaceKind::Locality,
            country_code: "US".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            prominence: 0.5,
        }
    }

    #[test]
    fn test_kind_specificity_order() {
        assert!(PlaceKind::Poi.specificity() > PlaceKind::Locality.specificity());
        assert!(PlaceKind::Locality.specificity() > PlaceKind::Adm3.specificity());
        assert!(PlaceKind::Adm3.specificity() > PlaceKind::Adm2.specificity());
        assert!(PlaceKind::Adm2.specificity() > PlaceKind::Adm1.specificity());
        assert!(PlaceKind::Adm1.specificity() > PlaceKind::Country.specificity());
    }

    #[test]
    fn test_alias_tiers_below_exact() {
        let exact = MatchType::Exact.base_quality();
        for kind in [
            AliasKind::Official,
            AliasKind::Common,
            AliasKind::Abbrev,
            AliasKind::Local,
            AliasKind::Historic,
            AliasKind::Misspelling,
        ] {
            assert!(MatchType::Alias { kind }.base_quality() < exact);
        }
        assert!(MatchType::Qualified { qualifier: "x".into() }.base_quality() >= exact);
        assert!(
            MatchType::Prefix { ratio: 1.0 }.base_quality()
                < MatchType::Alias { kind: AliasKind::Misspelling }.base_quality() + 1e-9
        );
    }

    #[test]
    fn test_feature_vector_clamping() {
        let v = FeatureVector {
            match_quality: 1.4,
            prominence: -0.2,
            publisher_prior: 0.5,
            co_mention_country: 0.5,
            hierarchical_containment: 0.3,
            geographic_proximity: 2.0,
            text_window_context: 0.3,
        }
        .clamped();
        assert_eq!(v.match_quality, 1.0);
        assert_eq!(v.prominence, 0.0);
        assert_eq!(v.geographic_proximity, 1.0);
    }

    #[test]
    fn test_window_clamps_to_char_boundaries() {
        let text = "café münchen café münchen café münchen";
        let ctx = ArticleContext {
            window_radius: 3,
            ..ArticleContext::new()
        }
        .with_article_text(text);
        // Offsets chosen to land inside multi-byte chars.
        for start in 0..text.len() {
            let m = Mention::new("x", start, (start + 2).min(text.len()));
            let w = ctx.window(&m).unwrap();
            assert!(!w.is_empty() || text.is_empty());
        }
    }

    #[test]
    fn test_abstained_result_shape() {
        let m = Mention::new("Springfield", 10, 21);
        let r = DisambiguationResult::abstained(&m, AbstainReason::MultiWayTie, 0.3);
        assert!(r.abstained);
        assert!(r.resolved.is_none());
        assert_eq!(r.abstain_reason, Some(AbstainReason::MultiWayTie));
    }

    #[test]
    fn test_result_wire_shape() {
        let p = place(7);
        let r = DisambiguationResult {
            mention_text: "Testville".to_string(),
            start: 0,
            end: 9,
            resolved: Some(PlaceSummary::from(&p)),
            confidence: 0.85,
            score: 0.7,
            alternatives: vec![],
            abstained: false,
            abstain_reason: None,
            coherence_change: None,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["resolved"]["country_code"], "US");
        assert_eq!(json["resolved"]["kind"], "locality");
        assert!(json.get("abstain_reason").is_none());

        let abst = DisambiguationResult::abstained(
            &Mention::new("Nowhere", 0, 7),
            AbstainReason::NoCandidates,
            0.0,
        );
        let json = serde_json::to_value(&abst).unwrap();
        assert_eq!(json["abstain_reason"], "no_candidates");
    }
}
