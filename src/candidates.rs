use lazy_static::lazy_static;
use std::collections::HashSet;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::normalizer::Normalizer;
use crate::store::{GazetteerStore, StoreError};
use crate::types::{Candidate, MatchType, Mention};
use crate::TARGET_CANDIDATES;

/// Hard cap on candidates returned per mention.
pub const DEFAULT_MAX_CANDIDATES: usize = 50;
/// Prefix and compound strategies only run while fewer candidates than
/// this have been found.
pub const DEFAULT_MIN_CANDIDATES: usize = 3;
/// Minimum normalized mention length before the prefix strategy is tried.
pub const PREFIX_MIN_MENTION_LEN: usize = 5;
/// Tokens shorter than this only go through alias lookup (abbreviations
/// such as "UK"); everything else is skipped for them.
const ALIAS_ONLY_MAX_LEN: usize = 2;
/// Compound tokens must be at least this long.
const COMPOUND_MIN_TOKEN_LEN: usize = 3;

lazy_static! {
    /// Generic or directional tokens that are never worth a gazetteer
    /// round-trip on their own.
    static ref GENERIC_DENYLIST: HashSet<&'static str> = [
        "north", "south", "east", "west", "northern", "southern", "eastern",
        "western", "central", "downtown", "city", "town", "village", "valley",
        "river", "lake", "mountain", "coast", "island", "bay", "park",
        "street", "county", "state", "province", "region", "district",
        "capital", "border", "home",
    ]
    .into_iter()
    .collect();

    /// Articles and particles excluded from compound-part matching.
    static ref COMPOUND_STOP_WORDS: HashSet<&'static str> = [
        "the", "of", "de", "del", "della", "di", "da", "do", "dos", "das",
        "la", "le", "les", "el", "los", "las", "van", "von", "der", "den",
        "am", "an", "and", "upon", "on", "in", "by", "al", "bin", "abu",
        "greater", "area",
    ]
    .into_iter()
    .collect();
}

/// Generation knobs; defaults match production behavior.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub max_candidates: usize,
    /// Fallback strategies (prefix, compound) stop being tried once this
    /// many candidates exist.
    pub min_candidates: usize,
    /// Language hint passed through to normalization.
    pub language: Option<String>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            max_candidates: DEFAULT_MAX_CANDIDATES,
            min_candidates: DEFAULT_MIN_CANDIDATES,
            language: None,
        }
    }
}

/// Maps a mention to a bounded, deduplicated candidate list, ordered by
/// strategy priority (qualified > exact > alias > prefix > compound) and
/// by prominence within each strategy.
pub struct CandidateGenerator<'a> {
    store: &'a dyn GazetteerStore,
    normalizer: Normalizer,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(store: &'a dyn GazetteerStore) -> Self {
        CandidateGenerator {
            store,
            normalizer: Normalizer::new(),
        }
    }

    /// An empty result means "no candidates", not an error; errors are
    /// reserved for the store failing mid-lookup.
    pub fn generate(
        &self,
        mention: &Mention,
        options: &GeneratorOptions,
    ) -> Result<Vec<Candidate>, StoreError> {
        let language = options.language.as_deref();

        // Split off a comma qualifier unless the NER layer already did.
        let (name_part, qualifier) = match &mention.qualifier {
            Some(q) => (mention.text.as_str(), Some(q.as_str())),
            None => match mention.text.split_once(',') {
                Some((name, qual)) => (name, Some(qual)),
                None => (mention.text.as_str(), None),
            },
        };

        let normalized = self.normalizer.normalize(name_part, language);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        if GENERIC_DENYLIST.contains(normalized.as_str()) {
            debug!(
                target: TARGET_CANDIDATES,
                "Skipping denylisted generic token '{}'", mention.text
            );
            return Ok(Vec::new());
        }

        let mut seen: HashSet<u64> = HashSet::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let limit = options.max_candidates;

        // Short tokens are only eligible for alias lookup, where known
        // abbreviations ("UK") live.
        if normalized.chars().count() <= ALIAS_ONLY_MAX_LEN {
            self.collect_aliases(&normalized, limit, &mut seen, &mut candidates)?;
            debug!(
                target: TARGET_CANDIDATES,
                "Short token '{}': alias-only lookup produced {} candidates",
                mention.text,
                candidates.len()
            );
            return Ok(candidates);
        }

        // 1. Qualified match. A resolving qualifier is explicit
        // disambiguation: the remaining strategies would only re-add the
        // places it excludes, so qualified hits stand alone.
        if let Some(qualifier) = qualifier {
            let qualifier_norm = self.normalizer.normalize(qualifier, language);
            if !qualifier_norm.is_empty() {
                for place in self.store.find_qualified(&normalized, &qualifier_norm, limit)? {
                    if candidates.len() >= limit {
                        break;
                    }
                    if seen.insert(place.id) {
                        candidates.push(Candidate::new(
                            place,
                            MatchType::Qualified {
                                qualifier: qualifier.trim().to_string(),
                            },
                        ));
                    }
                }
                if !candidates.is_empty() {
                    debug!(
                        target: TARGET_CANDIDATES,
                        "Qualifier '{}' resolved; returning {} qualified candidate(s) for '{}'",
                        qualifier,
                        candidates.len(),
                        mention.text
                    );
                    return Ok(candidates);
                }
            }
        }

        // 2. Exact match against preferred names.
        for place in self.store.find_exact(&normalized, limit)? {
            if candidates.len() >= limit {
                break;
            }
            if seen.insert(place.id) {
                candidates.push(Candidate::new(place, MatchType::Exact));
            }
        }

        // 3. Alias match.
        self.collect_aliases(&normalized, limit, &mut seen, &mut candidates)?;

        // 4. Prefix match, only as a fallback for long-enough mentions.
        if candidates.len() < options.min_candidates
            && normalized.chars().count() >= PREFIX_MIN_MENTION_LEN
        {
            let mention_len = normalized.chars().count();
            for hit in self.store.find_prefix(&normalized, limit)? {
                if candidates.len() >= limit {
                    break;
                }
                if seen.insert(hit.place.id) {
                    let ratio = mention_len as f64 / hit.name_len.max(1) as f64;
                    candidates.push(Candidate::new(hit.place, MatchType::Prefix { ratio }));
                }
            }
        }

        // 5. Compound-part match: last resort on one significant token
        // of a multi-word mention.
        if candidates.len() < options.min_candidates {
            if let Some((token, hits)) = self.compound_lookup(&normalized, limit)? {
                for place in hits {
                    if candidates.len() >= limit {
                        break;
                    }
                    if seen.insert(place.id) {
                        candidates.push(Candidate::new(
                            place,
                            MatchType::Compound {
                                token: token.clone(),
                            },
                        ));
                    }
                }
            }
        }

        debug!(
            target: TARGET_CANDIDATES,
            "Generated {} candidates for '{}'",
            candidates.len(),
            mention.text
        );
        Ok(candidates)
    }

    fn collect_aliases(
        &self,
        normalized: &str,
        limit: usize,
        seen: &mut HashSet<u64>,
        candidates: &mut Vec<Candidate>,
    ) -> Result<(), StoreError> {
        for hit in self.store.find_alias(normalized, limit)? {
            if candidates.len() >= limit {
                break;
            }
            if seen.insert(hit.place.id) {
                candidates.push(Candidate::new(hit.place, MatchType::Alias { kind: hit.kind }));
            }
        }
        Ok(())
    }

    /// Looks up the most significant (longest) token of a multi-word
    /// mention that yields any hits.
    fn compound_lookup(
        &self,
        normalized: &str,
        limit: usize,
    ) -> Result<Option<(String, Vec<crate::types::Place>)>, StoreError> {
        let mut tokens: Vec<&str> = normalized
            .unicode_words()
            .filter(|t| t.chars().count() >= COMPOUND_MIN_TOKEN_LEN)
            .filter(|t| !COMPOUND_STOP_WORDS.contains(*t))
            .filter(|t| !GENERIC_DENYLIST.contains(*t))
            .collect();
        if tokens.is_empty() || !normalized.contains(' ') {
            return Ok(None);
        }
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        tokens.dedup();

        for token in tokens {
            if token == normalized {
                continue;
            }
            let hits = self.store.find_exact(token, limit)?;
            if !hits.is_empty() {
                debug!(
                    target: TARGET_CANDIDATES,
                    "Compound match on token '{}' of '{}'", token, normalized
                );
                return Ok(Some((token.to_string(), hits)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGazetteer;
    use crate::types::{AliasKind, Place, PlaceKind};

    fn place(id: u64, name: &str, kind: PlaceKind, country: &str, prominence: f64) -> Place {
        Place {
            id,
            name: name.to_string(),
            kind,
            country_code: country.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            prominence,
        }
    }

    fn gazetteer() -> MemoryGazetteer {
        let mut g = MemoryGazetteer::new();
        g.add_place(place(1, "United Kingdom", PlaceKind::Country, "GB", 0.95));
        g.add_place(place(2, "London", PlaceKind::Locality, "GB", 0.95));
        g.add_place(place(3, "Canada", PlaceKind::Country, "CA", 0.95));
        g.add_place(place(4, "Ontario", PlaceKind::Adm1, "CA", 0.6));
        g.add_place(place(5, "London", PlaceKind::Locality, "CA", 0.35));
        g.add_place(place(6, "Londonderry", PlaceKind::Locality, "GB", 0.4));
        g.add_name(1, "UK", None, AliasKind::Abbrev);
        g.add_name(2, "Londres", Some("fr"), AliasKind::Common);
        g.add_containment(1, 2);
        g.add_containment(3, 4);
        g.add_containment(4, 5);
        g
    }

    fn generate(text: &str) -> Vec<Candidate> {
        let g = gazetteer();
        let generator = CandidateGenerator::new(&g);
        generator
            .generate(&Mention::new(text, 0, text.len()), &GeneratorOptions::default())
            .unwrap()
    }

    #[test]
    fn test_exact_match_ordering() {
        let candidates = generate("London");
        assert!(candidates.len() >= 2);
        // Exact hits come back by prominence, GB London first.
        assert_eq!(candidates[0].place.id, 2);
        assert_eq!(candidates[0].match_type, MatchType::Exact);
        assert_eq!(candidates[1].place.id, 5);
    }

    #[test]
    fn test_no_duplicate_place_ids() {
        let candidates = generate("London, Ontario");
        let mut ids: Vec<u64> = candidates.iter().map(|c| c.place.id).collect();
        let before = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn test_qualified_match_stands_alone() {
        let candidates = generate("London, Ontario");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].place.id, 5);
        assert!(matches!(candidates[0].match_type, MatchType::Qualified { .. }));
    }

    #[test]
    fn test_unresolving_qualifier_falls_through() {
        // "London, Narnia": qualifier matches nothing, so the usual
        // strategies still run on the name part.
        let candidates = generate("London, Narnia");
        assert!(candidates.iter().any(|c| c.place.id == 2));
        assert!(candidates.iter().any(|c| c.place.id == 5));
    }

    #[test]
    fn test_alias_abbreviation() {
        let candidates = generate("UK");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].place.id, 1);
        assert!(matches!(
            candidates[0].match_type,
            MatchType::Alias { kind: AliasKind::Abbrev }
        ));
    }

    #[test]
    fn test_short_non_alias_is_empty() {
        assert!(generate("Lo").is_empty());
    }

    #[test]
    fn test_denylisted_token_is_empty() {
        assert!(generate("North").is_empty());
        assert!(generate("Valley").is_empty());
    }

    #[test]
    fn test_unknown_mention_is_empty() {
        assert!(generate("Xyzzy123NotAPlace").is_empty());
    }

    #[test]
    fn test_prefix_fallback() {
        // "Londond" hits nothing exact; prefix picks up Londonderry.
        let candidates = generate("Londond");
        assert!(candidates.iter().any(|c| {
            c.place.id == 6 && matches!(c.match_type, MatchType::Prefix { .. })
        }));
        if let Some(c) = candidates
            .iter()
            .find(|c| matches!(c.match_type, MatchType::Prefix { .. }))
        {
            if let MatchType::Prefix { ratio } = c.match_type {
                assert!(ratio > 0.0 && ratio <= 1.0);
            }
        }
    }

    #[test]
    fn test_compound_fallback() {
        let candidates = generate("Greater London Area");
        assert!(!candidates.is_empty());
        assert!(candidates.iter().any(|c| {
            c.place.id == 2
                && matches!(&c.match_type, MatchType::Compound { token } if token == "london")
        }));
    }

    #[test]
    fn test_candidate_cap() {
        let mut g = MemoryGazetteer::new();
        for id in 0..80 {
            g.add_place(place(id, "Springfield", PlaceKind::Locality, "US", 0.3));
        }
        let generator = CandidateGenerator::new(&g);
        let candidates = generator
            .generate(
                &Mention::new("Springfield", 0, 11),
                &GeneratorOptions::default(),
            )
            .unwrap();
        assert_eq!(candidates.len(), DEFAULT_MAX_CANDIDATES);
    }
}
