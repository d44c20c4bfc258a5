use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::warn;

use crate::normalizer::Normalizer;
use crate::types::{AliasKind, Place, PublisherProfile};
use crate::TARGET_STORE;

/// A store collaborator failing is a true error, distinct from "no
/// rows": lookups that find nothing return empty collections.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lookup timed out: {0}")]
    Timeout(String),
}

/// An alias-name hit, carrying the tier the name was recorded under.
#[derive(Debug, Clone)]
pub struct AliasHit {
    pub place: Place,
    pub kind: AliasKind,
}

/// A prefix hit; `name_len` is the char length of the matched name, used
/// to scale the prefix match floor.
#[derive(Debug, Clone)]
pub struct PrefixHit {
    pub place: Place,
    pub name_len: usize,
}

/// Read-only gazetteer capability consumed by the core. Callers supply
/// already-normalized strings. Adapters own any async/caching mechanics;
/// from the core's perspective every call is synchronous over
/// already-fetched data.
pub trait GazetteerStore: Send + Sync {
    /// Places whose preferred name equals `normalized`.
    fn find_exact(&self, normalized: &str, limit: usize) -> Result<Vec<Place>, StoreError>;

    /// Places with a non-preferred name equal to `normalized`.
    fn find_alias(&self, normalized: &str, limit: usize) -> Result<Vec<AliasHit>, StoreError>;

    /// Places with any name starting with `normalized` (strictly longer
    /// than it).
    fn find_prefix(&self, normalized: &str, limit: usize) -> Result<Vec<PrefixHit>, StoreError>;

    /// Direct or transitive containment.
    fn is_descendant_of(&self, child_id: u64, ancestor_id: u64) -> Result<bool, StoreError>;

    /// Ancestors ordered nearest-first.
    fn get_ancestors(&self, place_id: u64) -> Result<Vec<u64>, StoreError>;

    /// (keyword, signal strength) pairs for a place, merged with its
    /// country-level keywords.
    fn context_keywords(
        &self,
        place_id: u64,
        country_code: &str,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Places matching `name` whose ancestry contains a place matching
    /// `qualifier` ("London, Ontario"). Default composition over
    /// exact/alias lookup plus containment; adapters with a native
    /// qualified query may override.
    fn find_qualified(
        &self,
        name: &str,
        qualifier: &str,
        limit: usize,
    ) -> Result<Vec<Place>, StoreError> {
        let mut anchors = self.find_exact(qualifier, limit)?;
        anchors.extend(self.find_alias(qualifier, limit)?.into_iter().map(|h| h.place));

        let mut hits = self.find_exact(name, limit)?;
        hits.extend(self.find_alias(name, limit)?.into_iter().map(|h| h.place));

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for hit in hits {
            if !seen.insert(hit.id) {
                continue;
            }
            let mut contained = false;
            for anchor in &anchors {
                if anchor.id != hit.id && self.is_descendant_of(hit.id, anchor.id)? {
                    contained = true;
                    break;
                }
            }
            if contained {
                out.push(hit);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Read-only access to publisher country priors.
pub trait PublisherProfileStore: Send + Sync {
    /// Exact-domain lookup; `None` when no profile is recorded.
    fn profile(&self, domain: &str) -> Result<Option<PublisherProfile>, StoreError>;

    /// Falls back from a subdomain toward its registrable domain
    /// ("news.bbc.co.uk" -> "bbc.co.uk") before giving up and returning
    /// an unknown profile.
    fn profile_with_fallback(&self, domain: &str) -> Result<PublisherProfile, StoreError> {
        let mut current = domain;
        loop {
            if let Some(profile) = self.profile(current)? {
                return Ok(profile);
            }
            match current.split_once('.') {
                // Stop once only the registrable tail is left.
                Some((_, rest)) if rest.contains('.') => current = rest,
                _ => return Ok(PublisherProfile::unknown(domain)),
            }
        }
    }
}

/// An alternate name for a place, as loaded by the gazetteer ETL.
#[derive(Debug, Clone)]
pub struct PlaceName {
    pub place_id: u64,
    pub text: String,
    pub normalized: String,
    pub language: Option<String>,
    pub kind: AliasKind,
    pub preferred: bool,
}

/// In-memory gazetteer adapter. The production gazetteer lives behind an
/// external sync pipeline; this implementation backs tests and small
/// embedded pipelines with the same contract.
#[derive(Debug, Default)]
pub struct MemoryGazetteer {
    places: HashMap<u64, Place>,
    names: HashMap<String, Vec<PlaceName>>,
    parents: HashMap<u64, Vec<u64>>,
    place_keywords: HashMap<u64, Vec<(String, f64)>>,
    country_keywords: HashMap<String, Vec<(String, f64)>>,
}

impl MemoryGazetteer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a place and its preferred name.
    pub fn add_place(&mut self, place: Place) {
        let normalizer = Normalizer::new();
        let name = PlaceName {
            place_id: place.id,
            text: place.name.clone(),
            normalized: normalizer.normalize(&place.name, None),
            language: None,
            kind: AliasKind::Official,
            preferred: true,
        };
        self.names.entry(name.normalized.clone()).or_default().push(name);
        self.places.insert(place.id, place);
    }

    /// Registers an alternate name for an already-added place.
    pub fn add_name(&mut self, place_id: u64, text: &str, language: Option<&str>, kind: AliasKind) {
        let normalizer = Normalizer::new();
        let name = PlaceName {
            place_id,
            text: text.to_string(),
            normalized: normalizer.normalize(text, language),
            language: language.map(|l| l.to_string()),
            kind,
            preferred: false,
        };
        self.names.entry(name.normalized.clone()).or_default().push(name);
    }

    /// Records a containment edge. Edges that would close a cycle are
    /// rejected; the containment relation must stay a DAG.
    pub fn add_containment(&mut self, parent_id: u64, child_id: u64) {
        if parent_id == child_id || self.ancestors_of(parent_id).contains(&child_id) {
            warn!(
                target: TARGET_STORE,
                "Rejecting containment edge {} -> {}: would create a cycle",
                parent_id, child_id
            );
            return;
        }
        self.parents.entry(child_id).or_default().push(parent_id);
    }

    /// Attaches a context keyword to a specific place.
    pub fn add_place_keyword(&mut self, place_id: u64, keyword: &str, strength: f64) {
        self.place_keywords
            .entry(place_id)
            .or_default()
            .push((keyword.to_lowercase(), strength));
    }

    /// Attaches a context keyword to every place in a country.
    pub fn add_country_keyword(&mut self, country_code: &str, keyword: &str, strength: f64) {
        self.country_keywords
            .entry(country_code.to_string())
            .or_default()
            .push((keyword.to_lowercase(), strength));
    }

    fn ancestors_of(&self, place_id: u64) -> Vec<u64> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<u64> = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(place_id);
        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&current) {
                for &parent in parents {
                    if seen.insert(parent) {
                        out.push(parent);
                        queue.push_back(parent);
                    }
                }
            }
        }
        out
    }

    fn sorted_by_prominence(&self, mut places: Vec<Place>, limit: usize) -> Vec<Place> {
        places.sort_by(|a, b| {
            b.prominence
                .total_cmp(&a.prominence)
                .then_with(|| a.id.cmp(&b.id))
        });
        places.truncate(limit);
        places
    }
}

impl GazetteerStore for MemoryGazetteer {
    fn find_exact(&self, normalized: &str, limit: usize) -> Result<Vec<Place>, StoreError> {
        let places = self
            .names
            .get(normalized)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|n| n.preferred)
                    .filter_map(|n| self.places.get(&n.place_id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(self.sorted_by_prominence(places, limit))
    }

    fn find_alias(&self, normalized: &str, limit: usize) -> Result<Vec<AliasHit>, StoreError> {
        let mut hits: Vec<AliasHit> = self
            .names
            .get(normalized)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|n| !n.preferred)
                    .filter_map(|n| {
                        self.places.get(&n.place_id).map(|p| AliasHit {
                            place: p.clone(),
                            kind: n.kind,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        hits.sort_by(|a, b| {
            b.place
                .prominence
                .total_cmp(&a.place.prominence)
                .then_with(|| a.place.id.cmp(&b.place.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn find_prefix(&self, normalized: &str, limit: usize) -> Result<Vec<PrefixHit>, StoreError> {
        let mut hits: Vec<PrefixHit> = Vec::new();
        for (key, entries) in &self.names {
            if key.len() > normalized.len() && key.starts_with(normalized) {
                for entry in entries {
                    if let Some(place) = self.places.get(&entry.place_id) {
                        hits.push(PrefixHit {
                            place: place.clone(),
                            name_len: key.chars().count(),
                        });
                    }
                }
            }
        }
        hits.sort_by(|a, b| {
            b.place
                .prominence
                .total_cmp(&a.place.prominence)
                .then_with(|| a.place.id.cmp(&b.place.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn is_descendant_of(&self, child_id: u64, ancestor_id: u64) -> Result<bool, StoreError> {
        Ok(self.ancestors_of(child_id).contains(&ancestor_id))
    }

    fn get_ancestors(&self, place_id: u64) -> Result<Vec<u64>, StoreError> {
        Ok(self.ancestors_of(place_id))
    }

    fn context_keywords(
        &self,
        place_id: u64,
        country_code: &str,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut keywords = self.place_keywords.get(&place_id).cloned().unwrap_or_default();
        if let Some(country) = self.country_keywords.get(country_code) {
            keywords.extend(country.iter().cloned());
        }
        Ok(keywords)
    }
}

/// In-memory publisher-profile adapter.
#[derive(Debug, Default)]
pub struct MemoryPublisherStore {
    profiles: HashMap<String, PublisherProfile>,
}

impl MemoryPublisherStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&mut self, profile: PublisherProfile) {
        self.profiles.insert(profile.domain.clone(), profile);
    }
}

impl PublisherProfileStore for MemoryPublisherStore {
    fn profile(&self, domain: &str) -> Result<Option<PublisherProfile>, StoreError> {
        Ok(self.profiles.get(domain).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlaceKind;

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
        g.add_place(place(1, "Canada", PlaceKind::Country, "CA", 0.95));
        g.add_place(place(2, "Ontario", PlaceKind::Adm1, "CA", 0.6));
        g.add_place(place(3, "London", PlaceKind::Locality, "CA", 0.35));
        g.add_place(place(4, "United Kingdom", PlaceKind::Country, "GB", 0.95));
        g.add_place(place(5, "London", PlaceKind::Locality, "GB", 0.95));
        g.add_name(4, "UK", None, AliasKind::Abbrev);
        g.add_containment(1, 2);
        g.add_containment(2, 3);
        g.add_containment(4, 5);
        g
    }

    #[test]
    fn test_exact_lookup_sorted_by_prominence() {
        let g = gazetteer();
        let hits = g.find_exact("london", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 5);
        assert_eq!(hits[1].id, 3);
    }

    #[test]
    fn test_alias_lookup_carries_kind() {
        let g = gazetteer();
        let hits = g.find_alias("uk", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].place.id, 4);
        assert_eq!(hits[0].kind, AliasKind::Abbrev);
        // Preferred names never come back as aliases.
        assert!(g.find_alias("london", 10).unwrap().is_empty());
    }

    #[test]
    fn test_transitive_containment() {
        let g = gazetteer();
        assert!(g.is_descendant_of(3, 2).unwrap());
        assert!(g.is_descendant_of(3, 1).unwrap());
        assert!(!g.is_descendant_of(3, 4).unwrap());
        assert!(!g.is_descendant_of(1, 3).unwrap());
        assert_eq!(g.get_ancestors(3).unwrap(), vec![2, 1]);
    }

    #[test]
    fn test_cycle_edges_rejected() {
        let mut g = gazetteer();
        g.add_containment(3, 1); // Canada inside London, Ontario: no.
        assert!(!g.is_descendant_of(1, 3).unwrap());
        assert!(g.is_descendant_of(3, 1).unwrap());
    }

    #[test]
    fn test_qualified_lookup() {
        let g = gazetteer();
        let hits = g.find_qualified("london", "ontario", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 3);
        // Qualifier matching via alias works too.
        let hits = g.find_qualified("london", "uk", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 5);
        assert!(g.find_qualified("london", "texas", 10).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_lookup() {
        let g = gazetteer();
        let hits = g.find_prefix("onta", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].place.id, 2);
        assert_eq!(hits[0].name_len, "ontario".len());
        // A full exact key is not a prefix hit.
        assert!(g.find_prefix("ontario", 10).unwrap().is_empty());
    }

    #[test]
    fn test_publisher_fallback() {
        let mut p = MemoryPublisherStore::new();
        p.add_profile(PublisherProfile {
            domain: "bbc.co.uk".to_string(),
            country_weights: [("GB".to_string(), 0.8)].into_iter().collect(),
            unknown: false,
        });
        let profile = p.profile_with_fallback("news.bbc.co.uk").unwrap();
        assert_eq!(profile.domain, "bbc.co.uk");
        assert!(!profile.unknown);

        let missing = p.profile_with_fallback("www.example.com").unwrap();
        assert!(missing.unknown);
        assert_eq!(missing.domain, "www.example.com");
    }
}
