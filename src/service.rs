use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheKey, ResolutionCache};
use crate::candidates::{CandidateGenerator, GeneratorOptions};
use crate::coherence::{apply_coherence, is_international_window, CoherenceConfig, MentionResolution};
use crate::features::compute_features;
use crate::normalizer::Normalizer;
use crate::scoring::{abstain_reason, compute_confidence, rank, score, ScoringWeights};
use crate::store::{GazetteerStore, PublisherProfileStore, StoreError};
use crate::types::{
    AbstainReason, Alternative, ArticleContext, ArticleSummary, DisambiguationResult, Mention,
    PlaceSummary, ResolvedAnchor, ScoredCandidate,
};
use crate::TARGET_RESOLVER;

/// Pass-1 results above this confidence feed forward into the article
/// context for later mentions.
pub const FEED_FORWARD_CONFIDENCE: f64 = 0.7;
const MAX_ALTERNATIVES: usize = 5;

/// A mention that could not be evaluated, as opposed to one that was
/// evaluated and found ambiguous (abstention). Callers must be able to
/// tell the two apart.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Per-article output: one entry per mention in text order, plus an
/// article-level rollup.
#[derive(Debug)]
pub struct ArticleResolution {
    pub results: Vec<Result<DisambiguationResult, ResolveError>>,
    pub summary: ArticleSummary,
}

/// Orchestrates candidate generation, feature scoring, ranking and the
/// two-pass article flow. Holds no per-article state: articles may be
/// resolved in parallel on independent service clones or shared refs.
pub struct DisambiguationService {
    gazetteer: Arc<dyn GazetteerStore>,
    publishers: Arc<dyn PublisherProfileStore>,
    weights: ScoringWeights,
    generator_options: GeneratorOptions,
    coherence_config: CoherenceConfig,
    cache: Option<ResolutionCache>,
    normalizer: Normalizer,
}

impl DisambiguationService {
    pub fn new(
        gazetteer: Arc<dyn GazetteerStore>,
        publishers: Arc<dyn PublisherProfileStore>,
    ) -> Self {
        DisambiguationService {
            gazetteer,
            publishers,
            weights: ScoringWeights::default(),
            generator_options: GeneratorOptions::default(),
            coherence_config: CoherenceConfig::default(),
            cache: None,
            normalizer: Normalizer::new(),
        }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_generator_options(mut self, options: GeneratorOptions) -> Self {
        self.generator_options = options;
        self
    }

    pub fn with_coherence_config(mut self, config: CoherenceConfig) -> Self {
        self.coherence_config = config;
        self
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(ResolutionCache::new(capacity));
        self
    }

    /// Builds an article context from a publisher domain (profile looked
    /// up with subdomain fallback) and the article body.
    pub fn context_for(
        &self,
        publisher_domain: Option<&str>,
        article_text: Option<&str>,
    ) -> Result<ArticleContext, ResolveError> {
        let mut ctx = ArticleContext::new();
        if let Some(domain) = publisher_domain {
            ctx.publisher = Some(self.publishers.profile_with_fallback(domain)?);
        }
        if let Some(text) = article_text {
            ctx.article_text = Some(text.to_string());
        }
        Ok(ctx)
    }

    /// Resolves a single mention against the given context. Ambiguity is
    /// an abstained result; an error means the mention could not be
    /// evaluated at all.
    pub fn disambiguate_mention(
        &self,
        mention: &Mention,
        ctx: &ArticleContext,
    ) -> Result<DisambiguationResult, ResolveError> {
        Ok(self.resolve_full(mention, ctx, true)?.result)
    }

    /// Resolves an article's mentions with the two-pass pipeline: Pass 1
    /// in text order, each confident result feeding later mentions; Pass
    /// 2 the coherence adjustment over the whole set. An expired
    /// deadline abstains the remaining mentions rather than blocking.
    pub fn disambiguate_article(
        &self,
        mentions: &[Mention],
        mut ctx: ArticleContext,
        deadline: Option<Instant>,
    ) -> ArticleResolution {
        // Pass 1 runs in text order by design: earlier mentions inform
        // later ones, never the reverse.
        let mut ordered: Vec<Mention> = mentions.to_vec();
        ordered.sort_by_key(|m| (m.start, m.end));

        let mut slots: Vec<Result<MentionResolution, ResolveError>> =
            Vec::with_capacity(ordered.len());
        let mut deadline_hit = false;

        for mention in &ordered {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    deadline_hit = true;
                }
            }
            if deadline_hit {
                let result = DisambiguationResult::abstained(
                    mention,
                    AbstainReason::DeadlineExceeded,
                    0.0,
                );
                slots.push(Ok(MentionResolution {
                    mention: mention.clone(),
                    ranked: Vec::new(),
                    result,
                    international: false,
                }));
                continue;
            }

            // The cache holds pre-coherence decisions; article mentions
            // must be recomputed so Pass 2 sees their full rankings.
            match self.resolve_full(mention, &ctx, false) {
                Ok(resolution) => {
                    if !resolution.result.abstained
                        && resolution.result.confidence > FEED_FORWARD_CONFIDENCE
                    {
                        if let Some(place) = &resolution.result.resolved {
                            ctx.push_resolved(ResolvedAnchor {
                                place_id: place.id,
                                kind: place.kind,
                                country_code: place.country_code.clone(),
                                latitude: place.latitude,
                                longitude: place.longitude,
                                confidence: resolution.result.confidence,
                            });
                        }
                    }
                    slots.push(Ok(resolution));
                }
                Err(err) => {
                    debug!(
                        target: TARGET_RESOLVER,
                        "Mention '{}' failed: {}", mention.text, err
                    );
                    slots.push(Err(err));
                }
            }
        }

        // Split out the resolvable entries for Pass 2, remembering where
        // the failed mentions sit so output order survives.
        let mut resolutions: Vec<MentionResolution> = Vec::new();
        let mut layout: Vec<Result<(), ResolveError>> = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Ok(resolution) => {
                    layout.push(Ok(()));
                    resolutions.push(resolution);
                }
                Err(err) => layout.push(Err(err)),
            }
        }

        // Pass 2: coherence over the complete Pass-1 set. Skipped when
        // the deadline already expired.
        if !deadline_hit {
            let changes = apply_coherence(
                &mut resolutions,
                self.gazetteer.as_ref(),
                &self.coherence_config,
            );
            if changes > 0 {
                info!(
                    target: TARGET_RESOLVER,
                    "Coherence pass changed {} mention(s)", changes
                );
            }
        }

        let mut resolved_iter = resolutions.into_iter();
        let mut results: Vec<Result<DisambiguationResult, ResolveError>> =
            Vec::with_capacity(layout.len());
        for entry in layout {
            match entry {
                Ok(()) => {
                    if let Some(resolution) = resolved_iter.next() {
                        results.push(Ok(resolution.result));
                    }
                }
                Err(err) => results.push(Err(err)),
            }
        }
        let summary = summarize(&results);
        info!(
            target: TARGET_RESOLVER,
            "Article resolved: {} mention(s), {} resolved, {} abstained, mean confidence {:.2}",
            results.len(),
            summary.resolved_count,
            summary.abstained_count,
            summary.mean_confidence
        );
        ArticleResolution { results, summary }
    }

    /// Full single-mention resolution, retaining the ranking for the
    /// coherence pass. `use_cache` is only set on the standalone path:
    /// a memoized result carries no ranking for Pass 2 to re-adjust.
    fn resolve_full(
        &self,
        mention: &Mention,
        ctx: &ArticleContext,
        use_cache: bool,
    ) -> Result<MentionResolution, ResolveError> {
        if mention.text.trim().is_empty() {
            return Err(ResolveError::InvalidInput("empty mention text".to_string()));
        }
        if mention.start > mention.end {
            return Err(ResolveError::InvalidInput(format!(
                "mention span {}..{} is inverted",
                mention.start, mention.end
            )));
        }

        let international = ctx
            .window(mention)
            .map(is_international_window)
            .unwrap_or(false);

        let cache_key = if use_cache {
            self.cache.as_ref().map(|_| CacheKey {
                normalized_mention: self
                    .normalizer
                    .normalize(&mention.text, self.generator_options.language.as_deref()),
                publisher_domain: ctx.publisher.as_ref().map(|p| p.domain.clone()),
                last_region_id: ctx.resolved_regions().last().map(|r| r.place_id),
            })
        } else {
            None
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(mut cached) = cache.get(key) {
                debug!(
                    target: TARGET_RESOLVER,
                    "Cache hit for '{}'", mention.text
                );
                // The key is normalized, so the stored surface form may
                // differ from this mention's.
                cached.mention_text = mention.text.clone();
                cached.start = mention.start;
                cached.end = mention.end;
                return Ok(MentionResolution {
                    mention: mention.clone(),
                    ranked: Vec::new(),
                    result: cached,
                    international,
                });
            }
        }

        let generator = CandidateGenerator::new(self.gazetteer.as_ref());
        let candidates = generator.generate(mention, &self.generator_options)?;

        if candidates.is_empty() {
            let result =
                DisambiguationResult::abstained(mention, AbstainReason::NoCandidates, 0.0);
            return Ok(MentionResolution {
                mention: mention.clone(),
                ranked: Vec::new(),
                result,
                international,
            });
        }

        let scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let features =
                    compute_features(mention, &candidate, ctx, self.gazetteer.as_ref());
                let score = score(&features, &self.weights);
                ScoredCandidate {
                    candidate,
                    features,
                    score,
                }
            })
            .collect();
        let ranked = rank(scored);

        let confidence = compute_confidence(&ranked);
        let reason = abstain_reason(confidence, &ranked);
        let top = &ranked[0];

        debug!(
            target: TARGET_RESOLVER,
            "Mention '{}': top {} score {:.3} confidence {:.2} abstain {:?}",
            mention.text,
            top.candidate.place.name,
            top.score,
            confidence,
            reason
        );

        let result = match reason {
            Some(reason) => {
                let mut result = DisambiguationResult::abstained(mention, reason, confidence);
                result.score = top.score;
                result.alternatives = alternatives(&ranked, 0);
                result
            }
            None => DisambiguationResult {
                mention_text: mention.text.clone(),
                start: mention.start,
                end: mention.end,
                resolved: Some(PlaceSummary::from(&top.candidate.place)),
                confidence,
                score: top.score,
                alternatives: alternatives(&ranked, 1),
                abstained: false,
                abstain_reason: None,
                coherence_change: None,
            },
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.insert(key, result.clone());
        }

        Ok(MentionResolution {
            mention: mention.clone(),
            ranked,
            result,
            international,
        })
    }
}

fn alternatives(ranked: &[ScoredCandidate], skip: usize) -> Vec<Alternative> {
    ranked
        .iter()
        .skip(skip)
        .take(MAX_ALTERNATIVES)
        .map(|s| Alternative {
            place: PlaceSummary::from(&s.candidate.place),
            score: s.score,
        })
        .collect()
}

fn summarize(results: &[Result<DisambiguationResult, ResolveError>]) -> ArticleSummary {
    let mut summary = ArticleSummary::default();
    let mut confidence_sum = 0.0;
    let mut counted = 0usize;
    for result in results.iter().flatten() {
        confidence_sum += result.confidence;
        counted += 1;
        if let Some(place) = &result.resolved {
            summary.resolved_count += 1;
            *summary
                .country_distribution
                .entry(place.country_code.clone())
                .or_default() += 1;
            *summary
                .kind_distribution
                .entry(place.kind.to_string())
                .or_default() += 1;
        } else {
            summary.abstained_count += 1;
        }
    }
    if counted > 0 {
        summary.mean_confidence = confidence_sum / counted as f64;
    }
    summary
}
