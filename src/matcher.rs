//! Query orchestration: validation, caching, candidate selection and parallel scoring.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Instant,
};

use anyhow::Result;
use rayon::prelude::*;

use crate::{
    cache::result_key,
    config::MatcherConfig,
    context::MatchingContext,
    error::MatchError,
    index::{IndexEntry, TemplateIndex},
    pipeline::{self, features::FeatureSet},
    similarity::{self, SimilarityScore},
    store::{InMemoryTemplateStore, TemplateEvent, TemplateStore},
    types::{CacheHits, MatchResult, NoMatchReason, RankedCandidate, Sequence, Template, TemplateId},
};

/// Cooperative cancellation flag, checked between candidates.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-query overrides of the matcher configuration.
#[derive(Clone, Debug, Default)]
pub struct MatchOptions {
    pub threshold: Option<f32>,
    /// Return [`MatchError::InsufficientData`] instead of a no-match result.
    pub strict: bool,
    pub cancel: Option<CancelToken>,
    /// Score every active template, bypassing the index and the result cache.
    pub full_scan: bool,
}

pub struct GestureMatcher {
    store: Arc<dyn TemplateStore>,
    context: MatchingContext,
}

#[derive(Default)]
struct HitCounter {
    features: AtomicUsize,
    distances: AtomicUsize,
}

impl HitCounter {
    fn snapshot(&self) -> CacheHits {
        CacheHits {
            result: false,
            features: self.features.load(Ordering::Relaxed),
            distances: self.distances.load(Ordering::Relaxed),
        }
    }
}

impl GestureMatcher {
    pub fn new(store: Arc<dyn TemplateStore>, config: MatcherConfig) -> Result<Self> {
        Ok(Self {
            store,
            context: MatchingContext::new(config)?,
        })
    }

    pub fn in_memory(templates: impl IntoIterator<Item = Template>, config: MatcherConfig) -> Result<Self> {
        Self::new(Arc::new(InMemoryTemplateStore::from_templates(templates)), config)
    }

    pub fn config(&self) -> &MatcherConfig {
        self.context.config()
    }

    pub fn context(&self) -> &MatchingContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    pub fn match_sequence(&self, query: &Sequence) -> Result<MatchResult, MatchError> {
        self.match_with(query, &MatchOptions::default())
    }

    /// Finds the best matching active template for a complete gesture performance.
    pub fn match_with(&self, query: &Sequence, options: &MatchOptions) -> Result<MatchResult, MatchError> {
        let started = Instant::now();
        let config = self.config();
        let threshold = options.threshold.unwrap_or(config.threshold);
        // Taken before the store is read; cache writes are dropped if a mutation lands meanwhile.
        let generation = self.context.caches.generation();

        query.validate()?;
        if query.len() < config.min_frames {
            if options.strict || config.strict {
                return Err(MatchError::InsufficientData {
                    frames: query.len(),
                    min: config.min_frames,
                });
            }
            log::debug!(
                "query has {} frames, need {}",
                query.len(),
                config.min_frames
            );
            let mut result = MatchResult::no_match(NoMatchReason::InsufficientData);
            result.elapsed_ms = elapsed_ms(started);
            return Ok(result);
        }

        let query_hash = query.content_hash();
        let key = result_key(query_hash, threshold);
        if !options.full_scan {
            if let Some(mut cached) = self.context.caches.results.get(&key) {
                cached.cache = CacheHits {
                    result: true,
                    ..CacheHits::default()
                };
                cached.elapsed_ms = elapsed_ms(started);
                return Ok(cached);
            }
        }

        let hits = HitCounter::default();
        let query_features = self.features_for(query, query_hash, &hits)?;
        check_cancelled(options)?;

        let candidates = self.candidate_templates(&query_features, options.full_scan);
        if candidates.is_empty() {
            let mut result = MatchResult::no_match(NoMatchReason::NoCandidates);
            result.cache = hits.snapshot();
            result.elapsed_ms = elapsed_ms(started);
            return Ok(result);
        }

        let scored: Vec<(&Template, SimilarityScore)> = self.context.pool().install(|| {
            candidates
                .par_iter()
                .map(|template| {
                    self.score_candidate(template, generation, query_hash, &query_features, options, &hits)
                })
                .collect::<Result<Vec<_>, MatchError>>()
        })?
        .into_iter()
        .flatten()
        .collect();

        let mut ranked = scored;
        ranked.sort_by(|(ta, a), (tb, b)| {
            b.ensemble
                .total_cmp(&a.ensemble)
                .then_with(|| ta.id.cmp(&tb.id))
        });

        let mut result = match ranked.first() {
            Some((best, score)) if score.ensemble >= threshold => MatchResult {
                template_id: Some(best.id),
                template_name: Some(best.meta.name.clone()),
                action: Some(best.meta.action.clone()).filter(|a| !a.is_empty()),
                score: score.ensemble,
                sub_scores: Some(score.sub_scores),
                reason: None,
                ranked: Vec::new(),
                candidates_evaluated: 0,
                elapsed_ms: 0.0,
                cache: CacheHits::default(),
            },
            Some((_, score)) => MatchResult {
                score: score.ensemble,
                sub_scores: Some(score.sub_scores),
                ..MatchResult::no_match(NoMatchReason::BelowThreshold)
            },
            None => MatchResult::no_match(NoMatchReason::NoCandidates),
        };
        result.ranked = ranked
            .iter()
            .take(config.top_k)
            .map(|(t, s)| RankedCandidate {
                template_id: t.id,
                score: s.ensemble,
            })
            .collect();
        result.candidates_evaluated = ranked.len();
        result.cache = hits.snapshot();
        result.elapsed_ms = elapsed_ms(started);

        log::debug!(
            "query {query_hash:016x}: {} in {:.2}ms over {} candidates",
            result.display_text(),
            result.elapsed_ms,
            result.candidates_evaluated
        );

        if result.is_match()
            && !options.full_scan
            && !self.context.caches.store_result(generation, key, result.clone())
        {
            log::debug!("query {query_hash:016x}: templates changed mid-query, result not cached");
        }
        Ok(result)
    }

    /// Ids of the templates a query would be scored against, ascending.
    pub fn candidates(&self, query: &Sequence) -> Result<Vec<TemplateId>, MatchError> {
        let hits = HitCounter::default();
        let features = self.features_for(query, query.content_hash(), &hits)?;
        Ok(self
            .candidate_templates(&features, false)
            .iter()
            .map(|t| t.id)
            .collect())
    }

    pub fn insert_template(&self, template: Template) -> TemplateEvent {
        let event = self.store.upsert(template);
        self.notify(&event);
        event
    }

    /// Replaces an existing template's payload or metadata.
    pub fn update_template(&self, template: Template) -> Result<TemplateEvent, MatchError> {
        if self.store.get(template.id).is_none() {
            return Err(MatchError::Internal(format!(
                "template {} does not exist",
                template.id
            )));
        }
        Ok(self.insert_template(template))
    }

    pub fn remove_template(&self, id: TemplateId) -> Option<TemplateEvent> {
        let event = self.store.remove(id)?;
        self.notify(&event);
        Some(event)
    }

    /// Applies a store mutation made outside this matcher to the caches and the index.
    pub fn notify(&self, event: &TemplateEvent) {
        self.context.on_template_event(event);

        let id = event.id();
        let entry = match event {
            TemplateEvent::Removed { .. } => None,
            _ => self
                .store
                .get(id)
                .filter(|t| t.meta.active)
                .and_then(|t| self.index_entry(&t)),
        };
        let config = &self.config().index;
        self.context.index.update(config, |index| match entry {
            Some(entry) => index.with_inserted(entry),
            None => index.without(id),
        });
        log::info!("template {id} changed, index now holds {}", self.context.index.snapshot().len());
    }

    /// Rebuilds the template index from the store now.
    pub fn rebuild_index(&self) -> Result<Arc<TemplateIndex>, MatchError> {
        let config = &self.config().index;
        self.context.index.rebuild_with(config, || {
            let templates = self.store.active_templates();
            Ok(self.context.pool().install(|| {
                templates
                    .par_iter()
                    .filter_map(|t| self.index_entry(t))
                    .collect()
            }))
        })
    }

    fn index_entry(&self, template: &Template) -> Option<IndexEntry> {
        match self.template_features(template, &HitCounter::default()) {
            Ok(features) => Some(IndexEntry {
                id: template.id,
                summary: features.summary.clone(),
            }),
            Err(err) => {
                log::warn!("template {} left out of the index: {err}", template.id);
                None
            }
        }
    }

    /// Active templates worth scoring. Falls back to every active template when the index is
    /// disabled, bypassed or mid-rebuild.
    fn candidate_templates(&self, query: &FeatureSet, full_scan: bool) -> Vec<Template> {
        let active = self.store.active_templates();
        let config = &self.config().index;
        if full_scan || !config.enabled {
            return active;
        }

        let index = if self.context.index.needs_rebuild() {
            match self.rebuild_index() {
                Ok(index) => index,
                Err(err) => {
                    log::warn!("template index unavailable ({err}), scanning all templates");
                    return active;
                }
            }
        } else {
            self.context.index.snapshot()
        };

        let ids = index.candidates(&query.summary, config);
        active
            .into_iter()
            .filter(|t| ids.binary_search(&t.id).is_ok())
            .collect()
    }

    fn score_candidate<'a>(
        &self,
        template: &'a Template,
        generation: u64,
        query_hash: u64,
        query: &FeatureSet,
        options: &MatchOptions,
        hits: &HitCounter,
    ) -> Result<Option<(&'a Template, SimilarityScore)>, MatchError> {
        check_cancelled(options)?;

        let key = (query_hash, template.id);
        if let Some(score) = self.context.caches.distances.get(&key) {
            hits.distances.fetch_add(1, Ordering::Relaxed);
            return Ok(Some((template, score)));
        }

        let features = match self.template_features(template, hits) {
            Ok(features) => features,
            Err(err) => {
                log::warn!("skipping template {}: {err}", template.id);
                return Ok(None);
            }
        };
        let score = similarity::score(query, &features, &self.config().dtw);
        self.context.caches.store_distance(generation, key, score);
        Ok(Some((template, score)))
    }

    fn template_features(&self, template: &Template, hits: &HitCounter) -> Result<Arc<FeatureSet>, MatchError> {
        let sequence = &template.sequence;
        if sequence.len() < self.config().min_frames {
            return Err(MatchError::InsufficientData {
                frames: sequence.len(),
                min: self.config().min_frames,
            });
        }
        self.features_for(sequence, sequence.content_hash(), hits)
    }

    fn features_for(&self, sequence: &Sequence, hash: u64, hits: &HitCounter) -> Result<Arc<FeatureSet>, MatchError> {
        if let Some(features) = self.context.caches.features.get(&hash) {
            hits.features.fetch_add(1, Ordering::Relaxed);
            return Ok(features);
        }
        let features = Arc::new(pipeline::prepare(sequence, self.config())?);
        self.context.caches.features.insert(hash, Arc::clone(&features));
        Ok(features)
    }
}

fn check_cancelled(options: &MatchOptions) -> Result<(), MatchError> {
    match &options.cancel {
        Some(token) if token.is_cancelled() => Err(MatchError::Cancelled),
        _ => Ok(()),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
