use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    cache::{MatchCacheStats, MatchCaches},
    config::MatcherConfig,
    index::IndexHandle,
    store::TemplateEvent,
};

/// Everything a matcher shares across queries: configuration, caches, the template index
/// and the worker pool. Owned by one matcher; nothing here is process-global.
pub struct MatchingContext {
    config: MatcherConfig,
    pub caches: MatchCaches,
    pub index: IndexHandle,
    pool: rayon::ThreadPool,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct ContextStats {
    pub caches: MatchCacheStats,
    pub indexed_templates: usize,
    pub clusters: usize,
    pub index_stale: bool,
}

impl MatchingContext {
    pub fn new(config: MatcherConfig) -> Result<Self> {
        config.validate().context("invalid matcher config")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("gesture-match-{i}"))
            .build()
            .context("failed to start matcher worker pool")?;
        log::info!("matcher context ready with {} workers", config.workers);

        Ok(Self {
            caches: MatchCaches::new(&config.cache),
            index: IndexHandle::new(),
            pool,
            config,
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }

    /// Invalidates caches touched by a template mutation.
    pub fn on_template_event(&self, event: &TemplateEvent) {
        self.caches.invalidate(event);
    }

    /// Drops all cached state and forces an index rebuild on the next query.
    pub fn clear(&self) {
        self.caches.clear();
        self.index.mark_stale();
    }

    pub fn stats(&self) -> ContextStats {
        let index = self.index.snapshot();
        ContextStats {
            caches: self.caches.stats(),
            indexed_templates: index.len(),
            clusters: index.clusters().len(),
            index_stale: self.index.needs_rebuild(),
        }
    }
}
