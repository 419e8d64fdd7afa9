//! Template pruning ahead of DTW scoring.
//!
//! Templates are clustered by k-means on a six-value motion summary (mean offset and net
//! displacement of the hand). A query only visits clusters whose ball, widened by
//! `match_radius`, contains it, and every surviving template must also pass the early
//! rejection filters. Any template within `match_radius` of the query in summary space is
//! therefore never pruned by clustering.
//!
//! The index is immutable once built. Mutations produce a new index that is swapped in
//! behind an `Arc`, so queries in flight keep the snapshot they started with.

pub mod filters;
pub mod kmeans;

use std::sync::{
    Arc, Mutex, RwLock, TryLockError,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    config::IndexConfig,
    error::MatchError,
    pipeline::features::MotionSummary,
    types::TemplateId,
};

use self::{
    filters::rejection,
    kmeans::{Point, distance, kmeans, nearest},
};

#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub id: TemplateId,
    pub summary: MotionSummary,
}

#[derive(Clone, Debug)]
pub struct Cluster {
    pub centroid: Point,
    /// Distance from the centroid to its farthest member.
    pub radius: f32,
    pub entries: Vec<IndexEntry>,
}

#[derive(Clone, Debug, Default)]
pub struct TemplateIndex {
    clusters: Vec<Cluster>,
    clustered: bool,
    target_k: usize,
    len: usize,
}

/// k = ceil(sqrt(T)).
pub fn target_clusters(templates: usize) -> usize {
    (templates as f64).sqrt().ceil() as usize
}

impl TemplateIndex {
    pub fn build(entries: Vec<IndexEntry>, config: &IndexConfig) -> Self {
        let len = entries.len();
        if len < config.min_templates_for_clustering.max(1) {
            return Self::flat(entries);
        }

        let points: Vec<Point> = entries.iter().map(|e| e.summary.coarse_vector()).collect();
        let target_k = target_clusters(len);
        let clustering = kmeans(&points, target_k, config.kmeans_iterations);

        let mut clusters: Vec<Cluster> = clustering
            .centroids
            .iter()
            .map(|centroid| Cluster {
                centroid: *centroid,
                radius: 0.0,
                entries: Vec::new(),
            })
            .collect();
        for ((entry, point), cluster) in entries.into_iter().zip(&points).zip(&clustering.assignments) {
            let target = &mut clusters[*cluster];
            target.radius = target.radius.max(distance(point, &target.centroid));
            target.entries.push(entry);
        }
        clusters.retain(|c| !c.entries.is_empty());

        log::info!(
            "built template index: {len} templates in {} clusters",
            clusters.len()
        );
        Self {
            clusters,
            clustered: true,
            target_k,
            len,
        }
    }

    fn flat(entries: Vec<IndexEntry>) -> Self {
        let len = entries.len();
        let clusters = if entries.is_empty() {
            Vec::new()
        } else {
            vec![Cluster {
                centroid: [0.0; 6],
                radius: f32::INFINITY,
                entries,
            }]
        };
        Self {
            clusters,
            clustered: false,
            target_k: 1,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn contains(&self, id: TemplateId) -> bool {
        self.entries().any(|e| e.id == id)
    }

    fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.clusters.iter().flat_map(|c| c.entries.iter())
    }

    /// Templates worth scoring against `query`, in ascending id order.
    ///
    /// Falls back to a filtered scan of every template when cluster pruning leaves fewer
    /// than `min_candidates`.
    pub fn candidates(&self, query: &MotionSummary, config: &IndexConfig) -> Vec<TemplateId> {
        let point = query.coarse_vector();
        let passes = |entry: &&IndexEntry| rejection(query, &entry.summary, config).is_none();

        let mut ids: Vec<TemplateId> = if self.clustered {
            self.clusters
                .iter()
                .filter(|c| distance(&point, &c.centroid) <= c.radius + config.match_radius)
                .flat_map(|c| c.entries.iter())
                .filter(passes)
                .map(|e| e.id)
                .collect()
        } else {
            self.entries().filter(passes).map(|e| e.id).collect()
        };

        if self.clustered && ids.len() < config.min_candidates {
            log::debug!(
                "cluster pruning left {} candidates, scanning all {} templates",
                ids.len(),
                self.len
            );
            ids = self.entries().filter(passes).map(|e| e.id).collect();
        }

        ids.sort_unstable();
        ids
    }

    /// Copy of the index with `entry` added, replacing any entry with the same id.
    pub fn with_inserted(&self, entry: IndexEntry) -> Self {
        let mut next = self.without(entry.id);
        if !next.clustered {
            let mut entries: Vec<IndexEntry> = next.clusters.into_iter().flat_map(|c| c.entries).collect();
            entries.push(entry);
            return Self::flat(entries);
        }

        let point = entry.summary.coarse_vector();
        let centroids: Vec<Point> = next.clusters.iter().map(|c| c.centroid).collect();
        match nearest(&point, &centroids) {
            Some((i, d)) => {
                let cluster = &mut next.clusters[i];
                cluster.radius = cluster.radius.max(d);
                cluster.entries.push(entry);
            }
            None => next.clusters.push(Cluster {
                centroid: point,
                radius: 0.0,
                entries: vec![entry],
            }),
        }
        next.len += 1;
        next
    }

    /// Copy of the index without `id`. Cluster radii are left as upper bounds.
    pub fn without(&self, id: TemplateId) -> Self {
        let mut next = self.clone();
        let mut removed = 0;
        for cluster in &mut next.clusters {
            let before = cluster.entries.len();
            cluster.entries.retain(|e| e.id != id);
            removed += before - cluster.entries.len();
        }
        next.clusters.retain(|c| !c.entries.is_empty());
        next.len -= removed;
        next
    }

    /// Incremental edits have drifted far enough that a rebuild would change the layout.
    pub fn needs_recluster(&self, config: &IndexConfig) -> bool {
        let should_cluster = self.len >= config.min_templates_for_clustering.max(1);
        should_cluster != self.clustered || (self.clustered && target_clusters(self.len) != self.target_k)
    }
}

/// Shared, swappable index snapshot.
pub struct IndexHandle {
    snapshot: RwLock<Arc<TemplateIndex>>,
    needs_rebuild: AtomicBool,
    rebuild_lock: Mutex<()>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexHandle {
    /// Starts empty and stale, so the first query builds it.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(TemplateIndex::default())),
            needs_rebuild: AtomicBool::new(true),
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<TemplateIndex> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn mark_stale(&self) {
        self.needs_rebuild.store(true, Ordering::SeqCst);
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    fn publish(&self, index: Arc<TemplateIndex>) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = index,
            Err(poisoned) => *poisoned.into_inner() = index,
        }
    }

    /// Rebuilds from the entries `load` returns and swaps the result in.
    ///
    /// Returns [`MatchError::IndexStale`] without waiting if another rebuild or update holds
    /// the index. `load` runs under the rebuild lock so it sees every store mutation whose
    /// index update has not been applied yet. The index stays stale until the new snapshot
    /// is published, and stays stale if `load` fails.
    pub fn rebuild_with<F>(&self, config: &IndexConfig, load: F) -> Result<Arc<TemplateIndex>, MatchError>
    where
        F: FnOnce() -> Result<Vec<IndexEntry>, MatchError>,
    {
        let _guard = match self.rebuild_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(MatchError::IndexStale),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let index = Arc::new(TemplateIndex::build(load()?, config));
        self.publish(Arc::clone(&index));
        self.needs_rebuild.store(false, Ordering::SeqCst);
        Ok(index)
    }

    /// Applies an incremental edit, waiting for any rebuild in progress.
    pub fn update<F>(&self, config: &IndexConfig, edit: F)
    where
        F: FnOnce(&TemplateIndex) -> TemplateIndex,
    {
        let _guard = match self.rebuild_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = edit(&self.snapshot());
        if next.needs_recluster(config) {
            self.mark_stale();
        }
        self.publish(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handedness;

    fn entry(id: u64, dx: f32, dy: f32) -> IndexEntry {
        IndexEntry {
            id: TemplateId(id),
            summary: MotionSummary {
                frames: 15,
                handedness: Handedness::Right,
                displacement: [dx, dy, 0.0],
                extent: [dx.abs(), dy.abs(), 0.0],
                mean_speed: (dx * dx + dy * dy).sqrt(),
                mean_offset: [dx * 0.5, dy * 0.5, 0.0],
            },
        }
    }

    fn four_directions(per: u64) -> Vec<IndexEntry> {
        let dirs = [(3.0, 0.0), (-3.0, 0.0), (0.0, 3.0), (0.0, -3.0)];
        let mut out = Vec::new();
        for (d, (dx, dy)) in dirs.iter().enumerate() {
            for i in 0..per {
                let jitter = i as f32 * 0.02;
                out.push(entry(d as u64 * 100 + i, dx + jitter, dy - jitter));
            }
        }
        out
    }

    #[test]
    fn test_small_index_is_flat() {
        let config = IndexConfig::default();
        let index = TemplateIndex::build(four_directions(2), &config);
        assert!(!index.is_clustered());
        assert_eq!(index.len(), 8);
        let ids = index.candidates(&entry(999, 3.0, 0.0).summary, &config);
        assert_eq!(ids, vec![TemplateId(0), TemplateId(1)]);
    }

    #[test]
    fn test_clustered_candidates_are_pruned() {
        let config = IndexConfig {
            min_candidates: 1,
            ..IndexConfig::default()
        };
        let index = TemplateIndex::build(four_directions(10), &config);
        assert!(index.is_clustered());
        assert!((4..=7).contains(&index.clusters().len()));

        let ids = index.candidates(&entry(999, 3.05, 0.0).summary, &config);
        assert_eq!(ids.len(), 10);
        assert!(ids.iter().all(|id| id.0 < 100));
    }

    #[test]
    fn test_insert_and_remove_are_copy_on_write() {
        let config = IndexConfig::default();
        let index = TemplateIndex::build(four_directions(5), &config);
        let grown = index.with_inserted(entry(7, 3.0, 0.1));
        assert_eq!(index.len(), 20);
        assert_eq!(grown.len(), 21);
        assert!(grown.contains(TemplateId(7)));
        assert!(!index.contains(TemplateId(7)));

        let again = grown.with_inserted(entry(7, 3.0, 0.2));
        assert_eq!(again.len(), 21);

        let shrunk = again.without(TemplateId(7));
        assert_eq!(shrunk.len(), 20);
        assert_eq!(shrunk.without(TemplateId(12345)).len(), 20);
    }

    #[test]
    fn test_needs_recluster_when_k_changes() {
        let config = IndexConfig::default();
        let index = TemplateIndex::build(four_directions(4), &config);
        assert_eq!(index.len(), 16);
        assert!(!index.needs_recluster(&config));
        let grown = index.with_inserted(entry(50, 1.0, 1.0));
        assert!(grown.needs_recluster(&config));
    }

    #[test]
    fn test_handle_rebuild_and_stale() {
        let config = IndexConfig::default();
        let handle = Arc::new(IndexHandle::new());
        assert!(handle.needs_rebuild());

        let index = handle
            .rebuild_with(&config, || Ok(four_directions(2)))
            .unwrap();
        assert_eq!(index.len(), 8);
        assert!(!handle.needs_rebuild());
        assert_eq!(handle.snapshot().len(), 8);

        let (entered_tx, entered_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let worker = {
            let handle = Arc::clone(&handle);
            let config = config.clone();
            std::thread::spawn(move || {
                handle.rebuild_with(&config, || {
                    entered_tx.send(()).ok();
                    release_rx.recv().ok();
                    Ok(four_directions(3))
                })
            })
        };

        entered_rx.recv().unwrap();
        assert!(matches!(
            handle.rebuild_with(&config, || Ok(Vec::new())),
            Err(MatchError::IndexStale)
        ));
        // readers still see the previous snapshot
        assert_eq!(handle.snapshot().len(), 8);

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap().unwrap().len(), 12);
        assert_eq!(handle.snapshot().len(), 12);
    }

    #[test]
    fn test_failed_load_leaves_index_stale() {
        let config = IndexConfig::default();
        let handle = IndexHandle::new();
        let result = handle.rebuild_with(&config, || Err(MatchError::Internal("store offline".into())));
        assert!(result.is_err());
        assert!(handle.needs_rebuild());
    }
}
