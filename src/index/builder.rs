use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::geo::{haversine_distance, BoundingBox};
use crate::cluster::ClusterEngine;
use crate::config::IndexConfig;
use crate::library::{PhotoLibrary, SortOrder};
use crate::state::data::{AssetId, ClusterId, Coordinate, IndexEntry};
use crate::state::store::SpatialIndexStore;

/// UI-visible state of the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStatus {
    /// A full build has completed and not been invalidated since
    pub built: bool,
    /// A full build is in flight
    pub building: bool,
}

/// Counters from one completed full build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Assets enumerated
    pub scanned: usize,
    /// Entries written to the index
    pub indexed: usize,
    /// Batches that failed to commit and were skipped
    pub failed_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Completed(BuildReport),
    /// Cancelled explicitly or superseded by a newer build
    Cancelled,
    /// The library could not be enumerated
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Building,
    RateLimited,
    NotBuilt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    Completed { upserted: usize, removed: usize },
    Failed(String),
}

/// Handle on an in-flight full build
#[derive(Debug)]
pub struct BuildHandle {
    token: CancellationToken,
    task: JoinHandle<BuildOutcome>,
}

impl BuildHandle {
    /// Ask the build to stop at the next asset
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the build to hand back its outcome
    pub async fn wait(self) -> BuildOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Index build task panicked");
                BuildOutcome::Failed(e.to_string())
            }
        }
    }
}

struct RunningBuild {
    generation: u64,
    token: CancellationToken,
}

struct Inner<L> {
    library: Arc<L>,
    store: SpatialIndexStore,
    config: IndexConfig,
    status: watch::Sender<IndexStatus>,
    current: Mutex<Option<RunningBuild>>,
    generation: AtomicU64,
    last_refresh: Mutex<Option<Instant>>,
}

/// Orchestrates full rebuilds, catch-up refreshes and proximity queries
/// against the spatial index.
///
/// Only one full build is alive at a time; starting another cancels the
/// previous one. Every write pass takes the store's writer lock.
pub struct IndexBuilder<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for IndexBuilder<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: PhotoLibrary> IndexBuilder<L> {
    pub fn new(library: Arc<L>, store: SpatialIndexStore, config: IndexConfig) -> Self {
        let built = store.is_built().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read index build flag, assuming unbuilt");
            false
        });
        let (status, _) = watch::channel(IndexStatus {
            built,
            building: false,
        });

        Self {
            inner: Arc::new(Inner {
                library,
                store,
                config,
                status,
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                last_refresh: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> IndexStatus {
        *self.inner.status.borrow()
    }

    /// Watch `built`/`building` transitions
    pub fn subscribe(&self) -> watch::Receiver<IndexStatus> {
        self.inner.status.subscribe()
    }

    pub fn store(&self) -> &SpatialIndexStore {
        &self.inner.store
    }

    pub fn library(&self) -> &Arc<L> {
        &self.inner.library
    }

    /// Rebuild the whole index in the background.
    ///
    /// Any build already in flight is cancelled. The store is cleared and
    /// rewritten in batches of `full_batch_size`; the built flag is set only
    /// once the full pass completes. The previous index stays queryable until
    /// the new pass starts clearing it.
    pub fn build_full(&self) -> BuildHandle {
        let token = CancellationToken::new();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut current = self
                .inner
                .current
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = current.take() {
                info!(generation = previous.generation, "Superseding in-flight index build");
                previous.token.cancel();
            }
            *current = Some(RunningBuild {
                generation,
                token: token.clone(),
            });
        }

        self.inner.status.send_modify(|s| s.building = true);

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let outcome = Inner::run_build(&inner, task_token).await;
            inner.finish_build(generation, &outcome);
            outcome
        });

        BuildHandle { token, task }
    }

    /// Catch-up pass over the `limit` most recently created assets
    /// (`refresh_window` when `None`).
    ///
    /// Skipped while a full build runs, before the first build, and when the
    /// last refresh was less than `refresh_min_interval` ago unless `force`.
    pub async fn refresh_recent(&self, limit: Option<usize>, force: bool) -> RefreshOutcome {
        let status = self.status();
        if status.building {
            debug!("Refresh skipped, full build in progress");
            return RefreshOutcome::Skipped(SkipReason::Building);
        }
        if !status.built {
            debug!("Refresh skipped, index never built");
            return RefreshOutcome::Skipped(SkipReason::NotBuilt);
        }

        if !force && self.inner.recently_refreshed() {
            debug!("Refresh skipped, rate limited");
            return RefreshOutcome::Skipped(SkipReason::RateLimited);
        }

        let _writer = self.inner.store.writer().await;
        if self.status().building {
            return RefreshOutcome::Skipped(SkipReason::Building);
        }
        // Another refresh may have run while we waited for the writer
        if !force && self.inner.recently_refreshed() {
            return RefreshOutcome::Skipped(SkipReason::RateLimited);
        }

        let limit = limit.unwrap_or(self.inner.config.refresh_window);
        let inner = Arc::clone(&self.inner);
        let outcome = match tokio::task::spawn_blocking(move || inner.run_refresh(limit)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Index refresh task panicked");
                RefreshOutcome::Failed(e.to_string())
            }
        };

        if matches!(outcome, RefreshOutcome::Completed { .. }) {
            *self
                .inner
                .last_refresh
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        }
        outcome
    }

    /// Ids of indexed assets within `radius` meters of at least one target,
    /// most recent first.
    ///
    /// Never fails: an unbuilt index or a store error yields an empty result.
    pub async fn query(&self, targets: Vec<Coordinate>, radius: f64) -> Vec<AssetId> {
        if !self.status().built {
            return Vec::new();
        }
        if !radius.is_finite() || radius < 0.0 {
            return Vec::new();
        }
        let Some(bbox) = BoundingBox::covering(&targets, radius) else {
            return Vec::new();
        };

        let store = self.inner.store.clone();
        let cap = self.inner.config.query_cap;
        let lookup = tokio::task::spawn_blocking(move || store.entries_in_bbox(&bbox, cap));
        let candidates = match lookup.await {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                warn!(error = %e, "Index query failed");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Index query task failed");
                return Vec::new();
            }
        };

        candidates
            .into_iter()
            .filter(|entry| {
                let point = entry.coordinate();
                targets
                    .iter()
                    .any(|target| haversine_distance(*target, point) <= radius)
            })
            .map(|entry| entry.asset_id)
            .collect()
    }

    /// Indexed photos near a cluster's centroid that the engine has not
    /// admitted yet
    pub async fn query_cluster_neighbours(
        &self,
        engine: &ClusterEngine,
        cluster: ClusterId,
        radius: f64,
    ) -> Vec<AssetId> {
        let Some(centroid) = engine.cluster(cluster).and_then(|c| c.centroid) else {
            return Vec::new();
        };

        self.query(vec![centroid], radius)
            .await
            .into_iter()
            .filter(|id| !engine.is_admitted(id))
            .collect()
    }
}

impl<L: PhotoLibrary> Inner<L> {
    fn recently_refreshed(&self) -> bool {
        let last = self.last_refresh.lock().unwrap_or_else(|e| e.into_inner());
        last.is_some_and(|at| at.elapsed() < self.config.refresh_min_interval())
    }

    async fn run_build(inner: &Arc<Self>, token: CancellationToken) -> BuildOutcome {
        let _writer = tokio::select! {
            guard = inner.store.writer() => guard,
            _ = token.cancelled() => return BuildOutcome::Cancelled,
        };

        let worker = Arc::clone(inner);
        match tokio::task::spawn_blocking(move || worker.run_full_pass(&token)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Index build worker panicked");
                BuildOutcome::Failed(e.to_string())
            }
        }
    }

    fn run_full_pass(&self, token: &CancellationToken) -> BuildOutcome {
        info!("🔍 Full index build started");

        let assets = match self.library.enumerate_images(SortOrder::NewestFirst, None) {
            Ok(assets) => assets,
            Err(e) => {
                error!(error = %e, "Could not enumerate photo library");
                return BuildOutcome::Failed(e.to_string());
            }
        };

        // Nothing written yet: the previous index is still whole
        if token.is_cancelled() {
            info!("Full index build cancelled before clearing");
            return BuildOutcome::Cancelled;
        }

        if let Err(e) = self.store.set_built(false) {
            warn!(error = %e, "Could not clear index build flag");
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Could not clear index before rebuild");
        }
        self.status.send_modify(|s| s.built = false);

        let batch_size = self.config.full_batch_size.max(1);
        let mut report = BuildReport::default();
        let mut batch = Vec::with_capacity(batch_size);

        for asset in &assets {
            if token.is_cancelled() {
                info!(
                    scanned = report.scanned,
                    indexed = report.indexed,
                    "Full index build cancelled"
                );
                return BuildOutcome::Cancelled;
            }

            report.scanned += 1;
            if let Some(entry) = asset.index_entry() {
                batch.push(entry);
            }
            if batch.len() >= batch_size {
                self.commit_batch(&mut batch, &mut report);
            }
        }
        self.commit_batch(&mut batch, &mut report);

        if let Err(e) = self.store.set_built(true) {
            warn!(error = %e, "Could not persist index build flag");
        }

        info!(
            scanned = report.scanned,
            indexed = report.indexed,
            failed_batches = report.failed_batches,
            "✅ Full index build complete"
        );
        BuildOutcome::Completed(report)
    }

    fn commit_batch(&self, batch: &mut Vec<IndexEntry>, report: &mut BuildReport) {
        if batch.is_empty() {
            return;
        }
        match self.store.upsert_batch(batch) {
            Ok(written) => report.indexed += written,
            Err(e) => {
                warn!(error = %e, entries = batch.len(), "Skipping failed index batch");
                report.failed_batches += 1;
            }
        }
        batch.clear();
    }

    /// Flip the UI-visible flags once the worker has handed back its result.
    /// Superseded builds leave the flags to their successor.
    fn finish_build(&self, generation: u64, outcome: &BuildOutcome) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|r| r.generation) != Some(generation) {
            return;
        }
        *current = None;

        let built = match outcome {
            BuildOutcome::Completed(_) => true,
            _ => self.store.is_built().unwrap_or(false),
        };
        self.status.send_modify(|s| {
            s.building = false;
            s.built = built;
        });
    }

    fn run_refresh(&self, limit: usize) -> RefreshOutcome {
        let assets = match self.library.enumerate_images(SortOrder::NewestFirst, Some(limit)) {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = %e, "Could not enumerate recent photos");
                return RefreshOutcome::Failed(e.to_string());
            }
        };

        let batch_size = self.config.refresh_batch_size.max(1);
        let mut upserts = Vec::with_capacity(batch_size);
        let mut deletes = Vec::new();
        let mut upserted = 0;
        let mut removed = 0;

        for asset in assets {
            match asset.index_entry() {
                Some(entry) => upserts.push(entry),
                None => deletes.push(asset.asset_id),
            }
            if upserts.len() >= batch_size {
                upserted += self.write_upserts(&mut upserts);
            }
        }
        upserted += self.write_upserts(&mut upserts);

        match self.store.delete_batch(&deletes) {
            Ok(n) => removed = n,
            Err(e) => warn!(error = %e, "Skipping failed index delete batch"),
        }

        debug!(upserted, removed, "Recent index refresh complete");
        RefreshOutcome::Completed { upserted, removed }
    }

    fn write_upserts(&self, batch: &mut Vec<IndexEntry>) -> usize {
        let written = match self.store.upsert_batch(batch) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, entries = batch.len(), "Skipping failed index batch");
                0
            }
        };
        batch.clear();
        written
    }
}
