use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::builder::IndexBuilder;
use crate::library::{LibraryChange, PhotoLibrary, SortOrder};
use crate::state::data::{AssetId, Coordinate, IndexEntry};
use crate::state::store::SpatialIndexStore;

/// Upserts and deletes derived from one library change notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub upserts: Vec<IndexEntry>,
    pub deletes: Vec<AssetId>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

struct InFlight {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps the spatial index in step with live library mutations.
///
/// The observer owns the last known library snapshot and is driven from the
/// context that receives notifications: refs are extracted there, and only the
/// resulting [`ChangeBatch`] moves to the background writer. A newer
/// notification cancels the batch still being applied for the previous one.
pub struct ChangeObserver<L> {
    library: Arc<L>,
    store: SpatialIndexStore,
    snapshot: Option<HashMap<AssetId, Option<Coordinate>>>,
    in_flight: Option<InFlight>,
}

impl<L: PhotoLibrary> ChangeObserver<L> {
    pub fn new(builder: &IndexBuilder<L>) -> Self {
        Self {
            library: Arc::clone(builder.library()),
            store: builder.store().clone(),
            snapshot: None,
            in_flight: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Start observing. Refused until the index has been built; seeds the
    /// snapshot from the library so later notifications diff against it.
    pub fn attach(&mut self, builder: &IndexBuilder<L>) -> bool {
        if !builder.status().built {
            debug!("Change observer not attached, index not built");
            return false;
        }

        let snapshot = match self.library.enumerate_images(SortOrder::NewestFirst, None) {
            Ok(assets) => assets
                .into_iter()
                .map(|a| (a.asset_id, a.coordinate))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not snapshot library for change observer");
                return false;
            }
        };

        self.snapshot = Some(snapshot);
        info!("👀 Change observer attached");
        true
    }

    /// Stop observing and cancel any batch still being applied
    pub fn detach(&mut self) {
        if let Some(previous) = self.in_flight.take() {
            previous.token.cancel();
        }
        self.snapshot = None;
    }

    /// Diff a notification against the snapshot and apply the result in the
    /// background, superseding any previous application.
    ///
    /// Returns the batch that was dispatched, `None` when detached or when the
    /// notification changed nothing the index cares about.
    pub fn handle_change(&mut self, change: LibraryChange) -> Option<ChangeBatch> {
        let batch = self.diff(change)?;
        if batch.is_empty() {
            return None;
        }

        if let Some(previous) = self.in_flight.take() {
            if !previous.task.is_finished() {
                debug!("Superseding in-flight change batch");
            }
            previous.token.cancel();
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(apply_batch(self.store.clone(), batch.clone(), token.clone()));
        self.in_flight = Some(InFlight { token, task });
        Some(batch)
    }

    /// Wait for the most recently dispatched batch to finish
    pub async fn settle(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            if let Err(e) = in_flight.task.await {
                warn!(error = %e, "Change batch task failed");
            }
        }
    }

    /// Consume notifications until the channel closes
    pub async fn run(mut self, mut changes: mpsc::UnboundedReceiver<LibraryChange>) {
        while let Some(change) = changes.recv().await {
            self.handle_change(change);
        }
        self.settle().await;
        debug!("Change observer stopped");
    }

    fn diff(&mut self, change: LibraryChange) -> Option<ChangeBatch> {
        let snapshot = self.snapshot.as_mut()?;
        let mut batch = ChangeBatch::default();

        for id in change.removed {
            if snapshot.remove(&id).is_some() {
                batch.deletes.push(id);
            }
        }

        let touched: Vec<AssetId> = change.inserted.into_iter().chain(change.changed).collect();
        if touched.is_empty() {
            return Some(batch);
        }

        let refs = match self.library.fetch_refs(&touched) {
            Ok(refs) => refs,
            Err(e) => {
                warn!(error = %e, assets = touched.len(), "Could not fetch changed photos");
                return Some(batch);
            }
        };

        let mut found: HashMap<AssetId, _> =
            refs.into_iter().map(|r| (r.asset_id.clone(), r)).collect();

        for id in touched {
            let Some(asset) = found.remove(&id) else {
                // Gone again before we could look at it
                if snapshot.remove(&id).is_some() {
                    batch.deletes.push(id);
                }
                continue;
            };

            let previous = snapshot.insert(id.clone(), asset.coordinate);
            if previous == Some(asset.coordinate) {
                continue;
            }
            match asset.index_entry() {
                Some(entry) => batch.upserts.push(entry),
                None if matches!(previous, Some(Some(_))) => batch.deletes.push(id),
                None => {}
            }
        }

        Some(batch)
    }
}

impl<L> Drop for ChangeObserver<L> {
    fn drop(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.token.cancel();
        }
    }
}

async fn apply_batch(store: SpatialIndexStore, batch: ChangeBatch, token: CancellationToken) {
    let _writer = tokio::select! {
        guard = store.writer() => guard,
        _ = token.cancelled() => {
            debug!("Change batch superseded before it started");
            return;
        }
    };

    let result = tokio::task::spawn_blocking(move || {
        if token.is_cancelled() {
            return None;
        }
        let upserted = store.upsert_batch(&batch.upserts).unwrap_or_else(|e| {
            warn!(error = %e, "Skipping failed change upsert batch");
            0
        });
        if token.is_cancelled() {
            return Some((upserted, 0));
        }
        let removed = store.delete_batch(&batch.deletes).unwrap_or_else(|e| {
            warn!(error = %e, "Skipping failed change delete batch");
            0
        });
        Some((upserted, removed))
    })
    .await;

    match result {
        Ok(Some((upserted, removed))) => debug!(upserted, removed, "Applied change batch"),
        Ok(None) => debug!("Change batch superseded"),
        Err(e) => warn!(error = %e, "Change batch worker failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::testing::MemoryLibrary;

    async fn built() -> IndexBuilder<MemoryLibrary> {
        let library = MemoryLibrary::default();
        library.add_located("a", 10.0, 10.0, 1);
        library.add_located("b", 20.0, 20.0, 2);
        library.add_unlocated("c", 3);

        let store = SpatialIndexStore::open_in_memory().unwrap();
        let builder = IndexBuilder::new(Arc::new(library), store, IndexConfig::default());
        builder.build_full().wait().await;
        builder
    }

    fn ids(list: &[&str]) -> Vec<AssetId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_attach_requires_built_index() {
        let store = SpatialIndexStore::open_in_memory().unwrap();
        let builder = IndexBuilder::new(Arc::new(MemoryLibrary::default()), store, IndexConfig::default());
        let mut observer = ChangeObserver::new(&builder);

        assert!(!observer.attach(&builder));
        assert!(observer
            .handle_change(LibraryChange {
                inserted: ids(&["x"]),
                ..Default::default()
            })
            .is_none());
    }

    #[tokio::test]
    async fn test_changes_are_diffed_and_applied() {
        let builder = built().await;
        let mut observer = ChangeObserver::new(&builder);
        assert!(observer.attach(&builder));

        let library = builder.library();
        library.add_located("d", 30.0, 30.0, 4);
        library.move_to("a", 11.0, 11.0);
        library.strip_location("b");
        library.add_located("c", 5.0, 5.0, 3);

        let batch = observer
            .handle_change(LibraryChange {
                inserted: ids(&["d"]),
                changed: ids(&["a", "b", "c"]),
                removed: Vec::new(),
            })
            .unwrap();
        observer.settle().await;

        let mut upserted: Vec<_> = batch.upserts.iter().map(|e| e.asset_id.as_str()).collect();
        upserted.sort();
        assert_eq!(upserted, vec!["a", "c", "d"]);
        assert_eq!(batch.deletes, ids(&["b"]));

        let store = builder.store();
        assert_eq!(store.get("a").unwrap().unwrap().coordinate(), Coordinate::new(11.0, 11.0));
        assert!(store.get("b").unwrap().is_none());
        assert!(store.get("c").unwrap().is_some());
        assert!(store.get("d").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unchanged_and_removed_assets() {
        let builder = built().await;
        let mut observer = ChangeObserver::new(&builder);
        observer.attach(&builder);

        // Touched without a location change: nothing to write
        assert!(observer
            .handle_change(LibraryChange {
                changed: ids(&["a"]),
                ..Default::default()
            })
            .is_none());

        builder.library().remove("b");
        let batch = observer
            .handle_change(LibraryChange {
                removed: ids(&["b", "never-seen"]),
                ..Default::default()
            })
            .unwrap();
        observer.settle().await;

        assert_eq!(batch.deletes, ids(&["b"]));
        assert!(builder.store().get("b").unwrap().is_none());
        assert_eq!(builder.store().entry_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_newer_notification_supersedes_pending_batch() {
        let builder = built().await;
        let mut observer = ChangeObserver::new(&builder);
        observer.attach(&builder);

        // Keep both batches waiting on the writer
        let writer = builder.store().writer().await;

        builder.library().add_located("x", 1.0, 1.0, 20);
        observer
            .handle_change(LibraryChange {
                inserted: ids(&["x"]),
                ..Default::default()
            })
            .unwrap();
        tokio::task::yield_now().await;

        builder.library().add_located("y", 2.0, 2.0, 21);
        observer
            .handle_change(LibraryChange {
                inserted: ids(&["y"]),
                ..Default::default()
            })
            .unwrap();

        drop(writer);
        observer.settle().await;

        let store = builder.store();
        assert!(store.get("x").unwrap().is_none());
        assert!(store.get("y").unwrap().is_some());
        assert_eq!(store.entry_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_run_loop_applies_notifications() {
        let builder = built().await;
        let mut observer = ChangeObserver::new(&builder);
        observer.attach(&builder);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(observer.run(rx));

        builder.library().add_located("e", 1.0, 2.0, 9);
        tx.send(LibraryChange {
            inserted: ids(&["e"]),
            ..Default::default()
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(builder.store().get("e").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_detach_stops_observing() {
        let builder = built().await;
        let mut observer = ChangeObserver::new(&builder);
        observer.attach(&builder);
        observer.detach();

        assert!(!observer.is_attached());
        builder.library().add_located("f", 1.0, 1.0, 10);
        assert!(observer
            .handle_change(LibraryChange {
                inserted: ids(&["f"]),
                ..Default::default()
            })
            .is_none());
    }
}
