//! In-memory collaborators shared by the unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{LibraryError, ServiceError};
use crate::library::{PhotoLibrary, SortOrder};
use crate::review::services::{LogId, LogStore, NewLog, PlaceId, PlaceResolver, TripId};
use crate::state::data::{AssetId, Coordinate, PhotoAssetRef, PlaceCandidate};

/// Photo library backed by a vector. Enumeration can be slowed down to give
/// tests a window in which a build is provably mid-pass.
#[derive(Default)]
pub struct MemoryLibrary {
    assets: RwLock<Vec<PhotoAssetRef>>,
    delay: Mutex<Duration>,
    started: Arc<Notify>,
    unavailable: Mutex<bool>,
}

impl MemoryLibrary {
    fn upsert(&self, asset: PhotoAssetRef) {
        let mut assets = self.assets.write().unwrap();
        match assets.iter_mut().find(|a| a.asset_id == asset.asset_id) {
            Some(existing) => *existing = asset,
            None => assets.push(asset),
        }
    }

    pub fn add_located(&self, id: &str, lat: f64, lon: f64, created_secs: i64) {
        let created = Utc.timestamp_opt(created_secs, 0).unwrap();
        self.upsert(PhotoAssetRef::located(id, lat, lon).with_created_at(created));
    }

    pub fn add_unlocated(&self, id: &str, created_secs: i64) {
        let created = Utc.timestamp_opt(created_secs, 0).unwrap();
        self.upsert(PhotoAssetRef::new(id, None).with_created_at(created));
    }

    pub fn move_to(&self, id: &str, lat: f64, lon: f64) {
        let mut assets = self.assets.write().unwrap();
        if let Some(asset) = assets.iter_mut().find(|a| a.asset_id == id) {
            asset.coordinate = Some(Coordinate::new(lat, lon));
        }
    }

    pub fn strip_location(&self, id: &str) {
        let mut assets = self.assets.write().unwrap();
        if let Some(asset) = assets.iter_mut().find(|a| a.asset_id == id) {
            asset.coordinate = None;
        }
    }

    pub fn remove(&self, id: &str) {
        self.assets.write().unwrap().retain(|a| a.asset_id != id);
    }

    pub fn snapshot(&self) -> Vec<PhotoAssetRef> {
        self.assets.read().unwrap().clone()
    }

    /// Sleep this long inside every enumeration
    pub fn set_enumerate_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Make every enumeration fail until switched back off
    pub fn fail_enumeration(&self, fail: bool) {
        *self.unavailable.lock().unwrap() = fail;
    }

    /// Notified whenever a delayed enumeration begins
    pub fn enumeration_started(&self) -> Arc<Notify> {
        Arc::clone(&self.started)
    }
}

impl PhotoLibrary for MemoryLibrary {
    fn enumerate_images(
        &self,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<PhotoAssetRef>, LibraryError> {
        if *self.unavailable.lock().unwrap() {
            return Err(LibraryError::Unavailable("library offline".into()));
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            self.started.notify_one();
            std::thread::sleep(delay);
        }

        let mut assets = self.snapshot();
        assets.sort_by_key(|a| a.created_at);
        if order == SortOrder::NewestFirst {
            assets.reverse();
        }
        if let Some(limit) = limit {
            assets.truncate(limit);
        }
        Ok(assets)
    }

    fn fetch_refs(&self, ids: &[AssetId]) -> Result<Vec<PhotoAssetRef>, LibraryError> {
        let wanted: HashSet<_> = ids.iter().collect();
        Ok(self
            .assets
            .read()
            .unwrap()
            .iter()
            .filter(|a| wanted.contains(&a.asset_id))
            .cloned()
            .collect())
    }
}

/// Returns `count` candidates derived from the coordinate
pub struct MemoryResolver {
    count: usize,
    failing: Mutex<Vec<Coordinate>>,
    calls: Arc<Mutex<Vec<(Coordinate, Option<String>)>>>,
}

impl MemoryResolver {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            failing: Mutex::new(Vec::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn fail_near(&self, lat: f64, lon: f64) {
        self.failing.lock().unwrap().push(Coordinate::new(lat, lon));
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<(Coordinate, Option<String>)>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl PlaceResolver for MemoryResolver {
    async fn resolve(
        &self,
        coordinate: Coordinate,
        text: Option<&str>,
    ) -> Result<Vec<PlaceCandidate>, ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push((coordinate, text.map(str::to_string)));

        if self.failing.lock().unwrap().contains(&coordinate) {
            return Err(ServiceError::Resolve("geocoder offline".into()));
        }

        Ok((0..self.count)
            .map(|rank| PlaceCandidate {
                id: format!("{:.3},{:.3}#{rank}", coordinate.latitude, coordinate.longitude),
                name: format!("Place {rank}"),
                address: String::new(),
            })
            .collect())
    }
}

/// Records created logs; can be told to fail for clusters with a given cover
#[derive(Default)]
pub struct MemoryLogStore {
    created: Mutex<Vec<NewLog>>,
    existing: Mutex<HashMap<TripId, i64>>,
    fail_covers: Mutex<HashSet<AssetId>>,
    sort_keys_offline: Mutex<bool>,
}

impl MemoryLogStore {
    pub fn add_existing(&self, trip: &TripId, sort_key: i64) {
        let mut existing = self.existing.lock().unwrap();
        let max = existing.entry(trip.clone()).or_insert(sort_key);
        *max = (*max).max(sort_key);
    }

    pub fn fail_for_cover(&self, asset_id: &str) {
        self.fail_covers.lock().unwrap().insert(asset_id.to_string());
    }

    pub fn fail_sort_keys(&self, fail: bool) {
        *self.sort_keys_offline.lock().unwrap() = fail;
    }

    pub fn created(&self) -> Vec<NewLog> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn materialize_place(&self, candidate: &PlaceCandidate) -> Result<PlaceId, ServiceError> {
        Ok(PlaceId(format!("place:{}", candidate.id)))
    }

    async fn max_sort_key(&self, trip: &TripId) -> Result<Option<i64>, ServiceError> {
        if *self.sort_keys_offline.lock().unwrap() {
            return Err(ServiceError::Persist("trip store offline".into()));
        }
        let existing = self.existing.lock().unwrap().get(trip).copied();
        let created = self
            .created
            .lock()
            .unwrap()
            .iter()
            .filter_map(|l| l.trip.as_ref())
            .filter(|p| &p.trip == trip)
            .map(|p| p.sort_key)
            .max();
        Ok(existing.max(created))
    }

    async fn create_log(&self, log: NewLog) -> Result<LogId, ServiceError> {
        let cover = log.photo_ids.first().cloned().unwrap_or_default();
        if self.fail_covers.lock().unwrap().contains(&cover) {
            return Err(ServiceError::Persist(format!("rejected log for {cover}")));
        }

        let mut created = self.created.lock().unwrap();
        created.push(log);
        Ok(LogId(format!("log-{}", created.len())))
    }
}
