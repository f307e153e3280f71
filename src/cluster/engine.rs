use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::state::data::{AssetId, ClusterId, PhotoAssetRef, PhotoCluster, PlaceCandidate, Rating};

/// In-memory owner of the clusters under review and the two loose pools.
///
/// Every admitted photo sits in exactly one of: a cluster, the unlocated pool,
/// the excluded pool. Mutations take `&mut self` and never fail; unknown ids,
/// unknown clusters and out-of-range indices turn the call into a no-op and
/// it returns `false`.
#[derive(Debug, Clone)]
pub struct ClusterEngine {
    clusters: Vec<PhotoCluster>,
    unlocated: Vec<PhotoAssetRef>,
    excluded: Vec<PhotoAssetRef>,
    admitted: HashSet<AssetId>,
    max_suggestions: usize,
}

impl Default for ClusterEngine {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

impl ClusterEngine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            clusters: Vec::new(),
            unlocated: Vec::new(),
            excluded: Vec::new(),
            admitted: HashSet::new(),
            max_suggestions: config.max_suggestions,
        }
    }

    /// Replace the contents with an upstream grouping.
    ///
    /// Later occurrences of an id already admitted are dropped. Empty groups
    /// are skipped. Returns the number of photos admitted.
    pub fn seed(&mut self, groups: Vec<Vec<PhotoAssetRef>>, unlocated: Vec<PhotoAssetRef>) -> usize {
        self.clusters.clear();
        self.unlocated.clear();
        self.excluded.clear();
        self.admitted.clear();

        for group in groups {
            let photos = self.admit(group);
            if !photos.is_empty() {
                self.clusters.push(PhotoCluster::new(photos));
            }
        }
        self.unlocated = self.admit(unlocated);

        debug!(
            clusters = self.clusters.len(),
            unlocated = self.unlocated.len(),
            admitted = self.admitted.len(),
            "Seeded cluster engine"
        );
        self.admitted.len()
    }

    fn admit(&mut self, refs: Vec<PhotoAssetRef>) -> Vec<PhotoAssetRef> {
        refs.into_iter()
            .filter(|r| {
                let fresh = self.admitted.insert(r.asset_id.clone());
                if !fresh {
                    warn!(asset_id = %r.asset_id, "Dropping photo admitted twice");
                }
                fresh
            })
            .collect()
    }

    pub fn clusters(&self) -> &[PhotoCluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&PhotoCluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn unlocated(&self) -> &[PhotoAssetRef] {
        &self.unlocated
    }

    pub fn excluded(&self) -> &[PhotoAssetRef] {
        &self.excluded
    }

    pub fn is_admitted(&self, asset_id: &str) -> bool {
        self.admitted.contains(asset_id)
    }

    fn position(&self, id: ClusterId) -> Option<usize> {
        self.clusters.iter().position(|c| c.id == id)
    }

    fn cluster_mut(&mut self, id: ClusterId) -> Option<&mut PhotoCluster> {
        self.clusters.iter_mut().find(|c| c.id == id)
    }

    /// Drop clusters left without members, keeping user placeholders
    fn prune_empty(&mut self) {
        self.clusters
            .retain(|c| !c.photos.is_empty() || c.placeholder);
    }

    pub fn update_rating(&mut self, cluster: ClusterId, rating: Option<Rating>) -> bool {
        match self.cluster_mut(cluster) {
            Some(c) => {
                c.rating = rating;
                true
            }
            None => false,
        }
    }

    pub fn update_place(&mut self, cluster: ClusterId, place: Option<PlaceCandidate>) -> bool {
        match self.cluster_mut(cluster) {
            Some(c) => {
                c.confirmed_place = place;
                true
            }
            None => false,
        }
    }

    /// Promote one of the cluster's suggestions to its confirmed place
    pub fn select_suggested_place(&mut self, cluster: ClusterId, candidate_id: &str) -> bool {
        let Some(c) = self.cluster_mut(cluster) else {
            return false;
        };
        match c.suggested_places.iter().find(|p| p.id == candidate_id) {
            Some(candidate) => {
                c.confirmed_place = Some(candidate.clone());
                true
            }
            None => false,
        }
    }

    /// Replace the ranked suggestions, keeping at most `max_suggestions`
    pub fn set_suggestions(&mut self, cluster: ClusterId, mut places: Vec<PlaceCandidate>) -> bool {
        let max = self.max_suggestions;
        match self.cluster_mut(cluster) {
            Some(c) => {
                places.truncate(max);
                c.suggested_places = places;
                true
            }
            None => false,
        }
    }

    /// Delete a cluster together with its photos. Unlike exclusion the photos
    /// do not go to any pool.
    pub fn remove_cluster(&mut self, cluster: ClusterId) -> bool {
        self.take_cluster(cluster).is_some()
    }

    /// Remove a cluster and release its photos from the admitted set
    pub(crate) fn take_cluster(&mut self, cluster: ClusterId) -> Option<PhotoCluster> {
        let idx = self.position(cluster)?;
        let removed = self.clusters.remove(idx);
        for photo in &removed.photos {
            self.admitted.remove(&photo.asset_id);
        }
        Some(removed)
    }

    /// Create a placeholder cluster that survives pruning until populated
    pub fn add_empty_cluster(&mut self) -> ClusterId {
        let cluster = PhotoCluster::placeholder();
        let id = cluster.id;
        self.clusters.push(cluster);
        id
    }

    /// Admit photos that are new to the session straight into a cluster.
    /// Returns how many were added.
    pub fn add_photos(&mut self, refs: Vec<PhotoAssetRef>, target: ClusterId) -> usize {
        if self.position(target).is_none() {
            return 0;
        }
        let fresh: Vec<_> = refs
            .into_iter()
            .filter(|r| !self.admitted.contains(&r.asset_id))
            .collect();
        let fresh = self.admit(fresh);
        let added = fresh.len();
        if let Some(c) = self.cluster_mut(target) {
            append(c, fresh);
        }
        added
    }

    /// Move photos from whichever clusters hold them to the end of `target`,
    /// in the order given. Photos already in `target` stay where they are.
    pub fn move_photos(&mut self, ids: &[AssetId], target: ClusterId) -> bool {
        let Some(target_idx) = self.position(target) else {
            return false;
        };

        let mut seen = HashSet::new();
        let mut moved = Vec::new();
        let mut touched = HashSet::new();

        for id in ids {
            if !seen.insert(id) || self.clusters[target_idx].contains(id) {
                continue;
            }
            for (idx, cluster) in self.clusters.iter_mut().enumerate() {
                if idx == target_idx {
                    continue;
                }
                if let Some(pos) = cluster.photos.iter().position(|p| &p.asset_id == id) {
                    moved.push(cluster.photos.remove(pos));
                    touched.insert(idx);
                    break;
                }
            }
        }

        if moved.is_empty() {
            return false;
        }

        append(&mut self.clusters[target_idx], moved);
        for idx in touched {
            self.clusters[idx].recompute_centroid();
        }
        self.prune_empty();
        true
    }

    /// Move photos from the unlocated pool to the end of `target`
    pub fn move_unlocated_photos(&mut self, ids: &[AssetId], target: ClusterId) -> bool {
        let Some(target_idx) = self.position(target) else {
            return false;
        };

        let mut moved = Vec::new();
        for id in ids {
            if let Some(pos) = self.unlocated.iter().position(|p| &p.asset_id == id) {
                moved.push(self.unlocated.remove(pos));
            }
        }

        if moved.is_empty() {
            return false;
        }
        append(&mut self.clusters[target_idx], moved);
        true
    }

    /// Move a photo from cluster `from` to the excluded pool
    pub fn exclude_photo(&mut self, id: &str, from: ClusterId) -> bool {
        let Some(cluster) = self.cluster_mut(from) else {
            return false;
        };
        let Some(pos) = cluster.photos.iter().position(|p| p.asset_id == id) else {
            return false;
        };

        let photo = cluster.photos.remove(pos);
        cluster.recompute_centroid();
        self.excluded.push(photo);
        self.prune_empty();
        true
    }

    pub fn exclude_unlocated_photo(&mut self, id: &str) -> bool {
        let Some(pos) = self.unlocated.iter().position(|p| p.asset_id == id) else {
            return false;
        };
        let photo = self.unlocated.remove(pos);
        self.excluded.push(photo);
        true
    }

    /// Move a photo from the excluded pool to the end of cluster `to`
    pub fn restore_photo(&mut self, id: &str, to: ClusterId) -> bool {
        let Some(target_idx) = self.position(to) else {
            return false;
        };
        let Some(pos) = self.excluded.iter().position(|p| p.asset_id == id) else {
            return false;
        };

        let photo = self.excluded.remove(pos);
        append(&mut self.clusters[target_idx], vec![photo]);
        true
    }

    /// Move a photo from the excluded pool back to the unlocated pool
    pub fn restore_unlocated_photo(&mut self, id: &str) -> bool {
        let Some(pos) = self.excluded.iter().position(|p| p.asset_id == id) else {
            return false;
        };
        let photo = self.excluded.remove(pos);
        self.unlocated.push(photo);
        true
    }

    /// Move the photo at `from_idx` to `to_idx` within one cluster.
    /// Index 0 is the cover photo.
    pub fn reorder_photo(&mut self, cluster: ClusterId, from_idx: usize, to_idx: usize) -> bool {
        let Some(c) = self.cluster_mut(cluster) else {
            return false;
        };
        let len = c.photos.len();
        if from_idx == to_idx || from_idx >= len || to_idx >= len {
            return false;
        }

        let photo = c.photos.remove(from_idx);
        c.photos.insert(to_idx, photo);
        true
    }

    /// Permanently drop everything in the excluded pool
    pub fn discard_all_excluded(&mut self) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        for photo in self.excluded.drain(..) {
            self.admitted.remove(&photo.asset_id);
        }
        true
    }

    /// Every admitted id is in exactly one container and nothing else is
    pub fn partition_holds(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.admitted.len());
        let all = self
            .clusters
            .iter()
            .flat_map(|c| c.photos.iter())
            .chain(self.unlocated.iter())
            .chain(self.excluded.iter());

        for photo in all {
            if !seen.insert(photo.asset_id.as_str()) {
                return false;
            }
        }
        seen.len() == self.admitted.len() && seen.iter().all(|id| self.admitted.contains(*id))
    }
}

fn append(cluster: &mut PhotoCluster, photos: Vec<PhotoAssetRef>) {
    if photos.is_empty() {
        return;
    }
    cluster.photos.extend(photos);
    cluster.placeholder = false;
    cluster.recompute_centroid();
}
