/// Shared data structures for the index and the review pipeline
///
/// These structs represent the data model that flows between the photo
/// library, the spatial index and the cluster engine. `PhotoAssetRef` is the
/// only form in which photo identity crosses into background workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier of a photo in the device library
pub type AssetId = String;

/// A WGS84 latitude/longitude pair in degrees
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Lightweight, transferable reference to a photo
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhotoAssetRef {
    pub asset_id: AssetId,
    pub coordinate: Option<Coordinate>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PhotoAssetRef {
    pub fn new(asset_id: impl Into<AssetId>, coordinate: Option<Coordinate>) -> Self {
        Self {
            asset_id: asset_id.into(),
            coordinate,
            created_at: None,
        }
    }

    pub fn located(asset_id: impl Into<AssetId>, latitude: f64, longitude: f64) -> Self {
        Self::new(asset_id, Some(Coordinate::new(latitude, longitude)))
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// The index row for this asset, if it carries a location
    pub fn index_entry(&self) -> Option<IndexEntry> {
        self.coordinate.map(|c| IndexEntry {
            asset_id: self.asset_id.clone(),
            latitude: c.latitude,
            longitude: c.longitude,
            created_at: self.created_at,
        })
    }
}

/// One row of the spatial index: the last known location of an asset
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub asset_id: AssetId,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: Option<DateTime<Utc>>,
}

impl IndexEntry {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// A candidate place returned by the place resolver
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlaceCandidate {
    pub id: String,
    pub name: String,
    pub address: String,
}

/// How the user rated a visit
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rating {
    Disliked,
    Okay,
    Liked,
    Loved,
}

/// Identifier of a cluster within one review session
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterId(Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A reviewable group of photos proposed to become one journal log
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoCluster {
    pub id: ClusterId,
    /// Member photos; index 0 is the cover photo
    pub photos: Vec<PhotoAssetRef>,
    /// Mean of the located members. Keeps its previous value when no member
    /// carries a coordinate.
    pub centroid: Option<Coordinate>,
    /// Ranked place suggestions, best first
    pub suggested_places: Vec<PlaceCandidate>,
    /// Place chosen by the user; overrides suggestions
    pub confirmed_place: Option<PlaceCandidate>,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    /// Created empty by the user; survives pruning until populated
    pub(crate) placeholder: bool,
}

impl PhotoCluster {
    pub fn new(photos: Vec<PhotoAssetRef>) -> Self {
        let created_at = photos
            .iter()
            .filter_map(|p| p.created_at)
            .min()
            .unwrap_or_else(Utc::now);

        let mut cluster = Self {
            id: ClusterId::new(),
            photos,
            centroid: None,
            suggested_places: Vec::new(),
            confirmed_place: None,
            rating: None,
            created_at,
            placeholder: false,
        };
        cluster.recompute_centroid();
        cluster
    }

    pub(crate) fn placeholder() -> Self {
        Self {
            placeholder: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn cover(&self) -> Option<&PhotoAssetRef> {
        self.photos.first()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.photos.iter().any(|p| p.asset_id == asset_id)
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// The place a log would be filed under: confirmed, else the top suggestion
    pub fn effective_place(&self) -> Option<&PlaceCandidate> {
        self.confirmed_place
            .as_ref()
            .or_else(|| self.suggested_places.first())
    }

    /// Has a place (confirmed or suggested) and a rating
    pub fn is_ready(&self) -> bool {
        self.effective_place().is_some() && self.rating.is_some()
    }

    /// Arithmetic mean of latitude and longitude across located members
    pub fn recompute_centroid(&mut self) {
        let (count, lat_sum, lon_sum) = self
            .photos
            .iter()
            .filter_map(|p| p.coordinate)
            .fold((0usize, 0.0, 0.0), |(n, lat, lon), c| {
                (n + 1, lat + c.latitude, lon + c.longitude)
            });

        if count > 0 {
            self.centroid = Some(Coordinate::new(
                lat_sum / count as f64,
                lon_sum / count as f64,
            ));
        }
    }
}
