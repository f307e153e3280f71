/// Place resolution and log persistence collaborators
///
/// Both live outside this crate (geocoding service, journal backend). The
/// review session only relies on the contracts below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ServiceError;
use crate::state::data::{AssetId, Coordinate, PlaceCandidate, Rating};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(TripId);
string_id!(PlaceId);
string_id!(LogId);

/// Position of a new log within a trip's timeline
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TripPlacement {
    pub trip: TripId,
    pub sort_key: i64,
}

/// Everything needed to persist one journal log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewLog {
    pub user: UserId,
    pub place: PlaceId,
    pub rating: Rating,
    /// Cover photo first
    pub photo_ids: Vec<AssetId>,
    pub trip: Option<TripPlacement>,
}

#[async_trait]
pub trait PlaceResolver: Send + Sync {
    /// Ranked candidates near `coordinate`, best first
    async fn resolve(
        &self,
        coordinate: Coordinate,
        text: Option<&str>,
    ) -> Result<Vec<PlaceCandidate>, ServiceError>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist (or look up) the place behind a candidate
    async fn materialize_place(&self, candidate: &PlaceCandidate) -> Result<PlaceId, ServiceError>;

    /// Highest sort key among the trip's existing logs, `None` for an empty trip
    async fn max_sort_key(&self, trip: &TripId) -> Result<Option<i64>, ServiceError>;

    async fn create_log(&self, log: NewLog) -> Result<LogId, ServiceError>;
}
