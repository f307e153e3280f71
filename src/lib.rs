//! Geospatial photo index and journal log pipeline
//!
//! Photos from the device library are indexed by location in SQLite so that
//! proximity queries stay cheap. Upstream grouping turns photo metadata into
//! clusters; a [`ReviewSession`] lets the user revise membership, place and
//! rating before the ready clusters are committed as journal logs.

pub mod cluster;
pub mod config;
pub mod error;
pub mod index;
pub mod library;
pub mod review;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::ClusterEngine;
pub use config::{IndexConfig, SessionConfig};
pub use index::{ChangeObserver, IndexBuilder};
pub use library::{LibraryChange, PhotoLibrary, SortOrder};
pub use review::{ReviewSession, ReviewSessionState};
pub use state::data::{ClusterId, Coordinate, PhotoAssetRef, PhotoCluster, PlaceCandidate, Rating};
pub use state::store::SpatialIndexStore;
