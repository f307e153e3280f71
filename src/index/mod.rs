/// Spatial indexing module
///
/// This module keeps the asset-id → coordinate index current and queries it:
/// - Great-circle math and bounding boxes (geo.rs)
/// - Full rebuilds, catch-up refreshes and proximity queries (builder.rs)
/// - Live library change handling (observer.rs)

pub mod builder;
pub mod geo;
pub mod observer;

pub use builder::{
    BuildHandle, BuildOutcome, BuildReport, IndexBuilder, IndexStatus, RefreshOutcome, SkipReason,
};
pub use observer::{ChangeBatch, ChangeObserver};
