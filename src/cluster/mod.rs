/// Cluster editing module
///
/// Holds the clusters under review plus the unlocated and excluded pools,
/// and the synchronous mutation API the review screen drives.

pub mod engine;

pub use engine::ClusterEngine;
