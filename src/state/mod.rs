/// State management module
///
/// This module handles the persistent side of the index:
/// - Shared data structures (data.rs)
/// - The SQLite spatial index and its writer lock (store.rs)

pub mod data;
pub mod store;
