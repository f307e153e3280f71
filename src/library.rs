/// Photo library collaborator
///
/// The device photo library is external. The index only needs to enumerate
/// image assets and to turn ids from a change notification into
/// [`PhotoAssetRef`] values. Implementations must do that conversion on
/// whatever context owns their native handles; only the extracted refs ever
/// reach a background writer.

use crate::error::LibraryError;
use crate::state::data::{AssetId, PhotoAssetRef};

/// Enumeration order by creation date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// Ids touched by one library mutation notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryChange {
    pub inserted: Vec<AssetId>,
    pub changed: Vec<AssetId>,
    pub removed: Vec<AssetId>,
}

impl LibraryChange {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

pub trait PhotoLibrary: Send + Sync + 'static {
    /// Every image asset, optionally truncated to the first `limit` in `order`
    fn enumerate_images(
        &self,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<PhotoAssetRef>, LibraryError>;

    /// Current refs for `ids`; ids no longer in the library are omitted
    fn fetch_refs(&self, ids: &[AssetId]) -> Result<Vec<PhotoAssetRef>, LibraryError>;
}
