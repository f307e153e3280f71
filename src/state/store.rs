use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::data::{AssetId, IndexEntry};
use crate::error::StoreError;
use crate::index::geo::BoundingBox;

const BUILT_KEY: &str = "built";

/// The SpatialIndexStore manages the SQLite spatial index.
/// It maps asset ids to their last known coordinate and answers
/// bounding-box lookups.
///
/// Clones share one connection and one writer lock. Writers (full build,
/// catch-up refresh, change updates) hold the writer lock for their whole
/// pass; readers go straight to the connection and may observe a pass that is
/// still in flight.
#[derive(Clone)]
pub struct SpatialIndexStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl SpatialIndexStore {
    /// Open (or create) the index at the default location.
    ///
    /// The database file is created in the user's data directory:
    /// - Linux: ~/.local/share/geo-journal/spatial_index.db
    /// - macOS: ~/Library/Application Support/geo-journal/spatial_index.db
    /// - Windows: %APPDATA%\geo-journal\spatial_index.db
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&Self::default_path()?)
    }

    /// Open (or create) the index at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;

        info!(path = %path.display(), "📁 Spatial index opened");

        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a throwaway in-memory index
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            writer: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    fn default_path() -> Result<PathBuf, StoreError> {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or(StoreError::NoDataDir)?;

        path.push("geo-journal");
        path.push("spatial_index.db");
        Ok(path)
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS spatial_index (
                asset_id    TEXT PRIMARY KEY,
                latitude    REAL NOT NULL,
                longitude   REAL NOT NULL,
                created_at  INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_spatial_index_lat_lon
                ON spatial_index(latitude, longitude);

            CREATE INDEX IF NOT EXISTS idx_spatial_index_created_at
                ON spatial_index(created_at DESC);

            CREATE TABLE IF NOT EXISTS index_meta (
                key     TEXT PRIMARY KEY,
                value   TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Path of the database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Wait for exclusive write access.
    ///
    /// Every writer path takes this before touching the index so that no two
    /// passes interleave their batches.
    pub async fn writer(&self) -> OwnedMutexGuard<()> {
        self.writer.clone().lock_owned().await
    }

    /// Number of indexed assets
    pub fn entry_count(&self) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM spatial_index", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Look up one asset
    pub fn get(&self, asset_id: &str) -> Result<Option<IndexEntry>, StoreError> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                "SELECT asset_id, latitude, longitude, created_at
                 FROM spatial_index WHERE asset_id = ?1",
                [asset_id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Insert or update a batch of entries in one transaction.
    /// Returns the number of rows written.
    pub fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO spatial_index (asset_id, latitude, longitude, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(asset_id) DO UPDATE SET
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    created_at = excluded.created_at",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.asset_id,
                    entry.latitude,
                    entry.longitude,
                    entry.created_at.map(|t| t.timestamp()),
                ])?;
            }
        }
        tx.commit()?;

        debug!(entries = entries.len(), "Upserted index batch");
        Ok(entries.len())
    }

    /// Delete a batch of assets in one transaction.
    /// Returns the number of rows actually removed.
    pub fn delete_batch(&self, asset_ids: &[AssetId]) -> Result<usize, StoreError> {
        if asset_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM spatial_index WHERE asset_id = ?1")?;
            for asset_id in asset_ids {
                removed += stmt.execute([asset_id])?;
            }
        }
        tx.commit()?;

        debug!(removed, "Deleted index batch");
        Ok(removed)
    }

    /// Drop every entry
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM spatial_index", [])?;
        Ok(())
    }

    /// Entries whose coordinate lies inside `bbox`, most recent first,
    /// at most `cap` rows
    pub fn entries_in_bbox(
        &self,
        bbox: &BoundingBox,
        cap: usize,
    ) -> Result<Vec<IndexEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT asset_id, latitude, longitude, created_at
             FROM spatial_index
             WHERE latitude BETWEEN ?1 AND ?2
               AND longitude BETWEEN ?3 AND ?4
             ORDER BY created_at DESC
             LIMIT ?5",
        )?;

        let rows = stmt.query_map(
            params![
                bbox.min_lat,
                bbox.max_lat,
                bbox.min_lon,
                bbox.max_lon,
                i64::try_from(cap).unwrap_or(i64::MAX),
            ],
            row_to_entry,
        )?;

        let mut entries = Vec::new();
        for entry in rows {
            entries.push(entry?);
        }
        Ok(entries)
    }

    /// Whether a full build has completed since the index was last cleared
    pub fn is_built(&self) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                [BUILT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.as_deref() == Some("1"))
    }

    pub fn set_built(&self, built: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![BUILT_KEY, if built { "1" } else { "0" }],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexEntry> {
    let created_at: Option<i64> = row.get(3)?;
    Ok(IndexEntry {
        asset_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        created_at: created_at.and_then(|secs| chrono::DateTime::from_timestamp(secs, 0)),
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for SpatialIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndexStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}
