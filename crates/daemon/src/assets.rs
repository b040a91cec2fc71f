use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{VideoError, VideoResult};

/// A completed video file with its metadata row.
#[derive(Debug, Clone, Serialize)]
pub struct Asset {
    pub id: String,
    pub filename: String,
    pub duration: f64,
    pub fps: i64,
    pub width: i64,
    pub height: i64,
    pub created_at: String,
    pub path: String,
    pub profile_id: Option<String>,
}

impl Asset {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Asset {
            id: row.get(0)?,
            filename: row.get(1)?,
            duration: row.get(2)?,
            fps: row.get(3)?,
            width: row.get(4)?,
            height: row.get(5)?,
            created_at: row.get(6)?,
            path: row.get(7)?,
            profile_id: row.get(8)?,
        })
    }
}

const ASSET_COLUMNS: &str =
    "id, filename, duration, fps, width, height, created_at, path, profile_id";

pub struct AssetService {
    db: Arc<Database>,
    config: Arc<AppConfig>,
}

impl AssetService {
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>) -> Self {
        AssetService { db, config }
    }

    pub fn list(&self) -> VideoResult<Vec<Asset>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ASSET_COLUMNS} FROM video_assets ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], Asset::from_row)?;
            let mut assets = Vec::new();
            for row in rows {
                assets.push(row?);
            }
            Ok(assets)
        })
    }

    pub fn get(&self, asset_id: &str) -> VideoResult<Asset> {
        self.db.transaction(|tx| {
            let asset = tx
                .query_row(
                    &format!("SELECT {ASSET_COLUMNS} FROM video_assets WHERE id = ?1"),
                    params![asset_id],
                    Asset::from_row,
                )
                .optional()?;
            asset.ok_or_else(|| {
                VideoError::not_found(format!("Video asset '{asset_id}' not found"))
            })
        })
    }

    /// Resolve the asset's on-disk file. The stored path is canonicalized and
    /// must land under the outputs directory, so a corrupted row cannot leak
    /// arbitrary files.
    pub fn path_for(&self, asset_id: &str) -> VideoResult<PathBuf> {
        let asset = self.get(asset_id)?;

        let path = Path::new(&asset.path).canonicalize().map_err(|_| {
            VideoError::not_found(format!("File for video asset '{asset_id}' not found"))
        })?;

        let outputs_dir = self.config.outputs_dir.canonicalize().map_err(|e| {
            VideoError::service(format!("outputs directory is unavailable: {e}"))
        })?;

        if !path.starts_with(&outputs_dir) {
            return Err(VideoError::validation(format!(
                "Invalid stored path for video asset '{asset_id}'"
            )));
        }

        Ok(path)
    }
}
