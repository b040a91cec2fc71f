use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;

use crate::error::VideoResult;

/// Current UTC time as ISO-8601 with millisecond precision. Stored as TEXT;
/// lexicographic order matches chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path) -> VideoResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let db = Database {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Run a closure inside a transaction. Commits when the closure returns
    /// Ok, rolls back when it returns Err. Transactions are short; no
    /// user-facing I/O happens inside one.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction) -> VideoResult<T>,
    ) -> VideoResult<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn init_schema(&self) -> VideoResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS video_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mode TEXT NOT NULL,
                consent_checked INTEGER NOT NULL DEFAULT 0,
                generation_lock_json TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME NOT NULL DEFAULT(STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW')),
                updated_at DATETIME NOT NULL DEFAULT(STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS video_profile_references (
                id TEXT PRIMARY KEY,
                profile_id TEXT NOT NULL,
                image_name TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (profile_id) REFERENCES video_profiles (id) ON DELETE CASCADE,
                UNIQUE (profile_id, image_name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS video_assets (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                duration REAL NOT NULL,
                fps INTEGER NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                created_at DATETIME NOT NULL DEFAULT(STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW')),
                path TEXT NOT NULL,
                profile_id TEXT,
                FOREIGN KEY (profile_id) REFERENCES video_profiles (id) ON DELETE SET NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS video_jobs (
                id TEXT PRIMARY KEY,
                profile_id TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                error TEXT,
                output_video_id TEXT,
                request_json TEXT NOT NULL DEFAULT '{}',
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT(STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW')),
                updated_at DATETIME NOT NULL DEFAULT(STRFTIME('%Y-%m-%d %H:%M:%f', 'NOW')),
                started_at DATETIME,
                ended_at DATETIME,
                FOREIGN KEY (profile_id) REFERENCES video_profiles (id) ON DELETE CASCADE,
                FOREIGN KEY (output_video_id) REFERENCES video_assets (id) ON DELETE SET NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_video_profile_references_profile_id
             ON video_profile_references (profile_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_video_jobs_profile_id
             ON video_jobs (profile_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_video_jobs_status
             ON video_jobs (status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_video_assets_created_at
             ON video_assets (created_at DESC)",
            [],
        )?;

        Ok(())
    }
}
