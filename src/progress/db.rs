//! SQLite connection and schema management for progression data
//!
//! Every durable fact lives in one database: the append-only XP ledger,
//! the derived level cache, lesson/streak state, badge grants and
//! certificates. Uniqueness constraints in this schema are the concurrency
//! control for the whole crate - mutations funnel through
//! insert-or-return-existing on them.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;

/// Database wrapper shared by all progression components
#[derive(Clone)]
pub struct ProgressDb {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl ProgressDb {
    /// Open or create the progression database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open progress db: {}", path.display()))?;

        // WAL so readers (snapshots, feeds) never block award writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database, used by tests and demos
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory db")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Get a reference to the connection
    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("Progress DB lock poisoned")
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA_SQL)?;
        drop(conn);
        self.run_migrations()?;
        Ok(())
    }

    /// Run any pending migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn();

        let version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
            .unwrap_or(0);

        // Migration 2: covering index for the per-user activity feed
        if version < 2 {
            conn.execute_batch(
                r#"
                CREATE INDEX IF NOT EXISTS idx_xp_user_created
                    ON xp_events(user_id, created_at DESC);
                "#,
            )?;
            conn.execute("INSERT OR REPLACE INTO schema_version VALUES (2)", [])?;
        }

        Ok(())
    }
}

/// Current timestamp in milliseconds since epoch
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// SQL schema for the progression database
const SCHEMA_SQL: &str = r#"
-- Append-only XP ledger (one row per award; never updated or deleted)
CREATE TABLE IF NOT EXISTS xp_events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    reason TEXT NOT NULL,
    lesson_id TEXT,
    course_id TEXT,
    idempotency_key TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_xp_user ON xp_events(user_id);

-- Derived XP/level cache; recomputable from xp_events at any time
CREATE TABLE IF NOT EXISTS progression_state (
    user_id TEXT PRIMARY KEY,
    total_xp INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    updated_at INTEGER NOT NULL
);

-- Per-lesson completion status; transitions only move forward
CREATE TABLE IF NOT EXISTS lesson_progress (
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'not_started',
    started_at INTEGER,
    completed_at INTEGER,
    PRIMARY KEY (user_id, lesson_id)
);
CREATE INDEX IF NOT EXISTS idx_progress_course ON lesson_progress(user_id, course_id);

-- Daily activity streaks (calendar days, not instants)
CREATE TABLE IF NOT EXISTS streak_state (
    user_id TEXT PRIMARY KEY,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    last_activity_date TEXT,
    updated_at INTEGER
);

-- One row per (user, badge); the primary key is the idempotency guard
CREATE TABLE IF NOT EXISTS badge_grants (
    user_id TEXT NOT NULL,
    badge_id TEXT NOT NULL,
    earned_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, badge_id)
);

-- One certificate per (user, course); code is globally unique and shareable
CREATE TABLE IF NOT EXISTS certificates (
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE,
    issued_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, course_id)
);

-- Schema version
CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);
INSERT OR IGNORE INTO schema_version VALUES (1);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_and_init() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_progress.db");
        let db = ProgressDb::open(&db_path).unwrap();

        let conn = db.conn();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"xp_events".to_string()));
        assert!(tables.contains(&"lesson_progress".to_string()));
        assert!(tables.contains(&"streak_state".to_string()));
        assert!(tables.contains(&"badge_grants".to_string()));
        assert!(tables.contains(&"certificates".to_string()));
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test_progress.db");
        drop(ProgressDb::open(&db_path).unwrap());
        let db = ProgressDb::open(&db_path).unwrap();

        let conn = db.conn();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
