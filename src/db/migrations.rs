// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use anyhow::Result;
use rusqlite::Connection;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Recording devices (desired state, written by the configuration UI)
    CREATE TABLE devices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        protocol TEXT NOT NULL CHECK (protocol IN ('V4L2', 'RTP')),
        name TEXT NOT NULL DEFAULT '',
        debug_level INTEGER NOT NULL DEFAULT 0,
        schedule TEXT,
        hardware_motion INTEGER NOT NULL DEFAULT 0,
        card_id INTEGER,
        extra TEXT NOT NULL DEFAULT '{}'
    );

    -- Global key/value settings (schedule and friends)
    CREATE TABLE global_settings (
        parameter TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Storage locations, priority = ascending scan order
    CREATE TABLE storage (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT NOT NULL,
        min_thresh REAL NOT NULL,
        max_thresh REAL NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0
    );

    -- Recorded media files. Eviction zeroes filepath/size, never deletes rows.
    CREATE TABLE media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER REFERENCES devices(id),
        filepath TEXT NOT NULL DEFAULT '',
        size INTEGER NOT NULL DEFAULT 0,
        start INTEGER NOT NULL DEFAULT 0,
        end INTEGER NOT NULL DEFAULT 0,
        archive INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX idx_media_eviction ON media (archive, end, start);

    -- System and per-device events. length = -1 marks an in-progress
    -- recording event that has not been finalized yet.
    CREATE TABLE events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER REFERENCES devices(id),
        level TEXT NOT NULL CHECK (level IN ('info', 'warning', 'alarm')),
        type TEXT NOT NULL,
        time INTEGER NOT NULL,
        length INTEGER NOT NULL DEFAULT 0,
        media_id INTEGER REFERENCES media(id)
    );
    "#,
];

/// Run all pending migrations, tracked via PRAGMA user_version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        log::info!("Applied database migration {}", version);
    }

    Ok(())
}
