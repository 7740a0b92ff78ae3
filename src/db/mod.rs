// Database module

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::constants::{DB_OPEN_LOG_INTERVAL_SECS, DB_OPEN_RETRY_WINDOW_SECS};
use crate::error::{Result, WardenError};

/// Open or create the daemon database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // Enable WAL mode for better concurrency
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    // Run migrations
    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Open the database, retrying once per second for a bounded window.
/// The store may come up after the daemon under init ordering; keep trying
/// for a while, logging periodically, then give up (fatal startup failure).
pub fn open_db_with_retry(db_path: &Path) -> Result<Connection> {
    open_db_within(
        db_path,
        Duration::from_secs(DB_OPEN_RETRY_WINDOW_SECS),
        Duration::from_secs(1),
    )
}

fn open_db_within(db_path: &Path, window: Duration, pause: Duration) -> Result<Connection> {
    let deadline = Instant::now() + window;
    let mut attempts: u64 = 0;

    loop {
        match open_db(db_path) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if Instant::now() >= deadline {
                    return Err(WardenError::Other(format!(
                        "Could not open database after {}s: {}",
                        window.as_secs(),
                        e
                    )));
                }
                if attempts % DB_OPEN_LOG_INTERVAL_SECS == 0 {
                    log::error!(
                        "Could not open database after {} attempts, still trying: {}",
                        attempts,
                        e
                    );
                }
            }
        }
        std::thread::sleep(pause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_gives_up_after_window() {
        let dir = tempfile::tempdir().unwrap();
        // A file where a directory is needed makes every open attempt fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let started = Instant::now();
        let result = open_db_within(
            &blocker.join("warden.db"),
            Duration::from_millis(50),
            Duration::from_millis(5),
        );

        assert!(matches!(result, Err(WardenError::Other(_))));
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "retry loop must respect the window instead of spinning forever"
        );
    }

    #[test]
    fn test_open_db_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("warden.db")).unwrap();

        // All core tables exist
        for table in ["devices", "global_settings", "storage", "media", "events"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
