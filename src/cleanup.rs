// Startup integrity pass over in-progress recordings
//
// A recording left with length = -1 means the daemon died mid-write. If
// the container holds measurable video, repair the event length; if the
// duration probes as zero (or the file is gone), the recording is corrupt
// and its rows and file are deleted rather than repaired.

use std::path::Path;
use std::process::Command;

use regex::Regex;
use rusqlite::Connection;

use crate::db::schema;
use crate::error::Result;
use crate::tools::ffprobe_path;

/// Probe a container's duration in whole seconds via ffprobe. None when
/// the file is missing, the probe fails, or the output is unparseable.
fn probe_duration_secs(path: &Path) -> Option<i64> {
    if !path.exists() {
        return None;
    }

    let output = Command::new(ffprobe_path())
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_duration_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe duration output ("12.480000") to whole seconds.
fn parse_duration_output(text: &str) -> Option<i64> {
    let re = Regex::new(r"(\d+)(?:\.\d+)?").ok()?;
    let caps = re.captures(text.trim())?;
    caps.get(1)?.as_str().parse::<i64>().ok()
}

/// Repair or delete every in-progress recording found at startup.
pub fn check_in_progress(conn: &Connection) -> Result<()> {
    check_in_progress_with(conn, &probe_duration_secs)
}

fn check_in_progress_with(
    conn: &Connection,
    probe: &dyn Fn(&Path) -> Option<i64>,
) -> Result<()> {
    for rec in schema::list_in_progress(conn)? {
        let filepath = match rec.filepath.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => continue,
        };

        match probe(Path::new(&filepath)) {
            Some(duration) if duration > 0 => {
                log::info!(
                    "Media {} left in-progress so updating length to {}",
                    filepath,
                    duration
                );
                schema::update_event_length(conn, rec.event_id, duration)?;
            }
            _ => {
                log::info!("Media {} has zero time so deleting", filepath);
                schema::delete_event(conn, rec.event_id)?;
                if let Some(media_id) = rec.media_id {
                    schema::delete_media(conn, media_id)?;
                }
                if let Err(e) = std::fs::remove_file(&filepath) {
                    log::warn!("Could not unlink {}: {}", filepath, e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;
    use rusqlite::params;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("warden.db")).unwrap();
        (dir, conn)
    }

    fn insert_in_progress(conn: &Connection, filepath: &str) -> (i64, i64) {
        conn.execute(
            "INSERT INTO media (filepath, size, start, end) VALUES (?1, 100, 1000, 0)",
            [filepath],
        )
        .unwrap();
        let media_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO events (level, type, time, length, media_id)
             VALUES ('info', 'continuous', 1000, -1, ?1)",
            [media_id],
        )
        .unwrap();
        (conn.last_insert_rowid(), media_id)
    }

    #[test]
    fn test_parse_duration_output() {
        assert_eq!(parse_duration_output("12.480000\n"), Some(12));
        assert_eq!(parse_duration_output("0.000000"), Some(0));
        assert_eq!(parse_duration_output("N/A"), None);
        assert_eq!(parse_duration_output(""), None);
    }

    #[test]
    fn test_zero_duration_recording_is_deleted() {
        let (dir, conn) = test_db();
        let file = dir.path().join("dead.mkv");
        std::fs::write(&file, b"x").unwrap();
        let (event_id, media_id) = insert_in_progress(&conn, &file.to_string_lossy());

        check_in_progress_with(&conn, &|_| Some(0)).unwrap();

        assert!(!file.exists(), "corrupt file removed");
        assert!(schema::get_media(&conn, media_id).unwrap().is_none());
        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM events WHERE id = ?1", [event_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(events, 0);
    }

    #[test]
    fn test_measurable_recording_is_repaired() {
        let (dir, conn) = test_db();
        let file = dir.path().join("ok.mkv");
        std::fs::write(&file, b"x").unwrap();
        let (event_id, media_id) = insert_in_progress(&conn, &file.to_string_lossy());

        check_in_progress_with(&conn, &|_| Some(42)).unwrap();

        assert!(file.exists());
        assert!(schema::get_media(&conn, media_id).unwrap().is_some());
        let length: i64 = conn
            .query_row("SELECT length FROM events WHERE id = ?1", [event_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(length, 42);
    }

    #[test]
    fn test_unprobeable_recording_is_deleted() {
        let (dir, conn) = test_db();
        let file = dir.path().join("gone.mkv");
        let (event_id, _) = insert_in_progress(&conn, &file.to_string_lossy());

        check_in_progress_with(&conn, &|_| None).unwrap();

        let events: i64 = conn
            .query_row("SELECT COUNT(*) FROM events WHERE id = ?1", [event_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(events, 0);
    }
}
