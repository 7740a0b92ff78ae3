// Database schema types and query helpers

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ----- Devices -----

/// One row of desired-device configuration, fetched each reconciliation tick.
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub id: i64,
    pub protocol: String,
    pub name: String,
    pub debug_level: i32,
    pub schedule: Option<String>,
    pub hardware_motion: bool,
    /// V4L2 only: set once card detection has completed.
    pub card_id: Option<i64>,
    pub extra: String,
}

/// Optional per-device tuning carried in the `extra` JSON column. Unknown
/// keys are ignored so the configuration UI can grow fields the daemon does
/// not know about yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceExtra {
    /// Hardware motion sensitivity pushed to the device when detection is
    /// armed.
    pub motion_threshold: Option<u16>,
    /// Secondary stream identifier for protocols that carry one.
    pub substream: Option<String>,
}

impl DeviceRow {
    /// Parse the extra-config payload. Malformed JSON is logged and treated
    /// as empty so one bad row cannot keep a camera from starting.
    pub fn parse_extra(&self) -> DeviceExtra {
        match serde_json::from_str(&self.extra) {
            Ok(extra) => extra,
            Err(e) => {
                log::warn!("Device {} has malformed extra config: {}", self.id, e);
                DeviceExtra::default()
            }
        }
    }
}

pub fn list_devices(conn: &Connection) -> Result<Vec<DeviceRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, protocol, name, debug_level, schedule, hardware_motion, card_id, extra
         FROM devices ORDER BY id",
    )?;

    let devices = stmt
        .query_map([], |row| {
            Ok(DeviceRow {
                id: row.get(0)?,
                protocol: row.get(1)?,
                name: row.get(2)?,
                debug_level: row.get(3)?,
                schedule: row.get(4)?,
                hardware_motion: row.get::<_, i64>(5)? != 0,
                card_id: row.get(6)?,
                extra: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(devices)
}

// ----- Global settings -----

pub fn get_global(conn: &Connection, parameter: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM global_settings WHERE parameter = ?1",
            [parameter],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_global(conn: &Connection, parameter: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO global_settings (parameter, value) VALUES (?1, ?2)
         ON CONFLICT(parameter) DO UPDATE SET value = excluded.value",
        params![parameter, value],
    )?;
    Ok(())
}

// ----- Storage -----

#[derive(Debug, Clone)]
pub struct StorageRow {
    pub path: String,
    pub min_thresh: f32,
    pub max_thresh: f32,
}

/// Storage locations in priority order (lower priority value scanned first).
pub fn list_storage(conn: &Connection) -> Result<Vec<StorageRow>> {
    let mut stmt = conn.prepare(
        "SELECT path, min_thresh, max_thresh FROM storage ORDER BY priority ASC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(StorageRow {
                path: row.get(0)?,
                min_thresh: row.get(1)?,
                max_thresh: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

// ----- Media -----

#[derive(Debug, Clone)]
pub struct MediaRow {
    pub id: i64,
    pub device_id: Option<i64>,
    pub filepath: String,
    pub size: i64,
    pub start: i64,
    pub end: i64,
    pub archive: bool,
}

fn media_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MediaRow> {
    Ok(MediaRow {
        id: row.get(0)?,
        device_id: row.get(1)?,
        filepath: row.get(2)?,
        size: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
        archive: row.get::<_, i64>(6)? != 0,
    })
}

/// Media rows eligible for eviction under the given storage path, oldest
/// first. Archived rows and still-open recordings (end = 0) are never
/// candidates, nor are rows whose file has already been cleared (size = 0).
pub fn eviction_candidates(conn: &Connection, path_prefix: &str) -> Result<Vec<MediaRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, device_id, filepath, size, start, end, archive FROM media
         WHERE archive = 0 AND end != 0 AND size > 0 AND filepath LIKE ?1 || '%'
         ORDER BY start ASC",
    )?;

    let rows = stmt
        .query_map([path_prefix], media_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Zero out a media row's file reference after eviction. The metadata row
/// itself is kept so the event history stays intact.
pub fn clear_media_file(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE media SET filepath = '', size = 0 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

pub fn get_media(conn: &Connection, id: i64) -> Result<Option<MediaRow>> {
    let row = conn
        .query_row(
            "SELECT id, device_id, filepath, size, start, end, archive
             FROM media WHERE id = ?1",
            [id],
            media_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn delete_media(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM media WHERE id = ?1", [id])?;
    Ok(())
}

// ----- Events -----

/// An events row joined to its media file, used for the startup
/// in-progress cleanup pass (length = -1 means never finalized).
#[derive(Debug, Clone)]
pub struct InProgressRecording {
    pub event_id: i64,
    pub media_id: Option<i64>,
    pub filepath: Option<String>,
}

pub fn list_in_progress(conn: &Connection) -> Result<Vec<InProgressRecording>> {
    let mut stmt = conn.prepare(
        "SELECT events.id, events.media_id, media.filepath
         FROM events LEFT JOIN media ON (events.media_id = media.id)
         WHERE events.length = -1",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(InProgressRecording {
                event_id: row.get(0)?,
                media_id: row.get(1)?,
                filepath: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

pub fn insert_event(
    conn: &Connection,
    device_id: Option<i64>,
    level: &str,
    event_type: &str,
    time: i64,
    length: i64,
    media_id: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO events (device_id, level, type, time, length, media_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![device_id, level, event_type, time, length, media_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_event_length(conn: &Connection, event_id: i64, length: i64) -> Result<()> {
    conn.execute(
        "UPDATE events SET length = ?1 WHERE id = ?2",
        params![length, event_id],
    )?;
    Ok(())
}

pub fn delete_event(conn: &Connection, event_id: i64) -> Result<()> {
    conn.execute("DELETE FROM events WHERE id = ?1", [event_id])?;
    Ok(())
}

/// Close in-progress events whose media row has since been finalized
/// (worker wrote the end timestamp but died before committing the event).
/// Returns the number of events resolved.
pub fn resolve_completed_events(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE events SET length = (
             SELECT media.end - media.start FROM media WHERE media.id = events.media_id
         )
         WHERE length = -1
           AND media_id IS NOT NULL
           AND (SELECT media.end FROM media WHERE media.id = events.media_id) > 0",
        [],
    )?;
    Ok(rows)
}
