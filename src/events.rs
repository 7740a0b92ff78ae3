// System event sink
//
// Events are both logged and persisted so the UI can surface them. Raising
// an event must never fail the caller's operation; persistence errors are
// logged and swallowed.

use chrono::Utc;
use rusqlite::Connection;

use crate::db::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Alarm,
}

impl EventLevel {
    fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warning => "warning",
            EventLevel::Alarm => "alarm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// A storage location could not be brought back under its threshold.
    DiskSpace,
}

impl SystemEvent {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEvent::DiskSpace => "disk-space",
        }
    }
}

/// Raise a system-wide event. Best-effort: a failed insert is logged, not
/// propagated.
pub fn raise_system_event(conn: &Connection, level: EventLevel, event: SystemEvent) {
    log::warn!("System event ({:?}): {}", level, event.as_str());

    let now = Utc::now().timestamp();
    if let Err(e) = schema::insert_event(conn, None, level.as_str(), event.as_str(), now, 0, None)
    {
        log::error!("Failed to persist system event {}: {}", event.as_str(), e);
    }
}

/// Per-tick resolution of events left in-progress by workers that finished
/// their media but died before committing the event length.
pub fn resolve_pending(conn: &Connection) {
    match schema::resolve_completed_events(conn) {
        Ok(0) => {}
        Ok(n) => log::info!("Resolved {} completed recording events", n),
        Err(e) => log::warn!("Pending event resolution failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;

    #[test]
    fn test_raise_system_event_persists_row() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("warden.db")).unwrap();

        raise_system_event(&conn, EventLevel::Alarm, SystemEvent::DiskSpace);

        let (level, event_type): (String, String) = conn
            .query_row("SELECT level, type FROM events", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(level, "alarm");
        assert_eq!(event_type, "disk-space");
    }
}
