// Storage location table and eviction manager
//
// An ordered list of capacity-bounded volumes shared between the
// orchestrator (refresh + eviction) and every worker (location picking).
// All threshold math is percentage-of-capacity from filesystem block
// statistics, not byte-exact accounting; the disk alarm semantics are
// calibrated to percentages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use sysinfo::Disks;

use crate::constants::{
    DEFAULT_STORAGE_MAX_THRESH, DEFAULT_STORAGE_MIN_THRESH, DEFAULT_STORAGE_PATH,
    MAX_STORAGE_LOCATIONS,
};
use crate::db::schema::{self, StorageRow};
use crate::error::{Result, WardenError};
use crate::events::{self, EventLevel, SystemEvent};

/// One capacity-bounded volume. Priority is positional: lower index in the
/// table is preferred.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageLocation {
    pub path: PathBuf,
    pub min_thresh: f32,
    pub max_thresh: f32,
}

impl StorageLocation {
    pub fn new(path: impl Into<PathBuf>, min_thresh: f32, max_thresh: f32) -> Result<Self> {
        if !(0.0 < min_thresh && min_thresh <= max_thresh && max_thresh <= 100.0) {
            return Err(WardenError::InvalidStorage(format!(
                "thresholds must satisfy 0 < min ({}) <= max ({}) <= 100",
                min_thresh, max_thresh
            )));
        }
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(WardenError::InvalidStorage("empty path".into()));
        }
        Ok(Self {
            path,
            min_thresh,
            max_thresh,
        })
    }

    fn default_location() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
            min_thresh: DEFAULT_STORAGE_MIN_THRESH,
            max_thresh: DEFAULT_STORAGE_MAX_THRESH,
        }
    }
}

/// Filesystem usage measurement seam. Production reads block statistics via
/// sysinfo; tests inject scripted values.
pub trait DiskUsage {
    /// Percent of the volume holding `path` that is in use, or None when
    /// the measurement fails (device removed, filesystem error).
    fn used_percent(&self, path: &Path) -> Option<f32>;
}

/// Block-statistics usage: 100 - (available / total * 100) for the deepest
/// mount point containing the path.
pub struct SysDiskUsage;

impl DiskUsage for SysDiskUsage {
    fn used_percent(&self, path: &Path) -> Option<f32> {
        let disks = Disks::new_with_refreshed_list();

        let disk = disks
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())?;

        let total = disk.total_space();
        if total == 0 {
            return None;
        }
        let available = disk.available_space();
        Some(100.0 - (available as f32 / total as f32) * 100.0)
    }
}

// Per-thread token for re-entry detection on the table lock. Tokens start
// at 1 so 0 can mean "unowned".
static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// The shared, lock-guarded table of storage locations.
pub struct StorageTable {
    locations: Mutex<Vec<StorageLocation>>,
    lock_owner: AtomicU64,
}

struct TableGuard<'a> {
    guard: MutexGuard<'a, Vec<StorageLocation>>,
    owner: &'a AtomicU64,
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        self.owner.store(0, Ordering::Release);
    }
}

impl Default for StorageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageTable {
    pub fn new() -> Self {
        Self {
            locations: Mutex::new(Vec::new()),
            lock_owner: AtomicU64::new(0),
        }
    }

    /// Acquire the table lock. A thread that already holds it gets None and
    /// an error log instead of a silent hang; a poisoned lock is recovered
    /// since the table contents are always internally consistent.
    fn lock(&self, site: &str) -> Option<TableGuard<'_>> {
        let token = current_thread_token();
        if self.lock_owner.load(Ordering::Acquire) == token {
            log::error!("Deadlock detected in storage table lock on {}!", site);
            return None;
        }

        let guard = self
            .locations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.lock_owner.store(token, Ordering::Release);
        Some(TableGuard {
            guard,
            owner: &self.lock_owner,
        })
    }

    /// Rebuild the table wholesale from configuration rows. Invalid rows
    /// are dropped; if nothing valid survives, the hard-coded default
    /// location is substituted. Location directories are created
    /// best-effort.
    pub fn refresh(&self, rows: &[StorageRow]) {
        let mut fresh = Vec::new();
        for row in rows.iter().take(MAX_STORAGE_LOCATIONS) {
            match StorageLocation::new(&row.path, row.min_thresh, row.max_thresh) {
                Ok(loc) => fresh.push(loc),
                Err(e) => log::warn!("Skipping storage row '{}': {}", row.path, e),
            }
        }

        if fresh.is_empty() {
            fresh.push(StorageLocation::default_location());
        }

        for loc in &fresh {
            if let Err(e) = std::fs::create_dir_all(&loc.path) {
                log::warn!("Could not create storage dir {}: {}", loc.path.display(), e);
            }
        }

        let Some(mut table) = self.lock("refresh") else {
            return;
        };
        *table.guard = fresh;
    }

    /// Reload the table from the configuration store.
    pub fn refresh_from_db(&self, conn: &Connection) -> Result<()> {
        let rows = schema::list_storage(conn)?;
        self.refresh(&rows);
        Ok(())
    }

    /// Storage volume assignment for a new recording: the first location in
    /// priority order with usage under its max threshold. When everything
    /// is full, the first location is returned anyway; callers must
    /// tolerate write failures from a full disk.
    pub fn pick_location(&self, usage: &dyn DiskUsage) -> Option<PathBuf> {
        let table = self.lock("pick_location")?;

        for loc in table.guard.iter() {
            match usage.used_percent(&loc.path) {
                Some(used) if used >= loc.max_thresh => continue,
                _ => return Some(loc.path.clone()),
            }
        }

        table.guard.first().map(|loc| loc.path.clone())
    }

    /// Background maintenance: bring every over-threshold location back
    /// under its min threshold by deleting the oldest eligible recordings.
    pub fn maintain(&self, conn: &Connection, usage: &dyn DiskUsage) {
        let locations = {
            let Some(table) = self.lock("maintain") else {
                return;
            };
            table.guard.clone()
        };

        for loc in &locations {
            evict_location(conn, usage, loc);
        }
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<StorageLocation> {
        self.lock("snapshot").map(|t| t.guard.clone()).unwrap_or_default()
    }
}

/// Evict oldest eligible media from one location until usage drops below
/// min_thresh. Archived rows and still-open recordings are never touched.
/// A failed usage measurement aborts the scan without an alarm (transient);
/// running out of candidates while still over min_thresh raises the disk
/// alarm.
fn evict_location(conn: &Connection, usage: &dyn DiskUsage, loc: &StorageLocation) {
    let mut used = match usage.used_percent(&loc.path) {
        Some(u) => u,
        None => return,
    };

    if used < loc.max_thresh {
        return;
    }

    log::info!(
        "Filesystem for {} is {:.2}% full, starting cleanup",
        loc.path.display(),
        used
    );

    let prefix = loc.path.to_string_lossy();
    let candidates = match schema::eviction_candidates(conn, &prefix) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Eviction candidate query failed for {}: {}", prefix, e);
            events::raise_system_event(conn, EventLevel::Alarm, SystemEvent::DiskSpace);
            return;
        }
    };

    if candidates.is_empty() {
        log::warn!("Filesystem {} has no available media to delete!", prefix);
        events::raise_system_event(conn, EventLevel::Alarm, SystemEvent::DiskSpace);
        return;
    }

    for media in &candidates {
        if used < loc.min_thresh {
            break;
        }

        if let Err(e) = std::fs::remove_file(&media.filepath) {
            // The row is cleared regardless; a vanished file frees nothing
            // but should not wedge the scan.
            log::warn!("Could not unlink {}: {}", media.filepath, e);
        }
        if let Err(e) = schema::clear_media_file(conn, media.id) {
            log::error!("Could not clear media row {}: {}", media.id, e);
        }

        log::warn!(
            "Removed media id {}, file '{}', to make space",
            media.id,
            media.filepath
        );

        used = match usage.used_percent(&loc.path) {
            Some(u) => u,
            // Measurement failure mid-scan is treated as transient
            None => return,
        };
    }

    if used >= loc.min_thresh {
        log::warn!(
            "Filesystem is {:.2}% full, but cannot delete any more old media!",
            used
        );
        events::raise_system_event(conn, EventLevel::Alarm, SystemEvent::DiskSpace);
    }
}
