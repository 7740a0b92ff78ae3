// Camwarden Constants
// Tuning values for the orchestrator loop, storage eviction and motion
// detection. Threshold semantics are percentage-of-capacity; the disk alarm
// handling in storage is calibrated to these.

// Orchestrator tick periods (in 1-second ticks)
pub const TICK_SECONDS: u64 = 1;
pub const RECONCILE_PERIOD_TICKS: u64 = 10;
pub const DISCOVERY_PERIOD_TICKS: u64 = 120;

// Database startup
pub const DB_OPEN_RETRY_WINDOW_SECS: u64 = 300;
pub const DB_OPEN_LOG_INTERVAL_SECS: u64 = 30;

// Storage
pub const MAX_STORAGE_LOCATIONS: usize = 10;
pub const DEFAULT_STORAGE_PATH: &str = "/var/lib/camwarden/recordings";
pub const DEFAULT_STORAGE_MIN_THRESH: f32 = 90.0;
pub const DEFAULT_STORAGE_MAX_THRESH: f32 = 95.0;

// Schedule: one character per hour, 7 days
pub const SCHEDULE_LEN: usize = 7 * 24;
pub const SCHEDULE_CONTINUOUS: char = 'C';
pub const SCHEDULE_PARAM: &str = "G_DEV_SCED";

// Software motion detection
// A pixel counts as changed when the gray delta exceeds the sensitivity;
// a frame counts as motion when at least 1/6 of its pixels changed.
pub const MOTION_PIXEL_SENSITIVITY: u8 = 20;
pub const MOTION_AREA_DIVISOR: usize = 6;

// Worker threads
pub const WORKER_THREAD_PREFIX: &str = "camera-";
