// Worker lifecycle management
//
// One worker thread per active recording device. The orchestrator owns the
// WorkerSet and is the only thread that mutates it, so the active counter
// and the live map stay trivially in sync. Workers communicate back only
// through their done flag and exit message; stopping is cooperative via a
// write-once reason.

pub mod pipeline;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::constants::WORKER_THREAD_PREFIX;
use crate::db::schema::{DeviceExtra, DeviceRow};
use crate::error::{Result, WardenError};

/// Connection protocol of a recording device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    V4l2,
    Rtp,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("V4L2") {
            Some(Protocol::V4l2)
        } else if s.eq_ignore_ascii_case("RTP") {
            Some(Protocol::Rtp)
        } else {
            None
        }
    }
}

/// Everything a worker needs to know about its device. Rebuilt from the
/// configuration store each reconciliation tick and pushed into the running
/// worker (hot reload; the thread is never restarted for a config change).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub id: i64,
    pub protocol: Protocol,
    pub name: String,
    pub debug_level: i32,
    pub schedule_override: Option<String>,
    pub hardware_motion: bool,
    pub extra: DeviceExtra,
}

impl DeviceDescriptor {
    /// Build from a configuration row. None for rows the daemon cannot
    /// drive (unknown protocol, negative id).
    pub fn from_row(row: &DeviceRow) -> Option<Self> {
        if row.id < 0 {
            return None;
        }
        Some(Self {
            id: row.id,
            protocol: Protocol::parse(&row.protocol)?,
            name: row.name.clone(),
            debug_level: row.debug_level,
            schedule_override: row.schedule.clone(),
            hardware_motion: row.hardware_motion,
            extra: row.parse_extra(),
        })
    }
}

/// Shared control block between the orchestrator and one worker thread.
pub struct WorkerControl {
    /// Write-once stop reason; a worker observing Some exits promptly.
    stop_reason: OnceLock<String>,
    /// Latest descriptor for config hot-reload.
    descriptor: Mutex<DeviceDescriptor>,
    /// Set by the worker wrapper at exit; the reaper polls this instead of
    /// doing non-portable try-joins.
    done: AtomicBool,
}

impl WorkerControl {
    fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            stop_reason: OnceLock::new(),
            descriptor: Mutex::new(descriptor),
            done: AtomicBool::new(false),
        }
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.get().map(String::as_str)
    }

    pub fn should_stop(&self) -> bool {
        self.stop_reason.get().is_some()
    }

    /// Current descriptor (clone; the slot may be rewritten concurrently).
    pub fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_descriptor(&self, descriptor: DeviceDescriptor) {
        let mut slot = self
            .descriptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = descriptor;
    }

    fn request_stop(&self, reason: &str) {
        // First writer wins; later stop requests keep the original reason
        let _ = self.stop_reason.set(reason.to_string());
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// The capture pipeline seam. Implementations own the device I/O loop and
/// return their exit message; they are expected to poll the control block's
/// stop reason at fine granularity.
pub trait Recorder: Send {
    fn run(&mut self, ctl: &WorkerControl) -> String;
}

/// Builds a recorder for a device at worker start.
pub trait RecorderFactory {
    fn build(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Recorder>>;
}

struct Worker {
    control: Arc<WorkerControl>,
    handle: JoinHandle<String>,
}

impl Worker {
    fn join_message(self) -> String {
        match self.handle.join() {
            Ok(msg) => msg,
            Err(_) => "worker thread panicked".to_string(),
        }
    }
}

/// The live set of per-device workers, keyed by device id.
#[derive(Default)]
pub struct WorkerSet {
    workers: HashMap<i64, Worker>,
    active: usize,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Active-worker counter read by the reconciler's admission check.
    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn contains(&self, id: i64) -> bool {
        self.workers.contains_key(&id)
    }

    /// Descriptor currently held by a live worker.
    pub fn descriptor_of(&self, id: i64) -> Option<DeviceDescriptor> {
        self.workers.get(&id).map(|w| w.control.descriptor())
    }

    /// Spawn a worker thread for the descriptor. At most one worker may
    /// exist per device id; a spawn failure is a resource error and leaves
    /// the live set unchanged.
    pub fn start(&mut self, descriptor: DeviceDescriptor, mut recorder: Box<dyn Recorder>) -> Result<()> {
        let id = descriptor.id;
        if self.workers.contains_key(&id) {
            return Err(WardenError::WorkerExists(id));
        }

        let control = Arc::new(WorkerControl::new(descriptor));
        let thread_control = Arc::clone(&control);

        let handle = std::thread::Builder::new()
            .name(format!("{}{}", WORKER_THREAD_PREFIX, id))
            .spawn(move || {
                // Panics terminate only this worker; the message is carried
                // out through the normal reap path.
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    recorder.run(&thread_control)
                }));
                thread_control.done.store(true, Ordering::Release);
                result.unwrap_or_else(|_| "worker thread panicked".to_string())
            })
            .map_err(|e| WardenError::ThreadSpawn(e.to_string()))?;

        self.workers.insert(id, Worker { control, handle });
        self.active += 1;
        Ok(())
    }

    /// Push an updated descriptor into a running worker. Returns false when
    /// no worker exists for the id.
    pub fn update_descriptor(&self, id: i64, descriptor: DeviceDescriptor) -> bool {
        match self.workers.get(&id) {
            Some(worker) => {
                worker.control.update_descriptor(descriptor);
                true
            }
            None => false,
        }
    }

    /// Ask a worker to stop. Non-blocking; the worker observes the reason
    /// cooperatively and exits on its own time.
    pub fn request_stop(&self, id: i64, reason: &str) -> bool {
        match self.workers.get(&id) {
            Some(worker) => {
                worker.control.request_stop(reason);
                true
            }
            None => false,
        }
    }

    /// Non-blocking scan removing workers whose thread has exited. Safe to
    /// call every tick; still-running workers are untouched. Returns the
    /// reaped (id, exit message) pairs.
    pub fn reap_dead(&mut self) -> Vec<(i64, String)> {
        let dead: Vec<i64> = self
            .workers
            .iter()
            .filter(|(_, w)| w.control.is_done())
            .map(|(id, _)| *id)
            .collect();

        let mut reaped = Vec::with_capacity(dead.len());
        for id in dead {
            if let Some(worker) = self.workers.remove(&id) {
                let msg = worker.join_message();
                log::info!("Camera {} thread stopped: {}", id, msg);
                self.active -= 1;
                reaped.push((id, msg));
            }
        }
        reaped
    }

    /// Shutdown path: signal every worker, then join each in sequence.
    /// This is the only blocking operation in the manager.
    pub fn stop_all_and_join(&mut self, reason: &str) {
        for worker in self.workers.values() {
            worker.control.request_stop(reason);
        }

        for (id, worker) in self.workers.drain() {
            let msg = worker.join_message();
            log::info!("Camera {} thread stopped: {}", id, msg);
            self.active -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor(id: i64) -> DeviceDescriptor {
        DeviceDescriptor {
            id,
            protocol: Protocol::Rtp,
            name: format!("cam-{}", id),
            debug_level: 0,
            schedule_override: None,
            hardware_motion: false,
            extra: DeviceExtra::default(),
        }
    }

    /// Runs until stopped, then exits with the reason.
    struct ObedientRecorder;

    impl Recorder for ObedientRecorder {
        fn run(&mut self, ctl: &WorkerControl) -> String {
            loop {
                if let Some(reason) = ctl.stop_reason() {
                    return reason.to_string();
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    /// Exits immediately with a fixed message.
    struct QuickRecorder(&'static str);

    impl Recorder for QuickRecorder {
        fn run(&mut self, _ctl: &WorkerControl) -> String {
            self.0.to_string()
        }
    }

    struct PanickingRecorder;

    impl Recorder for PanickingRecorder {
        fn run(&mut self, _ctl: &WorkerControl) -> String {
            panic!("device fell over");
        }
    }

    fn wait_for_done(set: &WorkerSet, id: i64) {
        for _ in 0..200 {
            if set.workers.get(&id).map(|w| w.control.is_done()).unwrap_or(true) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("worker {} did not finish", id);
    }

    #[test]
    fn test_start_rejects_duplicate_device_id() {
        let mut set = WorkerSet::new();
        set.start(descriptor(7), Box::new(ObedientRecorder)).unwrap();

        let err = set.start(descriptor(7), Box::new(ObedientRecorder));
        assert!(matches!(err, Err(WardenError::WorkerExists(7))));
        assert_eq!(set.active_count(), 1);

        set.stop_all_and_join("test over");
    }

    #[test]
    fn test_counter_tracks_live_set() {
        let mut set = WorkerSet::new();
        set.start(descriptor(1), Box::new(QuickRecorder("done"))).unwrap();
        set.start(descriptor(2), Box::new(ObedientRecorder)).unwrap();
        assert_eq!(set.active_count(), set.len());

        wait_for_done(&set, 1);
        let reaped = set.reap_dead();
        assert_eq!(reaped, vec![(1, "done".to_string())]);
        assert_eq!(set.active_count(), 1);
        assert_eq!(set.active_count(), set.len());

        set.stop_all_and_join("test over");
        assert_eq!(set.active_count(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_reap_dead_is_idempotent_and_nonblocking() {
        let mut set = WorkerSet::new();
        set.start(descriptor(3), Box::new(ObedientRecorder)).unwrap();

        // Live worker: nothing to reap, repeatedly
        assert!(set.reap_dead().is_empty());
        assert!(set.reap_dead().is_empty());
        assert_eq!(set.active_count(), 1);

        set.stop_all_and_join("test over");
    }

    #[test]
    fn test_stop_reason_reaches_worker_exit_message() {
        let mut set = WorkerSet::new();
        set.start(descriptor(4), Box::new(ObedientRecorder)).unwrap();

        assert!(set.request_stop(4, "Shutting down"));
        wait_for_done(&set, 4);

        let reaped = set.reap_dead();
        assert_eq!(reaped, vec![(4, "Shutting down".to_string())]);
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let mut set = WorkerSet::new();
        set.start(descriptor(5), Box::new(ObedientRecorder)).unwrap();

        set.request_stop(5, "first");
        set.request_stop(5, "second");
        wait_for_done(&set, 5);

        assert_eq!(set.reap_dead(), vec![(5, "first".to_string())]);
    }

    #[test]
    fn test_panicked_worker_is_reaped_normally() {
        let mut set = WorkerSet::new();
        set.start(descriptor(6), Box::new(PanickingRecorder)).unwrap();

        wait_for_done(&set, 6);
        let reaped = set.reap_dead();
        assert_eq!(reaped.len(), 1);
        assert!(reaped[0].1.contains("panicked"));
        assert_eq!(set.active_count(), 0);
    }

    #[test]
    fn test_descriptor_hot_reload() {
        let mut set = WorkerSet::new();
        set.start(descriptor(7), Box::new(ObedientRecorder)).unwrap();

        let mut updated = descriptor(7);
        updated.name = "renamed".into();
        assert!(set.update_descriptor(7, updated.clone()));

        let seen = set.workers.get(&7).unwrap().control.descriptor();
        assert_eq!(seen, updated);
        assert_eq!(set.len(), 1, "hot reload never restarts the thread");

        set.stop_all_and_join("test over");
    }

    #[test]
    fn test_stop_unknown_worker_is_noop() {
        let set = WorkerSet::new();
        assert!(!set.request_stop(99, "nobody home"));
        assert!(!set.update_descriptor(99, descriptor(99)));
    }
}
