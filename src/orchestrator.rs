// Top-level orchestrator loop
//
// A single cooperative thread ticking at 1-second granularity. Coarser
// actions run on modular schedules: device discovery and storage
// maintenance every 120 ticks, config refresh and reconciliation every 10,
// dead-worker reaping and pending-event resolution every tick. Every
// action is fault-isolated: one failed tick action is logged and the loop
// carries on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::constants::{DISCOVERY_PERIOD_TICKS, RECONCILE_PERIOD_TICKS, TICK_SECONDS};
use crate::events;
use crate::reconcile::{self, AdmissionPolicy};
use crate::schedule::Schedule;
use crate::storage::{DiskUsage, StorageTable};
use crate::workers::{RecorderFactory, WorkerSet};

pub struct Orchestrator {
    conn: Connection,
    workers: WorkerSet,
    storage: Arc<StorageTable>,
    schedule: Arc<Mutex<Schedule>>,
    usage: Arc<dyn DiskUsage + Send + Sync>,
    factory: Box<dyn RecorderFactory>,
    policy: AdmissionPolicy,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        conn: Connection,
        storage: Arc<StorageTable>,
        schedule: Arc<Mutex<Schedule>>,
        usage: Arc<dyn DiskUsage + Send + Sync>,
        factory: Box<dyn RecorderFactory>,
        policy: AdmissionPolicy,
    ) -> Self {
        Self {
            conn,
            workers: WorkerSet::new(),
            storage,
            schedule,
            usage,
            factory,
            policy,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed once per tick; setting it ends the run loop.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Refresh schedule and storage locations from the configuration store.
    pub fn refresh_globals(&self) {
        match Schedule::load(&self.conn) {
            Ok(fresh) => {
                let mut sched = self
                    .schedule
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                *sched = fresh;
            }
            Err(e) => log::warn!("Schedule refresh failed: {}", e),
        }

        if let Err(e) = self.storage.refresh_from_db(&self.conn) {
            log::warn!("Storage table refresh failed: {}", e);
        }
    }

    /// One tick of the loop. Public so tests can drive the schedule
    /// without real sleeps.
    pub fn tick(&mut self, loops: u64) {
        if loops % DISCOVERY_PERIOD_TICKS == 0 {
            // Hardware discovery (hotplugged capture cards) happens in the
            // protocol drivers; completion shows up as card_id on the
            // device rows read below.
            self.storage.maintain(&self.conn, self.usage.as_ref());
        }

        if loops % RECONCILE_PERIOD_TICKS == 0 {
            self.refresh_globals();
            if let Err(e) = reconcile::reconcile(
                &self.conn,
                &mut self.workers,
                self.factory.as_ref(),
                &self.policy,
            ) {
                log::warn!("Reconciliation pass failed: {}", e);
            }
        }

        self.workers.reap_dead();
        events::resolve_pending(&self.conn);
    }

    /// Run until the shutdown flag is set, then stop every worker and
    /// block joining them.
    pub fn run(&mut self) {
        let mut loops: u64 = 0;
        while !self.shutdown.load(Ordering::Acquire) {
            self.tick(loops);
            loops = loops.wrapping_add(1);
            std::thread::sleep(Duration::from_secs(TICK_SECONDS));
        }

        log::info!("Shutdown requested, stopping {} workers", self.workers.len());
        self.workers.stop_all_and_join("Shutting down");
    }

    pub fn active_workers(&self) -> usize {
        self.workers.active_count()
    }

    #[cfg(test)]
    pub fn workers_mut(&mut self) -> &mut WorkerSet {
        &mut self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db;
    use crate::error::Result;
    use crate::workers::{DeviceDescriptor, Recorder, WorkerControl};
    use rusqlite::params;
    use std::path::Path;

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

    struct TestFactory;

    impl RecorderFactory for TestFactory {
        fn build(&self, _descriptor: &DeviceDescriptor) -> Result<Box<dyn Recorder>> {
            Ok(Box::new(ObedientRecorder))
        }
    }

    struct IdleUsage;

    impl DiskUsage for IdleUsage {
        fn used_percent(&self, _path: &Path) -> Option<f32> {
            Some(10.0)
        }
    }

    fn orchestrator_with_db() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("warden.db")).unwrap();

        conn.execute(
            "INSERT INTO storage (path, min_thresh, max_thresh, priority)
             VALUES (?1, 80.0, 90.0, 0)",
            [dir.path().join("rec").to_string_lossy()],
        )
        .unwrap();

        let orch = Orchestrator::new(
            conn,
            Arc::new(StorageTable::new()),
            Arc::new(Mutex::new(Schedule::default())),
            Arc::new(IdleUsage),
            Box::new(TestFactory),
            AdmissionPolicy::default(),
        );
        (dir, orch)
    }

    #[test]
    fn test_first_tick_starts_configured_devices() {
        let (_dir, mut orch) = orchestrator_with_db();
        orch.conn
            .execute(
                "INSERT INTO devices (protocol, name) VALUES ('RTP', 'front')",
                [],
            )
            .unwrap();

        orch.tick(0);
        assert_eq!(orch.active_workers(), 1);
        orch.workers_mut().stop_all_and_join("test over");
    }

    #[test]
    fn test_reconcile_waits_for_its_period() {
        let (_dir, mut orch) = orchestrator_with_db();
        orch.tick(0);

        orch.conn
            .execute(
                "INSERT INTO devices (protocol, name) VALUES ('RTP', 'late')",
                [],
            )
            .unwrap();

        // Ticks 1..=9 only reap and resolve; the new device waits
        for loops in 1..10 {
            orch.tick(loops);
            assert_eq!(orch.active_workers(), 0);
        }

        orch.tick(10);
        assert_eq!(orch.active_workers(), 1);
        orch.workers_mut().stop_all_and_join("test over");
    }

    #[test]
    fn test_globals_refresh_picks_up_schedule_change() {
        let (_dir, mut orch) = orchestrator_with_db();
        let motion_sched = "M".repeat(crate::constants::SCHEDULE_LEN);
        crate::db::schema::set_global(&orch.conn, crate::constants::SCHEDULE_PARAM, &motion_sched)
            .unwrap();

        orch.tick(0);

        let sched = orch.schedule.lock().unwrap().clone();
        assert_eq!(sched, Schedule::parse(&motion_sched));
    }

    #[test]
    fn test_tick_survives_device_row_garbage() {
        let (_dir, mut orch) = orchestrator_with_db();
        // Unknown protocols are skipped without failing the pass
        orch.conn
            .execute(
                "INSERT INTO devices (protocol, name) VALUES ('RTP', 'good')",
                [],
            )
            .unwrap();
        orch.conn
            .execute_batch("PRAGMA ignore_check_constraints = ON")
            .unwrap();
        orch.conn
            .execute(
                "INSERT INTO devices (protocol, name) VALUES ('MJPEG', 'exotic')",
                params![],
            )
            .unwrap();

        orch.tick(0);
        assert_eq!(orch.active_workers(), 1);
        orch.workers_mut().stop_all_and_join("test over");
    }
}
