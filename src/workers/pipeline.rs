// Per-device recording pipeline
//
// Encoding and muxing live behind the FrameSource seam; this loop owns the
// orchestration side of a worker: storage location assignment at start,
// schedule handling, motion detection and cooperative stop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use super::{DeviceDescriptor, Recorder, RecorderFactory, WorkerControl};
use crate::error::Result;
use crate::motion::{FrameSource, MotionDetector, RawFrame};
use crate::schedule::{Schedule, ScheduleMode};
use crate::storage::{DiskUsage, StorageTable};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Opens the capture/decode side of a device.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn FrameSource + Send>>;
}

/// A frame source for devices with no linked protocol driver: never
/// delivers a picture and has no hardware motion support.
pub struct NullFrameSource;

impl FrameSource for NullFrameSource {
    fn has_hardware_motion(&self) -> bool {
        false
    }

    fn set_hardware_motion(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn hardware_motion_armed(&mut self) -> bool {
        false
    }

    fn hardware_motion_detected(&mut self) -> bool {
        false
    }

    fn set_hardware_motion_threshold(&mut self, _value: u16, _block: Option<u16>) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        Ok(None)
    }
}

/// Opener used when the daemon is built without protocol drivers.
pub struct NullOpener;

impl DeviceOpener for NullOpener {
    fn open(&self, _descriptor: &DeviceDescriptor) -> Result<Box<dyn FrameSource + Send>> {
        Ok(Box::new(NullFrameSource))
    }
}

pub struct RecordingPipeline {
    source: Box<dyn FrameSource + Send>,
    storage: Arc<StorageTable>,
    usage: Arc<dyn DiskUsage + Send + Sync>,
    schedule: Arc<Mutex<Schedule>>,
}

impl RecordingPipeline {
    fn global_mode(&self) -> ScheduleMode {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .mode_at(Utc::now())
    }
}

impl Recorder for RecordingPipeline {
    fn run(&mut self, ctl: &WorkerControl) -> String {
        let mut current = ctl.descriptor();

        let location = match self.storage.pick_location(self.usage.as_ref()) {
            Some(path) => path,
            None => return "no storage location available".to_string(),
        };
        log::info!(
            "Camera {} ({}) recording into {}",
            current.id,
            current.name,
            location.display()
        );

        let mut detector = MotionDetector::new();

        loop {
            if let Some(reason) = ctl.stop_reason() {
                let _ = detector.set_enabled(self.source.as_mut(), false);
                return reason.to_string();
            }

            let desc = ctl.descriptor();
            if desc != current {
                log::info!("Camera {} configuration updated ({})", desc.id, desc.name);
                current = desc;
            }

            let mode = match &current.schedule_override {
                Some(s) => Schedule::parse(s).mode_at(Utc::now()),
                None => self.global_mode(),
            };

            match mode {
                ScheduleMode::Off => {
                    if detector.enabled() {
                        let _ = detector.set_enabled(self.source.as_mut(), false);
                    }
                }
                ScheduleMode::Continuous => {
                    if detector.enabled() {
                        let _ = detector.set_enabled(self.source.as_mut(), false);
                    }
                    // Frames flow straight through to the muxer behind the
                    // source; keep the decode side drained.
                    let _ = self.source.next_frame();
                }
                ScheduleMode::Motion => {
                    if !detector.enabled() {
                        let _ = detector.set_enabled(self.source.as_mut(), true);
                        if let Some(threshold) = current.extra.motion_threshold {
                            let _ = detector.set_threshold_global(self.source.as_mut(), threshold);
                        }
                    }
                    if detector.detect(self.source.as_mut()) && current.debug_level > 0 {
                        log::debug!("Camera {} motion detected", current.id);
                    }
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Production recorder factory: opens the device and wires it to the shared
/// storage table and global schedule.
pub struct PipelineFactory {
    storage: Arc<StorageTable>,
    usage: Arc<dyn DiskUsage + Send + Sync>,
    schedule: Arc<Mutex<Schedule>>,
    opener: Arc<dyn DeviceOpener>,
}

impl PipelineFactory {
    pub fn new(
        storage: Arc<StorageTable>,
        usage: Arc<dyn DiskUsage + Send + Sync>,
        schedule: Arc<Mutex<Schedule>>,
        opener: Arc<dyn DeviceOpener>,
    ) -> Self {
        Self {
            storage,
            usage,
            schedule,
            opener,
        }
    }
}

impl RecorderFactory for PipelineFactory {
    fn build(&self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Recorder>> {
        let source = self.opener.open(descriptor)?;
        Ok(Box::new(RecordingPipeline {
            source,
            storage: Arc::clone(&self.storage),
            usage: Arc::clone(&self.usage),
            schedule: Arc::clone(&self.schedule),
        }))
    }
}
