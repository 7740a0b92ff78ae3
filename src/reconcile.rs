// Device reconciliation
//
// Converges the live worker set toward the configured device list. The
// loop is additive: devices that vanish from configuration are not
// stopped here; a worker only leaves the live set when its own thread
// exits and the reaper collects it.

use rusqlite::Connection;

use crate::db::schema;
use crate::error::Result;
use crate::workers::{DeviceDescriptor, Protocol, RecorderFactory, WorkerSet};

/// Admission limits applied when starting new workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionPolicy {
    /// Only drive this device id (single-camera debugging).
    pub record_id: Option<i64>,
    /// Global cap on concurrently running workers.
    pub max_workers: Option<usize>,
}

/// One reconciliation pass. Running workers get their descriptor hot-
/// reloaded; missing devices are started subject to admission policy.
/// Failures on one device never affect the rest; a skipped device is
/// naturally retried on the next pass since it stays absent from the
/// live set.
pub fn reconcile(
    conn: &Connection,
    workers: &mut WorkerSet,
    factory: &dyn RecorderFactory,
    policy: &AdmissionPolicy,
) -> Result<()> {
    let rows = schema::list_devices(conn)?;

    for row in rows {
        let descriptor = match DeviceDescriptor::from_row(&row) {
            Some(d) => d,
            None => continue,
        };

        if workers.contains(descriptor.id) {
            workers.update_descriptor(descriptor.id, descriptor);
            continue;
        }

        if let Some(only) = policy.record_id {
            if descriptor.id != only {
                continue;
            }
        }

        if let Some(max) = policy.max_workers {
            if workers.active_count() >= max {
                continue;
            }
        }

        // V4L2 devices must finish card detection before they can start
        if descriptor.protocol == Protocol::V4l2 && row.card_id.is_none() {
            continue;
        }

        let recorder = match factory.build(&descriptor) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Could not build recorder for camera {}: {}", descriptor.id, e);
                continue;
            }
        };

        let id = descriptor.id;
        if let Err(e) = workers.start(descriptor, recorder) {
            log::warn!("Could not start worker for camera {}: {}", id, e);
        }
    }

    Ok(())
}
