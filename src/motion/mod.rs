// Motion detection state machine
//
// Two modes per device. Hardware-capable sources (compression cards with
// on-board motion sensing) get the enable control and status flags
// forwarded verbatim and no local state is kept. Everything else falls
// back to software frame differencing against a single sliding reference
// frame at the source's native resolution.

mod convert;

pub use convert::{GrayConverter, GrayFrame, PixelFormat, RawFrame};

use crate::constants::{MOTION_AREA_DIVISOR, MOTION_PIXEL_SENSITIVITY};
use crate::error::Result;

/// The decoded-frame seam to the capture/decode pipeline. Implementations
/// wrap a live device; tests feed canned frames.
pub trait FrameSource {
    /// Whether the device can do motion sensing in hardware.
    fn has_hardware_motion(&self) -> bool;

    /// Forward the motion enable/disable control to the device.
    fn set_hardware_motion(&mut self, on: bool) -> Result<()>;

    /// Hardware mode: whether motion sensing is currently armed.
    fn hardware_motion_armed(&mut self) -> bool;

    /// Hardware mode: whether the device flagged motion on the last buffer.
    fn hardware_motion_detected(&mut self) -> bool;

    /// Forward a motion sensitivity threshold to the device. None applies
    /// the value globally, Some(block) targets one detection block.
    fn set_hardware_motion_threshold(&mut self, value: u16, block: Option<u16>) -> Result<()>;

    /// Decode the next frame. Ok(None) means the source declined to
    /// deliver a picture this cycle (not an error).
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// Per-device motion state: the enabled flag, a cached grayscale
/// conversion context and at most one reference frame.
#[derive(Default)]
pub struct MotionDetector {
    enabled: bool,
    converter: Option<GrayConverter>,
    reference: Option<GrayFrame>,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable motion detection. Idempotent. Disabling in
    /// software mode releases the conversion context and reference frame
    /// immediately; enabling re-acquires them lazily on the first detect.
    pub fn set_enabled(&mut self, source: &mut dyn FrameSource, on: bool) -> Result<()> {
        if source.has_hardware_motion() {
            source.set_hardware_motion(on)?;
        } else if !on {
            self.converter = None;
            self.reference = None;
        }

        self.enabled = on;
        Ok(())
    }

    /// Whether detection is currently active. Hardware mode defers to the
    /// device's armed flag; software mode is on whenever enabled.
    pub fn is_on(&mut self, source: &mut dyn FrameSource) -> bool {
        if !self.enabled {
            return false;
        }
        if source.has_hardware_motion() {
            return source.hardware_motion_armed();
        }
        true
    }

    /// Run one detection cycle. A failed decode or a cycle with no picture
    /// reports no motion and leaves the reference frame untouched.
    pub fn detect(&mut self, source: &mut dyn FrameSource) -> bool {
        if !self.is_on(source) {
            return false;
        }

        if source.has_hardware_motion() {
            return source.hardware_motion_detected();
        }

        let raw = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(e) => {
                log::debug!("Motion frame decode failed: {}", e);
                return false;
            }
        };

        let converter = self.converter.get_or_insert_with(GrayConverter::new);
        let frame = match converter.convert(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Grayscale conversion failed: {}", e);
                return false;
            }
        };

        let mut detected = false;
        if let Some(reference) = self.reference.take() {
            // A resolution or format change invalidates the reference;
            // buffer sizes must match before comparison.
            if reference.width == frame.width && reference.height == frame.height {
                let changed = reference
                    .data
                    .iter()
                    .zip(frame.data.iter())
                    .filter(|(r, c)| r.abs_diff(**c) > MOTION_PIXEL_SENSITIVITY)
                    .count();

                // Integer division floors the area threshold to zero for
                // tiny frames; an unchanged frame must never count.
                let pixels = frame.width as usize * frame.height as usize;
                detected = changed > 0 && changed >= pixels / MOTION_AREA_DIVISOR;
            }
        }

        // Sliding single-frame baseline: the previous reference is dropped,
        // the current frame becomes the new reference.
        self.reference = Some(frame);
        detected
    }

    /// Hardware global motion threshold. No-op in software mode, which has
    /// a fixed per-pixel sensitivity.
    pub fn set_threshold_global(&self, source: &mut dyn FrameSource, value: u16) -> Result<()> {
        if source.has_hardware_motion() {
            return source.set_hardware_motion_threshold(value, None);
        }
        Ok(())
    }

    /// Hardware per-block motion threshold. No-op in software mode.
    pub fn set_threshold_block(
        &self,
        source: &mut dyn FrameSource,
        value: u16,
        block: u16,
    ) -> Result<()> {
        if source.has_hardware_motion() {
            return source.set_hardware_motion_threshold(value, Some(block));
        }
        Ok(())
    }

    #[cfg(test)]
    fn has_reference(&self) -> bool {
        self.reference.is_some()
    }
}
