// Grayscale conversion with a cached, resolution-keyed context.
//
// The context itself is cheap here (scratch buffer sizing), but the cache
// mirrors the lifecycle the detector needs: rebuilt only when the source
// resolution or pixel format changes, freed when detection is disabled.

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Yuv420p,
}

/// A decoded frame as delivered by the frame source.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    fn expected_len(&self) -> usize {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Gray8 => pixels,
            PixelFormat::Rgb24 => pixels * 3,
            // Y plane plus quarter-size U and V planes
            PixelFormat::Yuv420p => pixels + pixels / 2,
        }
    }
}

/// A single luma plane at device resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContextKey {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Conversion context keyed by (width, height, format).
#[derive(Default)]
pub struct GrayConverter {
    key: Option<ContextKey>,
}

impl GrayConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a raw frame to grayscale at its native resolution. The
    /// context is rebuilt only when the frame geometry changes.
    pub fn convert(&mut self, frame: &RawFrame) -> Result<GrayFrame> {
        if frame.width == 0 || frame.height == 0 {
            return Err(WardenError::FrameDecode("zero-sized frame".into()));
        }
        if frame.data.len() < frame.expected_len() {
            return Err(WardenError::FrameDecode(format!(
                "short frame buffer: {} < {}",
                frame.data.len(),
                frame.expected_len()
            )));
        }

        let key = ContextKey {
            width: frame.width,
            height: frame.height,
            format: frame.format,
        };
        if self.key != Some(key) {
            log::debug!(
                "Rebuilding grayscale context for {}x{} {:?}",
                frame.width,
                frame.height,
                frame.format
            );
            self.key = Some(key);
        }

        let pixels = frame.width as usize * frame.height as usize;
        let data = match frame.format {
            PixelFormat::Gray8 => frame.data[..pixels].to_vec(),
            // BT.601 integer luma weights
            PixelFormat::Rgb24 => frame.data[..pixels * 3]
                .chunks_exact(3)
                .map(|px| {
                    let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    ((77 * r + 150 * g + 29 * b) >> 8) as u8
                })
                .collect(),
            // The Y plane already is the grayscale image
            PixelFormat::Yuv420p => frame.data[..pixels].to_vec(),
        };

        Ok(GrayFrame {
            width: frame.width,
            height: frame.height,
            data,
        })
    }
}
