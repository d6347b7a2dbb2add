//! Frame payloads and their acquisition metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single camera image.
///
/// Pixels are stored row-major as 16-bit values regardless of the sensor's
/// native bit depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel reported by the sensor (e.g. 12, 16)
    pub bit_depth: u32,

    /// Row-major pixel data
    pub pixels: Vec<u16>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u16>) -> Self {
        Self {
            width,
            height,
            bit_depth: 16,
            pixels,
        }
    }

    /// Get pixel value at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize) * (self.width as usize) + x as usize;
        self.pixels.get(idx).copied()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Mean intensity. Returns 0.0 for an empty frame.
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }

    /// Population variance of the intensities, used as a focus metric.
    pub fn variance(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self
            .pixels
            .iter()
            .map(|&p| {
                let d = p as f64 - mean;
                d * d
            })
            .sum();
        sum_sq / self.pixels.len() as f64
    }
}

/// Where in the acquisition program a cycle sits.
///
/// Carried by frame metadata and by fault events so a failed or dropped
/// frame can be located in the experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleContext {
    /// Monotonic cycle number within the current run
    pub cycle: u64,
    pub channel: usize,
    pub z_index: usize,
    pub position_index: usize,
    pub timepoint: usize,
}

impl std::fmt::Display for CycleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycle={} channel={} z={} position={} timepoint={}",
            self.cycle, self.channel, self.z_index, self.position_index, self.timepoint
        )
    }
}

/// Per-frame metadata stored alongside the pixels in a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub cycle: u64,
    pub channel: usize,
    pub z_index: usize,
    pub position_index: usize,
    pub timepoint: usize,
    pub captured_at: DateTime<Utc>,
}

impl FrameMetadata {
    pub fn from_context(context: &CycleContext, captured_at: DateTime<Utc>) -> Self {
        Self {
            cycle: context.cycle,
            channel: context.channel,
            z_index: context.z_index,
            position_index: context.position_index,
            timepoint: context.timepoint,
            captured_at,
        }
    }
}

/// Content of one frame buffer slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub metadata: FrameMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_of_constant_frame() {
        let frame = Frame::new(4, 2, vec![100; 8]);
        assert_eq!(frame.mean(), 100.0);
        assert_eq!(frame.variance(), 0.0);
        assert_eq!(frame.get(3, 1), Some(100));
        assert_eq!(frame.get(4, 0), None);
    }

    #[test]
    fn variance_grows_with_contrast() {
        let flat = Frame::new(2, 2, vec![10, 12, 10, 12]);
        let sharp = Frame::new(2, 2, vec![0, 200, 0, 200]);
        assert!(sharp.variance() > flat.variance());
    }

    #[test]
    fn metadata_copies_context() {
        let ctx = CycleContext {
            cycle: 7,
            channel: 1,
            z_index: 2,
            position_index: 3,
            timepoint: 4,
        };
        let md = FrameMetadata::from_context(&ctx, Utc::now());
        assert_eq!((md.cycle, md.channel, md.z_index), (7, 1, 2));
        assert_eq!((md.position_index, md.timepoint), (3, 4));
    }
}
