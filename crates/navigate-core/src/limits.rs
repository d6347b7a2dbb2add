//! Shared hard limits and timing defaults.
//!
//! Centralized so the scheduler, buffer and configuration validation agree on
//! the same numbers.

use crate::error::NavigateError;
use std::time::Duration;

// =============================================================================
// Timing
// =============================================================================

/// Margin added to the exposure time when waiting for a frame.
pub const DEFAULT_FRAME_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// Extra time allowed for the DAQ task to finish beyond its nominal duration.
pub const DAQ_COMPLETION_MARGIN: Duration = Duration::from_millis(250);

/// Upper bound on a stage settle wait.
pub const MOTION_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on a single device command (arm, load, disarm).
pub const DEVICE_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Sizes
// =============================================================================

/// Default number of frame buffer slots.
pub const DEFAULT_BUFFER_SLOTS: usize = 100;

/// Capacity of the acquisition event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Fastest sample clock any supported DAQ accepts (samples/s).
pub const MAX_SAMPLE_RATE: f64 = 2_000_000.0;

/// Longest single-cycle sample buffer per channel.
pub const MAX_SAMPLES_PER_CHANNEL: usize = 10_000_000;

/// Most frames one autofocus sweep may take.
pub const MAX_AUTOFOCUS_SAMPLES: usize = 1_000;

/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 65_536;

/// Validate frame dimensions and return the pixel count.
pub fn validate_frame_size(width: u32, height: u32) -> Result<usize, NavigateError> {
    if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(NavigateError::Configuration(format!(
            "frame size {width}x{height} outside 1..={MAX_FRAME_DIMENSION}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| NavigateError::Configuration("frame pixel count overflow".into()))
}

/// Frame wait bound for a given exposure.
pub fn frame_timeout(exposure: Duration, margin: Duration) -> Duration {
    exposure + margin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_bounds() {
        assert_eq!(validate_frame_size(2048, 2048).unwrap(), 2048 * 2048);
        assert!(validate_frame_size(0, 10).is_err());
        assert!(validate_frame_size(MAX_FRAME_DIMENSION + 1, 1).is_err());
    }

    #[test]
    fn frame_timeout_adds_margin() {
        assert_eq!(
            frame_timeout(Duration::from_millis(100), DEFAULT_FRAME_TIMEOUT_MARGIN),
            Duration::from_millis(600)
        );
    }
}
