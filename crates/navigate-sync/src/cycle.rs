//! Timing of one acquisition cycle.
//!
//! ```text
//! 0          settle_down      +delay = trigger_at            period
//! |--settle--|------delay-----|--------exposure--------------|
//!                             ^ camera trigger pulse
//! ```

use navigate_core::error::{NavigateError, Result};
use navigate_core::limits::{frame_timeout, DAQ_COMPLETION_MARGIN};
use navigate_hardware::config::CameraConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTiming {
    pub settle_down: Duration,
    pub delay: Duration,
    pub exposure: Duration,
    pub trigger_pulse: Duration,
    /// Added to the exposure to bound the frame wait
    pub frame_margin: Duration,
}

impl CycleTiming {
    pub fn new(
        settle_down: Duration,
        delay: Duration,
        exposure: Duration,
        trigger_pulse: Duration,
        frame_margin: Duration,
    ) -> Result<Self> {
        if exposure.is_zero() {
            return Err(NavigateError::Configuration(
                "exposure time must be non-zero".into(),
            ));
        }
        if trigger_pulse.is_zero() || trigger_pulse > exposure {
            return Err(NavigateError::Configuration(format!(
                "trigger pulse {trigger_pulse:?} must be non-zero and fit in exposure {exposure:?}"
            )));
        }
        Ok(Self {
            settle_down,
            delay,
            exposure,
            trigger_pulse,
            frame_margin,
        })
    }

    pub fn for_camera(camera: &CameraConfig, exposure: Duration) -> Result<Self> {
        Self::new(
            camera.settle_down,
            camera.delay,
            exposure,
            camera.trigger_pulse,
            camera.frame_timeout_margin,
        )
    }

    /// Camera trigger time. Never earlier than the settle time.
    pub fn trigger_at(&self) -> Duration {
        self.settle_down + self.delay
    }

    pub fn period(&self) -> Duration {
        self.trigger_at() + self.exposure
    }

    /// Upper bound on waiting for the cycle's frame.
    pub fn frame_timeout(&self) -> Duration {
        frame_timeout(self.exposure, self.frame_margin)
    }

    /// Upper bound on waiting for the DAQ to emit every sample.
    pub fn daq_timeout(&self) -> Duration {
        self.period() + DAQ_COMPLETION_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn trigger_follows_settle_and_delay() {
        let timing = CycleTiming::new(ms(1), ms(2), ms(10), ms(1), ms(500)).unwrap();
        assert_eq!(timing.trigger_at(), ms(3));
        assert_eq!(timing.period(), ms(13));
        assert_eq!(timing.frame_timeout(), ms(510));
        assert_eq!(timing.daq_timeout(), ms(13) + DAQ_COMPLETION_MARGIN);
    }

    #[test]
    fn invalid_timings_rejected() {
        assert!(CycleTiming::new(ms(1), ms(2), Duration::ZERO, ms(1), ms(500)).is_err());
        assert!(CycleTiming::new(ms(1), ms(2), ms(1), ms(2), ms(500)).is_err());
        assert!(CycleTiming::new(ms(1), ms(2), ms(5), Duration::ZERO, ms(500)).is_err());
    }
}
