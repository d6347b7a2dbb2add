//! Timing configuration for realistic mode.

/// Hardware-like delays applied when the mode simulates timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingConfig {
    /// Frame readout time in milliseconds (camera)
    pub frame_readout_ms: u64,
    /// Settling time in milliseconds (stage, zoom, filter wheel)
    pub settling_time_ms: u64,
    /// Communication delay in milliseconds
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// sCMOS camera at roughly 100 fps.
    pub fn camera() -> Self {
        Self {
            frame_readout_ms: 10,
            settling_time_ms: 0,
            communication_delay_ms: 1,
        }
    }

    pub fn stage() -> Self {
        Self {
            frame_readout_ms: 0,
            settling_time_ms: 20,
            communication_delay_ms: 2,
        }
    }

    pub fn filter_wheel() -> Self {
        Self {
            frame_readout_ms: 0,
            settling_time_ms: 40,
            communication_delay_ms: 2,
        }
    }

    pub fn daq() -> Self {
        Self {
            frame_readout_ms: 0,
            settling_time_ms: 0,
            communication_delay_ms: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(TimingConfig::default().settling_time_ms, 0);
        assert!(TimingConfig::filter_wheel().settling_time_ms > TimingConfig::stage().settling_time_ms);
        assert!(TimingConfig::camera().frame_readout_ms > 0);
    }
}
