//! Waveform synthesis.
//!
//! Every waveform spans exactly one cycle period at the master sample rate,
//! so all channels of a cycle come out with the same sample count. The
//! phase is applied as a circular sample offset.

use navigate_core::capabilities::{ChannelWaveform, OutputTask};
use navigate_core::error::{NavigateError, Result};
use navigate_core::limits::{MAX_SAMPLES_PER_CHANNEL, MAX_SAMPLE_RATE};
use serde::Serialize;
use std::time::Duration;

/// Logic-high level for digital lines (TTL).
pub const DIGITAL_HIGH: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    /// Linear ramp from low to high, then instantaneous reset.
    Sawtooth,
    /// Ramp up then symmetric ramp down (triangle).
    Halfsaw,
    /// Plateau at `high` for the first `duty` fraction of the period,
    /// `low` for the rest.
    Step { duty: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveformSpec {
    pub shape: Shape,
    pub low: f64,
    pub high: f64,
    pub phase: Duration,
    pub period: Duration,
}

impl WaveformSpec {
    pub fn new(shape: Shape, low: f64, high: f64, period: Duration) -> Self {
        Self {
            shape,
            low,
            high,
            phase: Duration::ZERO,
            period,
        }
    }

    pub fn with_phase(mut self, phase: Duration) -> Self {
        self.phase = phase;
        self
    }

    /// Plateau at `level` for `width`, starting `start` into the period.
    pub fn window(level: f64, start: Duration, width: Duration, period: Duration) -> Self {
        let duty = if period.is_zero() {
            0.0
        } else {
            width.as_secs_f64() / period.as_secs_f64()
        };
        Self::new(Shape::Step { duty }, 0.0, level, period).with_phase(start)
    }

    /// Zero for the whole period.
    pub fn off(period: Duration) -> Self {
        Self::new(Shape::Step { duty: 0.0 }, 0.0, 0.0, period)
    }
}

/// Samples in one period at `sample_rate`.
pub fn sample_count(period: Duration, sample_rate: f64) -> Result<usize> {
    if !(sample_rate.is_finite() && sample_rate > 0.0 && sample_rate <= MAX_SAMPLE_RATE) {
        return Err(NavigateError::Configuration(format!(
            "sample rate {sample_rate} outside (0, {MAX_SAMPLE_RATE}]"
        )));
    }
    let n = (period.as_secs_f64() * sample_rate).round();
    if n < 1.0 {
        return Err(NavigateError::Configuration(format!(
            "period {period:?} is shorter than one sample at {sample_rate} samples/s"
        )));
    }
    let n = n as usize;
    if n > MAX_SAMPLES_PER_CHANNEL {
        return Err(NavigateError::Configuration(format!(
            "period {period:?} needs {n} samples (limit {MAX_SAMPLES_PER_CHANNEL})"
        )));
    }
    Ok(n)
}

/// Produce one period of `spec` at `sample_rate`.
pub fn synthesize(spec: &WaveformSpec, sample_rate: f64) -> Result<Vec<f64>> {
    let n = sample_count(spec.period, sample_rate)?;
    if !(spec.low.is_finite() && spec.high.is_finite()) {
        return Err(NavigateError::Configuration(format!(
            "waveform levels must be finite, got [{}, {}]",
            spec.low, spec.high
        )));
    }
    let offset = ((spec.phase.as_secs_f64() * sample_rate).round() as usize) % n;
    let span = spec.high - spec.low;

    let base = |k: usize| -> f64 {
        match spec.shape {
            Shape::Sawtooth if n == 1 => spec.low,
            Shape::Sawtooth => spec.low + span * k as f64 / (n - 1) as f64,
            Shape::Halfsaw => {
                let t = k as f64 / n as f64;
                spec.low + span * (1.0 - (2.0 * t - 1.0).abs())
            }
            Shape::Step { duty } => {
                let high_samples = (duty.clamp(0.0, 1.0) * n as f64).round() as usize;
                if k < high_samples {
                    spec.high
                } else {
                    spec.low
                }
            }
        }
    };

    Ok((0..n).map(|i| base((i + n - offset) % n)).collect())
}

/// Synthesize and bind to a physical channel.
pub fn channel_waveform(
    channel: impl Into<String>,
    spec: &WaveformSpec,
    sample_rate: f64,
) -> Result<ChannelWaveform> {
    Ok(ChannelWaveform {
        channel: channel.into(),
        samples: synthesize(spec, sample_rate)?,
    })
}

/// Combine per-channel waveforms into one multiplexed output task. Unequal
/// sample counts are a configuration error.
pub fn assemble(sample_rate: f64, channels: Vec<ChannelWaveform>) -> Result<OutputTask> {
    OutputTask::new(sample_rate, channels)
}
