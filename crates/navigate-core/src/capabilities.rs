//! Device capability traits.
//!
//! Each physical device family implements the small set of capabilities it
//! actually has. Orchestration code (scheduler, executor) is written only
//! against these traits, so swapping a backend never touches it:
//!
//! - A camera implements `Triggerable + FrameSource` (and therefore `Camera`)
//! - A stage axis, zoom or flip mirror implements `Movable`
//! - A DAQ board implements `WaveformDrivable`
//! - A filter wheel implements `FilterSelect`
//!
//! Every capability is async, thread-safe and reports failures through
//! [`NavigateError`](crate::error::NavigateError). Backend faults use the
//! `HardwareFault` variant; arguments outside declared limits use
//! `OutOfRange` and must be rejected before touching hardware.

use crate::data::Frame;
use crate::error::{NavigateError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Capability: one controllable degree of freedom.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to an absolute position in device units (microns, degrees or
    /// discrete zoom index).
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to the current position.
    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = self.position().await?;
        self.move_abs(current + distance).await
    }

    /// Current position. May be approximate while moving.
    async fn position(&self) -> Result<f64>;

    /// Block until motion is complete. Implementations bound this with an
    /// internal timeout and report expiry as a hardware fault.
    async fn wait_settled(&self) -> Result<()>;

    /// Halt motion in progress.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Capability: an externally triggered device.
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Prepare to accept a trigger.
    async fn arm(&self) -> Result<()>;

    /// Deliver one trigger pulse. Fails if not armed.
    async fn trigger(&self) -> Result<()>;

    async fn disarm(&self) -> Result<()>;

    async fn is_armed(&self) -> Result<bool>;
}

/// Capability: produces frames on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Sensor resolution as (width, height).
    fn resolution(&self) -> (u32, u32);

    /// Set exposure time in seconds.
    async fn set_exposure(&self, seconds: f64) -> Result<()>;

    async fn exposure(&self) -> Result<f64>;

    /// Wait for the next frame produced by a trigger.
    ///
    /// Returns a `HardwareFault` with `DriverErrorKind::Timeout` if no frame
    /// arrives within `timeout`.
    async fn wait_frame(&self, timeout: Duration) -> Result<Frame>;

    /// Drop any frames captured but not yet read.
    async fn discard_pending(&self) -> Result<()> {
        Ok(())
    }
}

/// A triggered camera.
pub trait Camera: Triggerable + FrameSource {}

impl<T: Triggerable + FrameSource + ?Sized> Camera for T {}

/// Capability: selects one of a fixed set of named filters.
#[async_trait]
pub trait FilterSelect: Send + Sync {
    async fn select(&self, filter: &str) -> Result<()>;

    async fn current(&self) -> Result<Option<String>>;
}

/// Samples for one physical output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWaveform {
    /// Physical channel name, e.g. `PXI6259/ao0`
    pub channel: String,
    /// Voltage per sample
    pub samples: Vec<f64>,
}

/// All waveforms for one synchronized cycle on one multiplexed output task.
///
/// Construction enforces that every channel carries the same number of
/// samples and that no physical channel appears twice.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTask {
    sample_rate: f64,
    samples_per_channel: usize,
    channels: Vec<ChannelWaveform>,
}

impl OutputTask {
    pub fn new(sample_rate: f64, channels: Vec<ChannelWaveform>) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(NavigateError::Configuration(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        let samples_per_channel = channels.first().map(|c| c.samples.len()).unwrap_or(0);
        for (i, waveform) in channels.iter().enumerate() {
            if waveform.samples.len() != samples_per_channel {
                return Err(NavigateError::Configuration(format!(
                    "channel '{}' has {} samples, expected {} to match '{}'",
                    waveform.channel,
                    waveform.samples.len(),
                    samples_per_channel,
                    channels[0].channel
                )));
            }
            if channels[..i].iter().any(|c| c.channel == waveform.channel) {
                return Err(NavigateError::Configuration(format!(
                    "channel '{}' assigned more than one waveform",
                    waveform.channel
                )));
            }
        }
        Ok(Self {
            sample_rate,
            samples_per_channel,
            channels,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn channels(&self) -> &[ChannelWaveform] {
        &self.channels
    }

    /// Wall-clock duration of one pass through the task.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples_per_channel as f64 / self.sample_rate)
    }

    pub fn waveform(&self, channel: &str) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.samples.as_slice())
    }
}

/// Capability: a multi-channel analog/digital output board.
///
/// One task is loaded per cycle. `start` fires the master trigger, so all
/// channels begin from the same sample clock edge.
#[async_trait]
pub trait WaveformDrivable: Send + Sync {
    /// Load sample buffers onto the output channels without starting.
    async fn load(&self, task: &OutputTask) -> Result<()>;

    /// Fire the master trigger.
    async fn start(&self) -> Result<()>;

    /// Wait until every sample of the loaded task has been emitted.
    async fn wait_done(&self, timeout: Duration) -> Result<()>;

    /// Stop the task and hold every channel at its terminal value.
    async fn hold(&self) -> Result<()>;

    /// Write a single static voltage on one channel.
    async fn write_static(&self, channel: &str, volts: f64) -> Result<()>;

    /// Stop any running task and drive all outputs to 0 V.
    async fn zero(&self) -> Result<()>;
}
