//! Closed sets of hardware backends, one enum per device class.
//!
//! Each enum implements the capability trait of its class by matching on
//! the variant. Supporting a new vendor means adding a variant here and a
//! constructor arm in [`crate::microscope`]; the scheduler and executor
//! only ever see the capability traits.

use crate::calibration::AxisCalibration;
use async_trait::async_trait;
use navigate_core::capabilities::{
    FilterSelect, FrameSource, Movable, OutputTask, Triggerable, WaveformDrivable,
};
use navigate_core::data::Frame;
use navigate_core::error::Result;
use navigate_driver_synthetic::{
    ErrorConfig, SyntheticAxis, SyntheticCamera, SyntheticDaq, SyntheticFilterWheel,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// How hardware tags in the topology are honored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendSelection {
    /// Build the backend named by each `type` tag. Vendor tags without a
    /// compiled-in backend are configuration errors.
    #[default]
    AsConfigured,
    /// Replace every device with its synthetic counterpart.
    Synthetic,
}

/// Error injection for synthetic backends, applied at assembly.
#[derive(Debug, Clone, Default)]
pub struct SyntheticFaults {
    pub daq: ErrorConfig,
    pub camera: ErrorConfig,
    pub stage: ErrorConfig,
    pub filter_wheel: ErrorConfig,
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Clone)]
pub enum CameraBackend {
    Synthetic(Arc<SyntheticCamera>),
}

impl CameraBackend {
    pub fn as_synthetic(&self) -> Option<&Arc<SyntheticCamera>> {
        match self {
            CameraBackend::Synthetic(camera) => Some(camera),
        }
    }
}

#[async_trait]
impl Triggerable for CameraBackend {
    async fn arm(&self) -> Result<()> {
        match self {
            CameraBackend::Synthetic(c) => c.arm().await,
        }
    }

    async fn trigger(&self) -> Result<()> {
        match self {
            CameraBackend::Synthetic(c) => c.trigger().await,
        }
    }

    async fn disarm(&self) -> Result<()> {
        match self {
            CameraBackend::Synthetic(c) => c.disarm().await,
        }
    }

    async fn is_armed(&self) -> Result<bool> {
        match self {
            CameraBackend::Synthetic(c) => c.is_armed().await,
        }
    }
}

#[async_trait]
impl FrameSource for CameraBackend {
    fn resolution(&self) -> (u32, u32) {
        match self {
            CameraBackend::Synthetic(c) => c.resolution(),
        }
    }

    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        match self {
            CameraBackend::Synthetic(c) => c.set_exposure(seconds).await,
        }
    }

    async fn exposure(&self) -> Result<f64> {
        match self {
            CameraBackend::Synthetic(c) => c.exposure().await,
        }
    }

    async fn wait_frame(&self, timeout: Duration) -> Result<Frame> {
        match self {
            CameraBackend::Synthetic(c) => c.wait_frame(timeout).await,
        }
    }

    async fn discard_pending(&self) -> Result<()> {
        match self {
            CameraBackend::Synthetic(c) => c.discard_pending().await,
        }
    }
}

// =============================================================================
// DAQ
// =============================================================================

#[derive(Clone)]
pub enum DaqBackend {
    Synthetic(Arc<SyntheticDaq>),
}

impl DaqBackend {
    pub fn as_synthetic(&self) -> Option<&Arc<SyntheticDaq>> {
        match self {
            DaqBackend::Synthetic(daq) => Some(daq),
        }
    }
}

#[async_trait]
impl WaveformDrivable for DaqBackend {
    async fn load(&self, task: &OutputTask) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.load(task).await,
        }
    }

    async fn start(&self) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.start().await,
        }
    }

    async fn wait_done(&self, timeout: Duration) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.wait_done(timeout).await,
        }
    }

    async fn hold(&self) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.hold().await,
        }
    }

    async fn write_static(&self, channel: &str, volts: f64) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.write_static(channel, volts).await,
        }
    }

    async fn zero(&self) -> Result<()> {
        match self {
            DaqBackend::Synthetic(d) => d.zero().await,
        }
    }
}

// =============================================================================
// Axes
// =============================================================================

/// Stage axis driven by a static DAQ voltage through its calibration.
pub struct AnalogAxis {
    channel: String,
    calibration: AxisCalibration,
    daq: DaqBackend,
    position: Mutex<f64>,
}

impl AnalogAxis {
    pub fn new(channel: impl Into<String>, calibration: AxisCalibration, daq: DaqBackend) -> Self {
        let (min, _) = calibration.bounds();
        Self {
            channel: channel.into(),
            calibration,
            daq,
            position: Mutex::new(min),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Movable for AnalogAxis {
    async fn move_abs(&self, position: f64) -> Result<()> {
        let volts = self.calibration.to_voltage(position)?;
        tracing::debug!(
            axis = self.calibration.axis(),
            channel = %self.channel,
            position,
            volts,
            "Analog axis move"
        );
        self.daq.write_static(&self.channel, volts).await?;
        *self.position.lock() = position;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.lock())
    }

    async fn wait_settled(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub enum AxisBackend {
    Synthetic(Arc<SyntheticAxis>),
    Analog(Arc<AnalogAxis>),
}

impl AxisBackend {
    pub fn as_synthetic(&self) -> Option<&Arc<SyntheticAxis>> {
        match self {
            AxisBackend::Synthetic(axis) => Some(axis),
            AxisBackend::Analog(_) => None,
        }
    }
}

#[async_trait]
impl Movable for AxisBackend {
    async fn move_abs(&self, position: f64) -> Result<()> {
        match self {
            AxisBackend::Synthetic(a) => a.move_abs(position).await,
            AxisBackend::Analog(a) => a.move_abs(position).await,
        }
    }

    async fn position(&self) -> Result<f64> {
        match self {
            AxisBackend::Synthetic(a) => a.position().await,
            AxisBackend::Analog(a) => a.position().await,
        }
    }

    async fn wait_settled(&self) -> Result<()> {
        match self {
            AxisBackend::Synthetic(a) => a.wait_settled().await,
            AxisBackend::Analog(a) => a.wait_settled().await,
        }
    }

    async fn stop(&self) -> Result<()> {
        match self {
            AxisBackend::Synthetic(a) => a.stop().await,
            AxisBackend::Analog(a) => a.stop().await,
        }
    }
}

// =============================================================================
// Filter wheel
// =============================================================================

#[derive(Clone)]
pub enum FilterWheelBackend {
    Synthetic(Arc<SyntheticFilterWheel>),
}

impl FilterWheelBackend {
    pub fn as_synthetic(&self) -> Option<&Arc<SyntheticFilterWheel>> {
        match self {
            FilterWheelBackend::Synthetic(wheel) => Some(wheel),
        }
    }
}

#[async_trait]
impl FilterSelect for FilterWheelBackend {
    async fn select(&self, filter: &str) -> Result<()> {
        match self {
            FilterWheelBackend::Synthetic(w) => w.select(filter).await,
        }
    }

    async fn current(&self) -> Result<Option<String>> {
        match self {
            FilterWheelBackend::Synthetic(w) => w.current().await,
        }
    }
}
