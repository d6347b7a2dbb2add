//! Synthetic triggered camera.
//!
//! Each trigger while armed produces one frame of a checkerboard specimen.
//! When a focus axis is attached, frame contrast follows a Gaussian focus
//! response around `best_focus`, which makes autofocus testable.

use crate::common::{simulate_delay, ErrorConfig, SyntheticMode, TimingConfig};
use crate::pattern::{focus_sharpness, generate_specimen};
use async_trait::async_trait;
use navigate_core::capabilities::{FrameSource, Movable, Triggerable};
use navigate_core::data::Frame;
use navigate_core::error::{DriverError, DriverErrorKind, NavigateError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const DRIVER: &str = "synthetic_camera";

/// Specimen focus model for the synthetic camera.
#[derive(Clone)]
pub struct FocusModel {
    pub axis: Arc<dyn Movable>,
    pub best_focus: f64,
    pub depth_of_field: f64,
}

impl std::fmt::Debug for FocusModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusModel")
            .field("best_focus", &self.best_focus)
            .field("depth_of_field", &self.depth_of_field)
            .finish()
    }
}

pub struct SyntheticCameraBuilder {
    width: u32,
    height: u32,
    exposure_s: f64,
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing_config: Option<TimingConfig>,
    focus: Option<FocusModel>,
}

impl SyntheticCameraBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            exposure_s: 0.01,
            mode: SyntheticMode::Instant,
            error_config: ErrorConfig::none(),
            timing_config: None,
            focus: None,
        }
    }

    pub fn exposure(mut self, seconds: f64) -> Self {
        self.exposure_s = seconds;
        self
    }

    pub fn mode(mut self, mode: SyntheticMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing_config = Some(config);
        self
    }

    pub fn focus(mut self, focus: FocusModel) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn build(self) -> SyntheticCamera {
        let error_config = if self.mode == SyntheticMode::Chaos && self.error_config.is_none() {
            ErrorConfig::random_failures(0.01)
        } else {
            self.error_config
        };
        SyntheticCamera {
            width: self.width,
            height: self.height,
            mode: self.mode,
            error_config,
            timing: self.timing_config.unwrap_or_else(TimingConfig::camera),
            focus: self.focus,
            exposure_s: Mutex::new(self.exposure_s),
            armed: AtomicBool::new(false),
            trigger_count: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            frame_ready: Notify::new(),
        }
    }
}

/// Synthetic camera implementing `Triggerable + FrameSource`.
#[derive(Debug)]
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing: TimingConfig,
    focus: Option<FocusModel>,
    exposure_s: Mutex<f64>,
    armed: AtomicBool,
    trigger_count: AtomicU64,
    frames_read: AtomicU64,
    pending: Mutex<VecDeque<Frame>>,
    frame_ready: Notify,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self::builder(width, height).build()
    }

    pub fn builder(width: u32, height: u32) -> SyntheticCameraBuilder {
        SyntheticCameraBuilder::new(width, height)
    }

    /// Number of triggers accepted since construction.
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }

    /// Number of frames handed out by `wait_frame`.
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::SeqCst)
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.lock().len()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.error_config
            .check_operation(DRIVER, operation)
            .map_err(NavigateError::from)
    }

    async fn sharpness(&self) -> Result<f64> {
        match &self.focus {
            Some(model) => {
                let position = model.axis.position().await?;
                Ok(focus_sharpness(
                    position,
                    model.best_focus,
                    model.depth_of_field,
                ))
            }
            None => Ok(1.0),
        }
    }
}

#[async_trait]
impl Triggerable for SyntheticCamera {
    async fn arm(&self) -> Result<()> {
        self.check("arm")?;
        self.armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn trigger(&self) -> Result<()> {
        self.check("trigger")?;
        if !self.armed.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                "trigger received while disarmed",
            )
            .into());
        }
        let frame_num = self.trigger_count.fetch_add(1, Ordering::SeqCst);
        let sharpness = self.sharpness().await?;
        let pixels = generate_specimen(self.width, self.height, frame_num, sharpness);
        self.pending
            .lock()
            .push_back(Frame::new(self.width, self.height, pixels));
        self.frame_ready.notify_one();
        Ok(())
    }

    async fn disarm(&self) -> Result<()> {
        self.armed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_armed(&self) -> Result<bool> {
        Ok(self.armed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl FrameSource for SyntheticCamera {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn set_exposure(&self, seconds: f64) -> Result<()> {
        self.check("set_exposure")?;
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("exposure must be positive, got {seconds}"),
            )
            .into());
        }
        *self.exposure_s.lock() = seconds;
        Ok(())
    }

    async fn exposure(&self) -> Result<f64> {
        Ok(*self.exposure_s.lock())
    }

    async fn wait_frame(&self, timeout: Duration) -> Result<Frame> {
        self.check("wait_frame")?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.frame_ready.notified();
            let next = self.pending.lock().pop_front();
            if let Some(frame) = next {
                simulate_delay(self.mode, self.timing.frame_readout_ms).await;
                self.frames_read.fetch_add(1, Ordering::SeqCst);
                return Ok(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(DriverError::timeout(
                    DRIVER,
                    format!("no frame within {} ms", timeout.as_millis()),
                )
                .into());
            }
        }
    }

    async fn discard_pending(&self) -> Result<()> {
        self.pending.lock().clear();
        Ok(())
    }
}
