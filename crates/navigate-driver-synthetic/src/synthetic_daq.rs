//! Synthetic multi-channel DAQ output board.
//!
//! Records every loaded task and static write, and tracks the voltage each
//! channel currently holds. When a camera trigger line is linked, starting a
//! task delivers one trigger per rising edge found on that line, which is
//! how a real board's counter output drives the camera.

use crate::common::{simulate_delay, ErrorConfig, SyntheticMode, TimingConfig};
use async_trait::async_trait;
use navigate_core::capabilities::{OutputTask, Triggerable, WaveformDrivable};
use navigate_core::error::{DriverError, DriverErrorKind, NavigateError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DRIVER: &str = "synthetic_daq";

/// Logic threshold for detecting trigger edges (volts).
pub const TRIGGER_THRESHOLD: f64 = 2.5;

struct TriggerLink {
    line: String,
    target: Arc<dyn Triggerable>,
}

pub struct SyntheticDaqBuilder {
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing_config: Option<TimingConfig>,
    link: Option<TriggerLink>,
}

impl SyntheticDaqBuilder {
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

    /// Deliver a trigger to `target` for every rising edge on `line`.
    pub fn trigger_link(mut self, line: impl Into<String>, target: Arc<dyn Triggerable>) -> Self {
        self.link = Some(TriggerLink {
            line: line.into(),
            target,
        });
        self
    }

    pub fn build(self) -> SyntheticDaq {
        SyntheticDaq {
            mode: self.mode,
            error_config: self.error_config,
            timing: self.timing_config.unwrap_or_else(TimingConfig::daq),
            link: self.link,
            loaded: Mutex::new(None),
            running: AtomicBool::new(false),
            started: Mutex::new(Vec::new()),
            outputs: Mutex::new(HashMap::new()),
            static_writes: Mutex::new(Vec::new()),
            zero_count: AtomicU64::new(0),
        }
    }
}

/// In-memory DAQ implementing [`WaveformDrivable`].
pub struct SyntheticDaq {
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing: TimingConfig,
    link: Option<TriggerLink>,
    loaded: Mutex<Option<OutputTask>>,
    running: AtomicBool,
    started: Mutex<Vec<OutputTask>>,
    outputs: Mutex<HashMap<String, f64>>,
    static_writes: Mutex<Vec<(String, f64)>>,
    zero_count: AtomicU64,
}

impl std::fmt::Debug for SyntheticDaq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticDaq")
            .field("mode", &self.mode)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("tasks_started", &self.started.lock().len())
            .finish()
    }
}

impl SyntheticDaq {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SyntheticDaqBuilder {
        SyntheticDaqBuilder {
            mode: SyntheticMode::Instant,
            error_config: ErrorConfig::none(),
            timing_config: None,
            link: None,
        }
    }

    /// Tasks that were started, in order.
    pub fn started_tasks(&self) -> Vec<OutputTask> {
        self.started.lock().clone()
    }

    pub fn last_task(&self) -> Option<OutputTask> {
        self.started.lock().last().cloned()
    }

    /// Voltage currently held on `channel`, if it was ever driven.
    pub fn output(&self, channel: &str) -> Option<f64> {
        self.outputs.lock().get(channel).copied()
    }

    /// True when every driven channel sits at 0 V and nothing is running.
    pub fn is_safe(&self) -> bool {
        !self.running.load(Ordering::SeqCst) && self.outputs.lock().values().all(|v| *v == 0.0)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn static_writes(&self) -> Vec<(String, f64)> {
        self.static_writes.lock().clone()
    }

    pub fn zero_count(&self) -> u64 {
        self.zero_count.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        self.error_config
            .check_operation(DRIVER, operation)
            .map_err(NavigateError::from)
    }

    fn latch_terminal_values(&self, task: &OutputTask) {
        let mut outputs = self.outputs.lock();
        for waveform in task.channels() {
            if let Some(last) = waveform.samples.last() {
                outputs.insert(waveform.channel.clone(), *last);
            }
        }
    }

    fn loaded_task(&self) -> Result<OutputTask> {
        self.loaded.lock().clone().ok_or_else(|| {
            NavigateError::HardwareFault(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                "no task loaded",
            ))
        })
    }
}

impl Default for SyntheticDaq {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample indices where `samples` crosses the logic threshold upward.
pub fn rising_edges(samples: &[f64]) -> Vec<usize> {
    let mut edges = Vec::new();
    let mut previous = false;
    for (i, v) in samples.iter().enumerate() {
        let high = *v >= TRIGGER_THRESHOLD;
        if high && !previous {
            edges.push(i);
        }
        previous = high;
    }
    edges
}

#[async_trait]
impl WaveformDrivable for SyntheticDaq {
    async fn load(&self, task: &OutputTask) -> Result<()> {
        self.check("load")?;
        if self.running.load(Ordering::SeqCst) {
            return Err(NavigateError::HardwareFault(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                "cannot load while a task is running",
            )));
        }
        simulate_delay(self.mode, self.timing.communication_delay_ms).await;
        *self.loaded.lock() = Some(task.clone());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.check("start")?;
        let task = self.loaded_task()?;
        self.running.store(true, Ordering::SeqCst);
        self.started.lock().push(task.clone());

        if let Some(link) = &self.link {
            if let Some(samples) = task.waveform(&link.line) {
                let mut elapsed = 0usize;
                for edge in rising_edges(samples) {
                    if self.mode.simulates_timing() {
                        let wait = (edge - elapsed) as f64 / task.sample_rate();
                        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                        elapsed = edge;
                    }
                    link.target.trigger().await?;
                }
            }
        }
        Ok(())
    }

    async fn wait_done(&self, timeout: Duration) -> Result<()> {
        self.check("wait_done")?;
        let task = self.loaded_task()?;
        if self.mode.simulates_timing() {
            let duration = task.duration();
            if duration > timeout {
                tokio::time::sleep(timeout).await;
                return Err(DriverError::timeout(
                    DRIVER,
                    format!("task did not finish within {} ms", timeout.as_millis()),
                )
                .into());
            }
            tokio::time::sleep(duration).await;
        }
        self.latch_terminal_values(&task);
        Ok(())
    }

    async fn hold(&self) -> Result<()> {
        self.check("hold")?;
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.loaded.lock().clone() {
            self.latch_terminal_values(&task);
        }
        Ok(())
    }

    async fn write_static(&self, channel: &str, volts: f64) -> Result<()> {
        self.check("write_static")?;
        self.outputs.lock().insert(channel.to_string(), volts);
        self.static_writes.lock().push((channel.to_string(), volts));
        Ok(())
    }

    async fn zero(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        *self.loaded.lock() = None;
        for value in self.outputs.lock().values_mut() {
            *value = 0.0;
        }
        self.zero_count.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("SyntheticDaq: outputs zeroed");
        Ok(())
    }
}
