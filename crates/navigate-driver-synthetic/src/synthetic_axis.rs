//! Synthetic single-axis positioner.
//!
//! Used for stage axes, zoom and mirror slots. Optionally enforces a travel
//! range, reporting out-of-travel targets as `OutOfRange` without moving.

use crate::common::{simulate_delay, ErrorConfig, SyntheticMode, TimingConfig};
use async_trait::async_trait;
use navigate_core::capabilities::Movable;
use navigate_core::error::{NavigateError, Quantity, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

const DRIVER: &str = "synthetic_axis";

pub struct SyntheticAxisBuilder {
    name: String,
    initial: f64,
    travel: Option<(f64, f64)>,
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing_config: Option<TimingConfig>,
}

impl SyntheticAxisBuilder {
    pub fn travel(mut self, min: f64, max: f64) -> Self {
        self.travel = Some((min, max));
        self
    }

    pub fn initial_position(mut self, position: f64) -> Self {
        self.initial = position;
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

    pub fn build(self) -> SyntheticAxis {
        SyntheticAxis {
            name: self.name,
            travel: self.travel,
            mode: self.mode,
            error_config: self.error_config,
            timing: self.timing_config.unwrap_or_else(TimingConfig::stage),
            position: Mutex::new(self.initial),
            history: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }
}

/// In-memory positioner implementing [`Movable`].
#[derive(Debug)]
pub struct SyntheticAxis {
    name: String,
    travel: Option<(f64, f64)>,
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing: TimingConfig,
    position: Mutex<f64>,
    history: Mutex<Vec<f64>>,
    stopped: AtomicBool,
}

impl SyntheticAxis {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> SyntheticAxisBuilder {
        SyntheticAxisBuilder {
            name: name.into(),
            initial: 0.0,
            travel: None,
            mode: SyntheticMode::Instant,
            error_config: ErrorConfig::none(),
            timing_config: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every accepted target, in order.
    pub fn history(&self) -> Vec<f64> {
        self.history.lock().clone()
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Movable for SyntheticAxis {
    async fn move_abs(&self, target: f64) -> Result<()> {
        self.error_config.check_operation(DRIVER, "move_abs")?;
        if let Some((min, max)) = self.travel {
            if !(min..=max).contains(&target) {
                return Err(NavigateError::OutOfRange {
                    axis: self.name.clone(),
                    quantity: Quantity::Position,
                    value: target,
                    min,
                    max,
                });
            }
        }
        simulate_delay(self.mode, self.timing.communication_delay_ms).await;
        tracing::debug!(axis = %self.name, target, "SyntheticAxis: moving");
        *self.position.lock() = target;
        self.history.lock().push(target);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        self.error_config.check_operation(DRIVER, "position")?;
        Ok(*self.position.lock())
    }

    async fn wait_settled(&self) -> Result<()> {
        self.error_config.check_operation(DRIVER, "wait_settled")?;
        simulate_delay(self.mode, self.timing.settling_time_ms).await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn moves_and_records_history() {
        let axis = SyntheticAxis::new("x");
        axis.move_abs(10.0).await.unwrap();
        axis.move_rel(-2.5).await.unwrap();
        assert_eq!(axis.position().await.unwrap(), 7.5);
        assert_eq!(axis.history(), vec![10.0, 7.5]);
        axis.wait_settled().await.unwrap();
    }

    #[tokio::test]
    async fn travel_limits_reject_without_moving() {
        let axis = SyntheticAxis::builder("z")
            .travel(0.0, 100.0)
            .initial_position(5.0)
            .build();
        let err = axis.move_abs(150.0).await.unwrap_err();
        assert!(err.is_out_of_range());
        assert_eq!(axis.position().await.unwrap(), 5.0);
        assert!(axis.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn realistic_mode_settles_with_delay() {
        let axis = SyntheticAxis::builder("y")
            .mode(SyntheticMode::Realistic)
            .build();
        let start = tokio::time::Instant::now();
        axis.wait_settled().await.unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_millis(20));
    }
}
