//! Synthetic filter wheel.

use crate::common::{simulate_delay, ErrorConfig, SyntheticMode, TimingConfig};
use async_trait::async_trait;
use navigate_core::capabilities::FilterSelect;
use navigate_core::error::{DriverError, DriverErrorKind, NavigateError, Result};
use parking_lot::Mutex;

const DRIVER: &str = "synthetic_filter_wheel";

/// Filter wheel holding a fixed list of named filters.
#[derive(Debug)]
pub struct SyntheticFilterWheel {
    filters: Vec<String>,
    mode: SyntheticMode,
    error_config: ErrorConfig,
    timing: TimingConfig,
    current: Mutex<Option<String>>,
    selections: Mutex<Vec<String>>,
}

impl SyntheticFilterWheel {
    pub fn new<I, S>(filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filters: filters.into_iter().map(Into::into).collect(),
            mode: SyntheticMode::Instant,
            error_config: ErrorConfig::none(),
            timing: TimingConfig::filter_wheel(),
            current: Mutex::new(None),
            selections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(mut self, mode: SyntheticMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    /// Every filter selected, in order.
    pub fn selections(&self) -> Vec<String> {
        self.selections.lock().clone()
    }
}

#[async_trait]
impl FilterSelect for SyntheticFilterWheel {
    async fn select(&self, filter: &str) -> Result<()> {
        self.error_config.check_operation(DRIVER, "select")?;
        if !self.filters.iter().any(|f| f == filter) {
            return Err(NavigateError::HardwareFault(DriverError::new(
                DRIVER,
                DriverErrorKind::InvalidParameter,
                format!("unknown filter '{filter}'"),
            )));
        }
        simulate_delay(self.mode, self.timing.settling_time_ms).await;
        *self.current.lock() = Some(filter.to_string());
        self.selections.lock().push(filter.to_string());
        Ok(())
    }

    async fn current(&self) -> Result<Option<String>> {
        Ok(self.current.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn selects_known_filters() {
        let wheel = SyntheticFilterWheel::new(["Empty", "GFP - FF01-515/30"]);
        assert_eq!(wheel.current().await.unwrap(), None);
        wheel.select("GFP - FF01-515/30").await.unwrap();
        assert_eq!(
            wheel.current().await.unwrap().as_deref(),
            Some("GFP - FF01-515/30")
        );
        assert!(wheel.select("RFP").await.is_err());
        assert_eq!(wheel.selections().len(), 1);
    }
}
