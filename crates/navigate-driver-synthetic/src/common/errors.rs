//! Error injection framework for synthetic devices.
//!
//! Enables configurable failures for resilience testing. Failures are
//! reported as [`DriverError`]s so they flow through the same
//! `HardwareFault` path as real backend faults.

use super::rng::SyntheticRng;
use navigate_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration.
///
/// Clones share counters, so a device and the test that built it observe the
/// same state.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0), `"*"` matches any operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<SyntheticRng>,
    state: Arc<Mutex<ErrorState>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Succeed `count` times, then fail with a hardware error
    FailAfterN {
        operation: &'static str,
        count: u32,
    },
    /// Succeed `after` times, then time out
    Timeout {
        operation: &'static str,
        after: u32,
    },
    /// Device rejects the command
    Nak {
        operation: &'static str,
    },
    /// Device drops off the bus on the next operation and stays gone
    Disconnect,
    /// Hardware fault with specific code, latched until reset
    HardwareFault {
        code: u32,
    },
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<&'static str, u32>,
    disconnected: bool,
    hardware_fault_code: u32,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures on every operation.
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(SyntheticRng::new(seed)),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    pub fn is_none(&self) -> bool {
        self.failure_rates.is_empty() && self.scenarios.is_empty()
    }

    /// Check whether an operation should fail and return the injected error.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: &'static str,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.disconnected {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Disconnected,
                "device disconnected",
            ));
        }

        if state.hardware_fault_code != 0 {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("hardware fault code {}", state.hardware_fault_code),
            ));
        }

        let calls = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && calls > *count => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("injected failure after {} operations", count),
                    ));
                }
                ErrorScenario::Timeout {
                    operation: op,
                    after,
                } if *op == operation && calls > *after => {
                    return Err(DriverError::timeout(
                        driver_type,
                        format!("operation '{}' timed out", operation),
                    ));
                }
                ErrorScenario::Nak { operation: op } if *op == operation => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Nak,
                        format!("command '{}' rejected", operation),
                    ));
                }
                ErrorScenario::Disconnect => {
                    state.disconnected = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Disconnected,
                        "device disconnected",
                    ));
                }
                ErrorScenario::HardwareFault { code } => {
                    state.hardware_fault_code = *code;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Hardware,
                        format!("hardware fault code {}", code),
                    ));
                }
                _ => {}
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if self.rng.should_fail(rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Clear counters and latched faults.
    pub fn reset(&self) {
        *self.state.lock() = ErrorState::default();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("test_driver", "move_abs").is_ok());
        }
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("test_driver", "read").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: "trigger",
            count: 3,
        });
        for _ in 0..3 {
            assert!(config.check_operation("cam", "trigger").is_ok());
        }
        let err = config.check_operation("cam", "trigger").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        // Other operations unaffected
        assert!(config.check_operation("cam", "arm").is_ok());
    }

    #[test]
    fn test_timeout_after() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "wait_done",
            after: 1,
        });
        assert!(config.check_operation("daq", "wait_done").is_ok());
        let err = config.check_operation("daq", "wait_done").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }

    #[test]
    fn test_disconnect_latches_until_reset() {
        let config = ErrorConfig::scenario(ErrorScenario::Disconnect);
        assert!(config.check_operation("stage", "move_abs").is_err());
        let err = config.check_operation("stage", "position").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Disconnected);
        config.reset();
        // Scenario fires again on the next call after reset
        assert!(config.check_operation("stage", "position").is_err());
    }

    #[test]
    fn test_nak() {
        let config = ErrorConfig::scenario(ErrorScenario::Nak { operation: "load" });
        let err = config.check_operation("daq", "load").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Nak);
        assert!(config.check_operation("daq", "start").is_ok());
    }
}
