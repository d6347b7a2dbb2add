//! Operational modes for synthetic devices.
//!
//! - **Instant**: zero delays, deterministic behavior for unit tests
//! - **Realistic**: hardware-like timing for integration runs
//! - **Chaos**: realistic timing plus random failures for resilience testing

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyntheticMode {
    #[default]
    Instant,
    Realistic,
    Chaos,
}

impl SyntheticMode {
    pub fn simulates_timing(self) -> bool {
        !matches!(self, SyntheticMode::Instant)
    }
}
