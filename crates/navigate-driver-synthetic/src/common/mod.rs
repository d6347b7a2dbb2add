//! Shared infrastructure for synthetic devices: operating modes, timing,
//! seeded randomness and error injection.

mod errors;
mod mode;
mod rng;
mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::SyntheticMode;
pub use rng::SyntheticRng;
pub use timing::TimingConfig;

/// Sleep for `ms` milliseconds when the mode simulates hardware timing.
pub(crate) async fn simulate_delay(mode: SyntheticMode, ms: u64) {
    if mode.simulates_timing() && ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}
