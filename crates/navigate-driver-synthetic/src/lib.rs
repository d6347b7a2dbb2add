//! Synthetic hardware backends for navigate.
//!
//! These devices implement the navigate capability traits entirely in
//! memory. They back the `synthetic` hardware type in device topologies and
//! are used throughout the test suites.
//!
//! # Modes
//!
//! - **Instant**: zero delays, deterministic behavior for unit tests
//! - **Realistic**: hardware-like timing for integration runs
//! - **Chaos**: realistic timing with random failures
//!
//! # Error injection
//!
//! ```rust,ignore
//! use navigate_driver_synthetic::{ErrorConfig, ErrorScenario, SyntheticDaq};
//!
//! let daq = SyntheticDaq::builder()
//!     .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
//!         operation: "wait_done",
//!         after: 2,
//!     }))
//!     .build();
//! ```

pub mod common;
pub mod pattern;
pub mod synthetic_axis;
pub mod synthetic_camera;
pub mod synthetic_daq;
pub mod synthetic_filter_wheel;

pub use common::{ErrorConfig, ErrorScenario, SyntheticMode, TimingConfig};
pub use synthetic_axis::SyntheticAxis;
pub use synthetic_camera::{FocusModel, SyntheticCamera};
pub use synthetic_daq::SyntheticDaq;
pub use synthetic_filter_wheel::SyntheticFilterWheel;
