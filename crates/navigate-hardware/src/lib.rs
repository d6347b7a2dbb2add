//! Device topology, calibration and backend assembly for navigate.
//!
//! - [`config`]: TOML topology schema, loader and cross-field validation
//! - [`calibration`]: voltage/position transfer functions per axis
//! - [`topology`]: immutable, validated profiles with one active
//! - [`backends`]: closed enums of hardware backends per device class
//! - [`microscope`]: live devices of one profile

pub mod backends;
pub mod calibration;
pub mod config;
pub mod microscope;
pub mod topology;

pub use backends::{BackendSelection, SyntheticFaults};
pub use calibration::{AxisCalibration, CalibrationEngine, TransferFunction};
pub use microscope::Microscope;
pub use topology::{laser_axis, AxisBinding, DeviceTopology, MicroscopeProfiles};
