//! Error taxonomy for the acquisition core.
//!
//! `NavigateError` is shared by every crate in the workspace. Its variants
//! map onto the four failure classes the orchestration layers care about:
//!
//! - **Configuration** (`Configuration`, `UnsupportedCalibration`): raised
//!   while loading a topology or assembling a cycle. Never recovered
//!   silently; the caller must fix the configuration.
//! - **Out of range** (`OutOfRange`): a requested position or voltage lies
//!   outside declared bounds. Raised before any hardware write.
//! - **Hardware fault** (`HardwareFault`): timeout, NAK or disconnect from a
//!   backend. Aborts the in-flight cycle.
//! - **Buffer overflow** (`BufferOverflow`): a frame was captured but could
//!   not be queued.
//!
//! `Cancelled` and `InvalidState` cover control flow rather than faults.

use std::fmt;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Timeout,
    Nak,
    Disconnected,
    Configuration,
    Hardware,
    InvalidParameter,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Nak => "nak",
            DriverErrorKind::Disconnected => "disconnected",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
        };
        write!(f, "{}", label)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    pub driver_type: String,
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(driver_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(driver_type, DriverErrorKind::Timeout, message)
    }
}

// =============================================================================
// Application Errors
// =============================================================================

/// Which side of a calibration a bounds check was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Position,
    Voltage,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Position => write!(f, "position"),
            Quantity::Voltage => write!(f, "voltage"),
        }
    }
}

/// Primary error type for navigate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavigateError {
    /// Semantic problem in the device topology or experiment settings:
    /// channel collisions, unresolved axis mappings, mismatched waveform
    /// lengths.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Calibration expression outside the supported closed set.
    #[error("Unsupported calibration for '{axis}': {expression:?}")]
    UnsupportedCalibration { axis: String, expression: String },

    /// Requested position or voltage outside declared bounds.
    #[error("{quantity} {value} out of range for '{axis}' (allowed [{min}, {max}])")]
    OutOfRange {
        axis: String,
        quantity: Quantity,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Hardware fault: {0}")]
    HardwareFault(#[from] DriverError),

    /// Every slot of the frame buffer holds an unconsumed frame.
    #[error("Frame buffer overflow: all {capacity} slots unconsumed")]
    BufferOverflow { capacity: usize },

    #[error("Acquisition cancelled")]
    Cancelled,

    /// Operation requested in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl NavigateError {
    /// True for errors that are fatal at load time.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NavigateError::Configuration(_) | NavigateError::UnsupportedCalibration { .. }
        )
    }

    pub fn is_hardware_fault(&self) -> bool {
        matches!(self, NavigateError::HardwareFault(_))
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, NavigateError::OutOfRange { .. })
    }
}

/// Convenience alias for results using the navigate error type.
pub type Result<T> = std::result::Result<T, NavigateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_display_includes_kind() {
        let err = DriverError::timeout("synthetic_camera", "no frame after 120 ms");
        assert_eq!(
            err.to_string(),
            "Driver 'synthetic_camera' timeout error: no frame after 120 ms"
        );
    }

    #[test]
    fn classification_helpers() {
        let fault: NavigateError = DriverError::new("daq", DriverErrorKind::Nak, "rejected").into();
        assert!(fault.is_hardware_fault());
        assert!(!fault.is_configuration());

        let unsupported = NavigateError::UnsupportedCalibration {
            axis: "x".into(),
            expression: "x^2".into(),
        };
        assert!(unsupported.is_configuration());

        let range = NavigateError::OutOfRange {
            axis: "galvo_0".into(),
            quantity: Quantity::Voltage,
            value: 7.5,
            min: -5.0,
            max: 5.0,
        };
        assert!(range.is_out_of_range());
        assert!(range.to_string().contains("voltage 7.5"));
    }
}
