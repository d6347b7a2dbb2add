//! `navigate-core`
//!
//! Core types and traits shared by every navigate crate.
//!
//! ## Key Types
//!
//! - [`NavigateError`]: error taxonomy (configuration, out of range,
//!   hardware fault, buffer overflow)
//! - Capability traits: [`Movable`], [`Triggerable`], [`FrameSource`],
//!   [`WaveformDrivable`], [`FilterSelect`]
//! - [`Frame`], [`FrameMetadata`], [`CycleContext`]: acquisition data
//! - [`EventBus`]: structured event broadcast
//! - [`StopHandle`]: cooperative cancellation

pub mod capabilities;
pub mod data;
pub mod error;
pub mod events;
pub mod limits;
pub mod stop;

pub use capabilities::{
    Camera, ChannelWaveform, FilterSelect, FrameSource, Movable, OutputTask, Triggerable,
    WaveformDrivable,
};
pub use data::{CapturedFrame, CycleContext, Frame, FrameMetadata};
pub use error::{DriverError, DriverErrorKind, NavigateError, Quantity, Result};
pub use events::{AcquisitionEvent, EventBus};
pub use stop::StopHandle;
