//! Hardware synchronization for navigate.
//!
//! - [`waveform`]: per-channel sample buffers for one cycle period
//! - [`cycle`]: settle/delay/exposure timing of a cycle
//! - [`plan`]: the complete output task for one channel's cycle
//! - [`scheduler`]: the arm/fire/drain state machine

pub mod cycle;
pub mod plan;
pub mod scheduler;
pub mod waveform;

pub use cycle::CycleTiming;
pub use plan::{ChannelSetup, CyclePlan, CyclePlanner, RemoteFocusSetting};
pub use scheduler::{CycleOutcome, Delivery, SchedulerState, SynchronizationScheduler};
pub use waveform::{synthesize, Shape, WaveformSpec, DIGITAL_HIGH};
