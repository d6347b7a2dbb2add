//! Feature programs and their execution.
//!
//! An acquisition is a [`FeatureProgram`]: a tree of named atomic features
//! and loops over counts or settings-derived sources. The
//! [`FeatureExecutor`] walks it depth-first against an [`Instrument`],
//! threading an [`AcquisitionContext`] that records the channel, z-step,
//! position and timepoint of every captured cycle.
//!
//! ```text
//! ExperimentSettings ──► AcquisitionContext ─┐
//! FeatureProgram ────────► FeatureExecutor ──┼──► Instrument ──► SynchronizationScheduler
//! FeatureCatalogue ──────────────────────────┘                    └──► frame buffer
//! ```

pub mod context;
pub mod executor;
pub mod feature;
pub mod features;
pub mod instrument;
pub mod modes;
pub mod settings;

pub use context::{AcquisitionContext, Cursor};
pub use executor::{FaultPolicy, FeatureExecutor, RunOutcome, RunStatus};
pub use feature::{FeatureCall, FeatureNode, FeatureProgram, IterationSource, NamedSource, Repeat, LOOP_BY_COUNT};
pub use features::{FeatureCatalogue, FeatureHandler};
pub use instrument::Instrument;
pub use modes::AcquisitionMode;
pub use settings::{AutofocusSettings, ChannelSettings, ExperimentSettings, StackOrdering, ZStackSettings};
