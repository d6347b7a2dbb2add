//! Frame buffering for navigate.
//!
//! - [`frame_buffer`]: fixed-capacity single-producer/single-consumer ring
//!   between the synchronization scheduler and the drain pipeline
//! - [`DrainPipeline`]: the one logical consumer, fanning frames out to
//!   [`FrameSink`]s

pub mod frame_buffer;
pub mod pipeline;

pub use frame_buffer::{
    frame_buffer, BufferStats, FrameReader, FrameWriter, OverflowPolicy, Submission,
};
pub use pipeline::{DrainPipeline, DrainReport, FrameSink, MemorySink};
