//! Drain side of the frame buffer.
//!
//! A [`DrainPipeline`] is the single logical consumer of a [`FrameReader`].
//! Every frame it takes is handed to each attached [`FrameSink`] in order,
//! so several save or processing stages can observe the same frame without
//! the buffer itself having more than one consumer.

use crate::frame_buffer::FrameReader;
use async_trait::async_trait;
use navigate_core::data::{CapturedFrame, Frame, FrameMetadata};
use navigate_core::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Destination for drained frames (file writers, live display, analysis).
#[async_trait]
pub trait FrameSink: Send {
    fn name(&self) -> &str;

    async fn accept(&mut self, frame: &Frame, metadata: &FrameMetadata) -> Result<()>;

    /// Called once after the last frame.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps every frame in memory.
#[derive(Debug, Clone)]
pub struct MemorySink {
    name: String,
    frames: Arc<Mutex<Vec<CapturedFrame>>>,
    finished: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(Mutex::new(false)),
        }
    }

    /// Copy of everything accepted so far. Clones share storage, so a clone
    /// kept outside the pipeline can inspect it.
    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames.lock().clone()
    }

    pub fn metadata(&self) -> Vec<FrameMetadata> {
        self.frames.lock().iter().map(|f| f.metadata).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&mut self, frame: &Frame, metadata: &FrameMetadata) -> Result<()> {
        self.frames.lock().push(CapturedFrame {
            frame: frame.clone(),
            metadata: *metadata,
        });
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }
}

/// Summary returned when a drain completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub frames: u64,
}

/// Fan-out consumer for one frame buffer.
#[derive(Default)]
pub struct DrainPipeline {
    sinks: Vec<Box<dyn FrameSink>>,
}

impl DrainPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Drain until the writer is dropped and the buffer is empty.
    ///
    /// A sink error stops the drain; frames still in the buffer stay there.
    pub async fn run(mut self, mut reader: FrameReader) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(captured) = reader.next().await {
            for sink in self.sinks.iter_mut() {
                if let Err(e) = sink.accept(&captured.frame, &captured.metadata).await {
                    error!(sink = sink.name(), cycle = captured.metadata.cycle, error = %e, "Sink rejected frame");
                    return Err(e);
                }
            }
            report.frames += 1;
            debug!(cycle = captured.metadata.cycle, "Frame drained");
        }
        for sink in self.sinks.iter_mut() {
            sink.finish().await?;
        }
        info!(frames = report.frames, "Drain complete");
        Ok(report)
    }

    /// Run the drain on its own task, concurrent with acquisition.
    pub fn spawn(self, reader: FrameReader) -> JoinHandle<Result<DrainReport>> {
        tokio::spawn(self.run(reader))
    }
}
