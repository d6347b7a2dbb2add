//! Circular frame buffer between the acquisition flow and the drain flow.
//!
//! A fixed ring of `N` slots (see [`DEFAULT_BUFFER_SLOTS`]) split into one
//! [`FrameWriter`] and one [`FrameReader`]. Neither half is `Clone`, so the
//! single-producer/single-consumer contract is enforced by ownership. The
//! reader never blocks the writer: the writer only stalls when every slot
//! holds an unconsumed frame, and then only as far as its
//! [`OverflowPolicy`] allows.
//!
//! [`FrameWriter::put`] always reports a full ring as
//! [`NavigateError::BufferOverflow`]. [`FrameWriter::submit`] applies the
//! configured policy on top of that.
//!
//! [`DEFAULT_BUFFER_SLOTS`]: navigate_core::limits::DEFAULT_BUFFER_SLOTS

use navigate_core::data::CapturedFrame;
use navigate_core::error::{NavigateError, Result};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// What the writer does when every slot is unconsumed.
///
/// There is deliberately no `Default`: the choice between losing frames and
/// stopping acquisition belongs to whoever configures the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Surface `BufferOverflow` to the caller, which stops acquisition.
    StopAcquisition,
    /// Discard the frame being submitted and continue.
    DropNewest,
    /// Wait up to `max_wait` for the reader to free a slot, then behave like
    /// `StopAcquisition`.
    Backpressure {
        #[serde(with = "humantime_serde")]
        max_wait: Duration,
    },
}

/// Result of a successful [`FrameWriter::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Discarded under [`OverflowPolicy::DropNewest`].
    Dropped,
}

/// Snapshot of buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub capacity: usize,
    pub queued: u64,
    pub taken: u64,
    pub overflows: u64,
    pub dropped: u64,
    /// Highest occupancy observed
    pub high_water: usize,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    frame_available: Notify,
    slot_freed: Notify,
    writer_closed: AtomicBool,
    queued: AtomicU64,
    taken: AtomicU64,
    overflows: AtomicU64,
    dropped: AtomicU64,
    high_water: AtomicUsize,
}

impl Shared {
    fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            queued: self.queued.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            high_water: self.high_water.load(Ordering::Relaxed),
        }
    }
}

/// Create a buffer with `slots` slots.
pub fn frame_buffer(slots: usize, policy: OverflowPolicy) -> Result<(FrameWriter, FrameReader)> {
    if slots == 0 {
        return Err(NavigateError::Configuration(
            "frame buffer needs at least one slot".into(),
        ));
    }
    let (producer, consumer) = HeapRb::<CapturedFrame>::new(slots).split();
    let shared = Arc::new(Shared {
        capacity: slots,
        frame_available: Notify::new(),
        slot_freed: Notify::new(),
        writer_closed: AtomicBool::new(false),
        queued: AtomicU64::new(0),
        taken: AtomicU64::new(0),
        overflows: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        high_water: AtomicUsize::new(0),
    });
    Ok((
        FrameWriter {
            producer,
            shared: shared.clone(),
            policy,
        },
        FrameReader { consumer, shared },
    ))
}

/// Producer half. Owned by the synchronization scheduler.
pub struct FrameWriter {
    producer: HeapProducer<CapturedFrame>,
    shared: Arc<Shared>,
    policy: OverflowPolicy,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("policy", &self.policy)
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl FrameWriter {
    /// Queue a frame, failing with `BufferOverflow` if no slot is free.
    pub fn put(&mut self, frame: CapturedFrame) -> Result<()> {
        self.try_push(frame).map_err(|_| self.overflow())
    }

    /// Queue a frame according to the configured [`OverflowPolicy`].
    pub async fn submit(&mut self, frame: CapturedFrame) -> Result<Submission> {
        match self.policy {
            OverflowPolicy::StopAcquisition => self.put(frame).map(|_| Submission::Queued),
            OverflowPolicy::DropNewest => match self.try_push(frame) {
                Ok(()) => Ok(Submission::Queued),
                Err(_) => {
                    self.shared.overflows.fetch_add(1, Ordering::Relaxed);
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(Submission::Dropped)
                }
            },
            OverflowPolicy::Backpressure { max_wait } => {
                let deadline = Instant::now() + max_wait;
                let mut frame = frame;
                let shared = Arc::clone(&self.shared);
                loop {
                    let freed = shared.slot_freed.notified();
                    match self.try_push(frame) {
                        Ok(()) => return Ok(Submission::Queued),
                        Err(rejected) => frame = rejected,
                    }
                    if tokio::time::timeout_at(deadline, freed).await.is_err() {
                        return Err(self.overflow());
                    }
                }
            }
        }
    }

    fn try_push(&mut self, frame: CapturedFrame) -> std::result::Result<(), CapturedFrame> {
        self.producer.push(frame)?;
        self.shared.queued.fetch_add(1, Ordering::Relaxed);
        self.shared
            .high_water
            .fetch_max(self.producer.len(), Ordering::Relaxed);
        self.shared.frame_available.notify_one();
        Ok(())
    }

    fn overflow(&self) -> NavigateError {
        self.shared.overflows.fetch_add(1, Ordering::Relaxed);
        NavigateError::BufferOverflow {
            capacity: self.shared.capacity,
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Frames queued but not yet taken.
    pub fn len(&self) -> usize {
        self.producer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producer.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.shared.writer_closed.store(true, Ordering::SeqCst);
        self.shared.frame_available.notify_one();
    }
}

/// Consumer half. Owned by the drain pipeline.
pub struct FrameReader {
    consumer: HeapConsumer<CapturedFrame>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl FrameReader {
    /// Oldest unconsumed frame, or `None` if no new frame has arrived.
    pub fn take(&mut self) -> Option<CapturedFrame> {
        let frame = self.consumer.pop()?;
        self.shared.taken.fetch_add(1, Ordering::Relaxed);
        self.shared.slot_freed.notify_one();
        Some(frame)
    }

    /// Wait for the next frame. Returns `None` once the writer has been
    /// dropped and every queued frame has been taken.
    pub async fn next(&mut self) -> Option<CapturedFrame> {
        let shared = Arc::clone(&self.shared);
        loop {
            let available = shared.frame_available.notified();
            if let Some(frame) = self.take() {
                return Some(frame);
            }
            if shared.writer_closed.load(Ordering::SeqCst) {
                // A frame may have landed between the pop and the flag check
                return self.take();
            }
            available.await;
        }
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }
}
