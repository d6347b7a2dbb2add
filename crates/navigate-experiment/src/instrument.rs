//! The devices a feature program drives, bundled for the executor.

use crate::context::AcquisitionContext;
use navigate_core::error::{NavigateError, Result};
use navigate_core::events::EventBus;
use navigate_core::stop::StopHandle;
use navigate_hardware::Microscope;
use navigate_storage::{BufferStats, FrameWriter};
use navigate_sync::{CycleOutcome, CyclePlanner, Delivery, SchedulerState, SynchronizationScheduler};
use std::sync::Arc;
use tracing::{debug, warn};

/// Active microscope, its cycle planner and scheduler, and the stop flag
/// of the current run.
pub struct Instrument {
    microscope: Arc<Microscope>,
    planner: CyclePlanner,
    scheduler: SynchronizationScheduler,
    events: EventBus,
    stop: StopHandle,
}

impl Instrument {
    /// `writer` is the producer half of the frame buffer; the scheduler
    /// is its only user.
    pub fn new(
        microscope: Arc<Microscope>,
        writer: FrameWriter,
        events: EventBus,
        stop: StopHandle,
    ) -> Self {
        let planner = CyclePlanner::new(microscope.topology().clone());
        let scheduler = SynchronizationScheduler::new(
            microscope.daq_handle(),
            microscope.camera_handle(),
            writer,
            events.clone(),
        );
        Self {
            microscope,
            planner,
            scheduler,
            events,
            stop,
        }
    }

    pub fn microscope(&self) -> &Microscope {
        &self.microscope
    }

    pub fn scheduler(&self) -> &SynchronizationScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut SynchronizationScheduler {
        &mut self.scheduler
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.scheduler.buffer_stats()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn stop(&self) -> &StopHandle {
        &self.stop
    }

    /// Make `index` the current channel and move its filter into place.
    pub async fn prepare_channel(&mut self, context: &mut AcquisitionContext, index: usize) -> Result<()> {
        context.set_channel(index)?;
        let filter = context.settings().channel(index)?.filter.clone();
        if let Some(filter) = filter {
            self.microscope.select_filter(&filter).await?;
        }
        debug!(channel = index, "Channel prepared");
        Ok(())
    }

    /// Capture one cycle with the current channel. A pending stop request
    /// is honoured before any hardware is touched.
    pub async fn capture(
        &mut self,
        context: &mut AcquisitionContext,
        delivery: Delivery,
    ) -> Result<CycleOutcome> {
        if self.stop.is_requested() {
            return Err(NavigateError::Cancelled);
        }
        let channel = context.channel().unwrap_or(0);
        let setup = context.settings().channel(channel)?.setup();
        let plan = self.planner.plan(&setup)?;
        let cycle = context.next_cycle();
        self.scheduler.run_cycle(&plan, cycle, delivery).await
    }

    /// Abandon the current cycle and put every output in its safe state.
    pub async fn safe_state(&mut self) -> Result<()> {
        let scheduler = self.scheduler.force_safe().await;
        let microscope = self.microscope.safe_state().await;
        if let Err(e) = &microscope {
            warn!(error = %e, "Microscope safe state incomplete");
        }
        scheduler.and(microscope)
    }
}
