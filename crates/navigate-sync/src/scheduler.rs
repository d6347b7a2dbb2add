//! Synchronization scheduler.
//!
//! Drives one cycle at a time through
//! `Idle -> Armed -> Running -> Draining -> Idle`. Any device error moves
//! the scheduler to `Faulted`, zeroes the DAQ outputs and publishes a fault
//! event carrying the cycle context. Nothing is retried here: a faulted
//! scheduler refuses new cycles until [`SynchronizationScheduler::reset`].
//!
//! Every device call is bounded by a timeout; expiry is a hardware fault.

use crate::plan::CyclePlan;
use chrono::Utc;
use navigate_core::capabilities::{Camera, WaveformDrivable};
use navigate_core::data::{CapturedFrame, CycleContext, Frame, FrameMetadata};
use navigate_core::error::{DriverError, NavigateError, Result};
use navigate_core::events::{AcquisitionEvent, EventBus};
use navigate_core::limits::DEVICE_COMMAND_TIMEOUT;
use navigate_storage::{BufferStats, FrameWriter, Submission};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const DRIVER: &str = "scheduler";

/// Slack on top of a device's own timeout before the scheduler gives up.
const TIMEOUT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
    Running,
    Draining,
    Faulted,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Armed => write!(f, "armed"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Draining => write!(f, "draining"),
            SchedulerState::Faulted => write!(f, "faulted"),
        }
    }
}

/// Where a cycle's frame goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Into the circular frame buffer.
    #[default]
    Buffer,
    /// Back to the caller (autofocus scoring), bypassing the buffer.
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Queued,
    /// Discarded by the buffer's overflow policy.
    Dropped,
    Returned(Frame),
}

impl CycleOutcome {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            CycleOutcome::Returned(frame) => Some(frame),
            _ => None,
        }
    }
}

async fn bounded<T>(
    operation: &str,
    limit: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, future).await.map_err(|_| {
        NavigateError::HardwareFault(DriverError::timeout(
            DRIVER,
            format!("{operation} did not complete within {} ms", limit.as_millis()),
        ))
    })?
}

pub struct SynchronizationScheduler {
    daq: Arc<dyn WaveformDrivable>,
    camera: Arc<dyn Camera>,
    writer: FrameWriter,
    events: EventBus,
    state: SchedulerState,
    armed: Option<CyclePlan>,
    context: Option<CycleContext>,
}

impl SynchronizationScheduler {
    pub fn new(
        daq: Arc<dyn WaveformDrivable>,
        camera: Arc<dyn Camera>,
        writer: FrameWriter,
        events: EventBus,
    ) -> Self {
        Self {
            daq,
            camera,
            writer,
            events,
            state: SchedulerState::Idle,
            armed: None,
            context: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.writer.stats()
    }

    fn expect_state(&self, expected: SchedulerState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(NavigateError::InvalidState(format!(
                "cannot {action} while {}",
                self.state
            )))
        }
    }

    /// Run one full cycle: arm, fire, drain.
    pub async fn run_cycle(
        &mut self,
        plan: &CyclePlan,
        context: CycleContext,
        delivery: Delivery,
    ) -> Result<CycleOutcome> {
        self.expect_state(SchedulerState::Idle, "start a cycle")?;
        let started = Instant::now();
        self.events
            .publish(AcquisitionEvent::CycleStarted { context });

        self.arm(plan, context).await?;
        self.fire().await?;
        let outcome = self.drain(delivery).await?;

        self.events.publish(AcquisitionEvent::CycleCompleted {
            context,
            elapsed: started.elapsed(),
        });
        Ok(outcome)
    }

    /// `Idle -> Armed`: load the cycle's waveforms and arm the camera.
    pub async fn arm(&mut self, plan: &CyclePlan, context: CycleContext) -> Result<()> {
        self.expect_state(SchedulerState::Idle, "arm")?;
        self.context = Some(context);
        let result = self.arm_devices(plan).await;
        self.settle(result, SchedulerState::Armed).await?;
        self.armed = Some(plan.clone());
        debug!(cycle = context.cycle, "Scheduler armed");
        Ok(())
    }

    async fn arm_devices(&self, plan: &CyclePlan) -> Result<()> {
        let exposure = plan.timing().exposure.as_secs_f64();
        bounded("discard pending frames", DEVICE_COMMAND_TIMEOUT, self.camera.discard_pending()).await?;
        bounded("set exposure", DEVICE_COMMAND_TIMEOUT, self.camera.set_exposure(exposure)).await?;
        bounded("arm camera", DEVICE_COMMAND_TIMEOUT, self.camera.arm()).await?;
        bounded("load waveforms", DEVICE_COMMAND_TIMEOUT, self.daq.load(plan.task())).await
    }

    /// `Armed -> Running -> Draining`: fire the master trigger and wait for
    /// the task to emit every sample, then hold terminal values.
    pub async fn fire(&mut self) -> Result<()> {
        self.expect_state(SchedulerState::Armed, "fire")?;
        let timing = match &self.armed {
            Some(plan) => *plan.timing(),
            None => return Err(NavigateError::InvalidState("no cycle armed".into())),
        };
        let daq_timeout = timing.daq_timeout();

        let result = bounded("master trigger", daq_timeout, self.daq.start()).await;
        self.settle(result, SchedulerState::Running).await?;

        let result = async {
            bounded(
                "waveform output",
                daq_timeout + TIMEOUT_GRACE,
                self.daq.wait_done(daq_timeout),
            )
            .await?;
            bounded("hold outputs", DEVICE_COMMAND_TIMEOUT, self.daq.hold()).await
        }
        .await;
        self.settle(result, SchedulerState::Draining).await
    }

    /// `Draining -> Idle`: wait for the frame and deliver it.
    pub async fn drain(&mut self, delivery: Delivery) -> Result<CycleOutcome> {
        self.expect_state(SchedulerState::Draining, "drain")?;
        let context = self.context.unwrap_or_default();
        let frame_timeout = match &self.armed {
            Some(plan) => plan.timing().frame_timeout(),
            None => return Err(NavigateError::InvalidState("no cycle armed".into())),
        };

        let result = async {
            let frame = bounded(
                "frame readout",
                frame_timeout + TIMEOUT_GRACE,
                self.camera.wait_frame(frame_timeout),
            )
            .await?;
            bounded("disarm camera", DEVICE_COMMAND_TIMEOUT, self.camera.disarm()).await?;
            Ok(frame)
        }
        .await;
        let frame = self.settle(result, SchedulerState::Draining).await?;
        self.armed = None;

        if delivery == Delivery::Return {
            self.state = SchedulerState::Idle;
            return Ok(CycleOutcome::Returned(frame));
        }

        let captured = CapturedFrame {
            frame,
            metadata: FrameMetadata::from_context(&context, Utc::now()),
        };
        let submission = self.writer.submit(captured).await;
        self.state = SchedulerState::Idle;
        match submission {
            Ok(Submission::Queued) => Ok(CycleOutcome::Queued),
            Ok(Submission::Dropped) => {
                self.events.publish(AcquisitionEvent::Overflow {
                    context,
                    capacity: self.writer.capacity(),
                    dropped: true,
                });
                Ok(CycleOutcome::Dropped)
            }
            Err(e) => {
                self.events.publish(AcquisitionEvent::Overflow {
                    context,
                    capacity: self.writer.capacity(),
                    dropped: false,
                });
                Err(e)
            }
        }
    }

    /// Apply a phase result: advance on success, fault on error.
    async fn settle<T>(&mut self, result: Result<T>, next: SchedulerState) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                self.fault(&e).await;
                Err(e)
            }
        }
    }

    async fn fault(&mut self, cause: &NavigateError) {
        self.state = SchedulerState::Faulted;
        self.armed = None;
        if let Err(e) = self.outputs_safe().await {
            warn!(error = %e, "Could not reach safe state after fault");
        }
        self.events.publish(AcquisitionEvent::Fault {
            context: self.context,
            cause: cause.to_string(),
        });
    }

    async fn outputs_safe(&self) -> Result<()> {
        let zeroed = bounded("zero outputs", DEVICE_COMMAND_TIMEOUT, self.daq.zero()).await;
        let disarmed = bounded("disarm camera", DEVICE_COMMAND_TIMEOUT, self.camera.disarm()).await;
        let discarded =
            bounded("discard pending frames", DEVICE_COMMAND_TIMEOUT, self.camera.discard_pending()).await;
        zeroed.and(disarmed).and(discarded)
    }

    /// Abandon any in-flight cycle and drive outputs to zero. A faulted
    /// scheduler stays faulted; otherwise it returns to `Idle`.
    pub async fn force_safe(&mut self) -> Result<()> {
        self.armed = None;
        let result = self.outputs_safe().await;
        if self.state != SchedulerState::Faulted {
            self.state = SchedulerState::Idle;
        }
        result
    }

    /// Clear a fault. Outputs are zeroed again before returning to `Idle`.
    pub async fn reset(&mut self) -> Result<()> {
        self.outputs_safe().await?;
        self.armed = None;
        self.context = None;
        self.state = SchedulerState::Idle;
        debug!("Scheduler reset");
        Ok(())
    }
}
