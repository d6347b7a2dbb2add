//! Structured acquisition events.
//!
//! The scheduler and executor publish every lifecycle transition worth
//! reporting on an [`EventBus`]. Subscribers (telemetry, UIs, tests) receive
//! a copy through a tokio broadcast channel; every event is also logged
//! through `tracing` so a run without subscribers still leaves a trail.

use crate::data::CycleContext;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events emitted while running acquisition programs.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    ProgramStarted {
        program: String,
    },
    ProgramFinished {
        program: String,
        cycles: u64,
    },
    /// The program stopped because a step failed.
    ProgramAborted {
        program: String,
        cause: String,
    },
    /// An external stop request was honoured.
    Cancelled {
        context: Option<CycleContext>,
    },
    CycleStarted {
        context: CycleContext,
    },
    CycleCompleted {
        context: CycleContext,
        elapsed: Duration,
    },
    /// A captured frame could not be queued. `dropped` is true when the
    /// frame was discarded by policy.
    Overflow {
        context: CycleContext,
        capacity: usize,
        dropped: bool,
    },
    Fault {
        context: Option<CycleContext>,
        cause: String,
    },
    /// The executor is re-running a failed step.
    StepRetried {
        feature: String,
        attempt: u32,
        cause: String,
    },
    /// The executor skipped a failed step and continued.
    StepSkipped {
        feature: String,
        cause: String,
    },
}

impl AcquisitionEvent {
    fn log(&self) {
        match self {
            AcquisitionEvent::ProgramStarted { program } => {
                info!(program = %program, "Program started");
            }
            AcquisitionEvent::ProgramFinished { program, cycles } => {
                info!(program = %program, cycles, "Program finished");
            }
            AcquisitionEvent::ProgramAborted { program, cause } => {
                error!(program = %program, cause = %cause, "Program aborted");
            }
            AcquisitionEvent::Cancelled { context } => match context {
                Some(ctx) => info!(context = %ctx, "Acquisition cancelled"),
                None => info!("Acquisition cancelled"),
            },
            AcquisitionEvent::CycleStarted { context } => {
                debug!(
                    cycle = context.cycle,
                    channel = context.channel,
                    z = context.z_index,
                    position = context.position_index,
                    "Cycle started"
                );
            }
            AcquisitionEvent::CycleCompleted { context, elapsed } => {
                debug!(cycle = context.cycle, elapsed_us = elapsed.as_micros() as u64, "Cycle completed");
            }
            AcquisitionEvent::Overflow {
                context,
                capacity,
                dropped,
            } => {
                warn!(context = %context, capacity, dropped, "Frame buffer overflow");
            }
            AcquisitionEvent::Fault { context, cause } => match context {
                Some(ctx) => error!(context = %ctx, cause = %cause, "Hardware fault"),
                None => error!(cause = %cause, "Hardware fault"),
            },
            AcquisitionEvent::StepRetried {
                feature,
                attempt,
                cause,
            } => {
                warn!(feature = %feature, attempt, cause = %cause, "Retrying step");
            }
            AcquisitionEvent::StepSkipped { feature, cause } => {
                warn!(feature = %feature, cause = %cause, "Skipping failed step");
            }
        }
    }
}

/// Broadcast hub for [`AcquisitionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AcquisitionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AcquisitionEvent> {
        self.tx.subscribe()
    }

    /// Log and broadcast an event. Having no subscribers is not an error.
    pub fn publish(&self, event: AcquisitionEvent) {
        event.log();
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::limits::EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let context = CycleContext {
            cycle: 1,
            channel: 0,
            ..Default::default()
        };
        bus.publish(AcquisitionEvent::CycleStarted { context });
        assert_eq!(
            rx.recv().await.unwrap(),
            AcquisitionEvent::CycleStarted { context }
        );
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(AcquisitionEvent::ProgramStarted {
            program: "single".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn every_event_is_logged() {
        let bus = EventBus::default();
        bus.publish(AcquisitionEvent::StepSkipped {
            feature: "Autofocus".into(),
            cause: "stage timeout".into(),
        });
        assert!(logs_contain("Skipping failed step"));
        assert!(logs_contain("Autofocus"));
    }
}
