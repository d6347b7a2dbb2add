//! Depth-first execution of feature programs.
//!
//! Loops resolve their iteration count once, on entry; a feature that
//! changes the settings mid-loop affects the next entry, not the loop in
//! progress. The stop flag is checked between every node and iteration,
//! and an in-flight cycle always completes before the program unwinds.

use crate::context::AcquisitionContext;
use crate::feature::{FeatureCall, FeatureNode, FeatureProgram, Repeat};
use crate::features::FeatureCatalogue;
use crate::instrument::Instrument;
use futures::future::{BoxFuture, FutureExt};
use navigate_core::error::{NavigateError, Result};
use navigate_core::events::AcquisitionEvent;
use navigate_core::stop::StopHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument as _};
use uuid::Uuid;

/// What to do when an atomic feature fails with a hardware fault. Other
/// errors always abort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultPolicy {
    #[default]
    Abort,
    /// Reset the scheduler and re-run the feature, up to `max_attempts`
    /// runs in total.
    Retry { max_attempts: u32 },
    /// Reset the scheduler and continue with the next node.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Identifies this run in logs
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Cycles captured by this run
    pub cycles: u64,
}

pub struct FeatureExecutor {
    catalogue: FeatureCatalogue,
    policy: FaultPolicy,
}

impl FeatureExecutor {
    pub fn new(catalogue: FeatureCatalogue) -> Self {
        Self {
            catalogue,
            policy: FaultPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn catalogue(&self) -> &FeatureCatalogue {
        &self.catalogue
    }

    pub fn policy(&self) -> FaultPolicy {
        self.policy
    }

    /// Run `program` to completion, cancellation or failure.
    ///
    /// Cancellation is not an error: outputs are driven safe, a
    /// `Cancelled` event carries the context reached, and the scheduler is
    /// left `Idle`. Any other failure publishes `ProgramAborted` and is
    /// returned; a hardware fault leaves the scheduler `Faulted`.
    pub async fn run(
        &self,
        program: &FeatureProgram,
        instrument: &mut Instrument,
        context: &mut AcquisitionContext,
    ) -> Result<RunOutcome> {
        self.catalogue.check(program)?;
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, program = program.name());
        self.run_checked(program, instrument, context, run_id)
            .instrument(span)
            .await
    }

    async fn run_checked(
        &self,
        program: &FeatureProgram,
        instrument: &mut Instrument,
        context: &mut AcquisitionContext,
        run_id: Uuid,
    ) -> Result<RunOutcome> {
        let events = instrument.events().clone();
        events.publish(AcquisitionEvent::ProgramStarted {
            program: program.name().to_string(),
        });

        let first_cycle = context.cycles();
        let result = loop {
            let pass = self.run_nodes(program.nodes(), instrument, context).await;
            match (pass, program.repeat()) {
                (Ok(()), Repeat::UntilStopped) => {
                    if let Err(e) = checkpoint(instrument.stop()).await {
                        break Err(e);
                    }
                }
                (pass, _) => break pass,
            }
        };
        let cycles = context.cycles() - first_cycle;

        match result {
            Ok(()) => {
                events.publish(AcquisitionEvent::ProgramFinished {
                    program: program.name().to_string(),
                    cycles,
                });
                Ok(RunOutcome {
                    run_id,
                    status: RunStatus::Completed,
                    cycles,
                })
            }
            Err(NavigateError::Cancelled) => {
                if let Err(e) = instrument.safe_state().await {
                    warn!(error = %e, "Safe state after cancellation incomplete");
                }
                events.publish(AcquisitionEvent::Cancelled {
                    context: Some(context.snapshot()),
                });
                Ok(RunOutcome {
                    run_id,
                    status: RunStatus::Cancelled,
                    cycles,
                })
            }
            Err(e) => {
                if let Err(safe) = instrument.safe_state().await {
                    warn!(error = %safe, "Safe state after abort incomplete");
                }
                events.publish(AcquisitionEvent::ProgramAborted {
                    program: program.name().to_string(),
                    cause: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_nodes<'a>(
        &'a self,
        nodes: &'a [FeatureNode],
        instrument: &'a mut Instrument,
        context: &'a mut AcquisitionContext,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for node in nodes {
                checkpoint(instrument.stop()).await?;
                match node {
                    FeatureNode::Atomic(call) => self.run_call(call, instrument, context).await?,
                    FeatureNode::Loop { source, body } => {
                        let count = context.resolve(source);
                        debug!(?source, count, "Entering loop");
                        for index in 0..count {
                            checkpoint(instrument.stop()).await?;
                            context.enter_iteration(source, index);
                            self.run_nodes(body, instrument, context).await?;
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn run_call(
        &self,
        call: &FeatureCall,
        instrument: &mut Instrument,
        context: &mut AcquisitionContext,
    ) -> Result<()> {
        let handler = self.catalogue.get(&call.name)?;
        let start = context.cursor();
        let mut attempt = 1;
        loop {
            let err = match handler.run(instrument, context, &call.args).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_hardware_fault() => e,
                Err(e) => return Err(e),
            };
            match self.policy {
                FaultPolicy::Retry { max_attempts } if attempt < max_attempts => {
                    instrument.scheduler_mut().reset().await?;
                    context.rewind(start);
                    instrument.events().publish(AcquisitionEvent::StepRetried {
                        feature: call.name.clone(),
                        attempt,
                        cause: err.to_string(),
                    });
                    attempt += 1;
                }
                FaultPolicy::Skip => {
                    instrument.scheduler_mut().reset().await?;
                    instrument.events().publish(AcquisitionEvent::StepSkipped {
                        feature: call.name.clone(),
                        cause: err.to_string(),
                    });
                    return Ok(());
                }
                FaultPolicy::Abort | FaultPolicy::Retry { .. } => return Err(err),
            }
        }
    }
}

impl Default for FeatureExecutor {
    fn default() -> Self {
        Self::new(FeatureCatalogue::builtin())
    }
}

/// Give other tasks a turn, then honour a pending stop request.
async fn checkpoint(stop: &StopHandle) -> Result<()> {
    tokio::task::yield_now().await;
    if stop.is_requested() {
        Err(NavigateError::Cancelled)
    } else {
        Ok(())
    }
}
