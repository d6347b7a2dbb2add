//! Feature programs run end to end against the synthetic mesoscale profile.

use async_trait::async_trait;
use navigate_core::error::Result;
use navigate_core::events::{AcquisitionEvent, EventBus};
use navigate_core::stop::StopHandle;
use navigate_driver_synthetic::{ErrorConfig, ErrorScenario};
use navigate_experiment::modes::{continuous, single, zstack};
use navigate_experiment::{
    AcquisitionContext, AutofocusSettings, ExperimentSettings, FaultPolicy, FeatureCatalogue,
    FeatureExecutor, FeatureHandler, FeatureNode, FeatureProgram, Instrument, NamedSource, Repeat,
    RunStatus, StackOrdering, ZStackSettings,
};
use navigate_hardware::config::load_topology_from_str;
use navigate_hardware::{BackendSelection, Microscope, MicroscopeProfiles, SyntheticFaults};
use navigate_storage::{frame_buffer, FrameReader, OverflowPolicy};
use navigate_sync::SchedulerState;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const DEMO: &str = include_str!("../../../config/microscopes.toml");

struct Rig {
    microscope: Arc<Microscope>,
    instrument: Instrument,
    reader: FrameReader,
    events: broadcast::Receiver<AcquisitionEvent>,
    bus: EventBus,
    stop: StopHandle,
}

impl Rig {
    fn new(faults: SyntheticFaults) -> Self {
        let profiles =
            MicroscopeProfiles::from_file_config(load_topology_from_str(DEMO).unwrap()).unwrap();
        let microscope = Arc::new(
            Microscope::assemble_with(
                profiles.active().unwrap(),
                BackendSelection::AsConfigured,
                &faults,
            )
            .unwrap(),
        );
        let (writer, reader) = frame_buffer(64, OverflowPolicy::StopAcquisition).unwrap();
        let bus = EventBus::new(1024);
        let events = bus.subscribe();
        let stop = StopHandle::new();
        let instrument = Instrument::new(microscope.clone(), writer, bus.clone(), stop.clone());
        Self {
            microscope,
            instrument,
            reader,
            events,
            bus,
            stop,
        }
    }

    fn with_daq_faults(scenario: ErrorScenario) -> Self {
        Self::new(SyntheticFaults {
            daq: ErrorConfig::scenario(scenario),
            ..Default::default()
        })
    }

    /// (channel, z, position) of every buffered frame, in capture order.
    fn captured(&mut self) -> Vec<(usize, usize, usize)> {
        let mut out = Vec::new();
        while let Some(frame) = self.reader.take() {
            let m = frame.metadata;
            out.push((m.channel, m.z_index, m.position_index));
        }
        out
    }

    fn drain_events(&mut self) -> Vec<AcquisitionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn daq_is_safe(&self) -> bool {
        self.microscope.daq().as_synthetic().unwrap().is_safe()
    }
}

fn settings(lasers: &[&str]) -> ExperimentSettings {
    let mut settings = ExperimentSettings::single_channel(lasers[0], 20.0);
    settings.channels[0].exposure = Duration::from_millis(5);
    for laser in &lasers[1..] {
        let mut channel = settings.channels[0].clone();
        channel.name = laser.to_string();
        channel.laser = laser.to_string();
        settings.channels.push(channel);
    }
    settings
}

fn stack(steps: usize) -> Option<ZStackSettings> {
    Some(ZStackSettings {
        axis: "z".into(),
        start: 0.0,
        step: 10.0,
        steps,
    })
}

#[tokio::test]
async fn zstack_per_stack_runs_each_channel_through_the_stack() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm", "561nm"]);
    settings.zstack = stack(3);
    let mut context = AcquisitionContext::new(settings);

    let outcome = FeatureExecutor::default()
        .run(&zstack(), &mut rig.instrument, &mut context)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.cycles, 6);
    assert_eq!(
        rig.captured(),
        vec![(0, 0, 0), (0, 1, 0), (0, 2, 0), (1, 0, 0), (1, 1, 0), (1, 2, 0)]
    );
    let z = rig.microscope.axis("z").unwrap().as_synthetic().unwrap().clone();
    assert_eq!(z.history(), vec![0.0, 10.0, 20.0, 0.0, 10.0, 20.0, 0.0]);
    assert_eq!(rig.instrument.scheduler_state(), SchedulerState::Idle);
}

#[tokio::test]
async fn zstack_restarts_from_the_same_origin_every_timepoint() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm"]);
    settings.zstack = stack(3);
    settings.timepoints = 2;
    let mut context = AcquisitionContext::new(settings);

    let outcome = FeatureExecutor::default()
        .run(&zstack(), &mut rig.instrument, &mut context)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.cycles, 6);
    let frames = rig.captured();
    assert_eq!(frames[..3], frames[3..]);
    assert_eq!(frames[3..], [(0, 0, 0), (0, 1, 0), (0, 2, 0)]);
    let z = rig.microscope.axis("z").unwrap().as_synthetic().unwrap().clone();
    assert_eq!(z.history(), vec![0.0, 10.0, 20.0, 0.0, 0.0, 10.0, 20.0, 0.0]);
    assert_eq!(context.stack_origin(), Some(0.0));
}

#[tokio::test]
async fn zstack_per_z_interleaves_channels_with_positions_innermost() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm", "561nm"]);
    settings.zstack = stack(2);
    settings.ordering = StackOrdering::PerZ;
    settings.positions = vec![
        BTreeMap::from([("x".to_string(), 0.0)]),
        BTreeMap::from([("x".to_string(), 100.0)]),
    ];
    let mut context = AcquisitionContext::new(settings);

    FeatureExecutor::default()
        .run(&zstack(), &mut rig.instrument, &mut context)
        .await
        .unwrap();

    assert_eq!(
        rig.captured(),
        vec![
            (0, 0, 0),
            (0, 0, 1),
            (1, 0, 0),
            (1, 0, 1),
            (0, 1, 0),
            (0, 1, 1),
            (1, 1, 0),
            (1, 1, 1),
        ]
    );
}

#[tokio::test]
async fn continuous_cycles_channels_until_stopped() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut context = AcquisitionContext::new(settings(&["488nm", "561nm"]));

    let mut listener = rig.bus.subscribe();
    let stop = rig.stop.clone();
    tokio::spawn(async move {
        let mut completed = 0;
        while let Ok(event) = listener.recv().await {
            if matches!(event, AcquisitionEvent::CycleCompleted { .. }) {
                completed += 1;
                if completed == 4 {
                    stop.request();
                    break;
                }
            }
        }
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        FeatureExecutor::default().run(&continuous(), &mut rig.instrument, &mut context),
    )
    .await
    .expect("continuous mode did not stop")
    .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(outcome.cycles >= 4);
    let channels: Vec<usize> = rig.captured().into_iter().map(|(c, _, _)| c).collect();
    assert_eq!(&channels[..4], &[0, 1, 0, 1]);
    assert!(channels.iter().enumerate().all(|(i, c)| *c == i % 2));

    assert_eq!(rig.instrument.scheduler_state(), SchedulerState::Idle);
    assert!(rig.daq_is_safe());
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::Cancelled { context: Some(_) })));
}

#[tokio::test]
async fn hardware_fault_aborts_with_scheduler_faulted() {
    let mut rig = Rig::with_daq_faults(ErrorScenario::Timeout {
        operation: "wait_done",
        after: 2,
    });
    let mut settings = settings(&["488nm"]);
    settings.zstack = stack(3);
    let mut context = AcquisitionContext::new(settings);

    let err = FeatureExecutor::default()
        .run(&zstack(), &mut rig.instrument, &mut context)
        .await
        .unwrap_err();

    assert!(err.is_hardware_fault());
    assert_eq!(rig.instrument.scheduler_state(), SchedulerState::Faulted);
    assert_eq!(rig.captured().len(), 2);
    assert!(rig.daq_is_safe());

    let events = rig.drain_events();
    let fault = events
        .iter()
        .find_map(|e| match e {
            AcquisitionEvent::Fault { context, .. } => *context,
            _ => None,
        })
        .unwrap();
    assert_eq!((fault.cycle, fault.z_index), (2, 2));
    assert!(events
        .iter()
        .any(|e| matches!(e, AcquisitionEvent::ProgramAborted { program, .. } if program == "z_stack")));
}

#[tokio::test]
async fn retry_policy_reruns_the_step_then_gives_up() {
    let mut rig = Rig::with_daq_faults(ErrorScenario::Timeout {
        operation: "wait_done",
        after: 1,
    });
    let mut context = AcquisitionContext::new(settings(&["488nm", "561nm"]));

    let err = FeatureExecutor::default()
        .with_policy(FaultPolicy::Retry { max_attempts: 3 })
        .run(&single(), &mut rig.instrument, &mut context)
        .await
        .unwrap_err();
    assert!(err.is_hardware_fault());

    let retries: Vec<u32> = rig
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            AcquisitionEvent::StepRetried { feature, attempt, .. } => {
                assert_eq!(feature, "PrepareNextChannel");
                Some(attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
    // Every retry targets the same channel
    assert_eq!(context.channel(), Some(1));
}

#[tokio::test]
async fn skip_policy_continues_past_a_failed_step() {
    let mut rig = Rig::with_daq_faults(ErrorScenario::FailAfterN {
        operation: "wait_done",
        count: 1,
    });
    let mut context = AcquisitionContext::new(settings(&["488nm", "561nm"]));

    let outcome = FeatureExecutor::default()
        .with_policy(FaultPolicy::Skip)
        .run(&single(), &mut rig.instrument, &mut context)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(rig.captured(), vec![(0, 0, 0)]);
    assert_eq!(rig.instrument.scheduler_state(), SchedulerState::Idle);
    let skipped = rig
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, AcquisitionEvent::StepSkipped { .. }))
        .count();
    assert_eq!(skipped, 1);
}

struct AddTimepoint;

#[async_trait]
impl FeatureHandler for AddTimepoint {
    async fn run(&self, _: &mut Instrument, context: &mut AcquisitionContext, _: &Value) -> Result<()> {
        context.settings_mut().timepoints += 1;
        Ok(())
    }
}

#[tokio::test]
async fn loop_count_is_fixed_when_the_loop_is_entered() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm"]);
    settings.timepoints = 2;
    let mut context = AcquisitionContext::new(settings);

    let program = FeatureProgram::new(
        "growing",
        vec![FeatureNode::over(
            NamedSource::Timepoints,
            vec![FeatureNode::atomic("Acquire"), FeatureNode::atomic("AddTimepoint")],
        )],
        Repeat::Once,
    );
    let executor = FeatureExecutor::new(FeatureCatalogue::builtin().with("AddTimepoint", AddTimepoint));
    let outcome = executor.run(&program, &mut rig.instrument, &mut context).await.unwrap();

    assert_eq!(outcome.cycles, 2);
    assert_eq!(context.settings().timepoints, 4);
}

#[tokio::test]
async fn autofocus_settles_on_the_sharpest_plane() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm"]);
    settings.autofocus = Some(AutofocusSettings {
        axis: "f".into(),
        range: 200.0,
        step: 10.0,
    });
    let mut context = AcquisitionContext::new(settings);
    let program = FeatureProgram::new("focus", vec![FeatureNode::atomic("Autofocus")], Repeat::Once);

    let outcome = FeatureExecutor::default()
        .run(&program, &mut rig.instrument, &mut context)
        .await
        .unwrap();

    // Sweep clamped to the axis limits: 0, 10, .., 100
    assert_eq!(outcome.cycles, 11);
    assert_eq!(rig.microscope.axis_position("f").await.unwrap(), 50.0);
    // Focus frames are returned, not buffered
    assert!(rig.captured().is_empty());
}

#[tokio::test]
async fn oversized_autofocus_sweep_is_refused_before_moving() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut context = AcquisitionContext::new(settings(&["488nm"]));
    let program = FeatureProgram::new(
        "focus",
        vec![FeatureNode::atomic_with(
            "Autofocus",
            serde_json::json!({"axis": "f", "range": 100.0, "step": 0.001}),
        )],
        Repeat::Once,
    );

    let err = FeatureExecutor::default()
        .run(&program, &mut rig.instrument, &mut context)
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(context.cycles(), 0);
    let f = rig.microscope.axis("f").unwrap().as_synthetic().unwrap().clone();
    assert!(f.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_stack_pause() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut settings = settings(&["488nm"]);
    settings.timepoints = 3;
    settings.stack_pause = Duration::from_secs(3600);
    let mut context = AcquisitionContext::new(settings);

    let stop = rig.stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.request();
    });

    let outcome = FeatureExecutor::default()
        .run(&zstack(), &mut rig.instrument, &mut context)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.cycles, 1);
    assert_eq!(context.timepoint, 0);
    assert!(rig.daq_is_safe());
}

#[tokio::test]
async fn unknown_features_are_rejected_before_anything_runs() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut context = AcquisitionContext::new(settings(&["488nm"]));
    let program = single().with_node(FeatureNode::atomic("Levitate"));

    let err = FeatureExecutor::default()
        .run(&program, &mut rig.instrument, &mut context)
        .await
        .unwrap_err();

    assert!(err.is_configuration());
    assert!(rig.drain_events().is_empty());
    assert_eq!(context.cycles(), 0);
}

#[tokio::test]
async fn json_programs_run_like_built_ones() {
    let mut rig = Rig::new(SyntheticFaults::default());
    let mut context = AcquisitionContext::new(settings(&["488nm", "561nm"]));
    let program = FeatureProgram::from_json(
        "json",
        r#"[[{"name": "PrepareNextChannel"}, {"name": "LoopByCount", "args": 3}]]"#,
        Repeat::Once,
    )
    .unwrap();

    FeatureExecutor::default()
        .run(&program, &mut rig.instrument, &mut context)
        .await
        .unwrap();

    let channels: Vec<usize> = rig.captured().into_iter().map(|(c, _, _)| c).collect();
    assert_eq!(channels, vec![0, 1, 0]);
}
