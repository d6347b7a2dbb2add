//! CLI entry point for navigate.
//!
//! ```bash
//! # Check a topology (and optionally experiment settings) without hardware
//! navigate validate --settings config/experiment.toml
//!
//! # List the configured microscopes
//! navigate profiles
//!
//! # Acquire with synthetic devices standing in for every backend
//! navigate run --mode z_stack --settings config/experiment.toml --synthetic
//! navigate run --mode continuous --cycles 20
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use navigate_core::events::{AcquisitionEvent, EventBus};
use navigate_core::stop::StopHandle;
use navigate_experiment::{
    AcquisitionContext, AcquisitionMode, ExperimentSettings, FaultPolicy, FeatureExecutor,
    Instrument,
};
use navigate_hardware::{BackendSelection, DeviceTopology, Microscope, MicroscopeProfiles};
use navigate_storage::{frame_buffer, DrainPipeline, FrameSink, MemorySink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "navigate")]
#[command(about = "Acquisition orchestration for light-sheet microscopes", long_about = None)]
struct Cli {
    /// Device topology file
    #[arg(long, global = true, default_value = "config/microscopes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate every profile
    Validate {
        /// Experiment settings to check against the active profile
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// List configured microscope profiles
    Profiles,

    /// Run an acquisition mode
    Run {
        /// continuous, single or z_stack
        #[arg(long, default_value = "single")]
        mode: AcquisitionMode,

        /// Profile to activate instead of the configured one
        #[arg(long)]
        profile: Option<String>,

        /// Experiment settings (TOML); defaults to one channel on the first laser
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Replace every backend with its synthetic device
        #[arg(long)]
        synthetic: bool,

        /// Re-run a failed step up to this many times before aborting
        #[arg(long, default_value = "0")]
        retries: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { settings } => validate(&cli.config, settings.as_deref()),
        Commands::Profiles => list_profiles(&cli.config),
        Commands::Run {
            mode,
            profile,
            settings,
            cycles,
            synthetic,
            retries,
        } => {
            let selection = if synthetic {
                BackendSelection::Synthetic
            } else {
                BackendSelection::AsConfigured
            };
            let policy = if retries > 0 {
                FaultPolicy::Retry {
                    max_attempts: retries + 1,
                }
            } else {
                FaultPolicy::Abort
            };
            let run = RunArgs {
                mode,
                profile,
                settings,
                cycles,
                selection,
                policy,
            };
            run_acquisition(&cli.config, run).await
        }
    }
}

fn load_settings(path: Option<&Path>, topology: &DeviceTopology) -> Result<ExperimentSettings> {
    let settings = match path {
        Some(path) => ExperimentSettings::load(path)?,
        None => {
            let laser = topology
                .config()
                .lasers
                .first()
                .map(|l| l.wavelength.clone())
                .context("Profile has no lasers; pass --settings")?;
            ExperimentSettings::single_channel(&laser, 10.0)
        }
    };
    settings.check_against(topology)?;
    Ok(settings)
}

fn validate(config: &Path, settings: Option<&Path>) -> Result<()> {
    let profiles = MicroscopeProfiles::load(config)?;
    println!("✅ {}: {} profile(s) valid", config.display(), profiles.names().count());
    if let Some(path) = settings {
        let topology = profiles.active()?;
        let settings = load_settings(Some(path), &topology)?;
        println!(
            "✅ {}: valid for '{}' ({} frames per z-stack run)",
            path.display(),
            topology.name(),
            settings.expected_frame_count()
        );
    }
    Ok(())
}

fn list_profiles(config: &Path) -> Result<()> {
    let profiles = MicroscopeProfiles::load(config)?;
    for name in profiles.names() {
        let topology = profiles.get(name)?;
        let marker = if name == profiles.active_name() { "*" } else { " " };
        println!(
            "{marker} {name:<16} {:>8} Hz  {} axes  {} lasers",
            topology.sample_rate(),
            topology.axes().count(),
            topology.config().lasers.len()
        );
    }
    Ok(())
}

struct RunArgs {
    mode: AcquisitionMode,
    profile: Option<String>,
    settings: Option<PathBuf>,
    cycles: Option<u64>,
    selection: BackendSelection,
    policy: FaultPolicy,
}

async fn run_acquisition(config: &Path, args: RunArgs) -> Result<()> {
    let mut profiles = MicroscopeProfiles::load(config)?;
    let topology = match &args.profile {
        Some(name) => profiles.activate(name)?,
        None => profiles.active()?,
    };
    let settings = load_settings(args.settings.as_deref(), &topology)?;
    let microscope = Arc::new(Microscope::assemble(topology.clone(), args.selection)?);

    let buffer = profiles.buffer();
    let (writer, reader) = frame_buffer(buffer.slots, buffer.overflow_policy)?;
    let sink = MemorySink::new("memory");
    let drain = DrainPipeline::new().with_sink(sink.clone()).spawn(reader);

    let events = EventBus::default();
    let stop = StopHandle::new();

    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current cycle");
                stop.request();
            }
        });
    }
    if let Some(limit) = args.cycles {
        let stop = stop.clone();
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            let mut completed = 0;
            while let Ok(event) = rx.recv().await {
                if matches!(event, AcquisitionEvent::CycleCompleted { .. }) {
                    completed += 1;
                    if completed >= limit {
                        stop.request();
                        break;
                    }
                }
            }
        });
    }

    info!(
        profile = topology.name(),
        mode = %args.mode,
        channels = settings.channels.len(),
        "Starting acquisition"
    );
    if args.mode == AcquisitionMode::ZStack {
        println!("📊 Expecting {} frames", settings.expected_frame_count());
    }

    let mut instrument = Instrument::new(microscope, writer, events, stop);
    let mut context = AcquisitionContext::new(settings);
    let executor = FeatureExecutor::default().with_policy(args.policy);
    let result = executor
        .run(&args.mode.program(), &mut instrument, &mut context)
        .await;
    let stats = instrument.buffer_stats();
    // Dropping the instrument drops the writer, which ends the drain.
    drop(instrument);
    let report = drain.await.context("Drain task panicked")??;

    println!(
        "🧮 Buffer: {} slots, high water {}, {} overflow(s), {} dropped",
        stats.capacity, stats.high_water, stats.overflows, stats.dropped
    );
    println!("💾 Drained {} frame(s) to '{}'", report.frames, sink.name());

    match result {
        Ok(outcome) => {
            println!(
                "✅ {} run {} finished: {:?} after {} cycle(s)",
                args.mode, outcome.run_id, outcome.status, outcome.cycles
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ {} aborted: {e}", args.mode);
            Err(e.into())
        }
    }
}
