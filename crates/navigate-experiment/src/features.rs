//! Atomic features and the catalogue that maps names to them.
//!
//! | Name                 | Effect                                                  |
//! |----------------------|---------------------------------------------------------|
//! | `PrepareNextChannel` | advance to the next selected channel, capture one cycle |
//! | `Acquire`            | capture one cycle with the current channel              |
//! | `MoveToPosition`     | move to a configured stage position                     |
//! | `ZStackAcquisition`  | channels x z-steps x positions in the configured order  |
//! | `StackPause`         | cancelable wait between timepoints                      |
//! | `Autofocus`          | sweep focus, score frames by variance, keep the best    |
//! | `SetZoom`            | move the zoom to a named position                       |
//! | `MoveStage`          | move axes to `{axis: target}` from the args             |

use crate::context::AcquisitionContext;
use crate::feature::FeatureProgram;
use crate::instrument::Instrument;
use crate::settings::{AutofocusSettings, StackOrdering};
use async_trait::async_trait;
use navigate_core::error::{NavigateError, Result};
use navigate_sync::Delivery;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One atomic feature. Handlers read and write the context but never the
/// program.
#[async_trait]
pub trait FeatureHandler: Send + Sync {
    async fn run(
        &self,
        instrument: &mut Instrument,
        context: &mut AcquisitionContext,
        args: &Value,
    ) -> Result<()>;
}

fn bad_args(feature: &str, args: &Value, expected: &str) -> NavigateError {
    NavigateError::Configuration(format!("{feature}: expected {expected}, got {args}"))
}

pub struct PrepareNextChannel;

#[async_trait]
impl FeatureHandler for PrepareNextChannel {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, _: &Value) -> Result<()> {
        let next = context.advance_channel()?;
        instrument.prepare_channel(context, next).await?;
        instrument.capture(context, Delivery::Buffer).await?;
        Ok(())
    }
}

pub struct Acquire;

#[async_trait]
impl FeatureHandler for Acquire {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, _: &Value) -> Result<()> {
        if context.channel().is_none() {
            instrument.prepare_channel(context, 0).await?;
        }
        instrument.capture(context, Delivery::Buffer).await?;
        Ok(())
    }
}

/// Targets for position `index`, with the z-stack offset applied to the
/// stack axis when `z_index` is given.
fn stage_targets(
    context: &AcquisitionContext,
    index: usize,
    z: Option<(usize, f64)>,
) -> BTreeMap<String, f64> {
    let settings = context.settings();
    let mut targets = settings.positions.get(index).cloned().unwrap_or_default();
    if let (Some(stack), Some((z_index, origin))) = (&settings.zstack, z) {
        let base = targets.get(&stack.axis).copied().unwrap_or(origin);
        targets.insert(stack.axis.clone(), base + stack.offset(z_index));
    }
    targets
}

pub struct MoveToPosition;

#[async_trait]
impl FeatureHandler for MoveToPosition {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, args: &Value) -> Result<()> {
        let index = match args {
            Value::Null => context.position_index,
            Value::Number(n) => n
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| bad_args("MoveToPosition", args, "a position index"))?,
            _ => return Err(bad_args("MoveToPosition", args, "a position index")),
        };
        let count = context.settings().positions.len();
        if count == 0 {
            return Ok(());
        }
        if index >= count {
            return Err(NavigateError::Configuration(format!(
                "position {index} requested but only {count} configured"
            )));
        }
        context.position_index = index;
        let targets = stage_targets(context, index, None);
        instrument.microscope().move_to(&targets).await
    }
}

pub struct ZStackAcquisition;

#[async_trait]
impl FeatureHandler for ZStackAcquisition {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, _: &Value) -> Result<()> {
        let settings = context.settings();
        let channels = settings.channels.len();
        let z_count = settings.z_count();
        let positions = settings.position_count();
        let ordering = settings.ordering;
        let stack_axis = settings.zstack.as_ref().map(|stack| stack.axis.clone());
        // Positions without the stack axis take their stack from the origin
        let returns = stack_axis.as_ref().is_some_and(|axis| {
            (0..positions).any(|p| settings.positions.get(p).map_or(true, |t| !t.contains_key(axis)))
        });
        let origin = match (&stack_axis, context.stack_origin()) {
            (None, _) => None,
            (Some(_), Some(origin)) => Some(origin),
            (Some(axis), None) => {
                let origin = instrument.microscope().axis_position(axis).await?;
                context.set_stack_origin(origin);
                Some(origin)
            }
        };

        let pairs: Vec<(usize, usize)> = match ordering {
            StackOrdering::PerStack => (0..channels)
                .flat_map(|c| (0..z_count).map(move |z| (c, z)))
                .collect(),
            StackOrdering::PerZ => (0..z_count)
                .flat_map(|z| (0..channels).map(move |c| (c, z)))
                .collect(),
        };
        debug!(channels, z_count, positions, ?ordering, "Z-stack");

        for (channel, z) in pairs {
            if context.channel() != Some(channel) {
                instrument.prepare_channel(context, channel).await?;
            }
            context.z_index = z;
            for position in 0..positions {
                context.position_index = position;
                let targets = stage_targets(context, position, origin.map(|o| (z, o)));
                if !targets.is_empty() {
                    instrument.microscope().move_to(&targets).await?;
                }
                instrument.capture(context, Delivery::Buffer).await?;
            }
        }
        if let (true, Some(axis), Some(origin)) = (returns, stack_axis, origin) {
            debug!(%axis, origin, "Z-stack: returning to origin");
            instrument.microscope().move_to(&BTreeMap::from([(axis, origin)])).await?;
        }
        Ok(())
    }
}

pub struct StackPause;

#[async_trait]
impl FeatureHandler for StackPause {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, _: &Value) -> Result<()> {
        let pause = context.settings().stack_pause;
        let last = context.timepoint + 1 >= context.settings().timepoints;
        if pause.is_zero() || last {
            return Ok(());
        }
        let stop = instrument.stop().clone();
        tokio::select! {
            _ = tokio::time::sleep(pause) => Ok(()),
            _ = stop.cancelled() => Err(NavigateError::Cancelled),
        }
    }
}

pub struct Autofocus;

#[async_trait]
impl FeatureHandler for Autofocus {
    async fn run(&self, instrument: &mut Instrument, context: &mut AcquisitionContext, args: &Value) -> Result<()> {
        let settings: AutofocusSettings = match args {
            Value::Null => context.settings().autofocus.clone().ok_or_else(|| {
                NavigateError::Configuration("Autofocus: no autofocus settings".into())
            })?,
            _ => serde_json::from_value(args.clone())
                .map_err(|_| bad_args("Autofocus", args, "{axis, range, step}"))?,
        };
        settings.check()?;
        if context.channel().is_none() {
            instrument.prepare_channel(context, 0).await?;
        }

        let microscope = instrument.microscope();
        let center = microscope.axis_position(&settings.axis).await?;
        let mut low = center - settings.range / 2.0;
        let mut high = center + settings.range / 2.0;
        if let Some(limits) = microscope.topology().axis(&settings.axis).and_then(|b| b.limits) {
            low = low.max(limits.min);
            high = high.min(limits.max);
        }
        let steps = ((high - low) / settings.step).floor() as usize;

        let mut best = (center, f64::NEG_INFINITY);
        for i in 0..=steps {
            let position = low + settings.step * i as f64;
            instrument.microscope().move_axis(&settings.axis, position).await?;
            let frame = instrument
                .capture(context, Delivery::Return)
                .await?
                .into_frame()
                .ok_or_else(|| NavigateError::InvalidState("autofocus frame not returned".into()))?;
            let score = frame.variance();
            debug!(position, score, "Autofocus sample");
            if score > best.1 {
                best = (position, score);
            }
        }

        instrument.microscope().move_axis(&settings.axis, best.0).await?;
        info!(axis = %settings.axis, position = best.0, score = best.1, "Autofocus complete");
        Ok(())
    }
}

pub struct SetZoom;

#[async_trait]
impl FeatureHandler for SetZoom {
    async fn run(&self, instrument: &mut Instrument, _: &mut AcquisitionContext, args: &Value) -> Result<()> {
        let name = args
            .as_str()
            .ok_or_else(|| bad_args("SetZoom", args, "a zoom position name"))?;
        instrument.microscope().set_zoom(name).await
    }
}

pub struct MoveStage;

#[async_trait]
impl FeatureHandler for MoveStage {
    async fn run(&self, instrument: &mut Instrument, _: &mut AcquisitionContext, args: &Value) -> Result<()> {
        let targets: BTreeMap<String, f64> = serde_json::from_value(args.clone())
            .map_err(|_| bad_args("MoveStage", args, "{axis: position}"))?;
        instrument.microscope().move_to(&targets).await
    }
}

/// Name -> handler lookup for the executor.
#[derive(Clone)]
pub struct FeatureCatalogue {
    handlers: BTreeMap<String, Arc<dyn FeatureHandler>>,
}

impl FeatureCatalogue {
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Every built-in feature.
    pub fn builtin() -> Self {
        Self::empty()
            .with("PrepareNextChannel", PrepareNextChannel)
            .with("Acquire", Acquire)
            .with("MoveToPosition", MoveToPosition)
            .with("ZStackAcquisition", ZStackAcquisition)
            .with("StackPause", StackPause)
            .with("Autofocus", Autofocus)
            .with("SetZoom", SetZoom)
            .with("MoveStage", MoveStage)
    }

    pub fn with(mut self, name: impl Into<String>, handler: impl FeatureHandler + 'static) -> Self {
        self.register(name, Arc::new(handler));
        self
    }

    /// Add or replace a handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn FeatureHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FeatureHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| NavigateError::Configuration(format!("unknown feature '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Reject programs that name features this catalogue lacks.
    pub fn check(&self, program: &FeatureProgram) -> Result<()> {
        let mut unknown: Vec<&str> = program
            .calls()
            .into_iter()
            .map(|c| c.name.as_str())
            .filter(|name| !self.handlers.contains_key(*name))
            .collect();
        unknown.sort_unstable();
        unknown.dedup();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(NavigateError::Configuration(format!(
                "program '{}' uses unknown features: {}",
                program.name(),
                unknown.join(", ")
            )))
        }
    }
}

impl Default for FeatureCatalogue {
    fn default() -> Self {
        Self::builtin()
    }
}
