//! Mutable execution state threaded through a feature program.

use crate::feature::{IterationSource, NamedSource};
use crate::settings::ExperimentSettings;
use navigate_core::data::CycleContext;
use navigate_core::error::{NavigateError, Result};

/// Where a program is within its loops, without the cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    channel: Option<usize>,
    z_index: usize,
    position_index: usize,
    timepoint: usize,
}

#[derive(Debug, Clone)]
pub struct AcquisitionContext {
    settings: ExperimentSettings,
    /// Last channel prepared; `None` before the first
    channel: Option<usize>,
    pub z_index: usize,
    pub position_index: usize,
    pub timepoint: usize,
    /// Stack-axis position the first z-stack started from
    stack_origin: Option<f64>,
    cycles: u64,
}

impl AcquisitionContext {
    pub fn new(settings: ExperimentSettings) -> Self {
        Self {
            settings,
            channel: None,
            z_index: 0,
            position_index: 0,
            timepoint: 0,
            stack_origin: None,
            cycles: 0,
        }
    }

    pub fn settings(&self) -> &ExperimentSettings {
        &self.settings
    }

    /// Features may change settings mid-run; loops already entered keep
    /// the count they resolved.
    pub fn settings_mut(&mut self) -> &mut ExperimentSettings {
        &mut self.settings
    }

    pub fn channel(&self) -> Option<usize> {
        self.channel
    }

    pub fn set_channel(&mut self, index: usize) -> Result<()> {
        self.settings.channel(index)?;
        self.channel = Some(index);
        Ok(())
    }

    /// Move to the next selected channel, wrapping around.
    pub fn advance_channel(&mut self) -> Result<usize> {
        let count = self.settings.channels.len();
        if count == 0 {
            return Err(NavigateError::Configuration("no channels selected".into()));
        }
        let next = match self.channel {
            Some(current) => (current + 1) % count,
            None => 0,
        };
        self.channel = Some(next);
        Ok(next)
    }

    /// Iteration count of `source` right now.
    pub fn resolve(&self, source: &IterationSource) -> usize {
        match source {
            IterationSource::Count(n) => *n,
            IterationSource::Named(NamedSource::Channels) => self.settings.channels.len(),
            IterationSource::Named(NamedSource::Timepoints) => self.settings.timepoints,
            IterationSource::Named(NamedSource::ZSteps) => self.settings.z_count(),
            IterationSource::Named(NamedSource::Positions) => self.settings.position_count(),
        }
    }

    /// Record the index of the loop iteration about to run. Channel loops
    /// only count; `PrepareNextChannel` moves the channel cursor.
    pub fn enter_iteration(&mut self, source: &IterationSource, index: usize) {
        match source {
            IterationSource::Named(NamedSource::Timepoints) => self.timepoint = index,
            IterationSource::Named(NamedSource::ZSteps) => self.z_index = index,
            IterationSource::Named(NamedSource::Positions) => self.position_index = index,
            IterationSource::Named(NamedSource::Channels) | IterationSource::Count(_) => {}
        }
    }

    /// Context for a cycle about to be captured; bumps the cycle counter.
    pub fn next_cycle(&mut self) -> CycleContext {
        let context = self.snapshot();
        self.cycles += 1;
        context
    }

    /// Current indices without consuming a cycle number.
    pub fn snapshot(&self) -> CycleContext {
        CycleContext {
            cycle: self.cycles,
            channel: self.channel.unwrap_or(0),
            z_index: self.z_index,
            position_index: self.position_index,
            timepoint: self.timepoint,
        }
    }

    pub fn stack_origin(&self) -> Option<f64> {
        self.stack_origin
    }

    /// Fix the origin every later stack of this run is taken from.
    pub fn set_stack_origin(&mut self, origin: f64) {
        self.stack_origin = Some(origin);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            channel: self.channel,
            z_index: self.z_index,
            position_index: self.position_index,
            timepoint: self.timepoint,
        }
    }

    /// Return to `cursor` so a failed step can be re-run from where it
    /// started. Cycle numbers keep increasing.
    pub fn rewind(&mut self, cursor: Cursor) {
        self.channel = cursor.channel;
        self.z_index = cursor.z_index;
        self.position_index = cursor.position_index;
        self.timepoint = cursor.timepoint;
    }
}
