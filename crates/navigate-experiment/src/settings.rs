//! Experiment settings: what to acquire, as opposed to the device topology
//! describing what hardware exists.
//!
//! ```toml
//! timepoints = 2
//! ordering = "per_z"
//! stack_pause = "500ms"
//!
//! [[channels]]
//! name = "GFP"
//! laser = "488nm"
//! power = 20.0
//! exposure = "10ms"
//! filter = "GFP"
//!
//! [zstack]
//! start = -10.0
//! step = 2.0
//! steps = 11
//! ```

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use navigate_core::error::NavigateError;
use navigate_core::limits::MAX_AUTOFOCUS_SAMPLES;
use navigate_hardware::DeviceTopology;
use navigate_sync::{ChannelSetup, RemoteFocusSetting};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const ENV_PREFIX: &str = "NAVIGATE_EXPERIMENT_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExperimentSettings {
    /// Selected channels, in acquisition order
    #[validate]
    #[validate(min_items = 1)]
    pub channels: Vec<ChannelSettings>,

    #[serde(default)]
    #[validate]
    pub zstack: Option<ZStackSettings>,

    /// Stage positions as axis -> target. Empty means "stay where we are".
    #[serde(default)]
    pub positions: Vec<BTreeMap<String, f64>>,

    #[serde(default = "default_timepoints")]
    #[validate(minimum = 1)]
    pub timepoints: usize,

    #[serde(default)]
    pub ordering: StackOrdering,

    /// Wait between timepoints
    #[serde(default, with = "humantime_serde")]
    pub stack_pause: Duration,

    #[serde(default)]
    #[validate]
    pub autofocus: Option<AutofocusSettings>,
}

fn default_timepoints() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChannelSettings {
    #[validate(min_length = 1)]
    pub name: String,

    /// Laser wavelength as named in the topology
    #[validate(min_length = 1)]
    pub laser: String,

    /// Percent of full power
    #[validate(minimum = 0.0)]
    #[validate(maximum = 100.0)]
    pub power: f64,

    #[serde(with = "humantime_serde")]
    pub exposure: Duration,

    #[serde(default)]
    pub filter: Option<String>,

    #[serde(default)]
    pub remote_focus: Option<RemoteFocusSetting>,
}

impl ChannelSettings {
    pub fn setup(&self) -> ChannelSetup {
        ChannelSetup {
            laser: self.laser.clone(),
            power: self.power,
            exposure: self.exposure,
            remote_focus: self.remote_focus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ZStackSettings {
    #[serde(default = "default_z_axis")]
    pub axis: String,

    /// Offset of the first plane from the position's own z
    pub start: f64,

    pub step: f64,

    #[validate(minimum = 1)]
    pub steps: usize,
}

fn default_z_axis() -> String {
    "z".into()
}

impl ZStackSettings {
    pub fn offset(&self, z_index: usize) -> f64 {
        self.start + self.step * z_index as f64
    }
}

/// Interleaving of channels and z-steps within one stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackOrdering {
    /// Channel outer, z inner: a full stack per channel
    #[default]
    PerStack,
    /// Z outer, channel inner: every channel at each plane
    PerZ,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AutofocusSettings {
    #[serde(default = "default_focus_axis")]
    pub axis: String,

    /// Full sweep width, centered on the current position
    #[validate(exclusive_minimum = 0.0)]
    pub range: f64,

    #[validate(exclusive_minimum = 0.0)]
    pub step: f64,
}

fn default_focus_axis() -> String {
    "f".into()
}

impl AutofocusSettings {
    /// Reject sweeps with non-positive extent or more than
    /// [`MAX_AUTOFOCUS_SAMPLES`] frames.
    pub fn check(&self) -> Result<(), NavigateError> {
        if !(self.range > 0.0 && self.step > 0.0) {
            return Err(NavigateError::Configuration(format!(
                "autofocus range {} and step {} must be positive",
                self.range, self.step
            )));
        }
        let samples = (self.range / self.step).floor() + 1.0;
        if samples > MAX_AUTOFOCUS_SAMPLES as f64 {
            return Err(NavigateError::Configuration(format!(
                "autofocus sweep of {} over step {} takes {samples} frames (max {MAX_AUTOFOCUS_SAMPLES})",
                self.range, self.step
            )));
        }
        Ok(())
    }
}

impl ExperimentSettings {
    /// Load settings from TOML, with `NAVIGATE_EXPERIMENT_` env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let settings: ExperimentSettings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to parse experiment settings: {}", path.display()))?;
        settings.checked()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: ExperimentSettings =
            toml::from_str(content).context("Failed to parse experiment settings")?;
        settings.checked()
    }

    fn checked(self) -> Result<Self> {
        if let Err(errors) = self.validate() {
            anyhow::bail!("Experiment settings validation failed:\n{errors}");
        }
        if let Some(autofocus) = &self.autofocus {
            autofocus.check()?;
        }
        info!(
            channels = self.channels.len(),
            frames = self.expected_frame_count(),
            "Loaded experiment settings"
        );
        Ok(self)
    }

    /// One channel at 10 ms, no stack, one position and timepoint.
    pub fn single_channel(laser: &str, power: f64) -> Self {
        Self {
            channels: vec![ChannelSettings {
                name: laser.to_string(),
                laser: laser.to_string(),
                power,
                exposure: Duration::from_millis(10),
                filter: None,
                remote_focus: None,
            }],
            zstack: None,
            positions: Vec::new(),
            timepoints: 1,
            ordering: StackOrdering::PerStack,
            stack_pause: Duration::ZERO,
            autofocus: None,
        }
    }

    pub fn z_count(&self) -> usize {
        self.zstack.as_ref().map(|z| z.steps).unwrap_or(1)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len().max(1)
    }

    /// Frames one z-stack program run produces.
    pub fn expected_frame_count(&self) -> usize {
        self.channels.len() * self.z_count() * self.position_count() * self.timepoints
    }

    pub fn channel(&self, index: usize) -> Result<&ChannelSettings, NavigateError> {
        self.channels.get(index).ok_or_else(|| {
            NavigateError::Configuration(format!(
                "channel {index} selected but only {} configured",
                self.channels.len()
            ))
        })
    }

    /// Check every reference into the topology: lasers, filters, axes.
    pub fn check_against(&self, topology: &DeviceTopology) -> Result<(), NavigateError> {
        let mut problems = Vec::new();
        for channel in &self.channels {
            if topology.laser(&channel.laser).is_none() {
                problems.push(format!("channel '{}': unknown laser '{}'", channel.name, channel.laser));
            }
            if let Some(filter) = &channel.filter {
                if !topology.filters().contains(filter) {
                    problems.push(format!("channel '{}': unknown filter '{filter}'", channel.name));
                }
            }
        }
        let mut axes: Vec<&str> = self
            .positions
            .iter()
            .flat_map(|p| p.keys().map(String::as_str))
            .collect();
        if let Some(z) = &self.zstack {
            axes.push(&z.axis);
        }
        if let Some(af) = &self.autofocus {
            axes.push(&af.axis);
        }
        for axis in axes {
            if topology.axis(axis).is_none() {
                problems.push(format!("unknown axis '{axis}'"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            problems.dedup();
            Err(NavigateError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"
timepoints = 2
ordering = "per_z"
stack_pause = "500ms"
positions = [{ x = 0.0, y = 0.0 }, { x = 100.0, y = 50.0 }]

[[channels]]
name = "GFP"
laser = "488nm"
power = 20.0
exposure = "10ms"
filter = "GFP"

[[channels]]
name = "RFP"
laser = "561nm"
power = 35.0
exposure = "20ms"
remote_focus = { offset = 2.5, amplitude = 0.6 }

[zstack]
start = -10.0
step = 2.0
steps = 11
"#;

    #[test]
    fn parses_and_counts_frames() {
        let settings = ExperimentSettings::from_toml_str(SETTINGS).unwrap();
        assert_eq!(settings.ordering, StackOrdering::PerZ);
        assert_eq!(settings.stack_pause, Duration::from_millis(500));
        assert_eq!(settings.zstack.as_ref().unwrap().axis, "z");
        assert_eq!(settings.zstack.as_ref().unwrap().offset(10), 10.0);
        assert_eq!(settings.expected_frame_count(), 2 * 11 * 2 * 2);
        assert_eq!(settings.channels[1].setup().exposure, Duration::from_millis(20));
    }

    #[test]
    fn field_rules_apply() {
        let bad = SETTINGS.replace("power = 20.0", "power = 150.0");
        assert!(ExperimentSettings::from_toml_str(&bad).is_err());

        let no_timepoints = SETTINGS.replace("timepoints = 2", "timepoints = 0");
        assert!(ExperimentSettings::from_toml_str(&no_timepoints).is_err());
    }

    #[test]
    fn defaults_for_a_single_plane() {
        let settings = ExperimentSettings::single_channel("488nm", 10.0);
        assert_eq!(settings.z_count(), 1);
        assert_eq!(settings.position_count(), 1);
        assert_eq!(settings.expected_frame_count(), 1);
        assert!(settings.channel(1).unwrap_err().is_configuration());
    }

    #[test]
    fn loads_from_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SETTINGS.as_bytes()).unwrap();

        let settings = ExperimentSettings::load(file.path()).unwrap();
        assert_eq!(settings.timepoints, 2);
        assert_eq!(settings.positions.len(), 2);

        // A missing file leaves required fields unset
        assert!(ExperimentSettings::load(Path::new("/nonexistent/experiment.toml")).is_err());
    }

    #[test]
    fn autofocus_sweep_is_bounded() {
        let mut autofocus = AutofocusSettings {
            axis: "f".into(),
            range: 100.0,
            step: 0.2,
        };
        assert!(autofocus.check().is_ok());

        autofocus.step = 0.01;
        let err = autofocus.check().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("max 1000"), "{err}");

        let mut settings = ExperimentSettings::single_channel("488nm", 10.0);
        settings.autofocus = Some(autofocus);
        assert!(settings.checked().is_err());
    }
}
