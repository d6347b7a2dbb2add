//! Immutable device topology and the set of loaded microscope profiles.
//!
//! A [`DeviceTopology`] is a validated [`MicroscopeConfig`] with its
//! calibrations parsed and its axis mappings resolved. It never changes
//! after construction; callers share it through `Arc`.

use crate::calibration::{AxisCalibration, CalibrationEngine};
use crate::config::validation::ANALOG;
use crate::config::{
    load_topology, resolve_axes_mapping, validate_microscope, AxisLimits, BufferConfig,
    LaserConfig, MicroscopeConfig, TopologyFile,
};
use navigate_core::error::{NavigateError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Calibration key of a laser's power channel.
pub fn laser_axis(wavelength: &str) -> String {
    format!("laser:{wavelength}")
}

/// Where one logical axis lives.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisBinding {
    pub stage: String,
    /// DAQ channel for analog axes, controller axis otherwise
    pub channel: String,
    pub analog: bool,
    pub limits: Option<AxisLimits>,
}

#[derive(Debug, Clone)]
pub struct DeviceTopology {
    name: String,
    config: MicroscopeConfig,
    calibrations: CalibrationEngine,
    axes: BTreeMap<String, AxisBinding>,
}

impl DeviceTopology {
    /// Validate `config` and resolve it. Every failure is a configuration
    /// error.
    pub fn from_config(name: impl Into<String>, config: MicroscopeConfig) -> Result<Self> {
        let name = name.into();
        if let Err(errors) = validate_microscope(&config) {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(NavigateError::Configuration(format!(
                "profile '{name}': {joined}"
            )));
        }

        let mut calibrations = CalibrationEngine::new();
        let mut axes = BTreeMap::new();

        for stage in &config.stage {
            let analog = stage.hardware.kind == ANALOG;
            let resolved = resolve_axes_mapping(stage).map_err(NavigateError::Configuration)?;
            for (axis, channel) in resolved {
                let limits = stage.limits.get(&axis).copied();
                if analog {
                    let expression = stage.calibration.get(&axis).ok_or_else(|| {
                        NavigateError::Configuration(format!("axis '{axis}' has no calibration"))
                    })?;
                    let bounds = limits.ok_or_else(|| {
                        NavigateError::Configuration(format!("axis '{axis}' has no limits"))
                    })?;
                    calibrations.insert(AxisCalibration::from_expression(
                        axis.clone(),
                        expression,
                        bounds.min,
                        bounds.max,
                    )?)?;
                }
                axes.insert(
                    axis,
                    AxisBinding {
                        stage: stage.name.clone(),
                        channel,
                        analog,
                        limits,
                    },
                );
            }
        }

        for laser in &config.lasers {
            calibrations.insert(AxisCalibration::from_expression(
                laser_axis(&laser.wavelength),
                &laser.power_calibration,
                laser.power_range.min,
                laser.power_range.max,
            )?)?;
        }

        Ok(Self {
            name,
            config,
            calibrations,
            axes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MicroscopeConfig {
        &self.config
    }

    pub fn calibrations(&self) -> &CalibrationEngine {
        &self.calibrations
    }

    /// Master sample clock of the DAQ.
    pub fn sample_rate(&self) -> f64 {
        self.config.daq.sample_rate
    }

    pub fn axis(&self, axis: &str) -> Option<&AxisBinding> {
        self.axes.get(axis)
    }

    pub fn axes(&self) -> impl Iterator<Item = (&str, &AxisBinding)> {
        self.axes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn laser(&self, wavelength: &str) -> Option<&LaserConfig> {
        self.config.lasers.iter().find(|l| l.wavelength == wavelength)
    }

    pub fn filters(&self) -> &[String] {
        self.config
            .filter_wheel
            .as_ref()
            .map(|w| w.filters.as_slice())
            .unwrap_or_default()
    }
}

/// Every configured profile, with exactly one active.
#[derive(Debug, Clone)]
pub struct MicroscopeProfiles {
    profiles: BTreeMap<String, Arc<DeviceTopology>>,
    active: String,
    buffer: BufferConfig,
}

impl MicroscopeProfiles {
    pub fn from_file_config(file: TopologyFile) -> Result<Self> {
        let mut profiles = BTreeMap::new();
        for (name, config) in file.microscopes {
            let topology = DeviceTopology::from_config(name.clone(), config)?;
            profiles.insert(name, Arc::new(topology));
        }
        let mut loaded = Self {
            profiles,
            active: String::new(),
            buffer: file.buffer,
        };
        loaded.activate(&file.active)?;
        Ok(loaded)
    }

    /// Load, validate and resolve every profile in a topology file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = load_topology(path)?;
        Ok(Self::from_file_config(file)?)
    }

    /// Switch the active profile. The previous one stays loaded.
    pub fn activate(&mut self, name: &str) -> Result<Arc<DeviceTopology>> {
        let topology = self.profiles.get(name).cloned().ok_or_else(|| {
            NavigateError::Configuration(format!("unknown microscope profile '{name}'"))
        })?;
        if self.active != name {
            info!(profile = name, "Activated microscope profile");
        }
        self.active = name.to_string();
        Ok(topology)
    }

    pub fn active(&self) -> Result<Arc<DeviceTopology>> {
        self.get(&self.active)
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn get(&self, name: &str) -> Result<Arc<DeviceTopology>> {
        self.profiles.get(name).cloned().ok_or_else(|| {
            NavigateError::Configuration(format!("unknown microscope profile '{name}'"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn buffer(&self) -> &BufferConfig {
        &self.buffer
    }
}
