//! Device topology schema.
//!
//! One TOML file describes every microscope profile plus the frame buffer.
//! A trimmed example:
//!
//! ```toml
//! active = "mesoscale"
//!
//! [buffer]
//! slots = 100
//! overflow_policy = { kind = "stop_acquisition" }
//!
//! [microscopes.mesoscale.daq]
//! hardware = { type = "synthetic" }
//! sample_rate = 100000
//! master_trigger_out_line = "PXI6259/port0/line1"
//! camera_trigger_out_line = "/PXI6259/ctr0"
//!
//! [microscopes.mesoscale.camera]
//! hardware = { type = "synthetic" }
//! width = 2048
//! height = 2048
//! delay = "2ms"
//! settle_down = "1ms"
//!
//! [[microscopes.mesoscale.stage]]
//! name = "sample"
//! hardware = { type = "synthetic" }
//! axes = ["x", "y", "z", "f"]
//! axes_mapping = ["X", "Y", "Z", "M"]
//! ```

use navigate_storage::OverflowPolicy;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Top-Level Config
// =============================================================================

/// Complete topology file: all profiles plus buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    /// Profile activated at startup
    pub active: String,

    #[validate]
    pub buffer: BufferConfig,

    /// Profiles by name. Each is validated individually by the loader.
    #[serde(default)]
    pub microscopes: BTreeMap<String, MicroscopeConfig>,
}

/// Circular frame buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    #[serde(default = "default_slots")]
    #[validate(minimum = 1)]
    #[validate(maximum = 100_000)]
    pub slots: usize,

    /// Required: there is no implicit choice between dropping frames and
    /// stopping acquisition.
    pub overflow_policy: OverflowPolicy,
}

fn default_slots() -> usize {
    navigate_core::limits::DEFAULT_BUFFER_SLOTS
}

/// Backend type tag plus backend-specific parameters.
///
/// Built-in tags are `synthetic`, `analog` (stage axes driven by DAQ
/// voltages) and `none`. Any other tag names a vendor backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareDescriptor {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl HardwareDescriptor {
    pub fn synthetic() -> Self {
        Self {
            kind: "synthetic".into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(serde_json::Value::as_str)
    }
}

/// One microscope profile: the device tree driven as one instrument.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MicroscopeConfig {
    #[validate]
    pub daq: DaqConfig,

    #[validate]
    pub camera: CameraConfig,

    #[serde(default)]
    #[validate]
    pub remote_focus: Option<ScanConfig>,

    #[serde(default)]
    #[validate]
    pub galvo: Vec<ScanConfig>,

    #[serde(default)]
    #[validate]
    pub stage: Vec<StageConfig>,

    #[serde(default)]
    #[validate]
    pub lasers: Vec<LaserConfig>,

    #[serde(default)]
    #[validate]
    pub filter_wheel: Option<FilterWheelConfig>,

    #[serde(default)]
    pub shutter: Option<ShutterConfig>,

    #[serde(default)]
    pub zoom: Option<PositionerConfig>,

    #[serde(default)]
    pub mirror: Option<PositionerConfig>,
}

// =============================================================================
// Devices
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DaqConfig {
    pub hardware: HardwareDescriptor,

    /// Master sample clock (samples/s) shared by every output channel
    #[validate(minimum = 1.0)]
    #[validate(maximum = 2_000_000.0)]
    pub sample_rate: f64,

    #[validate(min_length = 1)]
    pub master_trigger_out_line: String,

    #[validate(min_length = 1)]
    pub camera_trigger_out_line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CameraConfig {
    pub hardware: HardwareDescriptor,

    #[validate(minimum = 1)]
    #[validate(maximum = 65_536)]
    pub width: u32,

    #[validate(minimum = 1)]
    #[validate(maximum = 65_536)]
    pub height: u32,

    /// Delay between settle-down and the camera trigger
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Mechanical settle time at the start of every cycle
    #[serde(with = "humantime_serde")]
    pub settle_down: Duration,

    #[serde(default = "default_trigger_pulse", with = "humantime_serde")]
    pub trigger_pulse: Duration,

    /// Added to the exposure time to bound the frame wait
    #[serde(default = "default_frame_timeout_margin", with = "humantime_serde")]
    pub frame_timeout_margin: Duration,
}

fn default_trigger_pulse() -> Duration {
    Duration::from_micros(500)
}

fn default_frame_timeout_margin() -> Duration {
    navigate_core::limits::DEFAULT_FRAME_TIMEOUT_MARGIN
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformShape {
    #[default]
    Sawtooth,
    Halfsaw,
    Step,
}

/// Output voltage limits of one analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self { min: -5.0, max: 5.0 }
    }
}

impl VoltageRange {
    pub fn contains(&self, volts: f64) -> bool {
        (self.min..=self.max).contains(&volts)
    }
}

/// Galvo or remote-focus channel driven by a periodic waveform.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    #[validate(min_length = 1)]
    pub name: String,

    #[validate(min_length = 1)]
    pub channel: String,

    #[serde(default)]
    pub waveform: WaveformShape,

    /// Half of the peak-to-peak swing (volts)
    #[validate(minimum = 0.0)]
    pub amplitude: f64,

    #[serde(default)]
    pub offset: f64,

    /// Delay of the waveform start within the cycle
    #[serde(default, with = "humantime_serde")]
    pub phase: Duration,

    /// High fraction of the period for step waveforms
    #[serde(default = "default_duty")]
    #[validate(minimum = 0.0)]
    #[validate(maximum = 1.0)]
    pub duty: f64,

    #[serde(default)]
    pub output_range: VoltageRange,

    /// Must equal the DAQ sample rate when given
    #[serde(default)]
    pub sample_rate: Option<f64>,
}

fn default_duty() -> f64 {
    0.5
}

/// Position limits of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisLimits {
    pub min: f64,
    pub max: f64,
}

impl AxisLimits {
    pub fn contains(&self, position: f64) -> bool {
        (self.min..=self.max).contains(&position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    #[validate(min_length = 1)]
    pub name: String,

    pub hardware: HardwareDescriptor,

    /// Logical axes (`x`, `y`, `z`, `theta`, `f`)
    #[validate(min_items = 1)]
    pub axes: Vec<String>,

    /// Physical channel or controller axis per logical axis, same order as
    /// `axes`. May be omitted for synthetic stages.
    #[serde(default)]
    pub axes_mapping: Vec<String>,

    #[serde(default)]
    pub limits: BTreeMap<String, AxisLimits>,

    /// Position-to-voltage expression per axis (analog stages)
    #[serde(default)]
    pub calibration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LaserConfig {
    /// Identifier used by channel settings, e.g. `488nm`
    #[validate(min_length = 1)]
    pub wavelength: String,

    /// Analog power modulation channel
    #[validate(min_length = 1)]
    pub power_channel: String,

    /// Digital on/off line
    #[validate(min_length = 1)]
    pub onoff_line: String,

    /// Percent-to-voltage expression
    #[serde(default = "default_power_calibration")]
    pub power_calibration: String,

    #[serde(default = "default_power_range")]
    pub power_range: AxisLimits,
}

fn default_power_calibration() -> String {
    "(5/100)*x + 0".into()
}

fn default_power_range() -> AxisLimits {
    AxisLimits { min: 0.0, max: 100.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FilterWheelConfig {
    pub hardware: HardwareDescriptor,

    #[validate(min_items = 1)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutterConfig {
    pub line: String,
}

/// Discrete positioner (zoom, flip mirror) with named positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionerConfig {
    pub hardware: HardwareDescriptor,
    pub positions: BTreeMap<String, f64>,
}
