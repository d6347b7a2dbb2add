//! Per-cycle waveform plan.
//!
//! [`CyclePlanner`] turns the active topology plus the settings of one
//! channel into the output task for a single synchronized cycle. The plan
//! keeps a label for every waveform so it can be inspected or exported.

use crate::cycle::CycleTiming;
use crate::waveform::{assemble, channel_waveform, Shape, WaveformSpec, DIGITAL_HIGH};
use navigate_core::capabilities::OutputTask;
use navigate_core::error::{NavigateError, Quantity, Result};
use navigate_hardware::config::{ScanConfig, WaveformShape};
use navigate_hardware::{laser_axis, DeviceTopology};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runtime override of the remote focus sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoteFocusSetting {
    pub offset: f64,
    pub amplitude: f64,
}

/// Everything one cycle needs to know about the channel being imaged.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetup {
    pub laser: String,
    /// Percent of full power
    pub power: f64,
    pub exposure: Duration,
    pub remote_focus: Option<RemoteFocusSetting>,
}

/// Output task and timing for one cycle.
#[derive(Debug, Clone)]
pub struct CyclePlan {
    task: OutputTask,
    timing: CycleTiming,
    labels: BTreeMap<String, String>,
}

impl CyclePlan {
    pub fn task(&self) -> &OutputTask {
        &self.task
    }

    pub fn timing(&self) -> &CycleTiming {
        &self.timing
    }

    /// Waveform by label, e.g. `galvo:galvo_0`, `laser:488nm:power`,
    /// `camera_trigger`.
    pub fn waveform(&self, label: &str) -> Option<&[f64]> {
        self.labels
            .get(label)
            .and_then(|channel| self.task.waveform(channel))
    }

    /// (label, physical channel) for every waveform in the plan.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(l, c)| (l.as_str(), c.as_str()))
    }
}

fn shape_of(scan: &ScanConfig) -> Shape {
    match scan.waveform {
        WaveformShape::Sawtooth => Shape::Sawtooth,
        WaveformShape::Halfsaw => Shape::Halfsaw,
        WaveformShape::Step => Shape::Step { duty: scan.duty },
    }
}

fn scan_spec(
    scan: &ScanConfig,
    offset: f64,
    amplitude: f64,
    period: Duration,
) -> Result<WaveformSpec> {
    let low = offset - amplitude;
    let high = offset + amplitude;
    for volts in [low, high] {
        if !scan.output_range.contains(volts) {
            return Err(NavigateError::OutOfRange {
                axis: scan.name.clone(),
                quantity: Quantity::Voltage,
                value: volts,
                min: scan.output_range.min,
                max: scan.output_range.max,
            });
        }
    }
    Ok(WaveformSpec::new(shape_of(scan), low, high, period).with_phase(scan.phase))
}

/// Builds cycle plans for one profile.
#[derive(Debug, Clone)]
pub struct CyclePlanner {
    topology: Arc<DeviceTopology>,
}

impl CyclePlanner {
    pub fn new(topology: Arc<DeviceTopology>) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> &Arc<DeviceTopology> {
        &self.topology
    }

    /// Plan one cycle. Unknown lasers are configuration errors; power or
    /// remote focus settings outside their limits are rejected before
    /// anything reaches the hardware.
    pub fn plan(&self, setup: &ChannelSetup) -> Result<CyclePlan> {
        let config = self.topology.config();
        let rate = self.topology.sample_rate();
        let timing = CycleTiming::for_camera(&config.camera, setup.exposure)?;
        let period = timing.period();

        if self.topology.laser(&setup.laser).is_none() {
            return Err(NavigateError::Configuration(format!(
                "laser '{}' is not part of profile '{}'",
                setup.laser,
                self.topology.name()
            )));
        }

        let mut channels = Vec::new();
        let mut labels = BTreeMap::new();
        let mut push = |label: String, channel: &str, spec: WaveformSpec| -> Result<()> {
            channels.push(channel_waveform(channel, &spec, rate)?);
            labels.insert(label, channel.to_string());
            Ok(())
        };

        for galvo in &config.galvo {
            let spec = scan_spec(galvo, galvo.offset, galvo.amplitude, period)?;
            push(format!("galvo:{}", galvo.name), &galvo.channel, spec)?;
        }

        if let Some(rf) = &config.remote_focus {
            let (offset, amplitude) = setup
                .remote_focus
                .map(|s| (s.offset, s.amplitude))
                .unwrap_or((rf.offset, rf.amplitude));
            let spec = scan_spec(rf, offset, amplitude, period)?;
            push("remote_focus".into(), &rf.channel, spec)?;
        }

        let window = |level: f64| WaveformSpec::window(level, timing.trigger_at(), timing.exposure, period);

        for laser in &config.lasers {
            let (power, onoff) = if laser.wavelength == setup.laser {
                let volts = self
                    .topology
                    .calibrations()
                    .to_voltage(&laser_axis(&laser.wavelength), setup.power)?;
                (window(volts), window(DIGITAL_HIGH))
            } else {
                (WaveformSpec::off(period), WaveformSpec::off(period))
            };
            push(format!("laser:{}:power", laser.wavelength), &laser.power_channel, power)?;
            push(format!("laser:{}:onoff", laser.wavelength), &laser.onoff_line, onoff)?;
        }

        if let Some(shutter) = &config.shutter {
            push("shutter".into(), &shutter.line, window(DIGITAL_HIGH))?;
        }

        let trigger = WaveformSpec::window(
            DIGITAL_HIGH,
            timing.trigger_at(),
            timing.trigger_pulse,
            period,
        );
        push(
            "camera_trigger".into(),
            &config.daq.camera_trigger_out_line,
            trigger,
        )?;

        let task = assemble(rate, channels)?;
        let trigger_samples = task
            .waveform(&config.daq.camera_trigger_out_line)
            .map(|s| s.iter().filter(|v| **v >= DIGITAL_HIGH).count())
            .unwrap_or(0);
        if trigger_samples == 0 {
            return Err(NavigateError::Configuration(format!(
                "camera trigger pulse {:?} is shorter than one sample at {rate} samples/s",
                timing.trigger_pulse
            )));
        }

        debug!(
            laser = %setup.laser,
            samples = task.samples_per_channel(),
            channels = task.channels().len(),
            "Planned cycle"
        );
        Ok(CyclePlan {
            task,
            timing,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navigate_hardware::config::load_topology_from_str;
    use navigate_hardware::MicroscopeProfiles;

    const TOPOLOGY: &str = r#"
active = "test"

[buffer]
overflow_policy = { kind = "drop_newest" }

[microscopes.test.daq]
hardware = { type = "synthetic" }
sample_rate = 1000
master_trigger_out_line = "port0/line1"
camera_trigger_out_line = "ctr0"

[microscopes.test.camera]
hardware = { type = "synthetic" }
width = 8
height = 8
delay = "2ms"
settle_down = "1ms"
trigger_pulse = "1ms"

[microscopes.test.remote_focus]
name = "etl"
channel = "ao2"
amplitude = 0.5
offset = 2.0
output_range = { min = 0.0, max = 5.0 }

[[microscopes.test.galvo]]
name = "galvo_0"
channel = "ao0"
amplitude = 1.0

[[microscopes.test.lasers]]
wavelength = "488nm"
power_channel = "ao5"
onoff_line = "line5"

[[microscopes.test.lasers]]
wavelength = "561nm"
power_channel = "ao6"
onoff_line = "line6"

[microscopes.test.shutter]
line = "line0"
"#;

    fn planner() -> CyclePlanner {
        let profiles =
            MicroscopeProfiles::from_file_config(load_topology_from_str(TOPOLOGY).unwrap()).unwrap();
        CyclePlanner::new(profiles.active().unwrap())
    }

    fn setup(laser: &str) -> ChannelSetup {
        ChannelSetup {
            laser: laser.into(),
            power: 40.0,
            exposure: Duration::from_millis(10),
            remote_focus: None,
        }
    }

    #[test]
    fn every_channel_shares_one_sample_count() {
        let plan = planner().plan(&setup("488nm")).unwrap();
        // settle 1 + delay 2 + exposure 10 at 1 kHz
        assert_eq!(plan.task().samples_per_channel(), 13);
        assert_eq!(plan.task().channels().len(), 8);
        assert!(plan
            .task()
            .channels()
            .iter()
            .all(|c| c.samples.len() == 13));
    }

    #[test]
    fn active_laser_on_during_exposure_only() {
        let plan = planner().plan(&setup("488nm")).unwrap();
        let power = plan.waveform("laser:488nm:power").unwrap();
        assert!(power[..3].iter().all(|v| *v == 0.0));
        assert!(power[3..].iter().all(|v| (*v - 2.0).abs() < 1e-12));
        assert!(plan.waveform("laser:561nm:power").unwrap().iter().all(|v| *v == 0.0));
        assert!(plan.waveform("laser:561nm:onoff").unwrap().iter().all(|v| *v == 0.0));
        assert_eq!(plan.waveform("shutter").unwrap()[3], DIGITAL_HIGH);
    }

    #[test]
    fn camera_trigger_fires_after_settle_and_delay() {
        let plan = planner().plan(&setup("561nm")).unwrap();
        let trigger = plan.waveform("camera_trigger").unwrap();
        let high: Vec<usize> = (0..trigger.len()).filter(|i| trigger[*i] == DIGITAL_HIGH).collect();
        assert_eq!(high, vec![3]);
    }

    #[test]
    fn remote_focus_override_checked_against_range() {
        let planner = planner();
        let mut s = setup("488nm");
        s.remote_focus = Some(RemoteFocusSetting {
            offset: 4.0,
            amplitude: 0.5,
        });
        let plan = planner.plan(&s).unwrap();
        let rf = plan.waveform("remote_focus").unwrap();
        assert_eq!(rf[0], 3.5);
        assert_eq!(rf[12], 4.5);

        s.remote_focus = Some(RemoteFocusSetting {
            offset: 4.8,
            amplitude: 0.5,
        });
        let err = planner.plan(&s).unwrap_err();
        assert!(matches!(err, NavigateError::OutOfRange { ref axis, .. } if axis == "etl"));
    }

    #[test]
    fn bad_channel_settings_rejected() {
        let planner = planner();
        assert!(planner.plan(&setup("640nm")).unwrap_err().is_configuration());

        let mut s = setup("488nm");
        s.power = 120.0;
        assert!(planner.plan(&s).unwrap_err().is_out_of_range());
    }
}
