//! Cross-field validation of microscope profiles.
//!
//! Field-level rules live on the schema (`serde_valid`). The checks here need
//! to see the whole device tree at once: physical channel ownership, axis
//! mapping resolution, calibration expressions and sample clock agreement.
//! Every problem is collected so one load reports all of them.

use super::schema::{HardwareDescriptor, MicroscopeConfig, ScanConfig, StageConfig};
use crate::calibration::AxisCalibration;
use serde_valid::validation::Error as ValidationError;
use std::collections::BTreeMap;

pub const SYNTHETIC: &str = "synthetic";
pub const ANALOG: &str = "analog";
pub const NO_DEVICE: &str = "none";

fn custom(message: String) -> ValidationError {
    ValidationError::Custom(message)
}

/// Physical channel ownership. Each channel may be claimed once.
#[derive(Debug, Default)]
struct ChannelClaims {
    owners: BTreeMap<String, String>,
}

impl ChannelClaims {
    fn claim(&mut self, channel: &str, owner: String, errors: &mut Vec<ValidationError>) {
        if let Some(previous) = self.owners.get(channel) {
            errors.push(custom(format!(
                "Channel '{channel}' claimed by both {previous} and {owner}"
            )));
        } else {
            self.owners.insert(channel.to_string(), owner);
        }
    }
}

/// Resolve a stage's `axes_mapping` into (logical axis, physical channel)
/// pairs. Synthetic stages without a mapping use the upper-cased axis name.
pub fn resolve_axes_mapping(stage: &StageConfig) -> Result<Vec<(String, String)>, String> {
    let mapping: Vec<String> = if stage.axes_mapping.is_empty() {
        if stage.hardware.kind == ANALOG {
            return Err(format!(
                "Stage '{}': analog stages need an explicit axes_mapping",
                stage.name
            ));
        }
        stage.axes.iter().map(|a| a.to_uppercase()).collect()
    } else {
        stage.axes_mapping.clone()
    };

    if mapping.len() != stage.axes.len() {
        return Err(format!(
            "Stage '{}': {} axes but {} axes_mapping entries",
            stage.name,
            stage.axes.len(),
            mapping.len()
        ));
    }
    if let Some((axis, _)) = stage
        .axes
        .iter()
        .zip(mapping.iter())
        .find(|(_, channel)| channel.trim().is_empty())
    {
        return Err(format!(
            "Stage '{}': axis '{}' maps to an empty channel",
            stage.name, axis
        ));
    }
    Ok(stage.axes.iter().cloned().zip(mapping).collect())
}

fn check_waveform_device(
    scan: &ScanConfig,
    role: &str,
    daq_rate: f64,
    errors: &mut Vec<ValidationError>,
) {
    let range = scan.output_range;
    if !(range.min < range.max && range.min >= -10.0 && range.max <= 10.0) {
        errors.push(custom(format!(
            "{role} '{}': output range [{}, {}] must be increasing within ±10 V",
            scan.name, range.min, range.max
        )));
    }
    let low = scan.offset - scan.amplitude;
    let high = scan.offset + scan.amplitude;
    if !(range.contains(low) && range.contains(high)) {
        errors.push(custom(format!(
            "{role} '{}': swing [{low}, {high}] V exceeds output range [{}, {}]",
            scan.name, range.min, range.max
        )));
    }
    if let Some(rate) = scan.sample_rate {
        if rate != daq_rate {
            // Compare per-cycle sample counts over one second to show the drift
            errors.push(custom(format!(
                "{role} '{}': sample_rate {rate} differs from DAQ sample_rate {daq_rate}; \
                 waveforms would have {} vs {} samples per second of cycle",
                scan.name,
                rate.round() as u64,
                daq_rate.round() as u64
            )));
        }
    }
}

fn check_backend_kind(slot: &str, hardware: &HardwareDescriptor, errors: &mut Vec<ValidationError>) {
    if hardware.kind.trim().is_empty() {
        errors.push(custom(format!("{slot}: hardware type is empty")));
    } else if hardware.kind == ANALOG {
        errors.push(custom(format!(
            "{slot}: hardware type 'analog' is only valid for stages"
        )));
    }
}

/// The camera and DAQ cannot be left out of a profile.
fn check_required_device(slot: &str, hardware: &HardwareDescriptor, errors: &mut Vec<ValidationError>) {
    if hardware.kind == NO_DEVICE {
        errors.push(custom(format!(
            "{slot}: a microscope requires a {slot}; hardware type '{NO_DEVICE}' is not allowed"
        )));
    } else {
        check_backend_kind(slot, hardware, errors);
    }
}

/// Validate one microscope profile.
pub fn validate_microscope(config: &MicroscopeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut claims = ChannelClaims::default();
    let daq_rate = config.daq.sample_rate;

    check_required_device("daq", &config.daq.hardware, &mut errors);
    check_required_device("camera", &config.camera.hardware, &mut errors);

    claims.claim(
        &config.daq.master_trigger_out_line,
        "daq master trigger".into(),
        &mut errors,
    );
    claims.claim(
        &config.daq.camera_trigger_out_line,
        "camera trigger".into(),
        &mut errors,
    );

    let pulse = config.camera.trigger_pulse;
    if pulse.is_zero() {
        errors.push(custom("Camera: trigger_pulse must be non-zero".into()));
    } else if pulse.as_secs_f64() * daq_rate < 1.0 {
        errors.push(custom(format!(
            "Camera: trigger_pulse {pulse:?} is shorter than one sample at DAQ sample_rate {daq_rate}"
        )));
    }

    if let Some(rf) = &config.remote_focus {
        claims.claim(&rf.channel, format!("remote focus '{}'", rf.name), &mut errors);
        check_waveform_device(rf, "Remote focus", daq_rate, &mut errors);
    }

    for galvo in &config.galvo {
        claims.claim(&galvo.channel, format!("galvo '{}'", galvo.name), &mut errors);
        check_waveform_device(galvo, "Galvo", daq_rate, &mut errors);
    }

    let mut seen_wavelengths = Vec::new();
    for laser in &config.lasers {
        if seen_wavelengths.contains(&laser.wavelength) {
            errors.push(custom(format!("Laser '{}' defined twice", laser.wavelength)));
        }
        seen_wavelengths.push(laser.wavelength.clone());
        claims.claim(
            &laser.power_channel,
            format!("laser '{}' power", laser.wavelength),
            &mut errors,
        );
        claims.claim(
            &laser.onoff_line,
            format!("laser '{}' on/off", laser.wavelength),
            &mut errors,
        );
        if let Err(e) = AxisCalibration::from_expression(
            laser.wavelength.clone(),
            &laser.power_calibration,
            laser.power_range.min,
            laser.power_range.max,
        ) {
            errors.push(custom(format!("Laser '{}': {e}", laser.wavelength)));
        }
    }

    if let Some(shutter) = &config.shutter {
        claims.claim(&shutter.line, "shutter".into(), &mut errors);
    }

    let mut logical_axes: BTreeMap<String, String> = BTreeMap::new();
    for stage in &config.stage {
        if stage.hardware.kind.trim().is_empty() {
            errors.push(custom(format!("Stage '{}': hardware type is empty", stage.name)));
        }
        let resolved = match resolve_axes_mapping(stage) {
            Ok(resolved) => resolved,
            Err(message) => {
                errors.push(custom(message));
                continue;
            }
        };
        for (axis, channel) in &resolved {
            if let Some(other) = logical_axes.insert(axis.clone(), stage.name.clone()) {
                errors.push(custom(format!(
                    "Axis '{axis}' provided by both stage '{other}' and stage '{}'",
                    stage.name
                )));
            }
            // DAQ-driven axes share the DAQ channel namespace; controller
            // axes are private to their stage.
            let physical = if stage.hardware.kind == ANALOG {
                channel.clone()
            } else {
                format!("{}:{}", stage.name, channel)
            };
            claims.claim(
                &physical,
                format!("stage '{}' axis '{axis}'", stage.name),
                &mut errors,
            );

            if let Some(limits) = stage.limits.get(axis) {
                if limits.min > limits.max {
                    errors.push(custom(format!(
                        "Stage '{}' axis '{axis}': min {} > max {}",
                        stage.name, limits.min, limits.max
                    )));
                }
            }

            if stage.hardware.kind == ANALOG {
                match (stage.calibration.get(axis), stage.limits.get(axis)) {
                    (Some(expression), Some(limits)) => {
                        if let Err(e) =
                            AxisCalibration::from_expression(axis.clone(), expression, limits.min, limits.max)
                        {
                            errors.push(custom(format!("Stage '{}': {e}", stage.name)));
                        }
                    }
                    _ => errors.push(custom(format!(
                        "Stage '{}' axis '{axis}': analog axes need both calibration and limits",
                        stage.name
                    ))),
                }
            }
        }
        for axis in stage.limits.keys().chain(stage.calibration.keys()) {
            if !stage.axes.contains(axis) {
                errors.push(custom(format!(
                    "Stage '{}': settings given for unknown axis '{axis}'",
                    stage.name
                )));
            }
        }
    }

    for (slot, positioner) in [("zoom", &config.zoom), ("mirror", &config.mirror)] {
        if let Some(p) = positioner {
            check_backend_kind(slot, &p.hardware, &mut errors);
            if p.positions.is_empty() && p.hardware.kind != NO_DEVICE {
                errors.push(custom(format!("{slot}: at least one named position required")));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::*;
    use std::time::Duration;

    fn minimal() -> MicroscopeConfig {
        MicroscopeConfig {
            daq: DaqConfig {
                hardware: HardwareDescriptor::synthetic(),
                sample_rate: 100_000.0,
                master_trigger_out_line: "PXI6259/port0/line1".into(),
                camera_trigger_out_line: "/PXI6259/ctr0".into(),
            },
            camera: CameraConfig {
                hardware: HardwareDescriptor::synthetic(),
                width: 64,
                height: 64,
                delay: Duration::from_millis(2),
                settle_down: Duration::from_millis(1),
                trigger_pulse: Duration::from_micros(500),
                frame_timeout_margin: Duration::from_millis(500),
            },
            remote_focus: None,
            galvo: Vec::new(),
            stage: Vec::new(),
            lasers: Vec::new(),
            filter_wheel: None,
            shutter: None,
            zoom: None,
            mirror: None,
        }
    }

    fn galvo(name: &str, channel: &str) -> ScanConfig {
        ScanConfig {
            name: name.into(),
            channel: channel.into(),
            waveform: WaveformShape::Sawtooth,
            amplitude: 1.0,
            offset: 0.0,
            phase: Duration::ZERO,
            duty: 0.5,
            output_range: VoltageRange::default(),
            sample_rate: None,
        }
    }

    fn messages(config: &MicroscopeConfig) -> Vec<String> {
        validate_microscope(config)
            .err()
            .unwrap_or_default()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn minimal_profile_is_valid() {
        assert!(validate_microscope(&minimal()).is_ok());
    }

    #[test]
    fn channel_collision_detected() {
        let mut config = minimal();
        config.galvo.push(galvo("galvo_0", "PXI6259/ao0"));
        config.galvo.push(galvo("galvo_1", "PXI6259/ao0"));
        let errors = messages(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("PXI6259/ao0"));
    }

    #[test]
    fn mismatched_sample_rate_rejected() {
        let mut config = minimal();
        let mut g = galvo("galvo_0", "ao0");
        g.sample_rate = Some(50_000.0);
        config.galvo.push(g);
        assert!(messages(&config)[0].contains("sample_rate"));
    }

    #[test]
    fn swing_outside_output_range_rejected() {
        let mut config = minimal();
        let mut g = galvo("galvo_0", "ao0");
        g.offset = 4.5;
        config.galvo.push(g);
        assert!(messages(&config)[0].contains("exceeds output range"));
    }

    #[test]
    fn unresolved_axis_mapping_rejected() {
        let mut config = minimal();
        config.stage.push(StageConfig {
            name: "sample".into(),
            hardware: HardwareDescriptor::synthetic(),
            axes: vec!["x".into(), "y".into()],
            axes_mapping: vec!["X".into()],
            limits: BTreeMap::new(),
            calibration: BTreeMap::new(),
        });
        assert!(messages(&config)[0].contains("axes_mapping"));
    }

    #[test]
    fn analog_axis_needs_valid_calibration() {
        let mut config = minimal();
        let mut calibration = BTreeMap::new();
        calibration.insert("f".to_string(), "x^2".to_string());
        let mut limits = BTreeMap::new();
        limits.insert("f".to_string(), AxisLimits { min: 0.0, max: 100.0 });
        config.stage.push(StageConfig {
            name: "focus".into(),
            hardware: HardwareDescriptor {
                kind: ANALOG.into(),
                params: BTreeMap::new(),
            },
            axes: vec!["f".into()],
            axes_mapping: vec!["PXI6259/ao3".into()],
            limits,
            calibration,
        });
        let errors = messages(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Unsupported calibration"));
    }

    #[test]
    fn analog_axis_colliding_with_galvo_rejected() {
        let mut config = minimal();
        config.galvo.push(galvo("galvo_0", "PXI6259/ao3"));
        let mut calibration = BTreeMap::new();
        calibration.insert("f".to_string(), "0.05*x".to_string());
        let mut limits = BTreeMap::new();
        limits.insert("f".to_string(), AxisLimits { min: 0.0, max: 100.0 });
        config.stage.push(StageConfig {
            name: "focus".into(),
            hardware: HardwareDescriptor {
                kind: ANALOG.into(),
                params: BTreeMap::new(),
            },
            axes: vec!["f".into()],
            axes_mapping: vec!["PXI6259/ao3".into()],
            limits,
            calibration,
        });
        assert!(messages(&config)[0].contains("claimed by both"));
    }

    #[test]
    fn synthetic_stage_mapping_defaults_to_axis_names() {
        let stage = StageConfig {
            name: "sample".into(),
            hardware: HardwareDescriptor::synthetic(),
            axes: vec!["x".into(), "theta".into()],
            axes_mapping: Vec::new(),
            limits: BTreeMap::new(),
            calibration: BTreeMap::new(),
        };
        assert_eq!(
            resolve_axes_mapping(&stage).unwrap(),
            vec![("x".into(), "X".into()), ("theta".into(), "THETA".into())]
        );
    }

    #[test]
    fn collects_every_problem() {
        let mut config = minimal();
        config.camera.trigger_pulse = Duration::ZERO;
        config.galvo.push(galvo("g", "/PXI6259/ctr0"));
        config.lasers.push(LaserConfig {
            wavelength: "488nm".into(),
            power_channel: "ao5".into(),
            onoff_line: "line5".into(),
            power_calibration: "sin(x)".into(),
            power_range: AxisLimits { min: 0.0, max: 100.0 },
        });
        assert_eq!(messages(&config).len(), 3);
    }

    #[test]
    fn camera_and_daq_cannot_be_absent() {
        let absent = HardwareDescriptor {
            kind: NO_DEVICE.into(),
            params: BTreeMap::new(),
        };
        let mut config = minimal();
        config.camera.hardware = absent.clone();
        let errors = messages(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("requires a camera"), "{errors:?}");

        let mut config = minimal();
        config.daq.hardware = absent;
        assert!(messages(&config)[0].contains("requires a daq"));
    }

    #[test]
    fn trigger_pulse_must_span_a_sample() {
        let mut config = minimal();
        config.daq.sample_rate = 1_000.0;
        let errors = messages(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("shorter than one sample"), "{errors:?}");

        config.camera.trigger_pulse = Duration::from_millis(1);
        assert!(validate_microscope(&config).is_ok());
    }
}
