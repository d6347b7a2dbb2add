//! Topology loading and microscope assembly against the demo configuration.

use navigate_core::capabilities::{FilterSelect, Movable};
use navigate_core::error::NavigateError;
use navigate_hardware::config::load_topology_from_str;
use navigate_hardware::{laser_axis, BackendSelection, Microscope, MicroscopeProfiles};
use std::collections::BTreeMap;

const DEMO: &str = include_str!("../../../config/microscopes.toml");

fn profiles() -> MicroscopeProfiles {
    MicroscopeProfiles::from_file_config(load_topology_from_str(DEMO).unwrap()).unwrap()
}

fn mesoscale() -> Microscope {
    Microscope::assemble(profiles().active().unwrap(), BackendSelection::AsConfigured).unwrap()
}

#[test]
fn all_profiles_loaded_one_active() {
    let mut profiles = profiles();
    assert_eq!(profiles.active_name(), "mesoscale");
    assert_eq!(profiles.names().collect::<Vec<_>>(), vec!["mesoscale", "widefield"]);

    let widefield = profiles.activate("widefield").unwrap();
    assert_eq!(widefield.name(), "widefield");
    assert_eq!(profiles.active_name(), "widefield");
    // The previous profile stays loadable
    assert!(profiles.get("mesoscale").is_ok());
    assert!(profiles.activate("confocal").unwrap_err().is_configuration());
}

#[test]
fn calibrations_resolved_at_load() {
    let topology = profiles().active().unwrap();
    let calibrations = topology.calibrations();

    assert_eq!(calibrations.to_voltage("p", 100.0).unwrap(), 5.0);
    assert_eq!(calibrations.to_voltage(&laser_axis("488nm"), 50.0).unwrap(), 2.5);
    assert!((calibrations.to_voltage(&laser_axis("642nm"), 50.0).unwrap() - 3.0).abs() < 1e-12);
    assert!(calibrations.to_voltage("p", 250.0).unwrap_err().is_out_of_range());

    let binding = topology.axis("f").unwrap();
    assert_eq!(binding.stage, "sample");
    assert_eq!(binding.channel, "M");
    assert!(!binding.analog);
}

#[test]
fn calibration_round_trip_over_declared_range() {
    let topology = profiles().active().unwrap();
    let calibrations = topology.calibrations();
    for axis in ["p", "laser:488nm", "laser:642nm"] {
        let (min, max) = calibrations.get(axis).unwrap().bounds();
        for i in 0..=50 {
            let p = min + (max - min) * i as f64 / 50.0;
            let v = calibrations.to_voltage(axis, p).unwrap();
            let back = calibrations.to_position(axis, v).unwrap();
            assert!((back - p).abs() < 1e-9, "{axis}: {p} -> {v} -> {back}");
        }
    }
}

#[test]
fn vendor_profile_requires_synthetic_mode() {
    let topology = profiles().get("widefield").unwrap();
    let err = Microscope::assemble(topology.clone(), BackendSelection::AsConfigured)
        .err()
        .unwrap();
    assert!(err.is_configuration());

    let microscope = Microscope::assemble(topology, BackendSelection::Synthetic).unwrap();
    assert_eq!(
        microscope.axis_names().collect::<Vec<_>>(),
        vec!["f", "x", "y", "z"]
    );
    assert!(microscope.filter_wheel().is_none());
}

#[test]
fn profile_without_camera_is_rejected_at_load() {
    let toml = DEMO.replacen(
        r#"hardware = { type = "synthetic", params = { focus_axis = "f""#,
        r#"hardware = { type = "none", params = { focus_axis = "f""#,
        1,
    );
    assert_ne!(toml, DEMO);
    let message = load_topology_from_str(&toml).unwrap_err().to_string();
    assert!(message.contains("[mesoscale]"), "{message}");
    assert!(message.contains("requires a camera"), "{message}");
}

#[tokio::test]
async fn out_of_range_move_rejected_before_write() {
    let microscope = mesoscale();
    let err = microscope.move_axis("x", 20_000.0).await.unwrap_err();
    assert!(matches!(err, NavigateError::OutOfRange { ref axis, .. } if axis == "x"));

    let x = microscope.axis("x").unwrap().as_synthetic().unwrap().clone();
    assert!(x.history().is_empty());
}

#[tokio::test]
async fn multi_axis_move_checks_every_target_first() {
    let microscope = mesoscale();
    let mut targets = BTreeMap::new();
    targets.insert("x".to_string(), 100.0);
    targets.insert("z".to_string(), 9_000.0);
    assert!(microscope.move_to(&targets).await.unwrap_err().is_out_of_range());
    assert_eq!(microscope.axis_position("x").await.unwrap(), 0.0);

    targets.insert("z".to_string(), -250.0);
    microscope.move_to(&targets).await.unwrap();
    assert_eq!(microscope.axis_position("x").await.unwrap(), 100.0);
    assert_eq!(microscope.axis_position("z").await.unwrap(), -250.0);
}

#[tokio::test]
async fn analog_axis_moves_through_daq() {
    let microscope = mesoscale();
    microscope.move_axis("p", 40.0).await.unwrap();

    let daq = microscope.daq().as_synthetic().unwrap();
    assert_eq!(daq.output("PXI6259/ao3"), Some(2.0));
    assert_eq!(microscope.axis("p").unwrap().position().await.unwrap(), 40.0);
}

#[tokio::test]
async fn filter_zoom_and_safe_state() {
    let microscope = mesoscale();
    microscope.select_filter("GFP").await.unwrap();
    assert_eq!(
        microscope.filter_wheel().unwrap().current().await.unwrap(),
        Some("GFP".to_string())
    );

    microscope.set_zoom("6.3x").await.unwrap();
    assert!(microscope.set_zoom("40x").await.unwrap_err().is_configuration());
    assert!(microscope.set_mirror("up").await.unwrap_err().is_configuration());

    microscope.move_axis("p", 100.0).await.unwrap();
    microscope.safe_state().await.unwrap();
    assert!(microscope.daq().as_synthetic().unwrap().is_safe());
    assert!(microscope
        .axis("x")
        .unwrap()
        .as_synthetic()
        .unwrap()
        .was_stopped());
}
