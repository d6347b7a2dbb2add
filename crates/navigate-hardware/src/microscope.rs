//! Assembly of one active microscope profile into live backends.

use crate::backends::{
    AnalogAxis, AxisBackend, BackendSelection, CameraBackend, DaqBackend, FilterWheelBackend,
    SyntheticFaults,
};
use crate::config::validation::{ANALOG, NO_DEVICE, SYNTHETIC};
use crate::config::{HardwareDescriptor, PositionerConfig};
use crate::topology::DeviceTopology;
use navigate_core::capabilities::{
    Camera, FilterSelect, Movable, Triggerable, WaveformDrivable,
};
use navigate_core::error::{DriverError, NavigateError, Quantity, Result};
use navigate_core::limits::MOTION_SETTLE_TIMEOUT;
use navigate_driver_synthetic::{
    FocusModel, SyntheticAxis, SyntheticCamera, SyntheticDaq, SyntheticFilterWheel, SyntheticMode,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_FOCUS_AXIS: &str = "f";
const DEFAULT_DEPTH_OF_FIELD: f64 = 5.0;

/// Which backend a descriptor resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Synthetic,
    Analog,
    Absent,
}

fn resolve(slot: &str, hardware: &HardwareDescriptor, selection: BackendSelection) -> Result<Resolved> {
    match hardware.kind.as_str() {
        NO_DEVICE => Ok(Resolved::Absent),
        ANALOG => Ok(Resolved::Analog),
        SYNTHETIC => Ok(Resolved::Synthetic),
        _ if selection == BackendSelection::Synthetic => Ok(Resolved::Synthetic),
        vendor => Err(NavigateError::Configuration(format!(
            "{slot}: no backend available for hardware type '{vendor}' (run in synthetic mode)"
        ))),
    }
}

/// The camera and DAQ have no analog form and cannot be absent.
fn require_synthetic(slot: &str, hardware: &HardwareDescriptor, selection: BackendSelection) -> Result<()> {
    match resolve(slot, hardware, selection)? {
        Resolved::Synthetic => Ok(()),
        Resolved::Analog | Resolved::Absent => Err(NavigateError::Configuration(format!(
            "{slot}: a microscope requires a {slot}, got hardware type '{}'",
            hardware.kind
        ))),
    }
}

fn synthetic_mode(hardware: &HardwareDescriptor) -> Result<SyntheticMode> {
    match hardware.params.get("mode") {
        None => Ok(SyntheticMode::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            NavigateError::Configuration(format!("invalid synthetic mode {value}: {e}"))
        }),
    }
}

struct Positioner {
    positions: BTreeMap<String, f64>,
    axis: AxisBackend,
}

/// Live devices of the active profile.
pub struct Microscope {
    topology: Arc<DeviceTopology>,
    daq: DaqBackend,
    camera: CameraBackend,
    axes: BTreeMap<String, AxisBackend>,
    filter_wheel: Option<FilterWheelBackend>,
    zoom: Option<Positioner>,
    mirror: Option<Positioner>,
}

impl Microscope {
    pub fn assemble(topology: Arc<DeviceTopology>, selection: BackendSelection) -> Result<Self> {
        Self::assemble_with(topology, selection, &SyntheticFaults::default())
    }

    /// Build every backend of `topology`.
    ///
    /// Controller axes come first so the synthetic camera can follow the
    /// focus axis; the DAQ is built with the camera on its trigger line;
    /// analog axes are bound to the DAQ last.
    pub fn assemble_with(
        topology: Arc<DeviceTopology>,
        selection: BackendSelection,
        faults: &SyntheticFaults,
    ) -> Result<Self> {
        let config = topology.config();
        let mut axes = BTreeMap::new();

        for stage in &config.stage {
            if resolve(&format!("stage '{}'", stage.name), &stage.hardware, selection)?
                != Resolved::Synthetic
            {
                continue;
            }
            let mode = synthetic_mode(&stage.hardware)?;
            for (axis, binding) in topology.axes().filter(|(_, b)| b.stage == stage.name) {
                let mut builder = SyntheticAxis::builder(axis)
                    .mode(mode)
                    .error_config(faults.stage.clone());
                if let Some(limits) = binding.limits {
                    let home = limits.min.max(0.0).min(limits.max);
                    builder = builder.travel(limits.min, limits.max).initial_position(home);
                }
                axes.insert(axis.to_string(), AxisBackend::Synthetic(Arc::new(builder.build())));
            }
        }

        require_synthetic("camera", &config.camera.hardware, selection)?;
        let camera_hw = &config.camera.hardware;
        let mut camera = SyntheticCamera::builder(config.camera.width, config.camera.height)
            .mode(synthetic_mode(camera_hw)?)
            .error_config(faults.camera.clone());
        let focus_axis = camera_hw.param_str("focus_axis").unwrap_or(DEFAULT_FOCUS_AXIS);
        match axes.get(focus_axis) {
            Some(AxisBackend::Synthetic(axis)) => {
                let axis: Arc<dyn Movable> = axis.clone();
                camera = camera.focus(FocusModel {
                    axis,
                    best_focus: camera_hw.param_f64("best_focus").unwrap_or(0.0),
                    depth_of_field: camera_hw
                        .param_f64("depth_of_field")
                        .unwrap_or(DEFAULT_DEPTH_OF_FIELD),
                });
            }
            _ => debug!(focus_axis, "Synthetic camera without focus model"),
        }
        let camera = Arc::new(camera.build());

        require_synthetic("daq", &config.daq.hardware, selection)?;
        let trigger: Arc<dyn Triggerable> = camera.clone();
        let daq = DaqBackend::Synthetic(Arc::new(
            SyntheticDaq::builder()
                .mode(synthetic_mode(&config.daq.hardware)?)
                .error_config(faults.daq.clone())
                .trigger_link(config.daq.camera_trigger_out_line.clone(), trigger)
                .build(),
        ));

        for (axis, binding) in topology.axes().filter(|(_, b)| b.analog) {
            let calibration = topology.calibrations().get(axis)?.clone();
            axes.insert(
                axis.to_string(),
                AxisBackend::Analog(Arc::new(AnalogAxis::new(
                    binding.channel.clone(),
                    calibration,
                    daq.clone(),
                ))),
            );
        }

        let filter_wheel = match &config.filter_wheel {
            Some(wheel) => match resolve("filter_wheel", &wheel.hardware, selection)? {
                Resolved::Synthetic => Some(FilterWheelBackend::Synthetic(Arc::new(
                    SyntheticFilterWheel::new(wheel.filters.clone())
                        .with_mode(synthetic_mode(&wheel.hardware)?)
                        .with_error_config(faults.filter_wheel.clone()),
                ))),
                _ => None,
            },
            None => None,
        };

        let zoom = Self::positioner("zoom", config.zoom.as_ref(), selection)?;
        let mirror = Self::positioner("mirror", config.mirror.as_ref(), selection)?;

        info!(
            profile = topology.name(),
            axes = axes.len(),
            filter_wheel = filter_wheel.is_some(),
            ?selection,
            "Assembled microscope"
        );

        Ok(Self {
            topology,
            daq,
            camera: CameraBackend::Synthetic(camera),
            axes,
            filter_wheel,
            zoom,
            mirror,
        })
    }

    fn positioner(
        slot: &str,
        config: Option<&PositionerConfig>,
        selection: BackendSelection,
    ) -> Result<Option<Positioner>> {
        let Some(config) = config else {
            return Ok(None);
        };
        match resolve(slot, &config.hardware, selection)? {
            Resolved::Synthetic => {
                let axis = SyntheticAxis::builder(slot)
                    .mode(synthetic_mode(&config.hardware)?)
                    .build();
                Ok(Some(Positioner {
                    positions: config.positions.clone(),
                    axis: AxisBackend::Synthetic(Arc::new(axis)),
                }))
            }
            _ => Ok(None),
        }
    }

    pub fn topology(&self) -> &Arc<DeviceTopology> {
        &self.topology
    }

    pub fn daq(&self) -> &DaqBackend {
        &self.daq
    }

    pub fn camera(&self) -> &CameraBackend {
        &self.camera
    }

    /// DAQ as a capability object, for the scheduler.
    pub fn daq_handle(&self) -> Arc<dyn WaveformDrivable> {
        Arc::new(self.daq.clone())
    }

    /// Camera as a capability object, for the scheduler.
    pub fn camera_handle(&self) -> Arc<dyn Camera> {
        Arc::new(self.camera.clone())
    }

    pub fn axis(&self, axis: &str) -> Result<&AxisBackend> {
        self.axes
            .get(axis)
            .ok_or_else(|| NavigateError::Configuration(format!("unknown axis '{axis}'")))
    }

    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.keys().map(String::as_str)
    }

    pub fn filter_wheel(&self) -> Option<&FilterWheelBackend> {
        self.filter_wheel.as_ref()
    }

    fn check_limits(&self, axis: &str, position: f64) -> Result<()> {
        let binding = self
            .topology
            .axis(axis)
            .ok_or_else(|| NavigateError::Configuration(format!("unknown axis '{axis}'")))?;
        if let Some(limits) = binding.limits {
            if !limits.contains(position) {
                return Err(NavigateError::OutOfRange {
                    axis: axis.to_string(),
                    quantity: Quantity::Position,
                    value: position,
                    min: limits.min,
                    max: limits.max,
                });
            }
        }
        Ok(())
    }

    /// Move one axis and wait for it to settle. Targets outside the
    /// configured limits fail before anything is written.
    pub async fn move_axis(&self, axis: &str, position: f64) -> Result<()> {
        self.check_limits(axis, position)?;
        let backend = self.axis(axis)?;
        backend.move_abs(position).await?;
        tokio::time::timeout(MOTION_SETTLE_TIMEOUT, backend.wait_settled())
            .await
            .map_err(|_| {
                NavigateError::HardwareFault(DriverError::timeout(
                    "stage",
                    format!("axis '{axis}' did not settle within {MOTION_SETTLE_TIMEOUT:?}"),
                ))
            })?
    }

    /// Move several axes. All targets are checked before any axis moves.
    pub async fn move_to(&self, targets: &BTreeMap<String, f64>) -> Result<()> {
        for (axis, position) in targets {
            self.check_limits(axis, *position)?;
            self.axis(axis)?;
        }
        for (axis, position) in targets {
            self.move_axis(axis, *position).await?;
        }
        Ok(())
    }

    pub async fn axis_position(&self, axis: &str) -> Result<f64> {
        self.axis(axis)?.position().await
    }

    pub async fn select_filter(&self, filter: &str) -> Result<()> {
        match &self.filter_wheel {
            Some(wheel) => wheel.select(filter).await,
            None => Err(NavigateError::Configuration(format!(
                "filter '{filter}' requested but no filter wheel is configured"
            ))),
        }
    }

    async fn set_positioner(slot: &str, positioner: Option<&Positioner>, name: &str) -> Result<()> {
        let positioner = positioner.ok_or_else(|| {
            NavigateError::Configuration(format!("no {slot} is configured"))
        })?;
        let target = positioner.positions.get(name).copied().ok_or_else(|| {
            NavigateError::Configuration(format!("{slot} has no position named '{name}'"))
        })?;
        positioner.axis.move_abs(target).await?;
        positioner.axis.wait_settled().await
    }

    pub async fn set_zoom(&self, name: &str) -> Result<()> {
        Self::set_positioner("zoom", self.zoom.as_ref(), name).await
    }

    pub async fn set_mirror(&self, name: &str) -> Result<()> {
        Self::set_positioner("mirror", self.mirror.as_ref(), name).await
    }

    /// Zero all DAQ outputs and halt every axis. Keeps going past
    /// individual failures and reports the first one.
    pub async fn safe_state(&self) -> Result<()> {
        let mut first_error = None;
        if let Err(e) = self.daq.zero().await {
            warn!(error = %e, "Failed to zero DAQ outputs");
            first_error.get_or_insert(e);
        }
        for (name, axis) in &self.axes {
            if let Err(e) = axis.stop().await {
                warn!(axis = %name, error = %e, "Failed to stop axis");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
