//! Built-in acquisition modes and the feature programs they run.

use crate::feature::{FeatureNode, FeatureProgram, NamedSource, Repeat};
use navigate_core::error::NavigateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Cycle through the selected channels until stopped
    Continuous,
    /// One frame per selected channel
    Single,
    /// Z-stacks over every position, once per timepoint
    ZStack,
}

impl AcquisitionMode {
    pub const ALL: [AcquisitionMode; 3] = [
        AcquisitionMode::Continuous,
        AcquisitionMode::Single,
        AcquisitionMode::ZStack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Continuous => "continuous",
            AcquisitionMode::Single => "single",
            AcquisitionMode::ZStack => "z_stack",
        }
    }

    pub fn program(&self) -> FeatureProgram {
        match self {
            AcquisitionMode::Continuous => continuous(),
            AcquisitionMode::Single => single(),
            AcquisitionMode::ZStack => zstack(),
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = NavigateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "continuous" | "live" => Ok(AcquisitionMode::Continuous),
            "single" => Ok(AcquisitionMode::Single),
            "z_stack" | "zstack" => Ok(AcquisitionMode::ZStack),
            other => Err(NavigateError::Configuration(format!(
                "unknown acquisition mode '{other}'"
            ))),
        }
    }
}

fn channel_round() -> Vec<FeatureNode> {
    vec![FeatureNode::over(
        NamedSource::Channels,
        vec![FeatureNode::atomic("PrepareNextChannel")],
    )]
}

pub fn continuous() -> FeatureProgram {
    FeatureProgram::new("continuous", channel_round(), Repeat::UntilStopped)
}

pub fn single() -> FeatureProgram {
    FeatureProgram::new("single", channel_round(), Repeat::Once)
}

pub fn zstack() -> FeatureProgram {
    FeatureProgram::new(
        "z_stack",
        vec![FeatureNode::over(
            NamedSource::Timepoints,
            vec![
                FeatureNode::atomic("ZStackAcquisition"),
                FeatureNode::atomic("StackPause"),
            ],
        )],
        Repeat::Once,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureCatalogue;

    #[test]
    fn modes_parse_from_cli_names() {
        assert_eq!("continuous".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Continuous);
        assert_eq!("z-stack".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::ZStack);
        assert_eq!("ZStack".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::ZStack);
        assert!("timelapse".parse::<AcquisitionMode>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for mode in AcquisitionMode::ALL {
            assert_eq!(mode.to_string().parse::<AcquisitionMode>().unwrap(), mode);
        }
    }

    #[test]
    fn builtin_catalogue_covers_every_mode() {
        let catalogue = FeatureCatalogue::builtin();
        for mode in AcquisitionMode::ALL {
            catalogue.check(&mode.program()).unwrap();
        }
    }

    #[test]
    fn continuous_repeats_until_stopped() {
        assert_eq!(continuous().repeat(), Repeat::UntilStopped);
        assert_eq!(single().repeat(), Repeat::Once);
        assert_eq!(single().calls().len(), 1);
    }
}
