//! Topology loading.
//!
//! ```rust,ignore
//! use navigate_hardware::config::loader::load_topology;
//! use std::path::Path;
//!
//! let file = load_topology(Path::new("config/microscopes.toml"))?;
//! println!("active profile: {}", file.active);
//! ```
//!
//! Any value can be overridden from the environment with the `NAVIGATE_`
//! prefix and `__` as the nesting separator, e.g.
//! `NAVIGATE_ACTIVE=widefield` or `NAVIGATE_BUFFER__SLOTS=200`.

use super::schema::TopologyFile;
use super::validation::validate_microscope;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde_valid::Validate;
use std::path::Path;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "NAVIGATE_";

/// Error types for topology loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Cross-field validation failure (channel collisions, calibration, ...)
    #[error("Config validation failed:\n{0}")]
    ValidationError(String),

    #[error("Schema validation failed:\n{0}")]
    SchemaValidationError(String),

    #[error("Active profile '{active}' is not defined (available: {available})")]
    UnknownProfile { active: String, available: String },
}

/// Load and validate a topology file.
///
/// Field rules run first, then every profile is cross-validated. All
/// problems of all profiles are reported together.
pub fn load_topology(path: &Path) -> Result<TopologyFile> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
    }

    debug!(path = %path.display(), "Loading device topology");

    let file: TopologyFile = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    check(file)
}

/// Load a topology from a TOML string. No environment overrides apply.
pub fn load_topology_from_str(toml_content: &str) -> Result<TopologyFile> {
    let file: TopologyFile = toml::from_str(toml_content)
        .map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
    check(file)
}

fn check(file: TopologyFile) -> Result<TopologyFile> {
    if let Err(errors) = file.validate() {
        return Err(ConfigLoadError::SchemaValidationError(errors.to_string()).into());
    }

    let mut messages = Vec::new();
    for (name, microscope) in &file.microscopes {
        if let Err(errors) = validate_microscope(microscope) {
            messages.extend(errors.iter().map(|e| format!("[{name}] {e}")));
        }
    }
    if !messages.is_empty() {
        return Err(ConfigLoadError::ValidationError(messages.join("\n")).into());
    }

    if !file.microscopes.contains_key(&file.active) {
        return Err(ConfigLoadError::UnknownProfile {
            active: file.active.clone(),
            available: file
                .microscopes
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        }
        .into());
    }

    info!(
        profiles = file.microscopes.len(),
        active = %file.active,
        "Loaded device topology"
    );
    Ok(file)
}
