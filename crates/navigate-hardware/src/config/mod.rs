//! Device topology configuration.
//!
//! Three layers, as in every navigate config:
//!
//! 1. **Schema**: serde types with `serde_valid` field rules
//! 2. **Validation**: cross-field rules over a whole profile
//! 3. **Loader**: figment-based loading with env overrides

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_topology, load_topology_from_str, ConfigLoadError};
pub use schema::*;
pub use validation::{resolve_axes_mapping, validate_microscope};
