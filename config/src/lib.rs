// Nexus Configuration System
// Layered configuration management

pub mod layered;
pub mod loader;
pub mod types;

pub use layered::{ConfigLayer, ConfigLayerSource, LayeredConfig};
pub use loader::{ConfigError, ConfigLoader, parse_override};
pub use types::*;
