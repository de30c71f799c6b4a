//! Static configuration loaded once at construction.

mod settings;

pub use settings::{PalisadeConfig, DEFAULT_CONFIG_FILE};
