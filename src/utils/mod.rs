//! Configuration and logging utilities

pub mod config;
pub mod logging;

pub use config::{AnchorConfig, ConfigError, PipelineConfig};
pub use logging::init_logging;
