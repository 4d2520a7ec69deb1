pub mod desk_config;

pub use desk_config::{ConfigStore, DeskConfig, MAX_DURATION_MINUTES};

/// Used when no config path is given on the command line
pub const DEFAULT_CONFIG_FILE_NAME: &str = "desk_config.json";
