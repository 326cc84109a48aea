mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{
    config_path, load_config, merge_config, template, CliOverrides, ConfigFile,
};
