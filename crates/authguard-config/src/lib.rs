//! Configuration system for the authguard request guard.
//!
//! Provides TOML-based configuration with:
//! - Server location and API prefix (`[server]`)
//! - Interception tuning: bypass patterns, refresh lookahead and timeout (`[guard]`)
//! - Auth endpoint paths (`[endpoints]`)
//! - Token file location (`[storage]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    load_config, load_config_file, load_config_with_options, save_config, token_file_path,
    xdg_config_dir, xdg_config_path, ConfigSource, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
