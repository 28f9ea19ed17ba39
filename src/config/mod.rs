//! Configuration module for modelpull
//!
//! Loads config from `$MODELPULL_CONFIG`, `$XDG_CONFIG_HOME/modelpull/config.toml`
//! or `~/.config/modelpull/config.toml`.
//! Falls back to built-in defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use modelpull::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Install root: {}", config.paths.install_root.display());
//! println!("Poll interval: {} ms", config.server.poll_interval_ms);
//! ```

pub mod schema;

pub use schema::{config_path, Config};
