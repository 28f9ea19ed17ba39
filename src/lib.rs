pub mod broadcast;
pub mod config;
pub mod download;
pub mod error;
pub mod presets;
pub mod progress;
pub mod validate;

pub use error::{PullError, Result};
