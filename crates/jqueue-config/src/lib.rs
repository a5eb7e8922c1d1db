//! # jqueue Config
//!
//! Layered configuration for jqueue processes: TOML files under a config
//! directory, a `.env` file, and `JQUEUE__`-prefixed environment variables.

mod app_config;
mod error;
mod loader;
pub mod validation;

pub use app_config::*;
pub use error::*;
pub use loader::*;
pub use validation::{ConfigValidationError, ConfigValidator};
