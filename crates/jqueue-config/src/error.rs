//! Configuration error type.

use crate::validation::ConfigValidationError;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The loaded configuration failed validation.
    #[error("Invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

fn format_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
