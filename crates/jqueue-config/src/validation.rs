//! Configuration validation.
//!
//! Fails fast on invalid configuration rather than at runtime.

use crate::{AppConfig, DispatchMode};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Worker concurrency must be at least one.
    ZeroConcurrency,
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: usize, maximum: usize },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Duration value must be positive.
    NonPositiveDuration { name: String },
    /// Retry strategy is unknown.
    InvalidRetryStrategy { value: String },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Queue name is empty.
    EmptyQueueName,
    /// Polling mode needs a durable store.
    PollingWithoutStore,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroConcurrency => write!(f, "worker.concurrency must be at least 1"),
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({}) cannot be greater than max ({})",
                    min, max
                )
            }
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositiveDuration { name } => {
                write!(f, "'{}' must be positive", name)
            }
            Self::InvalidRetryStrategy { value } => {
                write!(
                    f,
                    "Invalid retry strategy: '{}' (valid: none, fixed, exponential)",
                    value
                )
            }
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                    value
                )
            }
            Self::EmptyQueueName => write!(f, "redis.queue_name cannot be empty"),
            Self::PollingWithoutStore => {
                write!(f, "worker.mode = polling requires database.enabled = true")
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: usize = 1000;
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];
    /// Valid retry strategies.
    const VALID_STRATEGIES: &'static [&'static str] = &["none", "fixed", "exponential"];

    /// Validates the entire configuration, collecting every error found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_redis(config, &mut errors);
        Self::validate_database(config, &mut errors);
        Self::validate_worker(config, &mut errors);
        Self::validate_retry(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_redis(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let redis = &config.redis;

        match Url::parse(&redis.url) {
            Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
            Ok(_) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            }),
            Err(e) => errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: e.to_string(),
            }),
        }

        if redis.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: redis.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        if redis.queue_name.trim().is_empty() {
            errors.push(ConfigValidationError::EmptyQueueName);
        }
    }

    fn validate_database(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let db = &config.database;
        if !db.enabled {
            return;
        }

        if !db.url.starts_with("postgres://") && !db.url.starts_with("postgresql://") {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: "URL must start with postgres:// or postgresql://".to_string(),
            });
        }

        if db.min_connections > db.max_connections {
            errors.push(ConfigValidationError::InvalidPoolSize {
                min: db.min_connections,
                max: db.max_connections,
            });
        }

        if db.connect_timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "database.connect_timeout_secs".to_string(),
            });
        }
    }

    fn validate_worker(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let worker = &config.worker;

        if worker.concurrency == 0 {
            errors.push(ConfigValidationError::ZeroConcurrency);
        }

        for (name, value) in [
            ("worker.dequeue_wait_ms", worker.dequeue_wait_ms),
            ("worker.poll_interval_ms", worker.poll_interval_ms),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                });
            }
        }

        if worker.mode == DispatchMode::Polling && !config.database.enabled {
            errors.push(ConfigValidationError::PollingWithoutStore);
        }
    }

    fn validate_retry(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let strategy = config.retry.strategy.to_lowercase();
        if !Self::VALID_STRATEGIES.contains(&strategy.as_str()) {
            errors.push(ConfigValidationError::InvalidRetryStrategy {
                value: config.retry.strategy.clone(),
            });
        }
    }

    fn validate_logging(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        // Full filter directives such as "info,jqueue_jobs=debug" are accepted as-is.
        let level = config.logging.level.to_lowercase();
        if !level.contains(|c: char| c == '=' || c == ',') && !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: config.logging.level.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = AppConfig::default();
        config.worker.concurrency = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::ZeroConcurrency));
    }

    #[test]
    fn test_redis_url_scheme() {
        let mut config = AppConfig::default();
        config.redis.url = "http://localhost:6379".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(errors[0], ConfigValidationError::InvalidUrl { .. }));
    }

    #[test]
    fn test_polling_requires_store() {
        let mut config = AppConfig::default();
        config.worker.mode = DispatchMode::Polling;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors, vec![ConfigValidationError::PollingWithoutStore]);

        config.database.enabled = true;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_database_checks_only_when_enabled() {
        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/jobs".to_string();
        config.database.min_connections = 20;
        assert!(ConfigValidator::validate(&config).is_ok());

        config.database.enabled = true;
        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_log_level_and_directives() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.logging.level = "info,jqueue_jobs=debug".to_string();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_retry_strategy() {
        let mut config = AppConfig::default();
        config.retry.strategy = "fibonacci".to_string();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors[0].to_string().contains("fibonacci"));
    }
}
