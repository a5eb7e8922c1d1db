//! Configuration loader with layered sources.

use crate::validation::ConfigValidator;
use crate::{AppConfig, ConfigError};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable selecting the environment-specific config file.
pub const ENVIRONMENT_VAR: &str = "JQUEUE_ENVIRONMENT";

/// Loads [`AppConfig`] from a config directory.
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. `{dir}/default.toml`
/// 2. `{dir}/{environment}.toml`
/// 3. `{dir}/local.toml` (not committed)
/// 4. Environment variables such as `JQUEUE__WORKER__CONCURRENCY=8`
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: Option<String>,
    read_env: bool,
}

impl ConfigLoader {
    /// Creates a loader for the given directory.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            environment: None,
            read_env: true,
        }
    }

    /// Creates a loader for `./config`.
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Pins the environment instead of reading `JQUEUE_ENVIRONMENT`.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Skips `.env` and process environment variables.
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if self.read_env {
            if let Err(e) = dotenvy::dotenv() {
                debug!("No .env file loaded: {}", e);
            }
        }

        let environment = self
            .environment
            .clone()
            .or_else(|| std::env::var(ENVIRONMENT_VAR).ok())
            .unwrap_or_else(|| "development".to_string());

        info!(environment = %environment, dir = %self.config_dir.display(), "Loading configuration");

        let mut builder = Config::builder().set_default("environment", environment.clone())?;

        for name in ["default", environment.as_str(), "local"] {
            let path = self.config_dir.join(format!("{name}.toml"));
            if Path::new(&path).exists() {
                debug!("Loading config file: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        if self.read_env {
            builder = builder.add_source(
                Environment::with_prefix("JQUEUE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let app_config: AppConfig = builder.build()?.try_deserialize()?;

        ConfigValidator::validate(&app_config).map_err(ConfigError::Invalid)?;

        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DispatchMode;
    use std::fs;

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new(dir.path()).without_env().load().unwrap();

        assert_eq!(config.environment, "development");
        assert_eq!(config.redis.queue_name, "jobqueue");
        assert_eq!(config.worker.transport_retry_delay_ms, 2000);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[worker]\nconcurrency = 2\nmode = \"transport\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            "[worker]\nmode = \"polling\"\n\n[database]\nenabled = true\n",
        )
        .unwrap();

        let config = ConfigLoader::new(dir.path())
            .environment("staging")
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.environment, "staging");
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.worker.mode, DispatchMode::Polling);
        assert!(config.database.enabled);
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[worker]\nconcurrency = 0\n").unwrap();

        let err = ConfigLoader::new(dir.path()).without_env().load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("concurrency"));
    }
}
