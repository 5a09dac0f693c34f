//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate, later sources winning:
//!
//! 1. compiled defaults ([`PipelineConfig::default`])
//! 2. `{dir}/base.toml` (optional)
//! 3. `{dir}/{environment}.toml` (optional)
//! 4. `ENRICH__SECTION__KEY` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::PipelineConfig;
use config::{Config, ConfigError, Environment, File};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "ENRICH";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PipelineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_sources(config_dir, environment, None)
    }

    /// Like [`Self::load_from_directory_with_env`], reading overrides from
    /// `vars` instead of the process environment. Keys use the same
    /// `ENRICH__SECTION__KEY` shape.
    pub fn load_with_sources(
        config_dir: Option<PathBuf>,
        environment: &str,
        vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(default_config_directory);
        if explicit && !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = build_config(&config_directory, environment, vars)?;
        config.validate()?;

        info!(
            environment = %environment,
            batch_size = config.splitter.batch_size,
            chunk_queue = %config.splitter.chunk_queue,
            artifact_bucket = %config.storage.artifact_bucket,
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}

fn build_config(
    dir: &Path,
    environment: &str,
    vars: Option<HashMap<String, String>>,
) -> ConfigResult<PipelineConfig> {
    let defaults = Config::try_from(&PipelineConfig::default()).map_err(map_config_error)?;

    let env_source = Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(vars);

    let merged = Config::builder()
        .add_source(defaults)
        .add_source(File::from(dir.join("base.toml")).required(false))
        .add_source(File::from(dir.join(format!("{environment}.toml"))).required(false))
        .add_source(env_source)
        .build()
        .map_err(map_config_error)?;

    merged
        .try_deserialize::<PipelineConfig>()
        .map_err(map_config_error)
}

fn map_config_error(err: ConfigError) -> ConfigurationError {
    match err {
        ConfigError::FileParse { uri, cause } => ConfigurationError::invalid_toml(
            uri.unwrap_or_else(|| "<unknown>".to_string()),
            cause,
        ),
        ConfigError::Type { ref key, .. } => match key {
            Some(key) => ConfigurationError::environment_override(key.clone(), &err),
            None => ConfigurationError::merge_error(&err),
        },
        other => ConfigurationError::merge_error(other),
    }
}

/// Current environment name: `ENRICH_ENV`, then `APP_ENV`, else `development`.
pub fn detect_environment() -> String {
    env::var("ENRICH_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

fn default_config_directory() -> PathBuf {
    PathBuf::from("config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_with_sources(
            Some(dir.path().to_path_buf()),
            "test",
            Some(HashMap::new()),
        )
        .unwrap();

        assert_eq!(manager.config(), &PipelineConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.toml"),
            "[splitter]\nbatch_size = 20\n\n[storage]\nartifact_bucket = \"base-artifacts\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("production.toml"), "[splitter]\nbatch_size = 100\n").unwrap();

        let manager = ConfigManager::load_with_sources(
            Some(dir.path().to_path_buf()),
            "production",
            Some(HashMap::new()),
        )
        .unwrap();

        assert_eq!(manager.config().splitter.batch_size, 100);
        assert_eq!(manager.config().storage.artifact_bucket, "base-artifacts");
        assert_eq!(manager.config().splitter.chunk_queue, "enrichment_chunks");
    }

    #[test]
    fn test_environment_variables_win() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.toml"), "[splitter]\nbatch_size = 20\n").unwrap();
        let vars = HashMap::from([
            ("ENRICH__SPLITTER__BATCH_SIZE".to_string(), "5".to_string()),
            ("ENRICH__NUMERIC_AVERAGE__HOST".to_string(), "averager".to_string()),
        ]);

        let manager =
            ConfigManager::load_with_sources(Some(dir.path().to_path_buf()), "test", Some(vars))
                .unwrap();

        assert_eq!(manager.config().splitter.batch_size, 5);
        assert_eq!(manager.config().numeric_average.host, "averager");
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let vars = HashMap::from([("ENRICH__SPLITTER__BATCH_SIZE".to_string(), "0".to_string())]);

        let err =
            ConfigManager::load_with_sources(Some(dir.path().to_path_buf()), "test", Some(vars))
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_directory_is_reported() {
        let err = ConfigManager::load_from_directory_with_env(
            Some(PathBuf::from("/definitely/not/here")),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_malformed_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.toml"), "[splitter\nbatch_size = ").unwrap();

        let err = ConfigManager::load_with_sources(
            Some(dir.path().to_path_buf()),
            "test",
            Some(HashMap::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidToml { .. }));
    }
}
