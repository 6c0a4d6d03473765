use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid scheduling_strategy: {0}, must be one of round_robin, least_loaded, performance_based, adaptive")]
    InvalidSchedulingStrategy(String),

    #[error("invalid log level: {0}, must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}, must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("database url cannot be empty")]
    EmptyDatabaseUrl,

    #[error("max_concurrent_optimizations must be at least 1")]
    InvalidMaxConcurrentOptimizations,

    #[error("circuit_breaker.failure_threshold must be at least 1")]
    InvalidFailureThreshold,

    #[error("retry.max_attempts cannot be 0")]
    InvalidMaxAttempts,

    #[error("scale_down_threshold ({0}) must be less than scale_up_threshold ({1})")]
    InvalidScaleThresholds(f64, f64),
}

/// Hierarchical configuration loader (§6 "Configuration surface").
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults
/// 2. `.swarm/config.yaml` (project config, written by `swarmctl init`)
/// 3. `.swarm/local.yaml` (optional local overrides, untracked)
/// 4. `SWARMCTL_`-prefixed environment variables (highest priority)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".swarm/config.yaml"))
            .merge(Yaml::file(".swarm/local.yaml"))
            .merge(Env::prefixed("SWARMCTL_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_strategies = ["round_robin", "least_loaded", "performance_based", "adaptive"];
        if !valid_strategies.contains(&config.scheduling.scheduling_strategy.as_str()) {
            return Err(ConfigError::InvalidSchedulingStrategy(config.scheduling.scheduling_strategy.clone()));
        }

        if config.scheduling.scale_down_threshold >= config.scheduling.scale_up_threshold {
            return Err(ConfigError::InvalidScaleThresholds(
                config.scheduling.scale_down_threshold,
                config.scheduling.scale_up_threshold,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }

        if config.optimization.max_concurrent_optimizations == 0 {
            return Err(ConfigError::InvalidMaxConcurrentOptimizations);
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_unknown_scheduling_strategy() {
        let mut config = Config::default();
        config.scheduling.scheduling_strategy = "random".to_string();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchedulingStrategy(_)));
    }

    #[test]
    fn rejects_inverted_scale_thresholds() {
        let mut config = Config::default();
        config.scheduling.scale_up_threshold = 0.1;
        config.scheduling.scale_down_threshold = 0.5;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScaleThresholds(_, _)));
    }

    #[test]
    fn hierarchical_merge_lets_override_file_win() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base = NamedTempFile::new().unwrap();
        writeln!(base, "logging:\n  level: info\n  format: json").unwrap();
        base.flush().unwrap();

        let mut over = NamedTempFile::new().unwrap();
        writeln!(over, "logging:\n  level: debug").unwrap();
        over.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base.path()))
            .merge(Yaml::file(over.path()))
            .extract()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }
}
