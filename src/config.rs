//! Batch review configuration.
//!
//! Every recognized option is an explicit field with a default, so an empty
//! file is a valid configuration.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use config::{Config, ConfigError as SourceError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::error::{ErrorKind, RetryEngine, RetryPolicy};
use crate::executor::{ExecutorOptions, DEFAULT_MAX_CONCURRENCY};
use crate::logging::LogLevel;
use crate::mode::ModeOverrides;

/// Prefix for environment overrides, e.g. `REVIEWFLOW__CACHE__ENABLED=false`.
pub const ENV_PREFIX: &str = "REVIEWFLOW";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be read or deserialized.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<SourceError> for ConfigError {
    fn from(err: SourceError) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Settings for the parallel executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub max_concurrency: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Retry policy overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Policies keyed by error kind name (`network_error`, `API_RATE_LIMITED`).
    pub policies: HashMap<String, RetryPolicy>,
    /// Kinds that are never retried.
    pub disabled: Vec<ErrorKind>,
}

impl RetryConfig {
    /// Policy overrides with their keys resolved to kinds.
    pub fn resolved_policies(&self) -> Result<Vec<(ErrorKind, RetryPolicy)>, ConfigError> {
        let mut resolved = self
            .policies
            .iter()
            .map(|(name, policy)| {
                ErrorKind::from_str(name)
                    .map(|kind| (kind, policy.clone()))
                    .map_err(|e| ConfigError::Invalid(format!("retry.policies: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        resolved.sort_by_key(|(kind, _)| *kind);
        Ok(resolved)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Log level used by the binary when `RUST_LOG` is unset.
    pub log_level: Option<LogLevel>,
    pub executor: ExecutorOptions,
    pub parallel: ParallelConfig,
    pub cache: CacheConfig,
    pub mode: ModeOverrides,
    pub retry: RetryConfig,
}

impl ReviewConfig {
    /// Loads configuration from a TOML file with environment overrides.
    ///
    /// Environment variables use the `REVIEWFLOW` prefix and `__` between
    /// nested keys: `REVIEWFLOW__EXECUTOR__MAX_ERRORS=3`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// fails [`validate`](Self::validate).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reviewflow::config::ReviewConfig;
    ///
    /// let config = ReviewConfig::load("reviewflow.toml")?;
    /// # Ok::<(), reviewflow::config::ConfigError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::Invalid(format!("non UTF-8 path {:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let review_config: ReviewConfig = config.try_deserialize()?;
        review_config.validate()?;
        Ok(review_config)
    }

    /// Parses configuration from TOML text without environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let review_config: ReviewConfig = toml::from_str(text)?;
        review_config.validate()?;
        Ok(review_config)
    }

    /// Rejects values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.max_errors == Some(0) {
            return Err(ConfigError::Invalid(
                "executor.max_errors must be at least 1".to_string(),
            ));
        }
        if self.parallel.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "parallel.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.cache.memory_budget_bytes == 0 {
            return Err(ConfigError::Invalid(
                "cache.memory_budget_bytes must be greater than 0".to_string(),
            ));
        }
        for (kind, policy) in self.retry.resolved_policies()? {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!(
                    "retry.policies.{}: max_attempts must be at least 1",
                    kind
                )));
            }
            if !(policy.backoff_multiplier >= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "retry.policies.{}: backoff_multiplier must be at least 1.0",
                    kind
                )));
            }
        }
        Ok(())
    }

    /// Builds a retry engine with the configured overrides applied on top
    /// of the built-in policy table.
    pub fn retry_engine(&self) -> Result<RetryEngine, ConfigError> {
        let mut engine = RetryEngine::new();
        for (kind, policy) in self.retry.resolved_policies()? {
            if !kind.is_retryable() {
                tracing::warn!(kind = %kind, "ignoring retry policy for a kind that is never retried");
            }
            engine = engine.with_policy(kind, Some(policy));
        }
        for kind in &self.retry.disabled {
            engine = engine.with_policy(*kind, None);
        }
        Ok(engine)
    }
}
