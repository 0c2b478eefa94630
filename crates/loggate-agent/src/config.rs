// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_SERVER_PORT: u16 = 50051;

/// Configuration for the log agent.
///
/// Constructed once at startup (from the environment or defaults) and
/// passed explicitly into each component; no ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the agent listens on.
    pub server_port: u16,
    /// Capacity of the bounded ingestion buffer, in records.
    pub queue_buffer_size: usize,
    /// Maximum number of records per persisted batch.
    pub batch_size: usize,
    /// How often the worker flushes a partially filled batch, in seconds.
    pub flush_period_secs: u64,
    /// Timeout for one insert-many call on the flush path, in seconds.
    pub flush_timeout_secs: u64,
    /// Timeout for a synchronous query, in seconds.
    pub query_timeout_secs: u64,
    /// Timeout for one statistics recomputation, in seconds.
    pub stats_timeout_secs: u64,
    /// How long a computed statistics snapshot stays fresh, in seconds.
    pub stats_ttl_secs: u64,
    /// Corpus size above which statistics are computed over a sample.
    pub sampling_threshold: u64,
    /// Number of records sampled when the threshold is exceeded.
    pub sample_size: usize,
    /// Maximum accepted request body size, in bytes.
    pub max_request_content_length: usize,
    /// Log level (e.g., trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            queue_buffer_size: 1000,
            batch_size: 100,
            flush_period_secs: 5,
            flush_timeout_secs: 30,
            query_timeout_secs: 5,
            stats_timeout_secs: 5,
            stats_ttl_secs: 60,
            sampling_threshold: 1_000_000,
            sample_size: 10_000,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Self {
            server_port: env_parse("SERVER_PORT", defaults.server_port),
            queue_buffer_size: env_parse("LOG_BUFFER_SIZE", defaults.queue_buffer_size),
            batch_size: env_parse("LOG_BATCH_SIZE", defaults.batch_size),
            flush_period_secs: env_parse("LOG_FLUSH_PERIOD", defaults.flush_period_secs),
            flush_timeout_secs: env_parse("LOG_FLUSH_TIMEOUT", defaults.flush_timeout_secs),
            query_timeout_secs: env_parse("QUERY_TIMEOUT", defaults.query_timeout_secs),
            stats_timeout_secs: env_parse("STATS_TIMEOUT", defaults.stats_timeout_secs),
            stats_ttl_secs: env_parse("STATS_CACHE_TTL", defaults.stats_ttl_secs),
            sampling_threshold: env_parse("STATS_SAMPLING_THRESHOLD", defaults.sampling_threshold),
            sample_size: env_parse("STATS_SAMPLE_SIZE", defaults.sample_size),
            max_request_content_length: defaults.max_request_content_length,
            log_level: env::var("LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_port == 0 {
            return Err(ConfigError::Invalid(
                "server port must be greater than 0".to_string(),
            ));
        }

        if self.queue_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "queue buffer size must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch size must be greater than 0".to_string(),
            ));
        }

        if self.flush_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush period must be greater than 0".to_string(),
            ));
        }

        if self.sample_size == 0 {
            return Err(ConfigError::Invalid(
                "sample size must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_period_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .unwrap_or(default)
}
