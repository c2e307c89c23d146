// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration: defaults, builder setters, validation and
//! environment loading.
//!
//! | variable                             | field                              | unit    |
//! |--------------------------------------|------------------------------------|---------|
//! | `DD_API_KEY`                         | `api_key`                          |         |
//! | `DD_LOGS_URL`                        | `base_url`                         |         |
//! | `DD_SERVICE`                         | `service`                          |         |
//! | `DD_LOGS_TIMEOUT`                    | `timeout`                          | seconds |
//! | `DD_LOGS_BATCH_SIZE`                 | `batch_size`                       | records |
//! | `DD_LOGS_FLUSH_INTERVAL`             | `flush_interval`                   | seconds |
//! | `DD_LOGS_MAX_RETRIES`                | `retry.max_retries`                |         |
//! | `DD_LOGS_MIN_BACKOFF_MS`             | `retry.min_backoff`                | ms      |
//! | `DD_LOGS_MAX_BACKOFF_MS`             | `retry.max_backoff`                | ms      |
//! | `DD_LOGS_CIRCUIT_BREAKER_THRESHOLD`  | `circuit_breaker.failure_threshold`|         |
//! | `DD_LOGS_CIRCUIT_BREAKER_TIMEOUT`    | `circuit_breaker.open_duration`    | seconds |
//! | `DD_LOGS_USE_COMPRESSION`            | `use_compression`                  | bool    |
//! | `DD_LOGS_COMPRESSION_LEVEL`          | `compression_level`                |         |
//!
//! Values that fail to parse fall back to their defaults.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_TIMEOUT, MAX_BATCH_ENTRIES_SIZE, MAX_SOURCE_LENGTH,
};
use crate::errors::Error;
use crate::retry::RetryConfig;

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    /// Source label stamped on every record.
    pub service: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub use_compression: bool,
    pub compression_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            service: String::new(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("service", &self.service)
            .field("timeout", &self.timeout)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("use_compression", &self.use_compression)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

impl Config {
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, enabled: bool, level: i32) -> Self {
        self.use_compression = enabled;
        self.compression_level = level;
        self
    }

    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup, then validates it.
    pub fn from_source<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let config = Self {
            api_key: parsed("DD_API_KEY").unwrap_or_default(),
            base_url: parsed("DD_LOGS_URL")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.base_url),
            service: parsed("DD_SERVICE").unwrap_or_default(),
            timeout: parse_or(&parsed, "DD_LOGS_TIMEOUT", secs, defaults.timeout),
            batch_size: parse_or(
                &parsed,
                "DD_LOGS_BATCH_SIZE",
                usize::from_str,
                defaults.batch_size,
            ),
            flush_interval: parse_or(
                &parsed,
                "DD_LOGS_FLUSH_INTERVAL",
                secs,
                defaults.flush_interval,
            ),
            retry: RetryConfig {
                max_retries: parse_or(
                    &parsed,
                    "DD_LOGS_MAX_RETRIES",
                    u32::from_str,
                    defaults.retry.max_retries,
                ),
                min_backoff: parse_or(
                    &parsed,
                    "DD_LOGS_MIN_BACKOFF_MS",
                    millis,
                    defaults.retry.min_backoff,
                ),
                max_backoff: parse_or(
                    &parsed,
                    "DD_LOGS_MAX_BACKOFF_MS",
                    millis,
                    defaults.retry.max_backoff,
                ),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_or(
                    &parsed,
                    "DD_LOGS_CIRCUIT_BREAKER_THRESHOLD",
                    u32::from_str,
                    defaults.circuit_breaker.failure_threshold,
                ),
                open_duration: parse_or(
                    &parsed,
                    "DD_LOGS_CIRCUIT_BREAKER_TIMEOUT",
                    secs,
                    defaults.circuit_breaker.open_duration,
                ),
            },
            use_compression: parsed("DD_LOGS_USE_COMPRESSION")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.use_compression),
            compression_level: parse_or(
                &parsed,
                "DD_LOGS_COMPRESSION_LEVEL",
                i32::from_str,
                defaults.compression_level,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration before a pipeline is built from it.
    pub fn validate(&self) -> Result<(), Error> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("API key is required".to_string()));
        }

        if self.service.trim().is_empty() {
            return Err(Error::Config("service name is required".to_string()));
        }
        if self.service.chars().count() > MAX_SOURCE_LENGTH {
            return Err(Error::Config(format!(
                "service name must be {MAX_SOURCE_LENGTH} characters or less"
            )));
        }

        if self.base_url.trim().is_empty() {
            return Err(Error::Config("base URL is required".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base URL '{}' must start with http:// or https://",
                self.base_url
            )));
        }

        if self.batch_size == 0 || self.batch_size > MAX_BATCH_ENTRIES_SIZE {
            return Err(Error::Config(format!(
                "batch size must be between 1 and {MAX_BATCH_ENTRIES_SIZE}"
            )));
        }

        if self.flush_interval.is_zero() {
            return Err(Error::Config(
                "flush interval must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(Error::Config(
                "circuit breaker threshold must be greater than 0".to_string(),
            ));
        }

        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(Error::Config(format!(
                "minimum backoff ({:?}) exceeds maximum backoff ({:?})",
                self.retry.min_backoff, self.retry.max_backoff
            )));
        }

        if self.use_compression && !zstd::compression_level_range().contains(&self.compression_level)
        {
            return Err(Error::Config(format!(
                "invalid compression level {}",
                self.compression_level
            )));
        }

        Ok(())
    }
}

fn parse_or<T, E>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Result<T, E>,
    default: T,
) -> T
where
    E: fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match parse(&raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("Ignoring {key}={raw:?}: {e}, using default");
            default
        }
    }
}

fn secs(raw: &str) -> Result<Duration, String> {
    let value = f64::from_str(raw).map_err(|e| e.to_string())?;
    Duration::try_from_secs_f64(value).map_err(|e| e.to_string())
}

fn millis(raw: &str) -> Result<Duration, String> {
    u64::from_str(raw)
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}
