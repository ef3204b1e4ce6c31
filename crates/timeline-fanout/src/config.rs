//! Configuration loading and typed config structures.
//!
//! Configuration is read from a YAML file (by default
//! `timeline-config.yaml`). Every field has a default, so an empty file,
//! or no file at all, targets Dragonfly and NATS on localhost. A handful of
//! environment variables override the file for container deployments.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use timeline_bus::BusConfig;

use crate::pool::{DEFAULT_REPORT_CAPACITY, DEFAULT_WORKER_COUNT, PoolConfig};
use crate::reader::DEFAULT_TIMELINE_LIMIT;
use crate::retry::RetryPolicy;
use crate::worker::{DEFAULT_WRITE_CONCURRENCY, WorkerSettings};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of range or an override could not be parsed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TimelineConfig {
    /// Connection strings and bus selection.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,

    /// Event bus sizing.
    #[serde(default)]
    pub bus: BusSection,

    /// Worker pool and retry settings.
    #[serde(default)]
    pub fanout: FanoutSection,

    /// Timeline retention and read defaults.
    #[serde(default)]
    pub timeline: TimelineSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TimelineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if an override or value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file), minus I/O.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected values from the environment when set.
    ///
    /// - `DRAGONFLY_URL` -- `infrastructure.dragonfly_url`
    /// - `NATS_URL` -- `infrastructure.nats_url`
    /// - `TIMELINE_BUS` -- `infrastructure.bus` (`local` or `nats`)
    /// - `TIMELINE_WORKERS` -- `fanout.worker_count`
    /// - `TIMELINE_QUEUE_DEPTH` -- `bus.queue_depth`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable cannot be parsed.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("DRAGONFLY_URL") {
            self.infrastructure.dragonfly_url = val;
        }
        if let Ok(val) = std::env::var("NATS_URL") {
            self.infrastructure.nats_url = val;
        }
        if let Ok(val) = std::env::var("TIMELINE_BUS") {
            self.infrastructure.bus = BusKind::parse(&val)?;
        }
        if let Ok(val) = std::env::var("TIMELINE_WORKERS") {
            self.fanout.worker_count = val
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid TIMELINE_WORKERS: {e}")))?;
        }
        if let Ok(val) = std::env::var("TIMELINE_QUEUE_DEPTH") {
            self.bus.queue_depth = val
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid TIMELINE_QUEUE_DEPTH: {e}")))?;
        }
        Ok(())
    }

    /// Reject values that would stall or misconfigure the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout.worker_count == 0 {
            return Err(ConfigError::Invalid("fanout.worker_count must be at least 1".to_owned()));
        }
        if self.fanout.write_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fanout.write_concurrency must be at least 1".to_owned(),
            ));
        }
        if self.bus.queue_depth == 0 {
            return Err(ConfigError::Invalid("bus.queue_depth must be at least 1".to_owned()));
        }
        if self.fanout.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fanout.retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        if self.fanout.retry.base_delay_ms > self.fanout.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "fanout.retry.base_delay_ms exceeds max_delay_ms".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Which event bus implementation to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process bus; publishers and workers share one process. Only
    /// usable when the pool is embedded next to its publishers.
    Local,
    /// NATS subject shared across processes.
    #[default]
    Nats,
}

impl BusKind {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "nats" => Ok(Self::Nats),
            other => Err(ConfigError::Invalid(format!("unknown bus kind: {other}"))),
        }
    }
}

/// Connection strings and bus selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// Dragonfly (Redis-compatible) URL.
    #[serde(default = "default_dragonfly_url")]
    pub dragonfly_url: String,

    /// NATS messaging URL (used when `bus` is `nats`).
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Bus implementation.
    #[serde(default)]
    pub bus: BusKind,

    /// NATS subject carrying post events.
    #[serde(default = "default_subject")]
    pub subject: String,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            dragonfly_url: default_dragonfly_url(),
            nats_url: default_nats_url(),
            bus: BusKind::default(),
            subject: default_subject(),
        }
    }
}

/// Event bus sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BusSection {
    /// Per-subscriber queue depth before publishes are refused.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Recent events replayed to new local subscribers (0 = none).
    #[serde(default)]
    pub backlog: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            backlog: 0,
        }
    }
}

impl BusSection {
    /// Convert to the bus crate's config.
    pub const fn bus_config(&self) -> BusConfig {
        BusConfig {
            queue_depth: self.queue_depth,
            backlog: self.backlog,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FanoutSection {
    /// Number of worker shards.
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    /// Concurrent timeline appends per post.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,

    /// Delivery reports buffered for consumers.
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,

    /// Retry/backoff settings.
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for FanoutSection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            write_concurrency: default_write_concurrency(),
            report_capacity: default_report_capacity(),
            retry: RetrySection::default(),
        }
    }
}

impl FanoutSection {
    /// Convert to the pool's config.
    pub const fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            worker: WorkerSettings {
                write_concurrency: self.write_concurrency,
                retry: self.retry.policy(),
            },
            report_capacity: self.report_capacity,
        }
    }
}

/// Retry/backoff settings in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetrySection {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySection {
    /// Convert to a [`RetryPolicy`].
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Timeline retention and read defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimelineSection {
    /// Entries kept per timeline (0 = unbounded).
    #[serde(default)]
    pub max_len: usize,

    /// Entries returned by a read without an explicit limit.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for TimelineSection {
    fn default() -> Self {
        Self {
            max_len: 0,
            default_limit: default_limit(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) used when `RUST_LOG` is
    /// not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_dragonfly_url() -> String {
    String::from("redis://localhost:6379")
}

fn default_nats_url() -> String {
    String::from("nats://localhost:4222")
}

fn default_subject() -> String {
    String::from(timeline_bus::nats::DEFAULT_SUBJECT)
}

const fn default_queue_depth() -> usize {
    timeline_bus::local::DEFAULT_QUEUE_DEPTH
}

const fn default_worker_count() -> u32 {
    DEFAULT_WORKER_COUNT
}

const fn default_write_concurrency() -> usize {
    DEFAULT_WRITE_CONCURRENCY
}

const fn default_report_capacity() -> usize {
    DEFAULT_REPORT_CAPACITY
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    50
}

const fn default_max_delay_ms() -> u64 {
    2000
}

const fn default_limit() -> usize {
    DEFAULT_TIMELINE_LIMIT
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = TimelineConfig::parse("").unwrap();
        assert_eq!(config.fanout.retry.max_attempts, 3);
        assert_eq!(config.timeline.default_limit, 10);
        assert_eq!(config.timeline.max_len, 0);
        assert_eq!(config.bus.backlog, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r"
fanout:
  write_concurrency: 8
  retry:
    max_attempts: 5
timeline:
  max_len: 800
";
        let config = TimelineConfig::parse(yaml).unwrap();
        assert_eq!(config.fanout.write_concurrency, 8);
        assert_eq!(config.fanout.retry.max_attempts, 5);
        assert_eq!(config.fanout.retry.base_delay_ms, 50);
        assert_eq!(config.timeline.max_len, 800);
    }

    #[test]
    fn bus_kind_parses_from_yaml() {
        let config: TimelineConfig =
            serde_yml::from_str("infrastructure:\n  bus: local\n").unwrap();
        assert_eq!(config.infrastructure.bus, BusKind::Local);
        assert_eq!(config.infrastructure.subject, "timeline.posts");
    }

    #[test]
    fn default_bus_is_nats() {
        assert_eq!(TimelineConfig::default().infrastructure.bus, BusKind::Nats);
    }

    #[test]
    fn sample_config_matches_defaults() {
        let sample = include_str!("../../../timeline-config.yaml");
        let config: TimelineConfig = serde_yml::from_str(sample).unwrap();
        assert_eq!(config, TimelineConfig::default());
    }

    #[test]
    fn zero_write_concurrency_is_rejected() {
        let config: TimelineConfig =
            serde_yml::from_str("fanout:\n  write_concurrency: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn inverted_retry_delays_are_rejected() {
        let yaml = "fanout:\n  retry:\n    base_delay_ms: 5000\n    max_delay_ms: 10\n";
        let config: TimelineConfig = serde_yml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sections_convert_to_runtime_configs() {
        let config = TimelineConfig::default();
        let pool = config.fanout.pool_config();
        assert_eq!(pool.worker_count, config.fanout.worker_count);
        assert_eq!(pool.worker.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.bus.bus_config().queue_depth, config.bus.queue_depth);
    }

    #[test]
    fn unknown_bus_kind_is_invalid() {
        assert!(BusKind::parse("kafka").is_err());
        assert_eq!(BusKind::parse(" NATS ").unwrap(), BusKind::Nats);
    }
}
