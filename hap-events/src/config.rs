use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::error::EventError;

/// Default limiter capacity per channel.
pub const DEFAULT_MAX_CONCURRENCY: usize = 1000;

/// Default number of payloads a buffered handler accumulates before flushing.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default interval between time-based flushes of a buffered handler.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables of an [`EventChannel`](crate::EventChannel).
///
/// [`EventChannel::with_config`](crate::EventChannel::with_config) rejects a
/// config that fails [`validate`](Self::validate), whereas
/// [`EventChannel::with_concurrency`](crate::EventChannel::with_concurrency)
/// clamps its argument into `1..=Semaphore::MAX_PERMITS`.
///
/// Loadable from YAML; every key is optional:
///
/// ```yaml
/// max_concurrency: 64
/// default_batch_size: 50
/// default_flush_interval_ms: 250
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    /// Maximum number of simultaneously in-flight invocations, shared by all
    /// handlers of the channel and their periodic flushes.
    pub max_concurrency: usize,
    /// Batch size used when a buffered handler is registered with size 0.
    pub default_batch_size: usize,
    /// Flush interval used when a buffered handler is registered with a zero interval.
    pub default_flush_interval: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEventConfig {
    max_concurrency: Option<usize>,
    default_batch_size: Option<usize>,
    default_flush_interval_ms: Option<u64>,
}

impl EventConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    pub fn with_default_flush_interval(mut self, interval: Duration) -> Self {
        self.default_flush_interval = interval;
        self
    }

    /// Parse a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EventError> {
        let raw: Option<RawEventConfig> = if yaml.trim().is_empty() {
            None
        } else {
            serde_yaml::from_str(yaml)?
        };
        let defaults = Self::default();
        let config = match raw {
            Some(raw) => Self {
                max_concurrency: raw.max_concurrency.unwrap_or(defaults.max_concurrency),
                default_batch_size: raw.default_batch_size.unwrap_or(defaults.default_batch_size),
                default_flush_interval: raw
                    .default_flush_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.default_flush_interval),
            },
            None => defaults,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, EventError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EventError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.max_concurrency == 0 {
            return Err(EventError::Config("max_concurrency must be at least 1".into()));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(EventError::Config(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.default_batch_size == 0 {
            return Err(EventError::Config("default_batch_size must be at least 1".into()));
        }
        if self.default_flush_interval.is_zero() {
            return Err(EventError::Config(
                "default_flush_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
