//! PoolConfig - プールの設定
//!
//! - `timeout_ms`: タスクごとのタイムアウト（登録時点から計測）。デフォルト 60 000 ms
//! - `worker_count`: ワーカー数。省略時はハードウェア並列度
//!
//! 環境変数 `SPINDLE_TIMEOUT_MS` / `SPINDLE_WORKER_COUNT` からも読めます。

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

pub const ENV_TIMEOUT_MS: &str = "SPINDLE_TIMEOUT_MS";
pub const ENV_WORKER_COUNT: &str = "SPINDLE_WORKER_COUNT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("worker_count must be greater than zero")]
    ZeroWorkers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub timeout_ms: u64,
    pub worker_count: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            worker_count: None,
        }
    }
}

impl PoolConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Explicit count, else the machine's available parallelism (at least 1).
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.worker_count == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Defaults overridden by `SPINDLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.timeout_ms = parse(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_WORKER_COUNT) {
            config.worker_count = Some(parse(ENV_WORKER_COUNT, &raw)?);
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
