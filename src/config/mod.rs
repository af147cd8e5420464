//! Configuration management for the fanout scheduler
//!
//! This module handles loading and validating configuration from environment
//! variables, with section structs for the store, the admission controller
//! and the worker side.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::concurrency::{ConcurrencyPolicy, ControllerConfig};
use crate::store::RedisConfig;
use crate::tasks::TaskStoreConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Shared state store configuration
    pub store: StoreConfig,

    /// Admission control configuration
    pub concurrency: ConcurrencyConfig,

    /// Worker-side configuration
    pub worker: WorkerConfig,
}

/// Shared state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,

    /// Task record retention in seconds
    pub task_ttl_secs: u64,
}

/// Admission control configuration
///
/// Default limits seed the stored policy; wait budgets shape how long a
/// contended acquisition polls before giving up. Stricter scopes wait longer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Fleet-wide cap (0 = unlimited)
    pub global_max: u64,

    /// Per-account cap (0 = unlimited)
    pub account_max: u64,

    /// Token lease duration in seconds
    pub token_timeout_secs: u64,

    /// Poll cadence while waiting on a full scope, in milliseconds
    pub poll_interval_ms: u64,

    pub global_wait_secs: u64,
    pub platform_wait_secs: u64,
    pub task_type_wait_secs: u64,
    pub account_wait_secs: u64,
}

/// Worker-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Retry budget per task before it fails permanently
    pub max_retries: u32,

    /// Depth of the in-process work queue
    pub queue_depth: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("FANOUT_REDIS_URL"))
            .unwrap_or_else(|_| String::from("redis://localhost:6379"));

        let pool_size = env_parse("FANOUT_REDIS_POOL_SIZE", 10);
        let key_prefix =
            std::env::var("FANOUT_KEY_PREFIX").unwrap_or_else(|_| String::from("fanout"));
        let task_ttl_secs = env_parse("FANOUT_TASK_TTL_SECS", 7 * 24 * 3600);

        let global_max = env_parse("FANOUT_GLOBAL_MAX", 0);
        let account_max = env_parse("FANOUT_ACCOUNT_MAX", 1);
        let token_timeout_secs = env_parse("FANOUT_TOKEN_TIMEOUT_SECS", 300);
        let poll_interval_ms = env_parse("FANOUT_POLL_INTERVAL_MS", 250);
        let global_wait_secs = env_parse("FANOUT_GLOBAL_WAIT_SECS", 5);
        let platform_wait_secs = env_parse("FANOUT_PLATFORM_WAIT_SECS", 15);
        let task_type_wait_secs = env_parse("FANOUT_TASK_TYPE_WAIT_SECS", 10);
        let account_wait_secs = env_parse("FANOUT_ACCOUNT_WAIT_SECS", 30);

        let max_retries = env_parse("FANOUT_MAX_RETRIES", 3);
        let queue_depth = env_parse("FANOUT_QUEUE_DEPTH", 256);

        Ok(Self {
            store: StoreConfig {
                url,
                pool_size,
                key_prefix,
                task_ttl_secs,
            },
            concurrency: ConcurrencyConfig {
                global_max,
                account_max,
                token_timeout_secs,
                poll_interval_ms,
                global_wait_secs,
                platform_wait_secs,
                task_type_wait_secs,
                account_wait_secs,
            },
            worker: WorkerConfig {
                max_retries,
                queue_depth,
            },
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }
        if self.store.task_ttl_secs == 0 {
            anyhow::bail!("task_ttl_secs must be greater than 0");
        }
        if self.concurrency.token_timeout_secs == 0 {
            anyhow::bail!("token_timeout_secs must be greater than 0");
        }
        if self.concurrency.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }
        if self.worker.queue_depth == 0 {
            anyhow::bail!("queue_depth must be greater than 0");
        }
        Ok(())
    }

    /// Redis settings for the store layer
    pub fn redis(&self) -> RedisConfig {
        RedisConfig {
            url: self.store.url.clone(),
            pool_size: self.store.pool_size,
        }
    }

    /// Settings for the task state store
    pub fn task_store(&self) -> TaskStoreConfig {
        TaskStoreConfig {
            key_prefix: self.store.key_prefix.clone(),
            task_ttl: Duration::from_secs(self.store.task_ttl_secs),
        }
    }

    /// Settings for the concurrency controller
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            key_prefix: self.store.key_prefix.clone(),
            poll_interval: Duration::from_millis(self.concurrency.poll_interval_ms),
            global_wait: Duration::from_secs(self.concurrency.global_wait_secs),
            platform_wait: Duration::from_secs(self.concurrency.platform_wait_secs),
            task_type_wait: Duration::from_secs(self.concurrency.task_type_wait_secs),
            account_wait: Duration::from_secs(self.concurrency.account_wait_secs),
        }
    }

    /// Default concurrency policy seeded from the config limits
    pub fn default_policy(&self) -> ConcurrencyPolicy {
        ConcurrencyPolicy {
            global_max: self.concurrency.global_max,
            account_max: self.concurrency.account_max,
            token_timeout_secs: self.concurrency.token_timeout_secs,
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                url: String::from("redis://localhost:6379"),
                pool_size: 10,
                key_prefix: String::from("fanout"),
                task_ttl_secs: 7 * 24 * 3600,
            },
            concurrency: ConcurrencyConfig {
                global_max: 0,
                account_max: 1,
                token_timeout_secs: 300,
                poll_interval_ms: 250,
                global_wait_secs: 5,
                platform_wait_secs: 15,
                task_type_wait_secs: 10,
                account_wait_secs: 30,
            },
            worker: WorkerConfig {
                max_retries: 3,
                queue_depth: 256,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_pool_size() {
        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_token_timeout() {
        let mut config = Config::default();
        config.concurrency.token_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_controller_settings_conversion() {
        let config = Config::default();
        let controller = config.controller();
        assert_eq!(controller.account_wait, Duration::from_secs(30));
        assert_eq!(controller.poll_interval, Duration::from_millis(250));
        assert_eq!(controller.key_prefix, "fanout");
    }

    #[test]
    fn test_default_policy_seeded_from_limits() {
        let mut config = Config::default();
        config.concurrency.account_max = 2;
        config.concurrency.global_max = 50;

        let policy = config.default_policy();
        assert_eq!(policy.account_max, 2);
        assert_eq!(policy.global_max, 50);
        assert!(policy.enabled);
    }
}
