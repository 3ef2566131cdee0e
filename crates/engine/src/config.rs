//! Runtime configuration via `nirva.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! Values are validated eagerly when loaded.

use nirva_concurrency::{PoolConfig, ThreadConfig};
use nirva_core::{Error, Result};
use nirva_hooks::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "nirva.toml";

/// Runtime configuration loaded from `nirva.toml`.
///
/// # Example
///
/// ```toml
/// pool_min_threads = 8
/// pool_max_threads = 64
/// blocked_limit_ms = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Workers started with the pool
    #[serde(default = "default_pool_min_threads")]
    pub pool_min_threads: usize,
    /// Upper bound on pool workers
    #[serde(default = "default_pool_max_threads")]
    pub pool_max_threads: usize,
    /// Queue length beyond which submissions are refused
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Soft-wait time after which a thread reports BLOCKED
    #[serde(default = "default_blocked_limit_ms")]
    pub blocked_limit_ms: u64,
    /// Hard-wait deadline for sync waits; 0 waits forever
    #[serde(default)]
    pub sync_timeout_ms: u64,
    /// Retries of WAIT_RETRY answers on COND_RETRY hook stacks
    #[serde(default = "default_hook_retry_limit")]
    pub hook_retry_limit: u32,
    /// Pause between hook retries
    #[serde(default = "default_hook_retry_interval_ms")]
    pub hook_retry_interval_ms: u64,
    /// Poll period of soft waits
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    /// Refuse to move an owned bundle between owners once a structure app is set
    #[serde(default = "default_strict_ownership")]
    pub strict_ownership: bool,
}

fn default_pool_min_threads() -> usize {
    8
}

fn default_pool_max_threads() -> usize {
    64
}

fn default_max_queue_depth() -> usize {
    4096
}

fn default_blocked_limit_ms() -> u64 {
    10_000
}

fn default_hook_retry_limit() -> u32 {
    16
}

fn default_hook_retry_interval_ms() -> u64 {
    1
}

fn default_poll_interval_us() -> u64 {
    1000
}

fn default_strict_ownership() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_min_threads: default_pool_min_threads(),
            pool_max_threads: default_pool_max_threads(),
            max_queue_depth: default_max_queue_depth(),
            blocked_limit_ms: default_blocked_limit_ms(),
            sync_timeout_ms: 0,
            hook_retry_limit: default_hook_retry_limit(),
            hook_retry_interval_ms: default_hook_retry_interval_ms(),
            poll_interval_us: default_poll_interval_us(),
            strict_ownership: default_strict_ownership(),
        }
    }
}

impl RuntimeConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.pool_min_threads == 0 {
            return Err(Error::invalid_input(
                "pool_min_threads must be at least 1 in nirva.toml",
            ));
        }
        if self.pool_max_threads < self.pool_min_threads {
            return Err(Error::invalid_input(format!(
                "pool_max_threads ({}) is below pool_min_threads ({}) in nirva.toml",
                self.pool_max_threads, self.pool_min_threads
            )));
        }
        if self.max_queue_depth == 0 {
            return Err(Error::invalid_input(
                "max_queue_depth must be at least 1 in nirva.toml",
            ));
        }
        if self.poll_interval_us == 0 {
            return Err(Error::invalid_input(
                "poll_interval_us must be at least 1 in nirva.toml",
            ));
        }
        Ok(())
    }

    /// Pool settings
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_threads: self.pool_min_threads,
            max_threads: self.pool_max_threads,
            max_queue_depth: self.max_queue_depth,
        }
    }

    /// Per-thread wait settings
    pub fn thread_config(&self) -> ThreadConfig {
        ThreadConfig {
            blocked_limit: Duration::from_millis(self.blocked_limit_ms),
            poll_interval: Duration::from_micros(self.poll_interval_us),
            sync_timeout: match self.sync_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// Hook retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: self.hook_retry_limit,
            interval: Duration::from_millis(self.hook_retry_interval_ms),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# nirva runtime configuration
#
# Worker pool: starts with pool_min_threads workers and grows on demand
# up to pool_max_threads. Submissions beyond max_queue_depth are refused.
pool_min_threads = 8
pool_max_threads = 64
max_queue_depth = 4096

# Soft waits report BLOCKED after blocked_limit_ms (default 10000).
blocked_limit_ms = 10000

# Hard sync waits time out after sync_timeout_ms; 0 waits forever.
sync_timeout_ms = 0

# Request hooks answering WAIT_RETRY are retried hook_retry_limit times,
# hook_retry_interval_ms apart.
hook_retry_limit = 16
hook_retry_interval_ms = 1

# Poll period of soft waits, in microseconds.
poll_interval_us = 1000

# Once a structure app is set, refuse to move owned bundles between owners.
strict_ownership = true
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: RuntimeConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        debug!(target: "nirva::config", path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
