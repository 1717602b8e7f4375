//! Client configuration via `tessera.toml`
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Durations are expressed in milliseconds.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Read consistency requested for session queries.
///
/// Every query also carries the last command sequence issued by the session,
/// so a `Sequential` read never observes state older than the session's own
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    /// Reads may be served by any replica that has applied the session's writes
    #[default]
    Sequential,
    /// Reads must reflect every write committed before the read started
    Linearizable,
}

/// Client configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// namespace = "default"
/// session_timeout_ms = 5000
/// read_consistency = "sequential"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Namespace every primitive name is resolved in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Number of execution-context threads. Defaults to available parallelism.
    #[serde(default = "default_context_threads")]
    pub context_threads: usize,
    /// Session timeout requested on open.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Consecutive keep-alive failures before a session is suspended.
    #[serde(default = "default_keep_alive_failure_threshold")]
    pub keep_alive_failure_threshold: u32,
    /// Default wait budget for blocking facades.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Resends of a command the server reported as `Unavailable`.
    #[serde(default = "default_max_command_retries")]
    pub max_command_retries: u32,
    /// Delay between command resends.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// First delay before re-opening a terminated event stream.
    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,
    /// Upper bound on the event stream reconnect delay.
    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,
    /// Consecutive failed re-subscriptions before the stream is abandoned.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Default capacity of caching decorators.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Consistency requested for queries.
    #[serde(default)]
    pub read_consistency: ReadConsistency,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_context_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_session_timeout_ms() -> u64 {
    5000
}

fn default_keep_alive_failure_threshold() -> u32 {
    1
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

fn default_max_command_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_reconnect_initial_backoff_ms() -> u64 {
    100
}

fn default_reconnect_max_backoff_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_cache_size() -> usize {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            context_threads: default_context_threads(),
            session_timeout_ms: default_session_timeout_ms(),
            keep_alive_failure_threshold: default_keep_alive_failure_threshold(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_command_retries: default_max_command_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            cache_size: default_cache_size(),
            read_consistency: ReadConsistency::default(),
        }
    }
}

impl ClientConfig {
    /// Session timeout as a `Duration`
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    /// Blocking-facade wait budget as a `Duration`
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Check field ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_ms == 0 {
            return Err(Error::invalid_config("session_timeout_ms must be positive"));
        }
        if self.context_threads == 0 {
            return Err(Error::invalid_config("context_threads must be positive"));
        }
        if self.cache_size == 0 {
            return Err(Error::invalid_config("cache_size must be positive"));
        }
        if self.keep_alive_failure_threshold == 0 {
            return Err(Error::invalid_config(
                "keep_alive_failure_threshold must be positive",
            ));
        }
        if self.reconnect_initial_backoff_ms > self.reconnect_max_backoff_ms {
            return Err(Error::invalid_config(format!(
                "reconnect_initial_backoff_ms ({}) exceeds reconnect_max_backoff_ms ({})",
                self.reconnect_initial_backoff_ms, self.reconnect_max_backoff_ms
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera client configuration

# Namespace primitive names are resolved in
namespace = "default"

# Session timeout requested from the server. Keep-alives are sent every
# session_timeout_ms / 2.
session_timeout_ms = 5000

# Consecutive keep-alive failures before primitives report SUSPENDED
keep_alive_failure_threshold = 1

# Wait budget for blocking primitive calls
operation_timeout_ms = 5000

# Commands the server reports as unavailable are resent with the same
# sequence number up to this many times
max_command_retries = 3
retry_backoff_ms = 50

# Event stream reconnect policy (exponential backoff)
reconnect_initial_backoff_ms = 100
reconnect_max_backoff_ms = 5000
max_reconnect_attempts = 10

# Default capacity of read caches
cache_size = 1000

# "sequential" (default) or "linearizable"
read_consistency = "sequential"

# Execution context threads (defaults to available parallelism)
# context_threads = 8
"#
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
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
