//! Configuration for the language-intelligence client.
//!
//! Deserialized from the `[lsp]` table of the host's TOML config. Every
//! field has a default so an empty table is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_COMMAND: &str = "texlab";

/// Configuration for the LSP client subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    /// Whether the client is enabled. Disabled clients never spawn a server.
    pub enabled: bool,
    pub server: ServerConfig,
    pub restart: RestartPolicy,
    /// Timeout for ordinary requests, in milliseconds.
    pub request_timeout_ms: u64,
    /// Timeout for the `initialize` handshake, in milliseconds.
    pub initialize_timeout_ms: u64,
    /// Interval of the liveness check, in seconds.
    pub health_check_interval_secs: u64,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: ServerConfig::default(),
            restart: RestartPolicy::default(),
            request_timeout_ms: 5_000,
            initialize_timeout_ms: 15_000,
            health_check_interval_secs: 30,
        }
    }
}

impl LspConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// How to locate and launch the language server binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Executable name looked up on `PATH` (e.g. "texlab").
    pub command: String,
    /// User-configured absolute path; takes precedence when it exists.
    pub path: Option<PathBuf>,
    /// Path of a binary shipped alongside the application.
    pub bundled_path: Option<PathBuf>,
    /// Arguments to pass to the server.
    pub args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            path: None,
            bundled_path: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("language server '{command}' not found (no configured path, no bundled binary, not on PATH)")]
pub struct ResolveError {
    command: String,
}

impl ServerConfig {
    /// Resolve the binary to spawn.
    ///
    /// Order: configured `path`, then `bundled_path`, then a `PATH` lookup
    /// of `command`.
    pub fn resolve(&self) -> Result<PathBuf, ResolveError> {
        let existing = |p: &Option<PathBuf>| p.as_deref().filter(|p| p.is_file()).map(Path::to_path_buf);

        if let Some(path) = existing(&self.path) {
            return Ok(path);
        }
        if let Some(path) = &self.path {
            tracing::warn!(path = %path.display(), "Configured language server path does not exist");
        }
        if let Some(path) = existing(&self.bundled_path) {
            return Ok(path);
        }
        which::which(&self.command).map_err(|_| ResolveError {
            command: self.command.clone(),
        })
    }
}

/// Bounded restart with exponential backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Restarts allowed before giving up and entering the error state.
    pub max_attempts: u32,
    /// Delay before the first restart; doubles for each subsequent one.
    pub base_delay_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (1-based): base * 2^(attempt-1).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(1 << exponent))
    }
}
