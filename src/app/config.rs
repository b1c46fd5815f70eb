//! Server configuration.
//!
//! Built in code with the `with_*` setters, or deserialized from TOML:
//!
//! ```toml
//! host = "127.0.0.1"
//! port = 8080
//! context_path = "/api"
//! handler_timeout_ms = 30000
//! shutdown_grace_ms = 5000
//! max_request_size = 1048576
//! ```
//!
//! Every field is optional in the file; missing ones take their defaults.
//! Validation reports every problem at once, not only the first.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::normalize_context_path;
use crate::server::DEFAULT_MAX_REQUEST_SIZE;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single semantic problem in a [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("context_path {0:?} may only contain path characters")]
    InvalidContextPath(String),

    #[error("handler_timeout_ms must be greater than zero")]
    ZeroHandlerTimeout,

    #[error("max_request_size must be greater than zero")]
    ZeroMaxRequestSize,
}

/// Server settings.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interface to bind (default `0.0.0.0`).
    pub host: String,

    /// TCP port; `0` picks an ephemeral port.
    pub port: u16,

    /// Prefix every route is mounted under (e.g. `/api`). Empty for none.
    pub context_path: String,

    /// Per-request handler deadline. `None` waits indefinitely.
    pub handler_timeout_ms: Option<u64>,

    /// How long `stop` waits for in-flight requests before aborting them.
    pub shutdown_grace_ms: u64,

    /// Largest request (head plus body) accepted before answering `413`.
    pub max_request_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            context_path: String::new(),
            handler_timeout_ms: None,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind_address())
            .field("context_path", &self.context_path)
            .field("handler_timeout", &self.handler_timeout())
            .field("shutdown_grace", &self.shutdown_grace())
            .field("max_request_size", &self.max_request_size)
            .finish()
    }
}

impl Config {
    /// Defaults with the given port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost);
        }
        if self
            .context_path
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '?' | '#' | '*' | '{' | '}' | ':'))
        {
            errors.push(ValidationError::InvalidContextPath(self.context_path.clone()));
        }
        if self.handler_timeout_ms == Some(0) {
            errors.push(ValidationError::ZeroHandlerTimeout);
        }
        if self.max_request_size == 0 {
            errors.push(ValidationError::ZeroMaxRequestSize);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout_ms = Some(duration_ms(timeout));
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = duration_ms(grace);
        self
    }

    #[must_use]
    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Normalized context path, `None` when routes are mounted at the root.
    pub fn context_path(&self) -> Option<String> {
        normalize_context_path(&self.context_path)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
