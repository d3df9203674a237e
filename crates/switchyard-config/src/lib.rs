//! Layered configuration for the switchyard daemon.
//!
//! [`Config`] is resolved by `ortho_config` from built-in defaults, a
//! configuration file, `SWITCHYARD_*` environment variables and command-line
//! flags, in increasing order of precedence. Listener and upstream entries are
//! written as compact directives so they read the same in every layer:
//!
//! - listeners: `name=tcp://127.0.0.1:7070`, `name=quic://0.0.0.0:7443`,
//!   `name=http://0.0.0.0:8080`
//! - upstreams: `group=host:port*weight`

mod defaults;
mod listener;
mod logging;
mod runtime;
mod upstream;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DIAL_TIMEOUT_MS, DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_HANDOFF_ENV_VAR,
    DEFAULT_INSTANCE_POOL_CAPACITY, DEFAULT_LOG_FILTER, DEFAULT_MAX_FRAME_BYTES,
    DEFAULT_POOL_IDLE_CAPACITY, DEFAULT_TCP_PORT, default_handoff_env_var, default_listeners,
    default_log_filter, default_log_filter_string, default_log_format,
};
pub use listener::{ListenerDirective, ListenerKind, ListenerParseError};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use upstream::{UpstreamDirective, UpstreamParseError, group_upstreams};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SWITCHYARD")]
pub struct Config {
    /// Listeners to serve; empty means [`default_listeners`].
    #[serde(default)]
    pub listeners: Vec<ListenerDirective>,
    /// Downstream endpoints for the outbound pool.
    #[serde(default)]
    pub upstreams: Vec<UpstreamDirective>,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Largest accepted frame, prefix included.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: u32,
    /// Budget for in-flight work to finish on shutdown.
    #[ortho_config(default = DEFAULT_DRAIN_TIMEOUT_MS)]
    pub drain_timeout_ms: u64,
    /// Timeout for dialling a downstream endpoint.
    #[ortho_config(default = DEFAULT_DIAL_TIMEOUT_MS)]
    pub dial_timeout_ms: u64,
    /// Idle connections kept per downstream endpoint.
    #[ortho_config(default = DEFAULT_POOL_IDLE_CAPACITY)]
    pub pool_idle_capacity: usize,
    /// Idle handler instance sets kept per action.
    #[ortho_config(default = DEFAULT_INSTANCE_POOL_CAPACITY)]
    pub instance_pool_capacity: usize,
    /// Environment variable carrying inherited listener descriptors.
    #[ortho_config(default = default_handoff_env_var())]
    pub handoff_env_var: String,
    /// Directory for the pid file and health snapshot.
    pub runtime_dir: Option<Utf8PathBuf>,
    /// PEM certificate chain for QUIC listeners.
    pub quic_cert_path: Option<Utf8PathBuf>,
    /// PEM private key for QUIC listeners.
    pub quic_key_path: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            upstreams: Vec::new(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            pool_idle_capacity: DEFAULT_POOL_IDLE_CAPACITY,
            instance_pool_capacity: DEFAULT_INSTANCE_POOL_CAPACITY,
            handoff_env_var: default_handoff_env_var(),
            runtime_dir: None,
            quic_cert_path: None,
            quic_key_path: None,
        }
    }
}

impl Config {
    /// Listeners to serve, falling back to the built-in TCP listener.
    #[must_use]
    pub fn listeners(&self) -> Vec<ListenerDirective> {
        if self.listeners.is_empty() {
            default_listeners()
        } else {
            self.listeners.clone()
        }
    }

    /// Upstream endpoints grouped by name.
    #[must_use]
    pub fn upstream_groups(&self) -> BTreeMap<String, Vec<(String, u32)>> {
        group_upstreams(&self.upstreams)
    }

    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Largest accepted frame in bytes.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes as usize
    }

    /// Budget for in-flight work to finish on shutdown.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Timeout for dialling a downstream endpoint.
    #[must_use]
    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Environment variable carrying inherited listener descriptors.
    #[must_use]
    pub fn handoff_env_var(&self) -> &str {
        &self.handoff_env_var
    }

    /// Checks constraints that span several fields.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigValidationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut names = BTreeSet::new();
        for listener in self.listeners() {
            if !names.insert(listener.name().to_owned()) {
                return Err(ConfigValidationError::DuplicateListener {
                    name: listener.name().to_owned(),
                });
            }
        }
        if self.handoff_env_var.trim().is_empty() {
            return Err(ConfigValidationError::EmptyHandoffVar);
        }
        if self.max_frame_bytes < MIN_FRAME_LIMIT {
            return Err(ConfigValidationError::FrameLimitTooSmall {
                limit: self.max_frame_bytes,
            });
        }
        if self.quic_cert_path.is_some() != self.quic_key_path.is_some() {
            return Err(ConfigValidationError::IncompleteQuicIdentity);
        }
        Ok(())
    }
}

// Holds the fixed header of every protocol version.
const MIN_FRAME_LIMIT: u32 = 128;

/// Violations reported by [`Config::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Two listeners share a name.
    #[error("listener name '{name}' is used more than once")]
    DuplicateListener {
        /// The repeated name.
        name: String,
    },
    /// The handoff variable name is blank.
    #[error("handoff environment variable name must not be empty")]
    EmptyHandoffVar,
    /// The frame limit cannot hold a frame header.
    #[error("max_frame_bytes {limit} is too small to hold a frame header")]
    FrameLimitTooSmall {
        /// Configured limit.
        limit: u32,
    },
    /// Only one of the QUIC certificate and key paths was set.
    #[error("quic_cert_path and quic_key_path must be set together")]
    IncompleteQuicIdentity,
}
