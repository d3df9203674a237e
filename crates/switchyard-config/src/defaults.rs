use crate::listener::{ListenerDirective, ListenerKind};
use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default cap on a single frame, prefix included.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Default budget for in-flight work to finish during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for dialling a downstream endpoint.
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 3_000;

/// Default number of idle connections kept per downstream endpoint.
pub const DEFAULT_POOL_IDLE_CAPACITY: usize = 8;

/// Default number of idle handler instance sets kept per action.
pub const DEFAULT_INSTANCE_POOL_CAPACITY: usize = 64;

/// Default environment variable carrying inherited listener descriptors.
pub const DEFAULT_HANDOFF_ENV_VAR: &str = "SWITCHYARD_INHERITED_FDS";

/// Default TCP port of the built-in listener.
pub const DEFAULT_TCP_PORT: u16 = 7070;

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned handoff variable name.
#[must_use]
pub fn default_handoff_env_var() -> String {
    DEFAULT_HANDOFF_ENV_VAR.to_owned()
}

/// A single TCP listener on the loopback interface.
#[must_use]
pub fn default_listeners() -> Vec<ListenerDirective> {
    vec![ListenerDirective::new(
        "tcp",
        ListenerKind::Tcp,
        "127.0.0.1",
        DEFAULT_TCP_PORT,
    )]
}
