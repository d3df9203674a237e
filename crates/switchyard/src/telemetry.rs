//! Structured logging for the daemon.
//!
//! During a graceful restart two generations write to the same sink until the
//! predecessor exits, so every event is stamped with the writing process id
//! and whether that process adopted its listeners.

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Event, Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, JsonFields, Writer};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{self as tracing_fmt, FmtContext};
use tracing_subscriber::registry::LookupSpan;

use switchyard_config::{Config, LogFormat};

static TELEMETRY: OnceCell<GenerationStamp> = OnceCell::new();

/// Identity of the process generation writing a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationStamp {
    pid: u32,
    successor: bool,
}

impl GenerationStamp {
    /// Builds a stamp for `pid`.
    #[must_use]
    pub const fn new(pid: u32, successor: bool) -> Self {
        Self { pid, successor }
    }

    /// Stamp for this process. A non-empty handoff value marks a successor.
    #[must_use]
    pub fn current(handoff: Option<&OsStr>) -> Self {
        let successor = handoff.is_some_and(|value| !value.is_empty());
        Self::new(std::process::id(), successor)
    }

    /// Process id of the writer.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[must_use]
    pub const fn is_successor(&self) -> bool {
        self.successor
    }

    const fn role(&self) -> &'static str {
        if self.successor { "successor" } else { "cold" }
    }

    /// Inserts the stamp as the leading members of a JSON object line.
    /// Lines that are not objects pass through unchanged.
    fn splice_json(&self, line: &str) -> String {
        match line.strip_prefix('{') {
            Some(rest) => {
                let separator = if rest.trim_start().starts_with('}') { "" } else { "," };
                format!(
                    "{{\"pid\":{},\"generation\":\"{}\"{separator}{rest}",
                    self.pid,
                    self.role()
                )
            }
            None => line.to_owned(),
        }
    }
}

impl fmt::Display for GenerationStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} generation={}", self.pid, self.role())
    }
}

/// Handle returned once telemetry is installed.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryHandle {
    generation: GenerationStamp,
}

impl TelemetryHandle {
    /// Stamp attached to every event this process writes.
    #[must_use]
    pub const fn generation(&self) -> GenerationStamp {
        self.generation
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use; later calls return the same
/// generation stamp without touching global state.
///
/// # Errors
///
/// Returns a [`TelemetryError`] when the filter does not parse or another
/// subscriber is already installed.
///
/// # Examples
///
/// ```rust
/// use switchyard::telemetry;
/// use switchyard_config::Config;
///
/// # fn main() -> Result<(), switchyard::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// assert_eq!(first.generation(), second.generation());
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY
        .get_or_try_init(|| {
            let handoff = std::env::var_os(config.handoff_env_var());
            let generation = GenerationStamp::current(handoff.as_deref());
            install_subscriber(config, generation).map(|()| generation)
        })
        .map(|generation| TelemetryHandle {
            generation: *generation,
        })
}

fn install_subscriber(config: &Config, generation: GenerationStamp) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let events = tracing_fmt::format()
        .with_target(true)
        .with_level(true)
        .with_timer(UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(
            tracing_fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_ansi(false)
                .fmt_fields(JsonFields::new())
                .event_format(Stamped {
                    inner: events.json().flatten_event(true),
                    generation,
                    layout: LogFormat::Json,
                })
                .finish(),
        ),
        LogFormat::Compact => Box::new(
            tracing_fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .event_format(Stamped {
                    inner: events.compact(),
                    generation,
                    layout: LogFormat::Compact,
                })
                .finish(),
        ),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

/// Event formatter that prefixes each line with a [`GenerationStamp`].
struct Stamped<F> {
    inner: F,
    generation: GenerationStamp,
    layout: LogFormat,
}

impl<S, N, F> FormatEvent<S, N> for Stamped<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        match self.layout {
            LogFormat::Json => {
                let mut line = String::new();
                self.inner.format_event(ctx, Writer::new(&mut line), event)?;
                writer.write_str(&self.generation.splice_json(&line))
            }
            LogFormat::Compact => {
                write!(writer, "{} ", self.generation)?;
                self.inner.format_event(ctx, writer, event)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::cold_start(None, false)]
    #[case::blank_handoff(Some(""), false)]
    #[case::adopted_listeners(Some("edge:3"), true)]
    fn handoff_value_marks_successors(#[case] handoff: Option<&str>, #[case] successor: bool) {
        let value = handoff.map(OsString::from);
        let stamp = GenerationStamp::current(value.as_deref());
        assert_eq!(stamp.is_successor(), successor);
        assert_eq!(stamp.pid(), std::process::id());
    }

    #[rstest]
    fn compact_prefix_names_pid_and_role() {
        assert_eq!(
            GenerationStamp::new(41, true).to_string(),
            "pid=41 generation=successor"
        );
        assert_eq!(
            GenerationStamp::new(7, false).to_string(),
            "pid=7 generation=cold"
        );
    }

    #[rstest]
    #[case::populated(
        "{\"level\":\"INFO\",\"message\":\"up\"}\n",
        "{\"pid\":9,\"generation\":\"successor\",\"level\":\"INFO\",\"message\":\"up\"}\n"
    )]
    #[case::empty_object("{}\n", "{\"pid\":9,\"generation\":\"successor\"}\n")]
    #[case::not_an_object("plain text\n", "plain text\n")]
    fn json_lines_lead_with_the_stamp(#[case] line: &str, #[case] expected: &str) {
        let stamped = GenerationStamp::new(9, true).splice_json(line);
        assert_eq!(stamped, expected);
        if line.starts_with('{') {
            let parsed: serde_json::Value =
                serde_json::from_str(stamped.trim_end()).expect("still valid JSON");
            assert_eq!(parsed["pid"], 9);
        }
    }
}
