use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use url::Url;

/// Transport served by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ListenerKind {
    /// Framed protocol over TCP.
    Tcp,
    /// Framed protocol over QUIC bidirectional streams.
    Quic,
    /// HTTP actions plus WebSocket and SSE routes.
    Http,
}

/// Named listener written as `name=scheme://host:port`.
///
/// The name identifies the listener when its socket is handed to a
/// successor process, so it must be unique within one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct ListenerDirective {
    name: String,
    kind: ListenerKind,
    host: String,
    port: u16,
}

impl ListenerDirective {
    /// Builds a directive from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ListenerKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            host: host.into(),
            port,
        }
    }

    /// Listener name used for descriptor handoff.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport served on the socket.
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Host to bind.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to bind; zero asks the kernel for an ephemeral port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ListenerDirective {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}={}://{}:{}",
            self.name, self.kind, self.host, self.port
        )
    }
}

impl FromStr for ListenerDirective {
    type Err = ListenerParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (name, address) = input
            .split_once('=')
            .ok_or_else(|| ListenerParseError::MissingName(input.to_owned()))?;
        let name = name.trim();
        if name.is_empty() || name.contains([':', ',']) {
            return Err(ListenerParseError::InvalidName(name.to_owned()));
        }

        let url = Url::parse(address.trim())?;
        let kind = url
            .scheme()
            .parse::<ListenerKind>()
            .map_err(|_| ListenerParseError::UnsupportedScheme(url.scheme().to_owned()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ListenerParseError::MissingHost(input.to_owned()))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ListenerParseError::MissingPort(input.to_owned()))?;
        Ok(Self::new(name, kind, host, port))
    }
}

impl TryFrom<String> for ListenerDirective {
    type Error = ListenerParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ListenerDirective> for String {
    fn from(value: ListenerDirective) -> Self {
        value.to_string()
    }
}

/// Errors encountered while parsing a [`ListenerDirective`].
#[derive(Debug, Error)]
pub enum ListenerParseError {
    /// The directive lacked the `name=` prefix.
    #[error("listener '{0}' must be written as name=scheme://host:port")]
    MissingName(String),
    /// The name was empty or used a reserved separator.
    #[error("invalid listener name '{0}'")]
    InvalidName(String),
    /// Scheme was not one of `tcp`, `quic` or `http`.
    #[error("unsupported listener scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host was missing from the address.
    #[error("missing host in listener '{0}'")]
    MissingHost(String),
    /// Port was missing from the address.
    #[error("missing port in listener '{0}'")]
    MissingPort(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
