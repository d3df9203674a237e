//! Error types for transport listeners.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use switchyard_config::ListenerKind;
use switchyard_wire::WireError;

use crate::session::SessionError;

/// Errors surfaced while binding or adopting a listener.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("failed to bind {kind} listener '{name}' at {addr}: {source}")]
    Bind {
        name: String,
        kind: ListenerKind,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare {kind} listener '{name}': {source}")]
    Socket {
        name: String,
        kind: ListenerKind,
        #[source]
        source: io::Error,
    },
    #[error("failed to load TLS material from '{path}': {source}")]
    TlsFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("no {what} found in '{path}'")]
    TlsMissing { what: &'static str, path: String },
    #[error("failed to generate a development certificate: {message}")]
    SelfSigned { message: String },
    #[error("invalid QUIC TLS configuration: {source}")]
    Tls {
        #[source]
        source: rustls::Error,
    },
}

/// Errors that close a single connection or stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to encode response: {0}")]
    Wire(#[from] WireError),
}
