use std::io;
use std::time::Duration;

use thiserror::Error;

use switchyard_wire::WireError;

use crate::session::SessionError;

/// Errors raised while borrowing a pooled connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No group is registered under the name.
    #[error("upstream group '{group}' is not configured")]
    UnknownGroup {
        /// Requested group.
        group: String,
    },
    /// The group has no endpoint with a positive weight.
    #[error("upstream group '{group}' has no usable endpoints")]
    NoEndpoints {
        /// Requested group.
        group: String,
    },
    /// Connecting to the chosen endpoint failed.
    #[error("failed to dial '{address}': {source}")]
    Dial {
        /// Endpoint address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the chosen endpoint took too long.
    #[error("dialling '{address}' timed out after {timeout:?}")]
    DialTimeout {
        /// Endpoint address.
        address: String,
        /// Configured budget.
        timeout: Duration,
    },
}

/// Errors raised by [`Client::call`](super::Client::call).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Borrowing a connection failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The request could not be encoded or the response decoded.
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),
    /// The response stream was malformed.
    #[error("response framing error: {0}")]
    Framing(#[from] SessionError),
    /// Reading or writing the connection failed.
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the connection before a full response arrived.
    #[error("connection closed before the response completed")]
    Closed,
    /// The response echoed a different trace id.
    #[error("response trace id does not match the request")]
    TraceMismatch,
}
