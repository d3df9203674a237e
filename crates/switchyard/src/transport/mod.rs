//! Listener instances for the TCP, QUIC and HTTP transports.
//!
//! Every listener is started from a [`ListenerDirective`], either by binding
//! a fresh socket or by adopting a descriptor inherited from a previous
//! process generation. A started [`TransportInstance`] keeps a duplicate of
//! its socket descriptor so the socket can be handed to a successor, and
//! tracks its sessions so shutdown can wait for in-flight work to finish.

mod errors;
mod http;
mod quic;
mod service;
mod tcp;
mod tls;

use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use switchyard_config::{Config, ListenerDirective, ListenerKind};

pub use self::errors::{FrameError, TransportError};
pub use self::http::{
    CALLER_ID_HEADER, RESULT_CODE_HEADER, SPAN_ID_HEADER, TAG_ID_HEADER, TRACE_ID_HEADER,
};
pub use self::service::FrameService;
pub use self::tls::QuicIdentity;

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// State shared by a listener's accept loop and its sessions.
#[derive(Clone)]
pub(crate) struct ListenerContext {
    pub(crate) name: Arc<str>,
    pub(crate) service: Arc<FrameService>,
    pub(crate) tracker: TaskTracker,
    pub(crate) token: CancellationToken,
    pub(crate) max_frame_bytes: usize,
}

struct Started {
    local_addr: SocketAddr,
    handoff_fd: OwnedFd,
    task: JoinHandle<()>,
}

/// Settings shared by every listener of a process.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Largest frame or HTTP body accepted.
    pub max_frame_bytes: usize,
    /// Certificate presented by QUIC listeners. A self-signed certificate is
    /// generated when absent.
    pub quic_identity: Option<Arc<QuicIdentity>>,
}

impl TransportSettings {
    /// Reads frame limits and QUIC certificate paths from `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the configured certificate or key
    /// cannot be loaded.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let quic_identity = match (&config.quic_cert_path, &config.quic_key_path) {
            (Some(cert), Some(key)) => Some(Arc::new(QuicIdentity::from_pem_files(cert, key)?)),
            _ => None,
        };
        Ok(Self {
            max_frame_bytes: config.max_frame_bytes(),
            quic_identity,
        })
    }
}

/// A running listener.
#[derive(Debug)]
pub struct TransportInstance {
    name: Arc<str>,
    kind: ListenerKind,
    local_addr: SocketAddr,
    inherited: bool,
    handoff_fd: OwnedFd,
    token: CancellationToken,
    tracker: TaskTracker,
    task: Option<JoinHandle<()>>,
}

impl TransportInstance {
    /// Listener name from its directive.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport kind.
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Address the socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the socket was adopted from a previous generation.
    #[must_use]
    pub const fn is_inherited(&self) -> bool {
        self.inherited
    }

    /// Descriptor passed to a successor process.
    #[must_use]
    pub fn handoff_fd(&self) -> BorrowedFd<'_> {
        self.handoff_fd.as_fd()
    }

    /// Sessions and requests still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting and asks idle sessions to close.
    ///
    /// Requests already being dispatched run to completion and their replies
    /// are written.
    pub fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    /// Waits up to `timeout` for the accept loop and every session to finish.
    /// Returns `false` when the timeout elapsed first.
    pub async fn wait_drained(&mut self, timeout: Duration) -> bool {
        let task = self.task.take();
        let tracker = self.tracker.clone();
        let drained = tokio::time::timeout(timeout, async move {
            if let Some(task) = task {
                if let Err(error) = task.await {
                    warn!(target: TRANSPORT_TARGET, error = %error, "listener task failed");
                }
            }
            tracker.wait().await;
        })
        .await
        .is_ok();
        if !drained {
            warn!(
                target: TRANSPORT_TARGET,
                instance = %self.name,
                in_flight = self.in_flight(),
                "drain timed out"
            );
        }
        drained
    }
}

impl Drop for TransportInstance {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Starts the listener described by `directive`.
///
/// When `inherited` is set the descriptor is adopted instead of binding a
/// new socket. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns a [`TransportError`] when the socket cannot be bound or prepared,
/// or the QUIC identity is unusable.
pub fn start_instance(
    directive: &ListenerDirective,
    inherited: Option<OwnedFd>,
    service: Arc<FrameService>,
    settings: &TransportSettings,
) -> Result<TransportInstance, TransportError> {
    let is_inherited = inherited.is_some();
    let context = ListenerContext {
        name: Arc::from(directive.name()),
        service,
        tracker: TaskTracker::new(),
        token: CancellationToken::new(),
        max_frame_bytes: settings.max_frame_bytes,
    };
    let started = match directive.kind() {
        ListenerKind::Tcp => tcp::start(directive, inherited, context.clone())?,
        ListenerKind::Http => http::start(directive, inherited, context.clone())?,
        ListenerKind::Quic => {
            let identity = match &settings.quic_identity {
                Some(identity) => Arc::clone(identity),
                None => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        instance = directive.name(),
                        "no QUIC certificate configured; using a self-signed one"
                    );
                    Arc::new(QuicIdentity::self_signed()?)
                }
            };
            quic::start(directive, inherited, &identity, context.clone())?
        }
    };
    info!(
        target: TRANSPORT_TARGET,
        instance = directive.name(),
        kind = %directive.kind(),
        addr = %started.local_addr,
        inherited = is_inherited,
        "listener started"
    );
    Ok(TransportInstance {
        name: context.name,
        kind: directive.kind(),
        local_addr: started.local_addr,
        inherited: is_inherited,
        handoff_fd: started.handoff_fd,
        token: context.token,
        tracker: context.tracker,
        task: Some(started.task),
    })
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })
}

fn bind_std_tcp(
    directive: &ListenerDirective,
    inherited: Option<OwnedFd>,
) -> Result<std::net::TcpListener, TransportError> {
    let listener = match inherited {
        Some(fd) => std::net::TcpListener::from(fd),
        None => {
            let addr = resolve(directive.host(), directive.port())?;
            std::net::TcpListener::bind(addr).map_err(|source| TransportError::Bind {
                name: directive.name().to_owned(),
                kind: directive.kind(),
                addr,
                source,
            })?
        }
    };
    listener
        .set_nonblocking(true)
        .map_err(|source| TransportError::Socket {
            name: directive.name().to_owned(),
            kind: directive.kind(),
            source,
        })?;
    Ok(listener)
}
