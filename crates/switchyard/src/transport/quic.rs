//! Framed protocol over QUIC bidirectional streams.
//!
//! Each accepted connection gets a task that accepts streams; each stream
//! gets its own session buffer and task, and replies go back on the stream
//! the request arrived on.

use std::net::UdpSocket;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use quinn::{Endpoint, EndpointConfig, Incoming, TokioRuntime};
use tracing::{debug, info};

use switchyard_config::{ListenerDirective, ListenerKind};

use super::errors::TransportError;
use super::service::serve_byte_stream;
use super::tls::QuicIdentity;
use super::{ListenerContext, Started, TRANSPORT_TARGET, resolve};
use crate::session::{ConnectionInfo, Session};

pub(super) fn start(
    directive: &ListenerDirective,
    inherited: Option<OwnedFd>,
    identity: &QuicIdentity,
    context: ListenerContext,
) -> Result<Started, TransportError> {
    let socket_error = |source| TransportError::Socket {
        name: directive.name().to_owned(),
        kind: ListenerKind::Quic,
        source,
    };
    let socket = match inherited {
        Some(fd) => UdpSocket::from(fd),
        None => {
            let addr = resolve(directive.host(), directive.port())?;
            UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
                name: directive.name().to_owned(),
                kind: ListenerKind::Quic,
                addr,
                source,
            })?
        }
    };
    socket.set_nonblocking(true).map_err(socket_error)?;
    let handoff_fd = socket.as_fd().try_clone_to_owned().map_err(socket_error)?;
    let local_addr = socket.local_addr().map_err(socket_error)?;

    let endpoint = Endpoint::new(
        EndpointConfig::default(),
        Some(identity.server_config()?),
        socket,
        Arc::new(TokioRuntime),
    )
    .map_err(socket_error)?;
    let task = tokio::spawn(accept_loop(endpoint, context));
    Ok(Started {
        local_addr,
        handoff_fd,
        task,
    })
}

async fn accept_loop(endpoint: Endpoint, context: ListenerContext) {
    info!(
        target: TRANSPORT_TARGET,
        instance = %context.name,
        addr = ?endpoint.local_addr().ok(),
        "quic listener active"
    );
    loop {
        tokio::select! {
            () = context.token.cancelled() => break,
            incoming = endpoint.accept() => match incoming {
                Some(incoming) => {
                    context.tracker.spawn(serve_connection(incoming, context.clone()));
                }
                None => break,
            },
        }
    }
    // Refuse new connections; established ones finish their streams.
    endpoint.set_server_config(None);
    info!(
        target: TRANSPORT_TARGET,
        instance = %context.name,
        "quic listener stopped accepting"
    );
}

async fn serve_connection(incoming: Incoming, context: ListenerContext) {
    let connection = match incoming.await {
        Ok(connection) => connection,
        Err(error) => {
            debug!(
                target: TRANSPORT_TARGET,
                instance = %context.name,
                error = %error,
                "quic handshake failed"
            );
            return;
        }
    };
    let info = ConnectionInfo {
        instance: Arc::clone(&context.name),
        kind: ListenerKind::Quic,
        peer: Some(connection.remote_address()),
    };
    let hook = context.service.hook();
    hook.on_connect(&info);
    loop {
        tokio::select! {
            () = context.token.cancelled() => break,
            accepted = connection.accept_bi() => match accepted {
                Ok((send, recv)) => {
                    let session = Session::new(
                        info.clone(),
                        context.max_frame_bytes,
                        context.token.child_token(),
                    );
                    context.tracker.spawn(serve_byte_stream(
                        recv,
                        send,
                        session,
                        Arc::clone(&context.service),
                    ));
                }
                Err(error) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        instance = %context.name,
                        error = %error,
                        "quic connection closed"
                    );
                    break;
                }
            },
        }
    }
    hook.on_close(&info);
}
