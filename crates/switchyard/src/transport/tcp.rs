//! Framed protocol over TCP.

use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use switchyard_config::{ListenerDirective, ListenerKind};

use super::{ERROR_BACKOFF, ListenerContext, Started, TRANSPORT_TARGET, bind_std_tcp};
use super::errors::TransportError;
use super::service::serve_byte_stream;
use crate::session::{ConnectionInfo, Session};

pub(super) fn start(
    directive: &ListenerDirective,
    inherited: Option<OwnedFd>,
    context: ListenerContext,
) -> Result<Started, TransportError> {
    let std_listener = bind_std_tcp(directive, inherited)?;
    let socket_error = |source| TransportError::Socket {
        name: directive.name().to_owned(),
        kind: ListenerKind::Tcp,
        source,
    };
    let handoff_fd = std_listener
        .as_fd()
        .try_clone_to_owned()
        .map_err(socket_error)?;
    let local_addr = std_listener.local_addr().map_err(socket_error)?;
    let listener = TcpListener::from_std(std_listener).map_err(socket_error)?;
    let task = tokio::spawn(accept_loop(listener, context));
    Ok(Started {
        local_addr,
        handoff_fd,
        task,
    })
}

async fn accept_loop(listener: TcpListener, context: ListenerContext) {
    info!(
        target: TRANSPORT_TARGET,
        instance = %context.name,
        addr = ?listener.local_addr().ok(),
        "tcp listener active"
    );
    loop {
        tokio::select! {
            () = context.token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let info = ConnectionInfo {
                        instance: Arc::clone(&context.name),
                        kind: ListenerKind::Tcp,
                        peer: Some(peer),
                    };
                    let session = Session::new(
                        info,
                        context.max_frame_bytes,
                        context.token.child_token(),
                    );
                    context
                        .tracker
                        .spawn(serve_connection(stream, session, context.clone()));
                }
                Err(error) => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        instance = %context.name,
                        error = %error,
                        "tcp accept error"
                    );
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            },
        }
    }
    info!(
        target: TRANSPORT_TARGET,
        instance = %context.name,
        "tcp listener stopped accepting"
    );
}

async fn serve_connection(stream: TcpStream, session: Session, context: ListenerContext) {
    if let Err(error) = stream.set_nodelay(true) {
        warn!(target: TRANSPORT_TARGET, error = %error, "failed to set TCP_NODELAY");
    }
    let info = session.info().clone();
    let hook = context.service.hook();
    hook.on_connect(&info);
    let (reader, writer) = stream.into_split();
    serve_byte_stream(reader, writer, session, Arc::clone(&context.service)).await;
    hook.on_close(&info);
}
