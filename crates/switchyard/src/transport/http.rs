//! HTTP transport: action invocation, WebSocket framing and SSE.
//!
//! Routes:
//! - `POST /{action}` binds the body by `Content-Type` and answers with the
//!   rendered output; the result code travels in `x-result-code`.
//! - `GET /ws` upgrades to a WebSocket whose binary messages carry protocol
//!   frames.
//! - `GET /sse/{action}` binds the query string and streams the rendered
//!   output as one `response` event.
//! - `GET /healthz` answers `ok`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use tracing::{debug, info, warn};

use switchyard_config::{ListenerDirective, ListenerKind};
use switchyard_wire::{Request, Response, Version};

use super::errors::TransportError;
use super::service::Step;
use super::{ListenerContext, Started, TRANSPORT_TARGET, bind_std_tcp};
use crate::binding::{FormBinder, binder_for_content_type};
use crate::session::{ConnectionInfo, Session};

/// Trace id header.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");
/// Span id header.
pub const SPAN_ID_HEADER: HeaderName = HeaderName::from_static("x-span-id");
/// Caller id header.
pub const CALLER_ID_HEADER: HeaderName = HeaderName::from_static("x-caller-id");
/// Tag id header.
pub const TAG_ID_HEADER: HeaderName = HeaderName::from_static("x-tag-id");
/// Result code header set on every action response.
pub const RESULT_CODE_HEADER: HeaderName = HeaderName::from_static("x-result-code");

pub(super) fn start(
    directive: &ListenerDirective,
    inherited: Option<OwnedFd>,
    context: ListenerContext,
) -> Result<Started, TransportError> {
    let std_listener = bind_std_tcp(directive, inherited)?;
    let socket_error = |source| TransportError::Socket {
        name: directive.name().to_owned(),
        kind: ListenerKind::Http,
        source,
    };
    let handoff_fd = std_listener
        .as_fd()
        .try_clone_to_owned()
        .map_err(socket_error)?;
    let local_addr = std_listener.local_addr().map_err(socket_error)?;
    let listener = tokio::net::TcpListener::from_std(std_listener).map_err(socket_error)?;
    let task = tokio::spawn(serve(listener, context));
    Ok(Started {
        local_addr,
        handoff_fd,
        task,
    })
}

/// Routes served on an HTTP listener.
pub(crate) fn router(context: ListenerContext) -> Router {
    let body_limit = context.max_frame_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(websocket))
        .route("/sse/{action}", get(server_sent_events))
        .route("/{action}", post(invoke))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(context)
}

async fn serve(listener: tokio::net::TcpListener, context: ListenerContext) {
    info!(
        target: TRANSPORT_TARGET,
        instance = %context.name,
        addr = ?listener.local_addr().ok(),
        "http listener active"
    );
    let name = Arc::clone(&context.name);
    let token = context.token.clone();
    let app = router(context).into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, app).with_graceful_shutdown(token.cancelled_owned());
    if let Err(error) = server.await {
        warn!(
            target: TRANSPORT_TARGET,
            instance = %name,
            error = %error,
            "http server failed"
        );
    }
    info!(
        target: TRANSPORT_TARGET,
        instance = %name,
        "http listener stopped"
    );
}

async fn healthz() -> &'static str {
    "ok"
}

async fn invoke(
    State(context): State<ListenerContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let _in_flight = context.tracker.token();
    let info = connection_info(&context, peer);
    let request = request_from_headers(action, &headers, body);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let response = context
        .service
        .serve(&info, &request, binder_for_content_type(content_type))
        .await;
    http_response(&context, &response)
}

async fn server_sent_events(
    State(context): State<ListenerContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(action): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> HttpResponse {
    let _in_flight = context.tracker.token();
    let info = connection_info(&context, peer);
    let body = Bytes::from(query.unwrap_or_default());
    let request = request_from_headers(action, &headers, body);
    let response = context.service.serve(&info, &request, &FormBinder).await;

    let event = Event::default()
        .event(if response.result_code == 0 { "response" } else { "error" })
        .id(response.result_code.to_string())
        .data(String::from_utf8_lossy(&response.body));
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(event) });
    Sse::new(stream).into_response()
}

async fn websocket(
    State(context): State<ListenerContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> HttpResponse {
    let in_flight = context.tracker.token();
    upgrade
        .max_message_size(context.max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let _in_flight = in_flight;
            serve_websocket(socket, context, peer).await;
        })
}

async fn serve_websocket(mut socket: WebSocket, context: ListenerContext, peer: SocketAddr) {
    let info = connection_info(&context, peer);
    let hook = context.service.hook();
    hook.on_connect(&info);
    let mut session = Session::new(
        info.clone(),
        context.max_frame_bytes,
        context.token.child_token(),
    );
    'socket: loop {
        loop {
            match context.service.step(&mut session).await {
                Ok(Step::Reply(bytes)) => {
                    if socket.send(Message::Binary(bytes)).await.is_err() {
                        break 'socket;
                    }
                }
                Ok(Step::Silent) => {}
                Ok(Step::NeedMore) => break,
                Err(error) => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        instance = %info.instance,
                        error = %error,
                        "framing error; closing websocket"
                    );
                    break 'socket;
                }
            }
        }

        let token = session.token().clone();
        tokio::select! {
            () = token.cancelled() => break,
            message = socket.recv() => match message {
                Some(Ok(Message::Binary(data))) => session.buffer_mut().append(&data),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        instance = %info.instance,
                        error = %error,
                        "websocket receive failed"
                    );
                    break;
                }
            },
        }
    }
    hook.on_close(&info);
}

fn connection_info(context: &ListenerContext, peer: SocketAddr) -> ConnectionInfo {
    ConnectionInfo {
        instance: Arc::clone(&context.name),
        kind: ListenerKind::Http,
        peer: Some(peer),
    }
}

fn request_from_headers(action: String, headers: &HeaderMap, body: Bytes) -> Request {
    let bytes_of = |name: &HeaderName| {
        headers
            .get(name)
            .map(|value| Bytes::copy_from_slice(value.as_bytes()))
            .unwrap_or_default()
    };
    let number_of = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or_default()
    };
    Request {
        version: Version::V4,
        respond: true,
        caller_id: number_of(&CALLER_ID_HEADER),
        tag_id: number_of(&TAG_ID_HEADER),
        trace_id: bytes_of(&TRACE_ID_HEADER),
        span_id: bytes_of(&SPAN_ID_HEADER),
        action,
        body,
        ..Request::default()
    }
}

fn http_response(context: &ListenerContext, response: &Response) -> HttpResponse {
    let mut reply = (status_for(response.result_code), response.body.clone()).into_response();
    let headers = reply.headers_mut();
    headers.insert(RESULT_CODE_HEADER, HeaderValue::from(response.result_code));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(context.service.render().content_type()),
    );
    if let Ok(trace) = HeaderValue::from_bytes(&response.trace_id) {
        headers.insert(TRACE_ID_HEADER, trace);
    }
    reply
}

/// HTTP status for a result code: error codes in the 4xx and 5xx ranges map
/// to themselves, anything else is carried only in `x-result-code`.
fn status_for(result_code: i32) -> StatusCode {
    u16::try_from(result_code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .filter(|status| status.is_client_error() || status.is_server_error())
        .unwrap_or(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, StatusCode::OK)]
    #[case(404, StatusCode::NOT_FOUND)]
    #[case(500, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(7, StatusCode::OK)]
    #[case(-1, StatusCode::OK)]
    fn result_codes_map_to_statuses(#[case] code: i32, #[case] status: StatusCode) {
        assert_eq!(status_for(code), status);
    }

    #[test]
    fn trace_headers_populate_the_request() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("abc"));
        headers.insert(CALLER_ID_HEADER, HeaderValue::from_static("17"));
        headers.insert(TAG_ID_HEADER, HeaderValue::from_static("not-a-number"));
        let request = request_from_headers("user.get".to_owned(), &headers, Bytes::new());
        assert_eq!(request.trace_id.as_ref(), b"abc");
        assert_eq!(request.caller_id, 17);
        assert_eq!(request.tag_id, 0);
        assert!(request.respond);
    }
}
