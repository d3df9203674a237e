//! Frame handling shared by every transport.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use switchyard_wire::{Request, Response, decode_request, encode_response};

use super::TRANSPORT_TARGET;
use super::errors::FrameError;
use crate::action::{INTERNAL_ERROR_CODE, Output};
use crate::binding::{Binder, JsonBinder};
use crate::dispatch::Dispatcher;
use crate::hooks::{Hook, NoopHook};
use crate::render::{JsonRender, Render};
use crate::session::{ConnectionInfo, Session};

/// Outcome of handling the next buffered frame.
#[derive(Debug)]
pub(crate) enum Step {
    /// Write these bytes back.
    Reply(Bytes),
    /// A one-way request was served.
    Silent,
    /// No complete frame is buffered.
    NeedMore,
}

/// Dispatches decoded requests and renders their responses.
pub struct FrameService {
    dispatcher: Arc<Dispatcher>,
    render: Arc<dyn Render>,
    hook: Arc<dyn Hook>,
}

impl FrameService {
    /// Wraps `dispatcher` with the JSON renderer and no hook.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            render: Arc::new(JsonRender),
            hook: Arc::new(NoopHook),
        }
    }

    /// Replaces the renderer.
    #[must_use]
    pub fn with_render(mut self, render: Arc<dyn Render>) -> Self {
        self.render = render;
        self
    }

    /// Replaces the hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hook = hook;
        self
    }

    /// Hook notified by transports.
    #[must_use]
    pub fn hook(&self) -> &dyn Hook {
        self.hook.as_ref()
    }

    /// Renderer used for response bodies.
    #[must_use]
    pub fn render(&self) -> &dyn Render {
        self.render.as_ref()
    }

    /// Runs `request` and builds its response envelope.
    ///
    /// Dispatch failures become a response with a non-zero result code and a
    /// rendered `{"error": ...}` body.
    pub async fn serve(
        &self,
        info: &ConnectionInfo,
        request: &Request,
        binder: &dyn Binder,
    ) -> Response {
        let started = Instant::now();
        self.hook.on_request(info, request);
        let output = match self.dispatcher.dispatch_with_binder(request, binder).await {
            Ok(dispatched) => dispatched.output,
            Err(error) => Output::failure(error.result_code(), error.to_string()),
        };
        let (code, body) = match self.render.render(&output) {
            Ok(body) => (output.result_code(), body),
            Err(error) => {
                warn!(
                    target: TRANSPORT_TARGET,
                    action = %request.action,
                    error = %error,
                    "failed to render output"
                );
                (INTERNAL_ERROR_CODE, Bytes::new())
            }
        };
        let response = Response::reply_to(request)
            .with_result_code(code)
            .with_body(body);
        self.hook.on_response(info, &response);
        self.hook.on_finish(info, request, started.elapsed(), code);
        response
    }

    /// Handles one complete request frame; `None` means nothing is written
    /// back.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] when the frame does not decode or the
    /// response cannot be encoded.
    pub async fn handle_frame(
        &self,
        info: &ConnectionInfo,
        frame: &[u8],
    ) -> Result<Option<Bytes>, FrameError> {
        let Some((request, _)) = decode_request(frame)? else {
            return Ok(None);
        };
        let response = self.serve(info, &request, &JsonBinder).await;
        if !request.respond {
            return Ok(None);
        }
        Ok(Some(encode_response(&response)?))
    }

    /// Handles the next frame buffered in `session`.
    pub(crate) async fn step(&self, session: &mut Session) -> Result<Step, FrameError> {
        let Some(frame) = session.buffer_mut().try_extract_frame()? else {
            return Ok(Step::NeedMore);
        };
        Ok(match self.handle_frame(session.info(), &frame).await? {
            Some(reply) => Step::Reply(reply),
            None => Step::Silent,
        })
    }
}

/// Serves framed requests on a byte stream until the peer closes it, a
/// framing error occurs or the session token is cancelled.
///
/// Frames are handled in arrival order and each reply is written before the
/// next frame is decoded. Cancellation is only observed between reads.
pub(crate) async fn serve_byte_stream<R, W>(
    mut reader: R,
    mut writer: W,
    mut session: Session,
    service: Arc<FrameService>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    'session: loop {
        loop {
            match service.step(&mut session).await {
                Ok(Step::Reply(bytes)) => {
                    if let Err(error) = writer.write_all(&bytes).await {
                        debug!(
                            target: TRANSPORT_TARGET,
                            instance = %session.info().instance,
                            error = %error,
                            "write failed; closing session"
                        );
                        break 'session;
                    }
                }
                Ok(Step::Silent) => {}
                Ok(Step::NeedMore) => break,
                Err(error) => {
                    warn!(
                        target: TRANSPORT_TARGET,
                        instance = %session.info().instance,
                        peer = ?session.info().peer,
                        error = %error,
                        "framing error; closing session"
                    );
                    break 'session;
                }
            }
        }

        let token = session.token().clone();
        tokio::select! {
            () = token.cancelled() => break,
            read = reader.read_buf(session.buffer_mut().read_buf_mut()) => match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        instance = %session.info().instance,
                        error = %error,
                        "read failed; closing session"
                    );
                    break;
                }
            },
        }
    }
    if let Err(error) = writer.shutdown().await {
        debug!(target: TRANSPORT_TARGET, error = %error, "stream shutdown failed");
    }
}
