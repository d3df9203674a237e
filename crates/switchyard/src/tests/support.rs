//! Shared fixtures for the behavioural suites.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ortho_config::{OrthoConfig, OrthoError};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use switchyard_config::{Config, ListenerDirective, ListenerKind};
use switchyard_wire::{FrameKind, Request, Response, decode_response, encode_request};

use crate::action::{ActionBuilder, Context, ProcessError, Processor, ReturnCode};
use crate::binding::BindError;
use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::builtin::register_builtins;
use crate::dispatch::Dispatcher;
use crate::health::HealthReporter;
use crate::process::{HandoffError, Restarter};
use crate::registry::Registry;
use crate::session::SessionBuffer;
use crate::transport::{
    FrameService, TransportError, TransportInstance, TransportSettings, start_instance,
};

pub(crate) const MAX_FRAME: usize = 64 * 1024;
pub(crate) const WAIT: Duration = Duration::from_secs(5);

/// Node that stores a field and returns a fixed code.
pub(crate) struct Stamp {
    pub(crate) field: &'static str,
    pub(crate) code: &'static str,
    pub(crate) resets: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for Stamp {
    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        ctx.output_mut().set(self.field, true);
        Ok(ReturnCode::from(self.code))
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Node that copies the bound `id` into the output.
#[derive(Default)]
pub(crate) struct LoadUser {
    id: Option<u64>,
}

#[async_trait]
impl Processor for LoadUser {
    fn bind(&mut self, input: &Value) -> Result<(), BindError> {
        self.id = input.get("id").and_then(Value::as_u64);
        Ok(())
    }

    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        let id = self.id.ok_or_else(|| ProcessError::new(422, "missing id"))?;
        ctx.output_mut().set("id", id);
        ctx.output_mut().set("name", format!("user-{id}"));
        Ok(ReturnCode::from("RC_NORMAL"))
    }

    fn reset(&mut self) {
        self.id = None;
    }
}

/// Node that panics on every call.
pub(crate) struct Explode {
    pub(crate) resets: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for Explode {
    async fn process(&mut self, _ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        panic!("processor exploded");
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Node whose `bind` panics.
pub(crate) struct BindPanics {
    pub(crate) resets: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for BindPanics {
    fn bind(&mut self, _input: &Value) -> Result<(), BindError> {
        panic!("bind blew up");
    }

    async fn process(&mut self, _ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        Ok(ReturnCode::OK)
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Node that sleeps before answering.
pub(crate) struct Slow {
    pub(crate) delay: Duration,
}

#[async_trait]
impl Processor for Slow {
    async fn process(&mut self, ctx: &mut Context<'_>) -> Result<ReturnCode, ProcessError> {
        tokio::time::sleep(self.delay).await;
        ctx.output_mut().set("slept", true);
        Ok(ReturnCode::OK)
    }

    fn reset(&mut self) {}
}

/// Registry with the built-ins plus `user.get` and `test.slow`.
pub(crate) fn registry() -> Registry {
    let mut registry = Registry::new();
    register_builtins(&Config::default(), &mut registry).expect("builtins");
    registry
        .register(
            ActionBuilder::new("user.get")
                .node("load", LoadUser::default)
                .build(4)
                .expect("user.get"),
        )
        .expect("register user.get");
    registry
        .register(
            ActionBuilder::new("test.slow")
                .node("sleep", || Slow {
                    delay: Duration::from_millis(300),
                })
                .build(4)
                .expect("test.slow"),
        )
        .expect("register test.slow");
    registry
}

pub(crate) fn service(registry: Registry) -> Arc<FrameService> {
    Arc::new(FrameService::new(Arc::new(Dispatcher::new(Arc::new(
        registry,
    )))))
}

pub(crate) fn settings() -> TransportSettings {
    TransportSettings {
        max_frame_bytes: MAX_FRAME,
        quic_identity: None,
    }
}

/// Starts a loopback listener on an ephemeral port.
pub(crate) fn start(
    kind: ListenerKind,
    name: &str,
    service: Arc<FrameService>,
) -> Result<TransportInstance, TransportError> {
    let directive = ListenerDirective::new(name, kind, "127.0.0.1", 0);
    start_instance(&directive, None, service, &settings())
}

/// Client end of a framed TCP connection. Bytes of later responses that
/// arrive with the current one stay buffered for the next call.
pub(crate) struct FramedPeer {
    stream: TcpStream,
    buffer: SessionBuffer,
}

impl FramedPeer {
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: connect(addr).await,
            buffer: SessionBuffer::new(FrameKind::Response, MAX_FRAME),
        }
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    pub(crate) async fn send(&mut self, request: &Request) {
        let frame = encode_request(request).expect("encode");
        self.send_raw(&frame).await;
    }

    /// Writes `request` and reads exactly one response frame.
    pub(crate) async fn round_trip(&mut self, request: &Request) -> Response {
        self.send(request).await;
        self.next_response().await
    }

    pub(crate) async fn next_response(&mut self) -> Response {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(frame) = self.buffer.try_extract_frame().expect("response frame") {
                    let (response, consumed) = decode_response(&frame)
                        .expect("decode")
                        .expect("complete frame");
                    assert_eq!(consumed, frame.len());
                    return response;
                }
                let read = self
                    .stream
                    .read_buf(self.buffer.read_buf_mut())
                    .await
                    .expect("read");
                assert!(read > 0, "connection closed before a response arrived");
            }
        })
        .await
        .expect("response within timeout")
    }
}

pub(crate) async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerStarted(String),
    ListenerFailed(String),
    RestartSpawned(u32),
    RestartFailed(String),
    DrainStarted,
    DrainFinished(bool),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_started(&self, instance: &TransportInstance) {
        self.record(HealthEvent::ListenerStarted(instance.name().to_owned()));
    }

    fn listener_failed(&self, directive: &ListenerDirective, _error: &TransportError) {
        self.record(HealthEvent::ListenerFailed(directive.name().to_owned()));
    }

    fn restart_spawned(&self, pid: u32) {
        self.record(HealthEvent::RestartSpawned(pid));
    }

    fn restart_failed(&self, error: &HandoffError) {
        self.record(HealthEvent::RestartFailed(error.to_string()));
    }

    fn drain_started(&self, _in_flight: usize) {
        self.record(HealthEvent::DrainStarted);
    }

    fn drain_finished(&self, drained: bool) {
        self.record(HealthEvent::DrainFinished(drained));
    }
}

/// Restarter that records the handed-off listeners instead of spawning.
#[derive(Debug, Default)]
pub(crate) struct RecordingRestarter {
    pub(crate) calls: Mutex<Vec<Vec<(String, RawFd)>>>,
    pub(crate) reaps: AtomicUsize,
    pub(crate) fail: bool,
}

impl Restarter for RecordingRestarter {
    fn spawn_successor(&self, listeners: &[(&str, BorrowedFd<'_>)]) -> Result<u32, HandoffError> {
        if self.fail {
            return Err(HandoffError::Executable {
                source: std::io::Error::other("restarts disabled"),
            });
        }
        let entry = listeners
            .iter()
            .map(|(name, fd)| ((*name).to_owned(), fd.as_raw_fd()))
            .collect();
        self.calls.lock().expect("restarter mutex poisoned").push(entry);
        Ok(4242)
    }

    fn reap(&self) -> usize {
        self.reaps.fetch_add(1, Ordering::SeqCst);
        0
    }
}

/// Loader that fails by passing an unparsable frame limit.
pub(crate) struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("switchyardd"),
            OsString::from("--max-frame-bytes"),
            OsString::from("plenty"),
        ];
        Config::load_from_iter(args)
    }
}
