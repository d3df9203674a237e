//! Action-dispatch server framework for the switchyard binary protocol.
//!
//! Applications register named *actions*, each a small graph of
//! [`Processor`]s linked by return codes, in a [`Registry`]. The daemon serves
//! those actions over TCP, QUIC and HTTP (with WebSocket and SSE routes):
//! every transport reassembles protocol frames through a [`SessionBuffer`],
//! decodes them with [`switchyard_wire`], runs the action through the
//! [`Dispatcher`] and renders the [`Output`] back onto the wire.
//!
//! Processors can call downstream services through a [`Client`] backed by a
//! [`ConnectionPool`] that picks endpoints by smooth weighted round robin.
//!
//! ## Process lifecycle
//!
//! `SIGINT`, `SIGTERM` and `SIGQUIT` drain the daemon: listeners stop
//! accepting, idle sessions close, and in-flight requests finish within the
//! configured drain budget. `SIGUSR2` restarts it without dropping a
//! connection: the running generation starts a successor that adopts its
//! listening sockets, and drains once the successor asks it to.
//!
//! ```no_run
//! use switchyard::{register_builtins, run_daemon};
//!
//! fn main() -> Result<(), switchyard::LaunchError> {
//!     run_daemon(register_builtins)
//! }
//! ```

pub mod action;
pub mod binding;
mod bootstrap;
mod builtin;
pub mod dispatch;
mod health;
pub mod hooks;
pub mod pool;
mod process;
pub mod registry;
pub mod render;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use action::{
    Action, ActionBuilder, Context, GraphError, Output, ProcessError, Processor, ReturnCode,
};
pub use binding::{BindError, Binder, FormBinder, JsonBinder, bind_into};
pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use builtin::{
    BAD_GATEWAY_CODE, ECHO_ACTION, FORWARD_ACTION, PING_ACTION, UNAVAILABLE_CODE,
    register_builtins,
};
pub use dispatch::{DispatchError, DispatchState, Dispatched, Dispatcher};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use hooks::{Hook, LoggingHook, NoopHook};
pub use pool::{Client, ClientError, ConnectionPool, PoolError};
pub use process::{
    ExecRestarter, HandoffError, InheritedListeners, LaunchError, Lifecycle, LifecycleSignal,
    LifecycleState, Restarter, SignalError, SystemSignals, encode_handoff, parse_handoff,
    run_daemon, run_daemon_with,
};
pub use registry::{Registry, RegistryError};
pub use render::{JsonRender, Render, RenderError};
pub use session::{ConnectionInfo, Session, SessionBuffer, SessionError};
pub use telemetry::{GenerationStamp, TelemetryError, TelemetryHandle};
pub use transport::{
    FrameService, QuicIdentity, TransportError, TransportInstance, TransportSettings,
    start_instance,
};

#[cfg(test)]
mod tests;
