//! Process lifecycle: pid and health files, signals, graceful restart through
//! listening-socket handoff, and draining.

mod errors;
mod files;
mod guard;
mod handoff;
mod launch;
mod signals;

pub use errors::{HandoffError, LaunchError};
pub use handoff::{ExecRestarter, InheritedListeners, Restarter, encode_handoff, parse_handoff};
pub use launch::{Lifecycle, LifecycleState, run_daemon, run_daemon_with};
pub use signals::{LifecycleSignal, SignalError, SystemSignals};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
