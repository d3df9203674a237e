use std::io;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::PROCESS_TARGET;

/// Requests delivered to the lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Drain and exit (`SIGINT`, `SIGTERM`, `SIGQUIT`).
    Shutdown,
    /// Hand the listeners to a successor (`SIGUSR2`).
    Restart,
}

impl LifecycleSignal {
    /// Maps a raw signal number.
    #[must_use]
    pub const fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGINT | SIGTERM | SIGQUIT => Some(Self::Shutdown),
            SIGUSR2 => Some(Self::Restart),
            _ => None,
        }
    }
}

/// Errors reported while installing signal handlers.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Registering the handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The forwarding thread could not be started.
    #[error("failed to start the signal thread: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Forwards process signals to a channel from a dedicated thread.
///
/// Dropping the value unregisters the handlers and stops the thread.
#[derive(Debug)]
pub struct SystemSignals {
    handle: Handle,
}

impl SystemSignals {
    /// Installs the handlers and starts forwarding to `sender`.
    ///
    /// # Errors
    ///
    /// Returns a [`SignalError`] when registration or thread creation fails.
    pub fn install(sender: mpsc::Sender<LifecycleSignal>) -> Result<Self, SignalError> {
        let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGUSR2])
            .map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        thread::Builder::new()
            .name("switchyard-signals".to_owned())
            .spawn(move || {
                for raw in signals.forever() {
                    let Some(signal) = LifecycleSignal::from_raw(raw) else {
                        continue;
                    };
                    info!(target: PROCESS_TARGET, signal = raw, ?signal, "signal received");
                    if sender.blocking_send(signal).is_err() {
                        debug!(target: PROCESS_TARGET, "lifecycle stopped listening for signals");
                        break;
                    }
                }
            })
            .map_err(|source| SignalError::Thread { source })?;
        Ok(Self { handle })
    }
}

impl Drop for SystemSignals {
    fn drop(&mut self) {
        self.handle.close();
    }
}
