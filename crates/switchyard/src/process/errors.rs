//! Error surface for daemon launch, restart and supervision.

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::SystemTimeError;

use nix::errno::Errno;
use thiserror::Error;

use switchyard_config::RuntimePathsError;

use crate::bootstrap::BootstrapError;
use crate::registry::RegistryError;
use crate::transport::TransportError;

use super::signals::SignalError;

/// Errors raised while reading inherited descriptors or spawning a
/// successor process.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// The handoff variable holds non-UTF-8 data.
    #[error("handoff variable '{var}' is not valid UTF-8")]
    NotUnicode {
        /// Variable name.
        var: String,
    },
    /// An entry is not of the form `name:fd`.
    #[error("malformed handoff entry '{entry}'")]
    Malformed {
        /// Offending entry.
        entry: String,
    },
    /// Two entries name the same listener.
    #[error("listener '{name}' appears twice in the handoff variable")]
    DuplicateName {
        /// Repeated listener name.
        name: String,
    },
    /// Two entries share a descriptor, or a descriptor is a standard stream.
    #[error("descriptor {fd} for listener '{name}' cannot be adopted")]
    InvalidDescriptor {
        /// Listener name.
        name: String,
        /// Offending descriptor.
        fd: RawFd,
    },
    /// The descriptor is not open in this process.
    #[error("descriptor {fd} for listener '{name}' is not open: {source}")]
    Closed {
        /// Listener name.
        name: String,
        /// Offending descriptor.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Updating `FD_CLOEXEC` failed.
    #[error("failed to update close-on-exec for descriptor {fd}: {source}")]
    CloseOnExec {
        /// Descriptor being updated.
        fd: RawFd,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The current executable could not be located.
    #[error("failed to locate the current executable: {source}")]
    Executable {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the successor failed.
    #[error("failed to spawn successor '{path}': {source}")]
    Spawn {
        /// Executable path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// Registering actions failed.
    #[error("failed to register actions: {source}")]
    Registry {
        /// Underlying registration error.
        #[source]
        source: RegistryError,
    },
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the PID file failed.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the health snapshot failed.
    #[error("failed to write health snapshot '{path}': {source}")]
    HealthWrite {
        /// Health file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serialising the health snapshot failed.
    #[error("failed to serialise health snapshot: {source}")]
    HealthSerialise {
        /// Underlying serialisation error.
        #[from]
        source: serde_json::Error,
    },
    /// Obtaining the current timestamp failed.
    #[error("failed to read system time: {source}")]
    Clock {
        /// Underlying system time error.
        #[source]
        source: SystemTimeError,
    },
    /// Building the Tokio runtime failed.
    #[error("failed to start the async runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Inherited descriptors could not be adopted.
    #[error("failed to adopt inherited listeners: {source}")]
    Handoff {
        /// Underlying handoff error.
        #[source]
        source: HandoffError,
    },
    /// A listener failed to start.
    #[error("listener failed to start: {source}")]
    Transport {
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying signal error.
        #[source]
        source: SignalError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<RegistryError> for LaunchError {
    fn from(source: RegistryError) -> Self {
        Self::Registry { source }
    }
}

impl From<RuntimePathsError> for LaunchError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<HandoffError> for LaunchError {
    fn from(source: HandoffError) -> Self {
        Self::Handoff { source }
    }
}

impl From<TransportError> for LaunchError {
    fn from(source: TransportError) -> Self {
        Self::Transport { source }
    }
}

impl From<SignalError> for LaunchError {
    fn from(source: SignalError) -> Self {
        Self::Signals { source }
    }
}
