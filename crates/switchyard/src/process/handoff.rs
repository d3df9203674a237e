//! Listening-socket handoff between process generations.
//!
//! A restarting generation clears `FD_CLOEXEC` on a duplicate of every
//! listening socket and starts the current executable with the handoff
//! variable set to comma-separated `name:fd` pairs. The successor adopts those
//! descriptors instead of binding, so the sockets never stop accepting.

use std::collections::{BTreeMap, BTreeSet};
use std::env::{self, VarError};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::process::{Child, Command};
use std::sync::{Mutex, PoisonError};

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::HandoffError;

/// Encodes listener descriptors as the handoff variable value.
pub fn encode_handoff<'a>(entries: impl IntoIterator<Item = (&'a str, RawFd)>) -> String {
    entries
        .into_iter()
        .map(|(name, fd)| format!("{name}:{fd}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parses a handoff variable value into `(name, fd)` pairs.
///
/// Blank entries are skipped. Names may contain `:`; the descriptor follows
/// the last one.
///
/// # Errors
///
/// Returns [`HandoffError::Malformed`] for entries without a name or a
/// non-negative descriptor, and [`HandoffError::DuplicateName`] when a
/// listener appears twice.
pub fn parse_handoff(value: &str) -> Result<Vec<(String, RawFd)>, HandoffError> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let malformed = || HandoffError::Malformed {
            entry: entry.to_owned(),
        };
        let (name, fd) = entry.rsplit_once(':').ok_or_else(malformed)?;
        let fd = fd
            .trim()
            .parse::<RawFd>()
            .ok()
            .filter(|fd| *fd >= 0)
            .ok_or_else(malformed)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(malformed());
        }
        if !seen.insert(name.to_owned()) {
            return Err(HandoffError::DuplicateName {
                name: name.to_owned(),
            });
        }
        entries.push((name.to_owned(), fd));
    }
    Ok(entries)
}

/// Listening sockets adopted from a previous generation.
#[derive(Debug, Default)]
pub struct InheritedListeners {
    present: bool,
    fds: BTreeMap<String, OwnedFd>,
}

impl InheritedListeners {
    /// Reads and removes the handoff variable `var`, adopting every listed
    /// descriptor. An absent variable means a cold start.
    ///
    /// Must run before any other thread is started, since it edits the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`HandoffError`] when the value is malformed or a
    /// descriptor is not open.
    pub fn from_env(var: &str) -> Result<Self, HandoffError> {
        let value = match env::var(var) {
            Ok(value) => value,
            Err(VarError::NotPresent) => return Ok(Self::default()),
            Err(VarError::NotUnicode(_)) => {
                return Err(HandoffError::NotUnicode {
                    var: var.to_owned(),
                });
            }
        };
        // SAFETY: called during startup before the runtime or signal thread
        // exists, so no other thread reads the environment concurrently.
        unsafe { env::remove_var(var) };
        let listeners = Self::adopt(parse_handoff(&value)?)?;
        info!(
            target: PROCESS_TARGET,
            listeners = listeners.fds.len(),
            "adopted inherited listeners"
        );
        Ok(listeners)
    }

    /// Takes ownership of each descriptor after checking it is open.
    pub(crate) fn adopt(entries: Vec<(String, RawFd)>) -> Result<Self, HandoffError> {
        let mut claimed = BTreeSet::new();
        for (name, fd) in &entries {
            if *fd <= 2 || !claimed.insert(*fd) {
                return Err(HandoffError::InvalidDescriptor {
                    name: name.clone(),
                    fd: *fd,
                });
            }
            fcntl(*fd, FcntlArg::F_GETFD).map_err(|source| HandoffError::Closed {
                name: name.clone(),
                fd: *fd,
                source,
            })?;
        }

        let mut fds = BTreeMap::new();
        for (name, fd) in entries {
            // SAFETY: the descriptor is open, is not a standard stream, and no
            // other entry names it, so this is its only owner.
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };
            set_close_on_exec(fd, true)?;
            fds.insert(name, owned);
        }
        Ok(Self { present: true, fds })
    }

    /// Whether this process was started by a restarting predecessor.
    #[must_use]
    pub const fn is_inherited(&self) -> bool {
        self.present
    }

    /// Removes and returns the descriptor for listener `name`.
    pub fn take(&mut self, name: &str) -> Option<OwnedFd> {
        self.fds.remove(name)
    }

    /// Closes descriptors no configured listener claimed.
    pub fn close_unclaimed(self) {
        for (name, fd) in self.fds {
            warn!(
                target: PROCESS_TARGET,
                listener = %name,
                fd = fd.as_raw_fd(),
                "closing inherited listener that is no longer configured"
            );
        }
    }
}

/// Starts the next process generation.
pub trait Restarter: Send + Sync {
    /// Spawns a successor that inherits `listeners` and returns its pid.
    ///
    /// # Errors
    ///
    /// Returns a [`HandoffError`] when the successor cannot be started; the
    /// caller keeps serving.
    fn spawn_successor(&self, listeners: &[(&str, BorrowedFd<'_>)]) -> Result<u32, HandoffError>;

    /// Collects successors that have already exited and returns how many are
    /// still running.
    fn reap(&self) -> usize {
        0
    }
}

/// Re-executes the current binary with the same arguments.
///
/// Spawned successors are kept until they exit so a successor that dies
/// during startup does not linger as a zombie.
#[derive(Debug)]
pub struct ExecRestarter {
    env_var: String,
    successors: Mutex<Vec<Child>>,
}

impl ExecRestarter {
    /// Passes descriptors through the variable `env_var`.
    #[must_use]
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
            successors: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, child: Child) {
        self.successors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }
}

impl Restarter for ExecRestarter {
    fn spawn_successor(&self, listeners: &[(&str, BorrowedFd<'_>)]) -> Result<u32, HandoffError> {
        let executable = env::current_exe().map_err(|source| HandoffError::Executable { source })?;
        let value = encode_handoff(listeners.iter().map(|(name, fd)| (*name, fd.as_raw_fd())));

        for (_, fd) in listeners {
            if let Err(error) = set_close_on_exec(fd.as_raw_fd(), false) {
                restore_close_on_exec(listeners);
                return Err(error);
            }
        }
        let spawned = Command::new(&executable)
            .args(env::args_os().skip(1))
            .env(&self.env_var, &value)
            .spawn();
        restore_close_on_exec(listeners);

        let child = spawned.map_err(|source| HandoffError::Spawn {
            path: executable.clone(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            pid = child.id(),
            handoff = %value,
            "successor spawned"
        );
        let pid = child.id();
        self.track(child);
        Ok(pid)
    }

    fn reap(&self) -> usize {
        let mut successors = self
            .successors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        successors.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid = child.id(),
                    status = %status,
                    "successor exited before taking over"
                );
                false
            }
            Ok(None) => true,
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid = child.id(),
                    error = %error,
                    "failed to poll successor"
                );
                true
            }
        });
        successors.len()
    }
}

fn restore_close_on_exec(listeners: &[(&str, BorrowedFd<'_>)]) {
    for (name, fd) in listeners {
        if let Err(error) = set_close_on_exec(fd.as_raw_fd(), true) {
            warn!(
                target: PROCESS_TARGET,
                listener = %name,
                error = %error,
                "failed to restore close-on-exec"
            );
        }
    }
}

fn set_close_on_exec(fd: RawFd, enabled: bool) -> Result<(), HandoffError> {
    let flags = if enabled {
        FdFlag::FD_CLOEXEC
    } else {
        FdFlag::empty()
    };
    fcntl(fd, FcntlArg::F_SETFD(flags))
        .map(drop)
        .map_err(|source| HandoffError::CloseOnExec { fd, source })
}
