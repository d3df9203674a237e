use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use switchyard_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

/// Owns the pid file and health snapshot of one process generation.
///
/// Generations overlap during a restart, so there is no exclusive lock: each
/// generation rewrites both files, and only the generation still named in the
/// pid file removes them on drop.
#[derive(Debug)]
pub(crate) struct ProcessGuard {
    paths: RuntimePaths,
    pid: u32,
}

impl ProcessGuard {
    pub(crate) fn new(paths: RuntimePaths, pid: u32) -> Self {
        Self { paths, pid }
    }

    pub(crate) fn write_pid(&self) -> Result<(), LaunchError> {
        let path = self.paths.pid_path();
        atomic_write(path, format!("{}\n", self.pid).as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            pid = self.pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(crate) fn write_health(&self, state: HealthState) -> Result<(), LaunchError> {
        let path = self.paths.health_path();
        let snapshot = HealthSnapshot::new(state, self.pid)?;
        let mut contents = serde_json::to_vec(&snapshot)?;
        contents.push(b'\n');
        atomic_write(path, &contents).map_err(|source| LaunchError::HealthWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if read_pid(self.paths.pid_path()) != Some(self.pid) {
            info!(
                target: PROCESS_TARGET,
                pid = self.pid,
                "runtime files belong to a successor; leaving them in place"
            );
            return;
        }
        for path in [self.paths.pid_path(), self.paths.health_path()] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path.display(),
                        error = %error,
                        "failed to remove runtime file"
                    );
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(state: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            timestamp,
        })
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}
