//! Derives runtime artefact paths for the daemon.
//!
//! The runtime directory holds the pid file and the health snapshot. Both are
//! rewritten by every process generation, so a restarted daemon takes them
//! over from its predecessor without coordination.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Canonical paths for runtime artefacts written by the daemon.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    runtime_dir: PathBuf,
    pid_path: PathBuf,
    health_path: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the configuration and creates the directory.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::RuntimeDirectory`] when the directory
    /// cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, RuntimePathsError> {
        let runtime_dir = config
            .runtime_dir
            .as_ref()
            .map_or_else(default_runtime_directory, |dir| {
                dir.as_std_path().to_path_buf()
            });
        fs::create_dir_all(&runtime_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: runtime_dir.clone(),
            source,
        })?;
        Ok(Self {
            pid_path: runtime_dir.join("switchyardd.pid"),
            health_path: runtime_dir.join("switchyardd.health"),
            runtime_dir,
        })
    }

    /// Directory holding runtime artefacts.
    #[must_use]
    pub fn runtime_dir(&self) -> &Path {
        self.runtime_dir.as_path()
    }

    /// Path to the PID file.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid_path.as_path()
    }

    /// Path to the health snapshot.
    #[must_use]
    pub fn health_path(&self) -> &Path {
        self.health_path.as_path()
    }
}

fn default_runtime_directory() -> PathBuf {
    #[cfg(unix)]
    {
        if let Some(mut dir) = runtime_dir() {
            dir.push("switchyard");
            return dir;
        }
        let mut dir = env::temp_dir();
        dir.push("switchyard");
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        dir
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("switchyard");
        dir
    }
}

/// Errors raised while deriving daemon runtime paths.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
