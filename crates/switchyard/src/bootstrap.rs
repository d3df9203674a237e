//! Daemon bootstrap: configuration, validation and telemetry.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use switchyard_config::{Config, ConfigValidationError};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer is invalid.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but is inconsistent.
    #[error("invalid configuration: {source}")]
    Validation {
        /// Violated constraint.
        #[source]
        source: ConfigValidationError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrapped {
    config: Config,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The telemetry handle.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Consumes the bootstrap result, keeping the configuration.
    #[must_use]
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Loads and validates configuration, then installs telemetry, reporting
/// each stage to `reporter`.
///
/// # Errors
///
/// Returns a [`BootstrapError`] for the first stage that fails.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
) -> Result<Bootstrapped, BootstrapError> {
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    config
        .validate()
        .map_err(|source| fail(BootstrapError::Validation { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;

    reporter.bootstrap_succeeded(&config);
    Ok(Bootstrapped { config, telemetry })
}
