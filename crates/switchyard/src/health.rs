//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use switchyard_config::{Config, ListenerDirective};

use crate::bootstrap::BootstrapError;
use crate::process::HandoffError;
use crate::transport::{TransportError, TransportInstance};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once a listener accepts connections.
    fn listener_started(&self, instance: &TransportInstance);

    /// Invoked when a listener cannot be started.
    fn listener_failed(&self, directive: &ListenerDirective, error: &TransportError);

    /// Invoked when a successor process has been spawned.
    fn restart_spawned(&self, pid: u32);

    /// Invoked when a restart is abandoned.
    fn restart_failed(&self, error: &HandoffError);

    /// Invoked when draining begins.
    fn drain_started(&self, in_flight: usize);

    /// Invoked when draining ends; `drained` is false after a timeout.
    fn drain_finished(&self, drained: bool);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_started(&self, instance: &TransportInstance) {
        (**self).listener_started(instance);
    }

    fn listener_failed(&self, directive: &ListenerDirective, error: &TransportError) {
        (**self).listener_failed(directive, error);
    }

    fn restart_spawned(&self, pid: u32) {
        (**self).restart_spawned(pid);
    }

    fn restart_failed(&self, error: &HandoffError) {
        (**self).restart_failed(error);
    }

    fn drain_started(&self, in_flight: usize) {
        (**self).drain_started(in_flight);
    }

    fn drain_finished(&self, drained: bool) {
        (**self).drain_finished(drained);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listeners = config.listeners().len(),
            upstream_groups = config.upstream_groups().len(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn listener_started(&self, instance: &TransportInstance) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_started",
            listener = instance.name(),
            kind = %instance.kind(),
            addr = %instance.local_addr(),
            inherited = instance.is_inherited(),
            "listener ready"
        );
    }

    fn listener_failed(&self, directive: &ListenerDirective, error: &TransportError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "listener_failed",
            listener = %directive,
            error = %error,
            "listener failed to start"
        );
    }

    fn restart_spawned(&self, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "restart_spawned",
            successor = pid,
            "successor started; waiting for it to take over"
        );
    }

    fn restart_failed(&self, error: &HandoffError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "restart_failed",
            error = %error,
            "restart aborted; continuing to serve"
        );
    }

    fn drain_started(&self, in_flight: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "drain_started",
            in_flight,
            "draining listeners"
        );
    }

    fn drain_finished(&self, drained: bool) {
        if drained {
            tracing::info!(
                target: HEALTH_TARGET,
                event = "drain_finished",
                "all in-flight work finished"
            );
        } else {
            tracing::warn!(
                target: HEALTH_TARGET,
                event = "drain_finished",
                "drain budget expired with work still running"
            );
        }
    }
}
