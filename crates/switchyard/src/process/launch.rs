//! Supervises daemon launch sequencing and the serve/restart/drain cycle.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nix::sys::signal::{Signal, kill};
use nix::unistd::getppid;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use switchyard_config::{Config, RuntimePaths};

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::Dispatcher;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::hooks::LoggingHook;
use crate::pool::{Client, pool_from_config};
use crate::registry::{Registry, RegistryError};
use crate::transport::{FrameService, TransportInstance, TransportSettings, start_instance};

use super::errors::{HandoffError, LaunchError};
use super::guard::{HealthState, ProcessGuard};
use super::handoff::{ExecRestarter, InheritedListeners, Restarter};
use super::signals::{LifecycleSignal, SystemSignals};
use super::PROCESS_TARGET;

const SIGNAL_QUEUE: usize = 8;

/// Phase of a process generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting and serving.
    Running,
    /// No longer accepting; waiting for in-flight work.
    Draining,
    /// Drain finished or timed out.
    Exited,
}

/// Owns the running listeners of one process generation.
pub struct Lifecycle {
    instances: Vec<TransportInstance>,
    drain_timeout: Duration,
    reporter: Arc<dyn HealthReporter>,
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    /// Wraps started listeners.
    #[must_use]
    pub fn new(
        instances: Vec<TransportInstance>,
        drain_timeout: Duration,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            instances,
            drain_timeout,
            reporter,
            state,
        }
    }

    /// Receives every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Managed listeners.
    #[must_use]
    pub fn instances(&self) -> &[TransportInstance] {
        &self.instances
    }

    /// Sessions and requests still running across all listeners.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.instances.iter().map(TransportInstance::in_flight).sum()
    }

    /// Handles restart requests until a shutdown request arrives or the
    /// signal channel closes.
    pub async fn serve_until_shutdown(
        &self,
        signals: &mut mpsc::Receiver<LifecycleSignal>,
        restarter: &dyn Restarter,
    ) {
        loop {
            match signals.recv().await {
                Some(LifecycleSignal::Restart) => {
                    restarter.reap();
                    if let Ok(pid) = self.restart(restarter) {
                        info!(
                            target: PROCESS_TARGET,
                            successor = pid,
                            "serving until the successor takes over"
                        );
                    }
                }
                Some(LifecycleSignal::Shutdown) => {
                    info!(target: PROCESS_TARGET, "shutdown requested");
                    break;
                }
                None => {
                    info!(target: PROCESS_TARGET, "signal channel closed; shutting down");
                    break;
                }
            }
        }
    }

    /// Spawns a successor that inherits every listener.
    ///
    /// # Errors
    ///
    /// Returns the [`HandoffError`] that aborted the restart, after reporting
    /// it; the listeners are untouched.
    pub fn restart(&self, restarter: &dyn Restarter) -> Result<u32, HandoffError> {
        let listeners: Vec<_> = self
            .instances
            .iter()
            .map(|instance| (instance.name(), instance.handoff_fd()))
            .collect();
        match restarter.spawn_successor(&listeners) {
            Ok(pid) => {
                self.reporter.restart_spawned(pid);
                Ok(pid)
            }
            Err(error) => {
                self.reporter.restart_failed(&error);
                Err(error)
            }
        }
    }

    /// Stops accepting and waits up to the drain budget for in-flight work.
    /// Returns `false` when the budget expired first.
    pub async fn drain(&mut self) -> bool {
        self.state.send_replace(LifecycleState::Draining);
        self.reporter.drain_started(self.in_flight());
        for instance in &self.instances {
            instance.shutdown();
        }
        let timeout = self.drain_timeout;
        let drained = join_all(
            self.instances
                .iter_mut()
                .map(|instance| instance.wait_drained(timeout)),
        )
        .await
        .into_iter()
        .all(|drained| drained);
        self.state.send_replace(LifecycleState::Exited);
        self.reporter.drain_finished(drained);
        drained
    }

    /// Serves until shutdown, then drains.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<LifecycleSignal>,
        restarter: &dyn Restarter,
    ) -> bool {
        self.serve_until_shutdown(&mut signals, restarter).await;
        drop(signals);
        let running = restarter.reap();
        debug!(target: PROCESS_TARGET, successors = running, "draining");
        self.drain().await
    }
}

/// Runs the daemon with the production collaborators.
///
/// `register` adds the application's actions once configuration is known.
///
/// # Errors
///
/// Returns a [`LaunchError`] when bootstrap, listener startup or runtime
/// file maintenance fails.
pub fn run_daemon<F>(register: F) -> Result<(), LaunchError>
where
    F: FnOnce(&Config, &mut Registry) -> Result<(), RegistryError>,
{
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_daemon_with(&SystemConfigLoader, reporter, register)
}

/// Runs the daemon with injected collaborators.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_daemon_with<F>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    register: F,
) -> Result<(), LaunchError>
where
    F: FnOnce(&Config, &mut Registry) -> Result<(), RegistryError>,
{
    let bootstrapped = bootstrap_with(loader, reporter.as_ref())?;
    let generation = bootstrapped.telemetry().generation();
    let config = bootstrapped.into_config();
    // Read before any runtime thread exists; this edits the environment.
    let inherited = InheritedListeners::from_env(config.handoff_env_var())?;
    let mut registry = Registry::new();
    register(&config, &mut registry)?;
    info!(
        target: PROCESS_TARGET,
        actions = registry.len(),
        inherited = inherited.is_inherited(),
        successor = generation.is_successor(),
        "starting daemon runtime"
    );

    let guard = ProcessGuard::new(RuntimePaths::from_config(&config)?, std::process::id());
    guard.write_pid()?;
    guard.write_health(HealthState::Starting)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("switchyard-worker")
        .build()
        .map_err(|source| LaunchError::Runtime { source })?;
    runtime.block_on(serve(config, registry, inherited, &guard, reporter))
}

async fn serve(
    config: Config,
    registry: Registry,
    mut inherited: InheritedListeners,
    guard: &ProcessGuard,
    reporter: Arc<dyn HealthReporter>,
) -> Result<(), LaunchError> {
    let client = Client::new(pool_from_config(&config), config.max_frame_bytes());
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry)).with_client(client));
    let service = Arc::new(FrameService::new(dispatcher).with_hook(Arc::new(LoggingHook)));
    let settings = TransportSettings::from_config(&config)?;

    let predecessor = inherited.is_inherited();
    let mut instances = Vec::new();
    for directive in config.listeners() {
        let fd = inherited.take(directive.name());
        match start_instance(&directive, fd, Arc::clone(&service), &settings) {
            Ok(instance) => {
                reporter.listener_started(&instance);
                instances.push(instance);
            }
            Err(error) => {
                reporter.listener_failed(&directive, &error);
                return Err(error.into());
            }
        }
    }
    inherited.close_unclaimed();

    let (sender, mut receiver) = mpsc::channel(SIGNAL_QUEUE);
    let signals = SystemSignals::install(sender)?;
    guard.write_health(HealthState::Ready)?;
    if predecessor {
        retire_predecessor();
    }

    let mut lifecycle = Lifecycle::new(instances, config.drain_timeout(), reporter);
    let restarter = ExecRestarter::new(config.handoff_env_var());
    lifecycle
        .serve_until_shutdown(&mut receiver, &restarter)
        .await;
    drop(signals);
    drop(receiver);

    guard.write_health(HealthState::Draining)?;
    lifecycle.drain().await;
    guard.write_health(HealthState::Stopped)?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

/// Asks the generation that spawned us to drain now that our listeners are
/// live.
fn retire_predecessor() {
    let parent = getppid();
    if parent.as_raw() <= 1 {
        warn!(target: PROCESS_TARGET, "predecessor already exited");
        return;
    }
    match kill(parent, Signal::SIGTERM) {
        Ok(()) => info!(
            target: PROCESS_TARGET,
            predecessor = parent.as_raw(),
            "asked predecessor to drain"
        ),
        Err(error) => warn!(
            target: PROCESS_TARGET,
            predecessor = parent.as_raw(),
            error = %error,
            "failed to signal predecessor"
        ),
    }
}
