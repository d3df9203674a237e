use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use switchyard_wire::Request;

use super::DISPATCH_TARGET;
use super::errors::{DispatchError, DispatchState};
use super::panic::{install_backtrace_hook, panic_message, take_backtrace};
use crate::action::{Action, Context, Output, Processor};
use crate::binding::{Binder, JsonBinder};
use crate::pool::Client;
use crate::registry::Registry;

/// Outcome of an invocation that reached `Done`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Fields and result code produced by the nodes.
    pub output: Output,
    /// Final machine state.
    pub state: DispatchState,
    /// Names of the executed nodes in order.
    pub steps: Vec<String>,
}

/// Routes requests to registered actions and drives their graphs.
pub struct Dispatcher {
    registry: Arc<Registry>,
    client: Option<Client>,
}

impl Dispatcher {
    /// Creates a dispatcher over a finished registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        install_backtrace_hook();
        Self {
            registry,
            client: None,
        }
    }

    /// Makes `client` available to processors through [`Context::client`].
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Registry consulted for action lookup.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatches a request whose body is JSON.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::dispatch_with_binder`].
    pub async fn dispatch(&self, request: &Request) -> Result<Dispatched, DispatchError> {
        self.dispatch_with_binder(request, &JsonBinder).await
    }

    /// Dispatches a request, binding its body with `binder`.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the action is unknown, the body does
    /// not bind, a processor fails or a processor panics. The instance set is
    /// reset and pooled again on every path.
    pub async fn dispatch_with_binder(
        &self,
        request: &Request,
        binder: &dyn Binder,
    ) -> Result<Dispatched, DispatchError> {
        let action = self
            .registry
            .get(&request.action)
            .ok_or_else(|| DispatchError::ActionNotFound {
                action: request.action.clone(),
            })?;

        let mut checkout = action.pool().checkout();
        let mut output = Output::default();
        let mut steps = Vec::new();
        let mut binding = None;
        let client = self.client.as_ref();
        let run = async {
            bind_nodes(action, binder, request, checkout.processors_mut(), &mut binding)?;
            run_graph(
                action,
                checkout.processors_mut(),
                request,
                &mut output,
                client,
                &mut steps,
            )
            .await
        };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(state)) => {
                debug!(
                    target: DISPATCH_TARGET,
                    action = %action.name(),
                    steps = ?steps,
                    result_code = output.result_code(),
                    "action completed"
                );
                Ok(Dispatched {
                    output,
                    state,
                    steps,
                })
            }
            Ok(Err(error)) => {
                warn!(
                    target: DISPATCH_TARGET,
                    action = %action.name(),
                    error = %error,
                    "action failed"
                );
                Err(error)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let node = binding
                    .or_else(|| steps.last().cloned())
                    .unwrap_or_default();
                let backtrace = take_backtrace()
                    .map(|trace| trace.to_string())
                    .unwrap_or_default();
                error!(
                    target: DISPATCH_TARGET,
                    action = %action.name(),
                    node = %node,
                    panic = %message,
                    backtrace = %backtrace,
                    "processor panicked"
                );
                Err(DispatchError::Panicked {
                    action: action.name().to_owned(),
                    node,
                    message,
                })
            }
        }
    }
}

/// Binds the request body into every node. `binding` names the node being
/// bound while its `bind` runs.
fn bind_nodes(
    action: &Action,
    binder: &dyn Binder,
    request: &Request,
    processors: &mut [Box<dyn Processor>],
    binding: &mut Option<String>,
) -> Result<(), DispatchError> {
    let input = binder
        .bind(&request.body)
        .map_err(|source| DispatchError::Bind {
            action: action.name().to_owned(),
            node: None,
            source,
        })?;
    for (processor, node) in processors.iter_mut().zip(action.node_names()) {
        *binding = Some(node.to_owned());
        processor
            .bind(&input)
            .map_err(|source| DispatchError::Bind {
                action: action.name().to_owned(),
                node: Some(node.to_owned()),
                source,
            })?;
    }
    *binding = None;
    Ok(())
}

async fn run_graph(
    action: &Action,
    processors: &mut [Box<dyn Processor>],
    request: &Request,
    output: &mut Output,
    client: Option<&Client>,
    steps: &mut Vec<String>,
) -> Result<DispatchState, DispatchError> {
    let mut state = DispatchState::Running(action.root());
    while let DispatchState::Running(index) = state {
        let (Some(node), Some(processor)) = (action.node(index), processors.get_mut(index)) else {
            return Ok(DispatchState::Done);
        };
        steps.push(node.name().to_owned());
        let mut ctx = Context::new(request, output, client);
        state = match processor.process(&mut ctx).await {
            Ok(code) => node.next(&code).map_or(DispatchState::Done, DispatchState::Running),
            Err(source) => {
                return Err(DispatchError::Process {
                    action: action.name().to_owned(),
                    node: node.name().to_owned(),
                    steps: steps.clone(),
                    source,
                });
            }
        };
    }
    Ok(state)
}
