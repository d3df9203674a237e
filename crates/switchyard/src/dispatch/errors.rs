use thiserror::Error;

use crate::action::ProcessError;
use crate::binding::BindError;

/// Result code for an unregistered action.
pub const NOT_FOUND_CODE: i32 = 404;
/// Result code for a request body that failed to bind.
pub const BAD_REQUEST_CODE: i32 = 400;
/// Result code for a panicking processor.
pub const PANIC_CODE: i32 = 500;

/// Errors that end an invocation before it reaches `Done`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No action is registered under the requested name.
    #[error("action '{action}' is not registered")]
    ActionNotFound {
        /// Requested action name.
        action: String,
    },
    /// The request body could not be bound.
    #[error("failed to bind request for action '{action}': {source}")]
    Bind {
        /// Action being invoked.
        action: String,
        /// Node that rejected the input, when binding reached a node.
        node: Option<String>,
        /// Underlying binder error.
        #[source]
        source: BindError,
    },
    /// A processor returned an error.
    #[error("node '{node}' of action '{action}' failed: {source}")]
    Process {
        /// Action being invoked.
        action: String,
        /// Failing node.
        node: String,
        /// Nodes executed, the failing one last.
        steps: Vec<String>,
        /// Processor error.
        #[source]
        source: ProcessError,
    },
    /// A processor panicked.
    #[error("node '{node}' of action '{action}' panicked: {message}")]
    Panicked {
        /// Action being invoked.
        action: String,
        /// Node running when the panic happened.
        node: String,
        /// Panic payload rendered as text.
        message: String,
    },
}

impl DispatchError {
    /// Result code placed in the response envelope.
    #[must_use]
    pub const fn result_code(&self) -> i32 {
        match self {
            Self::ActionNotFound { .. } => NOT_FOUND_CODE,
            Self::Bind { .. } => BAD_REQUEST_CODE,
            Self::Process { source, .. } => source.code(),
            Self::Panicked { .. } => PANIC_CODE,
        }
    }

    /// State the machine was left in.
    #[must_use]
    pub const fn state(&self) -> DispatchState {
        match self {
            Self::ActionNotFound { .. } | Self::Bind { .. } => DispatchState::Start,
            Self::Process { .. } | Self::Panicked { .. } => DispatchState::Failed,
        }
    }
}

/// States of the dispatch machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No node has run.
    Start,
    /// The node at this index is running.
    Running(usize),
    /// A node returned a code without an outgoing edge.
    Done,
    /// A node returned an error or panicked.
    Failed,
}
