//! Action graphs: processors, their return-code edges and instance pooling.
//!
//! An action is a small directed acyclic graph. Each node holds a factory for
//! a [`Processor`]; running a processor yields a [`ReturnCode`] which selects
//! the outgoing edge, and a code with no edge ends the invocation. Graphs are
//! validated when built so the dispatcher never has to guard against loops.

mod graph;
mod pool;
mod processor;

pub use graph::{Action, ActionBuilder, GraphError, ProcessorFactory};
pub use processor::{Context, INTERNAL_ERROR_CODE, Output, ProcessError, Processor, ReturnCode};
