//! Action dispatch.
//!
//! The dispatcher looks the requested action up in the [`Registry`], checks
//! out an instance set, binds the request body into every node and then walks
//! the graph:
//!
//! ```text
//! Start -> Running(root) -> Running(next) ... -> Done
//!                        \-> Failed (processor error or panic)
//! ```
//!
//! A return code with no outgoing edge ends the walk in `Done`. Panics are
//! caught at the dispatch boundary and reported as
//! [`DispatchError::Panicked`]; the instance set goes back to the pool either
//! way.
//!
//! [`Registry`]: crate::registry::Registry

mod dispatcher;
mod errors;
mod panic;

pub use dispatcher::{Dispatched, Dispatcher};
pub use errors::{BAD_REQUEST_CODE, DispatchError, DispatchState, NOT_FOUND_CODE, PANIC_CODE};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
