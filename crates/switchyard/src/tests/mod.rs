//! Behavioural suites for the switchyard daemon.

mod bootstrap_behaviour;
mod lifecycle_behaviour;
mod support;
