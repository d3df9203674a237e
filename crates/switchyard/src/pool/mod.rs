//! Outbound connections to downstream services.
//!
//! Endpoints are grouped by upstream name and chosen by smooth weighted round
//! robin. Each endpoint keeps a bounded channel of idle connections; a
//! connection flagged dead is closed on release and never handed out again.

mod balancer;
mod client;
mod connections;
mod dialer;
mod errors;

use std::sync::Arc;

pub use balancer::SmoothWeighted;
pub use client::Client;
pub use connections::{ConnectionPool, PooledConnection};
pub use dialer::{Connection, Dialer, TcpDialer};
pub use errors::{ClientError, PoolError};

use switchyard_config::Config;

const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Builds a TCP pool holding every upstream group of `config`.
#[must_use]
pub fn pool_from_config(config: &Config) -> Arc<ConnectionPool> {
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(TcpDialer),
        config.pool_idle_capacity,
        config.dial_timeout(),
    ));
    for (group, endpoints) in config.upstream_groups() {
        pool.set_group(&group, &endpoints);
    }
    pool
}
