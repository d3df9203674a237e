use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info};

use super::POOL_TARGET;
use super::balancer::SmoothWeighted;
use super::dialer::{Connection, Dialer};
use super::errors::PoolError;

struct IdleConnection {
    id: u64,
    stream: Box<dyn Connection>,
}

struct Endpoint {
    address: String,
    weight: u32,
    idle_tx: Sender<IdleConnection>,
    idle_rx: Receiver<IdleConnection>,
    retired: AtomicBool,
}

impl Endpoint {
    fn new(address: String, weight: u32, idle_capacity: usize) -> Self {
        let (idle_tx, idle_rx) = flume::bounded(idle_capacity);
        Self {
            address,
            weight,
            idle_tx,
            idle_rx,
            retired: AtomicBool::new(false),
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        let closed = self.idle_rx.drain().count();
        if closed > 0 {
            debug!(
                target: POOL_TARGET,
                address = %self.address,
                closed,
                "closed idle connections of removed endpoint"
            );
        }
    }
}

struct Group {
    endpoints: Vec<Arc<Endpoint>>,
    balancer: Mutex<SmoothWeighted>,
}

impl Group {
    fn pick(&self) -> Option<Arc<Endpoint>> {
        let index = self
            .balancer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_index()?;
        self.endpoints.get(index).cloned()
    }
}

/// Connection on loan from a [`ConnectionPool`].
///
/// Hand it back with [`ConnectionPool::release`]; a connection that is
/// dropped instead is simply closed.
pub struct PooledConnection {
    id: u64,
    endpoint: Arc<Endpoint>,
    stream: Box<dyn Connection>,
    dead: bool,
}

impl PooledConnection {
    /// Pool-unique connection id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint the connection was dialled to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    /// Underlying byte stream.
    pub fn stream_mut(&mut self) -> &mut dyn Connection {
        self.stream.as_mut()
    }

    /// Flags the connection so release closes it.
    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Whether the connection was flagged dead.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", &self.endpoint.address)
            .field("dead", &self.dead)
            .finish_non_exhaustive()
    }
}

/// Reusable outbound connections grouped by upstream name.
pub struct ConnectionPool {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    dialer: Arc<dyn Dialer>,
    idle_capacity: usize,
    dial_timeout: Duration,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Creates an empty pool keeping at most `idle_capacity` idle
    /// connections per endpoint.
    pub fn new(dialer: Arc<dyn Dialer>, idle_capacity: usize, dial_timeout: Duration) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            dialer,
            idle_capacity,
            dial_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Installs or replaces the endpoints of `group`.
    ///
    /// Endpoints whose address and weight are unchanged keep their idle
    /// connections; the idle connections of removed endpoints are closed.
    pub fn set_group(&self, group: &str, endpoints: &[(String, u32)]) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let previous = groups.remove(group);
        let mut reusable: HashMap<(String, u32), Arc<Endpoint>> = previous
            .iter()
            .flat_map(|group| group.endpoints.iter())
            .map(|endpoint| ((endpoint.address.clone(), endpoint.weight), Arc::clone(endpoint)))
            .collect();

        let endpoints: Vec<Arc<Endpoint>> = endpoints
            .iter()
            .map(|(address, weight)| {
                reusable
                    .remove(&(address.clone(), *weight))
                    .unwrap_or_else(|| {
                        Arc::new(Endpoint::new(address.clone(), *weight, self.idle_capacity))
                    })
            })
            .collect();
        for removed in reusable.values() {
            removed.retire();
        }

        let weights: Vec<u32> = endpoints.iter().map(|endpoint| endpoint.weight).collect();
        info!(
            target: POOL_TARGET,
            group,
            endpoints = endpoints.len(),
            "upstream group configured"
        );
        groups.insert(
            group.to_owned(),
            Arc::new(Group {
                endpoints,
                balancer: Mutex::new(SmoothWeighted::new(&weights)),
            }),
        );
    }

    /// Removes `group`, closing its idle connections.
    pub fn remove_group(&self, group: &str) {
        let removed = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group);
        for endpoint in removed.iter().flat_map(|group| group.endpoints.iter()) {
            endpoint.retire();
        }
    }

    /// Configured group names.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = groups.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Borrows a connection to the next endpoint of `group`.
    ///
    /// An idle connection is reused when the chosen endpoint has one;
    /// otherwise a new connection is dialled. Failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns a [`PoolError`] for an unknown or empty group, or when the
    /// dial fails or times out.
    pub async fn borrow(&self, group: &str) -> Result<PooledConnection, PoolError> {
        let entry = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .cloned()
            .ok_or_else(|| PoolError::UnknownGroup {
                group: group.to_owned(),
            })?;
        let endpoint = entry.pick().ok_or_else(|| PoolError::NoEndpoints {
            group: group.to_owned(),
        })?;

        if let Ok(idle) = endpoint.idle_rx.try_recv() {
            return Ok(PooledConnection {
                id: idle.id,
                endpoint,
                stream: idle.stream,
                dead: false,
            });
        }

        let address = endpoint.address.clone();
        let stream = match tokio::time::timeout(self.dial_timeout, self.dialer.dial(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(PoolError::Dial { address, source }),
            Err(_) => {
                return Err(PoolError::DialTimeout {
                    address,
                    timeout: self.dial_timeout,
                });
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(target: POOL_TARGET, group, address = %address, id, "dialled upstream");
        Ok(PooledConnection {
            id,
            endpoint,
            stream,
            dead: false,
        })
    }

    /// Returns a connection to its endpoint's idle channel.
    ///
    /// Dead connections, connections of removed endpoints and connections
    /// that do not fit in a full idle channel are closed instead.
    pub fn release(&self, connection: PooledConnection) {
        let PooledConnection {
            id,
            endpoint,
            stream,
            dead,
        } = connection;
        if dead {
            debug!(target: POOL_TARGET, address = %endpoint.address, id, "closed dead connection");
            return;
        }
        if endpoint.retired.load(Ordering::SeqCst) {
            return;
        }
        match endpoint.idle_tx.try_send(IdleConnection { id, stream }) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                debug!(
                    target: POOL_TARGET,
                    address = %endpoint.address,
                    id,
                    "idle channel full; closed connection"
                );
            }
        }
    }

    /// Flags `connection` dead and closes it.
    pub fn mark_dead(&self, mut connection: PooledConnection) {
        connection.mark_dead();
        self.release(connection);
    }

    /// Idle connections currently held for `group`.
    #[must_use]
    pub fn idle_count(&self, group: &str) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .map_or(0, |group| {
                group
                    .endpoints
                    .iter()
                    .map(|endpoint| endpoint.idle_rx.len())
                    .sum()
            })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionPool")
            .field("groups", &self.group_names())
            .field("idle_capacity", &self.idle_capacity)
            .field("dial_timeout", &self.dial_timeout)
            .finish_non_exhaustive()
    }
}
