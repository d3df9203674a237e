use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::graph::ProcessorFactory;
use super::processor::Processor;

type InstanceSet = Vec<Box<dyn Processor>>;

/// Idle processor sets of one action, one processor per node.
pub(crate) struct InstancePool {
    factories: Arc<[ProcessorFactory]>,
    idle: Mutex<Vec<InstanceSet>>,
    capacity: usize,
    created: AtomicUsize,
}

impl InstancePool {
    pub(crate) fn new(factories: Arc<[ProcessorFactory]>, capacity: usize) -> Self {
        Self {
            factories,
            idle: Mutex::new(Vec::new()),
            capacity,
            created: AtomicUsize::new(0),
        }
    }

    /// Takes an idle set or builds a fresh one.
    pub(crate) fn checkout(&self) -> Checkout<'_> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let set = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            self.factories.iter().map(|factory| factory()).collect()
        });
        Checkout {
            pool: self,
            set: Some(set),
        }
    }

    fn give_back(&self, mut set: InstanceSet) {
        for processor in &mut set {
            processor.reset();
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(set);
        }
    }

    #[cfg(test)]
    pub(crate) fn idle_sets(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub(crate) fn created_sets(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// Exclusive loan of one instance set; resets and returns it on drop.
pub(crate) struct Checkout<'a> {
    pool: &'a InstancePool,
    set: Option<InstanceSet>,
}

impl Checkout<'_> {
    pub(crate) fn processors_mut(&mut self) -> &mut [Box<dyn Processor>] {
        self.set.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.give_back(set);
        }
    }
}
