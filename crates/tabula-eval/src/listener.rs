//! Value-change notification.
//!
//! Changes are collected per wave and handed to every listener as one
//! batch on the listener pool, so a slow listener never holds a table lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rayon::ThreadPoolBuildError;
use tabula_common::{ElementRef, Value};

use crate::config::PoolConfig;
use crate::engine::AssemblyId;
use crate::pool::WorkerPool;

/// One cell whose value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub element: ElementRef,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// Wave the change belongs to.
    pub assembly: AssemblyId,
}

pub trait ValueListener: Send + Sync {
    fn values_changed(&self, changes: &[ValueChange]);
}

impl<F> ValueListener for F
where
    F: Fn(&[ValueChange]) + Send + Sync,
{
    fn values_changed(&self, changes: &[ValueChange]) {
        self(changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) struct Listeners {
    entries: RwLock<Vec<(ListenerId, Arc<dyn ValueListener>)>>,
    next: AtomicU64,
    pool: WorkerPool,
}

impl Listeners {
    pub(crate) fn new(config: &PoolConfig) -> Result<Self, ThreadPoolBuildError> {
        Ok(Self {
            entries: RwLock::new(Vec::new()),
            next: AtomicU64::new(1),
            pool: WorkerPool::new(config)?,
        })
    }

    pub(crate) fn add(&self, listener: Arc<dyn ValueListener>) -> ListenerId {
        let id = ListenerId(self.next.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(l, _)| *l != id);
        entries.len() != before
    }

    /// Queue one delivery per listener.
    pub(crate) fn dispatch(&self, changes: Vec<ValueChange>) {
        if changes.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn ValueListener>> =
            self.entries.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        if listeners.is_empty() {
            return;
        }
        let batch: Arc<[ValueChange]> = changes.into();
        for listener in listeners {
            let batch = Arc::clone(&batch);
            if let Err(e) = self.pool.submit(Box::new(move || listener.values_changed(&batch))) {
                tracing::warn!("dropping value-change notification: {e}");
                return;
            }
        }
    }

    pub(crate) fn close(&self) {
        self.pool.close();
    }
}
