//! Pending-result coordination.
//!
//! Every evaluation pass gets a fresh [`TransactionId`]. When an
//! asynchronous operator defers, the engine registers a
//! [`TransactionRecord`] naming the cell that is waiting; the work (if the
//! operator supplied any) runs on the pending pool and hands its result to
//! a [`ResultSink`]. A record is consumed exactly once, by the matching
//! `post_result`, and ids are never reused.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rayon::ThreadPoolBuildError;
use rustc_hash::FxHashMap;
use tabula_common::{ElementRef, ErrorCode, Value};
use thiserror::Error;

use crate::config::PoolConfig;
use crate::pool::{WorkId, WorkerPool};
use crate::token::{PendingJob, Token, TransactionId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("pending-result coordinator is shut down")]
    ShutDown,
}

/// Receives completed asynchronous work.
pub trait ResultSink: Send + Sync {
    fn deliver(self: Arc<Self>, transaction: TransactionId, result: Token);
}

/// A cell waiting for an asynchronous result.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub transaction: TransactionId,
    /// Derivation that produced the pending result.
    pub owner: ElementRef,
    /// Cell the result is for.
    pub cell: ElementRef,
    /// Generation of the owning derivation when the work was requested.
    pub generation: u64,
    pub memo_key: String,
    pub args: Vec<Value>,
    work: Option<WorkId>,
}

impl TransactionRecord {
    pub fn new(
        transaction: TransactionId,
        owner: ElementRef,
        cell: ElementRef,
        generation: u64,
        memo_key: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            transaction,
            owner,
            cell,
            generation,
            memo_key: memo_key.into(),
            args,
            work: None,
        }
    }
}

#[derive(Default)]
struct Records {
    by_transaction: FxHashMap<TransactionId, TransactionRecord>,
    by_cell: FxHashMap<ElementRef, TransactionId>,
}

impl Records {
    fn remove(&mut self, transaction: TransactionId) -> Option<TransactionRecord> {
        let record = self.by_transaction.remove(&transaction)?;
        if self.by_cell.get(&record.cell) == Some(&transaction) {
            self.by_cell.remove(&record.cell);
        }
        Some(record)
    }
}

pub struct PendingCoordinator {
    next: AtomicU64,
    records: Mutex<Records>,
    pool: WorkerPool,
    shut_down: AtomicBool,
}

impl PendingCoordinator {
    pub fn new(config: &PoolConfig) -> Result<Self, ThreadPoolBuildError> {
        Ok(Self {
            next: AtomicU64::new(1),
            records: Mutex::new(Records::default()),
            pool: WorkerPool::new(config)?,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn next_transaction(&self) -> TransactionId {
        TransactionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Start tracking a pending cell. A cell waits on one transaction at a
    /// time; the one it replaces is withdrawn and returned.
    pub fn register(&self, record: TransactionRecord) -> Option<TransactionId> {
        let mut records = self.records.lock();
        let superseded = records
            .by_cell
            .insert(record.cell, record.transaction)
            .filter(|old| *old != record.transaction);
        let superseded = superseded.and_then(|old| records.remove(old));
        tracing::debug!(
            transaction = %record.transaction,
            cell = %record.cell,
            key = %record.memo_key,
            "pending result registered"
        );
        records.by_transaction.insert(record.transaction, record);
        drop(records);

        let superseded = superseded?;
        if let Some(work) = superseded.work {
            self.pool.withdraw(work);
        }
        tracing::debug!(transaction = %superseded.transaction, "superseded by a newer evaluation");
        Some(superseded.transaction)
    }

    /// Run `job` on the pending pool and deliver its result to `sink`. A
    /// job that panics delivers an unspecified error in place of a result.
    pub fn submit(
        &self,
        transaction: TransactionId,
        job: PendingJob,
        sink: Weak<dyn ResultSink>,
    ) -> Result<(), CoordinatorError> {
        if self.shut_down.load(Ordering::Acquire) {
            tracing::warn!(%transaction, "work submitted after shutdown");
            return Err(CoordinatorError::ShutDown);
        }
        let work = self
            .pool
            .submit(Box::new(move || {
                let result = match catch_unwind(AssertUnwindSafe(job)) {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(%transaction, "pending job panicked");
                        Token::Error(ErrorCode::Unspecified)
                    }
                };
                if let Some(sink) = sink.upgrade() {
                    sink.deliver(transaction, result);
                }
            }))
            .map_err(|_| CoordinatorError::ShutDown)?;
        if let Some(record) = self.records.lock().by_transaction.get_mut(&transaction) {
            record.work = Some(work);
        }
        Ok(())
    }

    /// Consume the record of a delivered result.
    pub fn take(&self, transaction: TransactionId) -> Option<TransactionRecord> {
        self.records.lock().remove(transaction)
    }

    /// Retire a transaction, dropping its work if it has not started.
    pub fn withdraw(&self, transaction: TransactionId) -> bool {
        let Some(record) = self.records.lock().remove(transaction) else {
            return false;
        };
        if let Some(work) = record.work {
            self.pool.withdraw(work);
        }
        tracing::debug!(%transaction, "pending result withdrawn");
        true
    }

    /// Retire every transaction whose owner satisfies `doomed`.
    pub fn withdraw_where(&self, doomed: impl Fn(&TransactionRecord) -> bool) -> usize {
        let victims: Vec<TransactionId> = self
            .records
            .lock()
            .by_transaction
            .values()
            .filter(|r| doomed(r))
            .map(|r| r.transaction)
            .collect();
        victims.into_iter().filter(|tx| self.withdraw(*tx)).count()
    }

    pub fn pending_for(&self, cell: &ElementRef) -> Option<TransactionId> {
        self.records.lock().by_cell.get(cell).copied()
    }

    pub fn record(&self, transaction: TransactionId) -> Option<TransactionRecord> {
        self.records.lock().by_transaction.get(&transaction).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.records.lock().by_transaction.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.pool.close();
        let mut records = self.records.lock();
        let retired = records.by_transaction.len();
        *records = Records::default();
        tracing::debug!(dropped, retired, "pending coordinator shut down");
    }
}
