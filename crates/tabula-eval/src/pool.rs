//! Bounded worker pools.
//!
//! A rayon pool does the work; in front of it sits an admission queue so
//! that queued jobs can be withdrawn before they start and so that a full
//! queue makes submitters wait instead of dropping work.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

use crate::config::PoolConfig;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(pub u64);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("worker pool '{0}' is shut down")]
pub struct PoolClosed(pub String);

#[derive(Default)]
struct Queue {
    jobs: VecDeque<(WorkId, Job)>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    space: Condvar,
    capacity: usize,
}

impl Shared {
    /// Run the oldest admitted job, if any is left.
    fn run_next(&self, pool: &str) {
        let next = {
            let mut queue = self.queue.lock();
            let next = queue.jobs.pop_front();
            self.space.notify_one();
            next
        };
        if let Some((id, job)) = next {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::warn!(pool, work = id.0, "job panicked");
            }
        }
    }
}

pub struct WorkerPool {
    name: Arc<str>,
    pool: ThreadPool,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig) -> Result<Self, ThreadPoolBuildError> {
        let prefix = config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads.max(1))
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()?;
        Ok(Self {
            name: Arc::from(config.thread_name.as_str()),
            pool,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue::default()),
                space: Condvar::new(),
                capacity: config.queue_capacity.max(1),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit a job, waiting while the queue is full.
    pub fn submit(&self, job: Job) -> Result<WorkId, PoolClosed> {
        let id = WorkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut queue = self.shared.queue.lock();
            // pool threads never wait on their own queue
            let on_pool_thread = self.pool.current_thread_index().is_some();
            while !queue.closed && !on_pool_thread && queue.jobs.len() >= self.shared.capacity {
                tracing::debug!(pool = %self.name, "queue full, waiting for space");
                self.shared.space.wait(&mut queue);
            }
            if queue.closed {
                return Err(PoolClosed(self.name.to_string()));
            }
            queue.jobs.push_back((id, job));
        }
        let shared = Arc::clone(&self.shared);
        let name = Arc::clone(&self.name);
        self.pool.spawn(move || shared.run_next(&name));
        Ok(id)
    }

    /// Drop a job that has not started; started jobs run to completion.
    pub fn withdraw(&self, id: WorkId) -> bool {
        let mut queue = self.shared.queue.lock();
        let before = queue.jobs.len();
        queue.jobs.retain(|(queued, _)| *queued != id);
        let removed = queue.jobs.len() != before;
        if removed {
            self.shared.space.notify_one();
        }
        removed
    }

    pub fn queued(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Refuse further work and drop everything still queued.
    pub fn close(&self) -> usize {
        let mut queue = self.shared.queue.lock();
        queue.closed = true;
        let dropped = queue.jobs.len();
        queue.jobs.clear();
        self.shared.space.notify_all();
        dropped
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pool(threads: usize, capacity: usize) -> WorkerPool {
        let config = PoolConfig::new("test-pool")
            .with_threads(threads)
            .with_queue_capacity(capacity);
        WorkerPool::new(&config).unwrap()
    }

    #[test]
    fn jobs_run() {
        let pool = pool(2, 8);
        let (tx, rx) = mpsc::channel();
        for i in 0..5 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut got: Vec<i32> = (0..5).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        got.sort();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn queued_jobs_can_be_withdrawn() {
        let pool = pool(1, 8);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let id = pool
            .submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(pool.withdraw(id));
        assert!(!pool.withdraw(id));
        release_tx.send(()).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        pool.submit(Box::new(move || done_tx.send(()).unwrap())).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_pool_rejects_work() {
        let pool = pool(1, 1);
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(
            pool.submit(Box::new(|| {})),
            Err(PoolClosed("test-pool".to_string()))
        );
    }

    #[test]
    fn panicking_jobs_do_not_poison_the_pool() {
        let pool = pool(1, 4);
        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}
