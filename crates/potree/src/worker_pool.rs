//! A bounded pool of reusable workers, one lane per task kind.
//!
//! Workers are created lazily by a factory up to a per-kind maximum. When a
//! lane is saturated, callers are queued and a released worker is handed to
//! the oldest waiting caller before it can go idle.

use crate::error::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Factory<K, W> = dyn Fn(K) -> W + Send + Sync;

struct Lane<W> {
    idle: Vec<W>,
    created: usize,
    active: usize,
    waiting: VecDeque<async_channel::Sender<W>>,
}

impl<W> Default for Lane<W> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            created: 0,
            active: 0,
            waiting: VecDeque::new(),
        }
    }
}

struct Shared<K, W> {
    factory: Box<Factory<K, W>>,
    max_workers: usize,
    lanes: Mutex<HashMap<K, Lane<W>>>,
}

/// Counters of one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers created so far.
    pub created: usize,
    /// Workers currently handed out.
    pub active: usize,
    /// Workers ready for reuse.
    pub idle: usize,
    /// Callers waiting for a worker.
    pub waiting: usize,
}

/// Result of [`WorkerPool::acquire`].
pub enum Acquire<K: Copy + Eq + Hash, W> {
    /// A worker was available.
    Ready(W),
    /// The lane is saturated; the worker arrives through the handle.
    Queued(PendingWorker<K, W>),
}

/// A queued request for a worker.
///
/// Dropping the handle gives up the place in the queue. A worker that was
/// already handed to it is returned to the pool.
pub struct PendingWorker<K: Copy + Eq + Hash, W> {
    rx: Option<async_channel::Receiver<W>>,
    kind: K,
    pool: WorkerPool<K, W>,
}

impl<K: Copy + Eq + Hash, W> PendingWorker<K, W> {
    /// Wait until a worker is handed over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the pool dropped the request.
    pub async fn wait(mut self) -> Result<W> {
        let Some(rx) = &self.rx else {
            return Err(Error::Disconnected {
                context: "worker hand-off",
            });
        };
        let worker = rx.recv().await.map_err(|_| Error::Disconnected {
            context: "worker hand-off",
        })?;
        self.rx = None;
        Ok(worker)
    }
}

impl<K: Copy + Eq + Hash, W> Drop for PendingWorker<K, W> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            rx.close();
            if let Ok(worker) = rx.try_recv() {
                self.pool.release(self.kind, worker);
            }
        }
    }
}

/// A pool of workers keyed by task kind.
///
/// Clones share the same workers.
pub struct WorkerPool<K, W> {
    shared: Arc<Shared<K, W>>,
}

impl<K, W> Clone for WorkerPool<K, W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: Copy + Eq + Hash, W> WorkerPool<K, W> {
    /// Create a pool that runs at most `max_workers` workers per kind.
    ///
    /// A `max_workers` of zero is treated as one.
    #[must_use]
    pub fn new(max_workers: usize, factory: impl Fn(K) -> W + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory: Box::new(factory),
                max_workers: max_workers.max(1),
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn lanes(&self) -> MutexGuard<'_, HashMap<K, Lane<W>>> {
        self.shared
            .lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of workers per kind.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Take a worker of `kind`, or queue for one if the lane is saturated.
    pub fn acquire(&self, kind: K) -> Acquire<K, W> {
        let mut lanes = self.lanes();
        let lane = lanes.entry(kind).or_default();

        if let Some(worker) = lane.idle.pop() {
            lane.active += 1;
            return Acquire::Ready(worker);
        }
        if lane.created < self.shared.max_workers {
            lane.created += 1;
            lane.active += 1;
            return Acquire::Ready((self.shared.factory)(kind));
        }

        let (tx, rx) = async_channel::bounded(1);
        lane.waiting.push_back(tx);
        Acquire::Queued(PendingWorker {
            rx: Some(rx),
            kind,
            pool: self.clone(),
        })
    }

    /// Take a worker of `kind`, waiting for one if the lane is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the request was dropped by the pool.
    pub async fn acquire_async(&self, kind: K) -> Result<W> {
        match self.acquire(kind) {
            Acquire::Ready(worker) => Ok(worker),
            Acquire::Queued(pending) => pending.wait().await,
        }
    }

    /// Return a worker. It goes to the oldest live waiter, if any, and is
    /// kept idle otherwise.
    pub fn release(&self, kind: K, mut worker: W) {
        let mut lanes = self.lanes();
        let lane = lanes.entry(kind).or_default();

        while let Some(tx) = lane.waiting.pop_front() {
            match tx.try_send(worker) {
                // Ownership moves to the waiter; the active count is unchanged.
                Ok(()) => return,
                Err(e) => worker = e.into_inner(),
            }
        }

        lane.active = lane.active.saturating_sub(1);
        lane.idle.push(worker);
    }

    /// Counters for the lane of `kind`.
    #[must_use]
    pub fn stats(&self, kind: K) -> PoolStats {
        self.lanes().get(&kind).map_or_else(PoolStats::default, |lane| PoolStats {
            created: lane.created,
            active: lane.active,
            idle: lane.idle.len(),
            waiting: lane.waiting.iter().filter(|tx| !tx.is_closed()).count(),
        })
    }
}
