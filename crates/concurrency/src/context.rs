//! Single-threaded FIFO execution contexts.
//!
//! Every primitive instance is pinned to one [`ExecutionContext`] for its
//! whole life. All of its session bookkeeping (sequence assignment, keep-alive
//! results, state transitions) and all of its event callbacks run as jobs on
//! that context, one at a time, in submission order. Different contexts run in
//! parallel.
//!
//! Contexts are handed out by an [`ExecutionContextFactory`] that owns a
//! bounded pool of worker threads; contexts are assigned to workers
//! round-robin, so several primitives may share one worker thread.
//!
//! Jobs must not block: a job that waits on another job of the same worker
//! never wakes up.

use parking_lot::{Condvar, Mutex as ParkingMutex};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_core::{Error, Result};
use tokio::sync::oneshot;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Contexts handed out since creation.
    pub contexts_created: usize,
    /// Jobs waiting across all workers.
    pub queue_depth: usize,
    /// Jobs completed across all workers.
    pub jobs_completed: u64,
}

struct WorkerInner {
    index: usize,
    queue: ParkingMutex<VecDeque<Job>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active: AtomicBool,
    jobs_completed: AtomicU64,
}

impl WorkerInner {
    fn new(index: usize) -> Self {
        Self {
            index,
            queue: ParkingMutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicBool::new(false),
            jobs_completed: AtomicU64::new(0),
        }
    }

    fn submit(&self, job: Job) -> Result<()> {
        {
            let mut queue = self.queue.lock();
            // Checked under the lock so a job is never queued after the worker exited
            if self.shutdown.load(Ordering::Acquire) {
                return Err(Error::closed(format!("execution context {}", self.index)));
            }
            queue.push_back(job);
        }
        self.work_ready.notify_one();
        Ok(())
    }
}

/// A serial executor bound to one worker thread.
///
/// Cheap to clone; clones submit to the same FIFO queue.
#[derive(Clone)]
pub struct ExecutionContext {
    id: usize,
    worker: Arc<WorkerInner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("worker", &self.worker.index)
            .finish()
    }
}

impl ExecutionContext {
    /// Context identifier (unique per factory)
    pub fn id(&self) -> usize {
        self.id
    }

    /// Index of the worker thread this context runs on
    pub fn worker_index(&self) -> usize {
        self.worker.index
    }

    /// Queue a job. Jobs run in submission order, never concurrently with
    /// another job of the same context.
    ///
    /// Returns `Closed` once the owning factory has shut down.
    pub fn execute(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
        self.worker.submit(Box::new(work))
    }

    /// Run `f` on the context and resolve with its result.
    ///
    /// The returned future fails with `Closed` if the context has shut down
    /// before the job ran.
    pub fn call<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let submitted = self.execute(move || {
            let _ = tx.send(f());
        });
        let index = self.worker.index;
        async move {
            submitted?;
            rx.await
                .map_err(|_| Error::closed(format!("execution context {}", index)))
        }
    }
}

/// Hands out execution contexts drawn from a bounded pool of worker threads.
pub struct ExecutionContextFactory {
    workers: Vec<Arc<WorkerInner>>,
    handles: ParkingMutex<Vec<JoinHandle<()>>>,
    next_context: AtomicUsize,
}

impl ExecutionContextFactory {
    /// Create a pool with `num_threads` workers.
    ///
    /// Workers are named `{prefix}-0`, `{prefix}-1`, etc.
    pub fn new(num_threads: usize, prefix: &str) -> Self {
        let num_threads = num_threads.max(1);
        let mut workers = Vec::with_capacity(num_threads);
        let mut handles = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let inner = Arc::new(WorkerInner::new(i));
            let inner_clone = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", prefix, i))
                .spawn(move || worker_loop(&inner_clone))
                .expect("failed to spawn execution context thread");
            workers.push(inner);
            handles.push(handle);
        }
        debug!(target: "tessera::context", threads = num_threads, "Execution context pool started");

        Self {
            workers,
            handles: ParkingMutex::new(handles),
            next_context: AtomicUsize::new(0),
        }
    }

    /// Create a new context, bound round-robin to one of the workers.
    pub fn create_context(&self) -> Result<ExecutionContext> {
        let id = self.next_context.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::clone(&self.workers[id % self.workers.len()]);
        if worker.shutdown.load(Ordering::Acquire) {
            return Err(Error::closed("execution context pool"));
        }
        Ok(ExecutionContext { id, worker })
    }

    /// Block until every queued and running job has completed.
    pub fn drain(&self) {
        for worker in &self.workers {
            let mut queue = worker.queue.lock();
            while !queue.is_empty() || worker.active.load(Ordering::Acquire) {
                worker.drain_cond.wait(&mut queue);
            }
        }
    }

    /// Stop accepting jobs, let workers finish what is queued, and join them.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            // Lock before notifying to prevent a lost wakeup: a worker between
            // its shutdown check and wait() holds this lock.
            let _queue = worker.queue.lock();
            worker.shutdown.store(true, Ordering::Release);
            worker.work_ready.notify_all();
        }

        let mut handles = self.handles.lock();
        let joined = handles.len();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        if joined > 0 {
            debug!(target: "tessera::context", threads = joined, "Execution context pool stopped");
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_shutdown(&self) -> bool {
        self.workers
            .first()
            .map(|w| w.shutdown.load(Ordering::Acquire))
            .unwrap_or(true)
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            worker_count: self.workers.len(),
            contexts_created: self.next_context.load(Ordering::Relaxed),
            queue_depth: self.workers.iter().map(|w| w.queue.lock().len()).sum(),
            jobs_completed: self
                .workers
                .iter()
                .map(|w| w.jobs_completed.load(Ordering::Relaxed))
                .sum(),
        }
    }
}

impl Drop for ExecutionContextFactory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clears the active flag and wakes drain waiters even if a job panics.
struct ActiveJobGuard<'a> {
    inner: &'a WorkerInner,
}

impl<'a> Drop for ActiveJobGuard<'a> {
    fn drop(&mut self) {
        self.inner.jobs_completed.fetch_add(1, Ordering::Relaxed);
        let queue = self.inner.queue.lock();
        self.inner.active.store(false, Ordering::Release);
        if queue.is_empty() {
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &WorkerInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    inner.active.store(true, Ordering::Release);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    inner.drain_cond.notify_all();
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveJobGuard { inner };

        // A panicking callback must not take the worker (and every context
        // bound to it) down with it.
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                target: "tessera::context",
                worker = inner.index,
                "execution context job panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}
