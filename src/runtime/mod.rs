//! Two-pool continuation scheduling.
//!
//! Work runs either on a fixed pool of worker threads or on a cooperative
//! main queue that only executes inside [`AsyncRuntime::drain_main`]. The
//! runtime never runs code on the embedder's thread any other way.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

mod future;
mod pool;

pub use future::{Future, Promise};

use crate::error::Error;
use pool::{Job, WorkerPool};

pub(crate) struct Schedulers {
    worker_tx: Mutex<Option<Sender<Job>>>,
    main_tx: Sender<Job>,
    main_rx: Receiver<Job>,
}

impl Schedulers {
    /// Hands a job to the worker pool. After shutdown the job is dropped;
    /// any promise it owns then rejects with [`Error::Abandoned`].
    pub(crate) fn spawn_worker(&self, job: Job) {
        if let Some(sender) = self.worker_tx.lock().as_ref() {
            let _ = sender.send(job);
        }
    }

    pub(crate) fn spawn_main(&self, job: Job) {
        let _ = self.main_tx.send(job);
    }

    pub(crate) fn drain_main(&self) {
        while let Ok(job) = self.main_rx.try_recv() {
            job();
        }
    }
}

/// Owns the worker threads on behalf of the runtime handles.
///
/// Dropped when the last [`AsyncRuntime`] clone goes away: the injector is
/// closed so no further work can be scheduled, queued and in-flight worker
/// jobs finish, and the pool is joined. Undrained main-queue tasks are
/// discarded. Futures and promises deliberately do not hold this guard, so
/// outstanding chains never keep the pool alive or join it from one of its
/// own threads.
struct PoolGuard {
    schedulers: Arc<Schedulers>,
    pool: Mutex<WorkerPool>,
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        drop(self.schedulers.worker_tx.lock().take());
        let mut pool = self.pool.lock();
        if pool.owns_current_thread() {
            // The final clone died inside a worker job; the threads unwind
            // on their own now that the queue is closed.
            pool.detach();
        } else {
            pool.join();
        }
    }
}

/// The concurrency substrate: futures, a worker pool, and a cooperative
/// main-thread queue.
///
/// Cloning is cheap and every clone refers to the same pool and queues.
/// Cancellation is not provided: dropping a [`Future`] discards the result
/// but the work still runs to completion.
///
/// ```
/// use asset_cache::AsyncRuntime;
///
/// # fn main() -> Result<(), asset_cache::Error> {
/// let runtime = AsyncRuntime::new(2);
/// let answer = runtime
///     .spawn_worker(|| 6 * 7)
///     .then_main(|n| n + 900);
/// assert_eq!(answer.wait()?, 942);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncRuntime {
    schedulers: Arc<Schedulers>,
    _guard: Arc<PoolGuard>,
}

impl AsyncRuntime {
    /// Creates a runtime with `worker_threads` pool threads (minimum one).
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        let (worker_tx, worker_rx) = unbounded();
        let (main_tx, main_rx) = unbounded();
        let schedulers = Arc::new(Schedulers {
            worker_tx: Mutex::new(Some(worker_tx)),
            main_tx,
            main_rx,
        });
        let pool = WorkerPool::start(worker_threads, worker_rx);
        AsyncRuntime {
            schedulers: Arc::clone(&schedulers),
            _guard: Arc::new(PoolGuard { schedulers, pool: Mutex::new(pool) }),
        }
    }

    /// Creates a connected [`Promise`]/[`Future`] pair.
    ///
    /// This is the seam for transports: keep the promise, hand out the
    /// future, resolve from wherever the I/O completes.
    #[must_use]
    pub fn promise<T: Send + 'static>(&self) -> (Promise<T>, Future<T>) {
        future::pair(Arc::clone(&self.schedulers))
    }

    /// A future already resolved with `value`.
    #[must_use]
    pub fn resolved<T: Send + 'static>(&self, value: T) -> Future<T> {
        let (promise, future) = self.promise();
        promise.resolve(value);
        future
    }

    /// A future already rejected with `error`.
    #[must_use]
    pub fn rejected<T: Send + 'static>(&self, error: Error) -> Future<T> {
        let (promise, future) = self.promise();
        promise.reject(error);
        future
    }

    /// Runs `f` on the worker pool.
    pub fn spawn_worker<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = self.promise();
        self.schedulers.spawn_worker(Box::new(move || promise.resolve(f())));
        future
    }

    /// Runs `f` on the worker pool and flattens the future it returns.
    pub fn spawn_worker_future<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Future<T> + Send + 'static,
    {
        let (promise, future) = self.promise();
        self.schedulers
            .spawn_worker(Box::new(move || f().forward(promise)));
        future
    }

    /// Enqueues `f` on the main scheduler.
    pub fn spawn_main<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = self.promise();
        self.schedulers.spawn_main(Box::new(move || promise.resolve(f())));
        future
    }

    /// Enqueues `f` on the main scheduler and flattens the future it
    /// returns.
    pub fn spawn_main_future<T, F>(&self, f: F) -> Future<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Future<T> + Send + 'static,
    {
        let (promise, future) = self.promise();
        self.schedulers.spawn_main(Box::new(move || f().forward(promise)));
        future
    }

    /// Runs every queued main-scheduler task, in enqueue order, on the
    /// calling thread. Tasks enqueued while draining run in the same pass.
    pub fn drain_main(&self) {
        self.schedulers.drain_main();
    }
}

impl Default for AsyncRuntime {
    /// A runtime with one worker per available CPU.
    fn default() -> Self {
        AsyncRuntime::new(num_cpus::get())
    }
}

impl std::fmt::Debug for AsyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRuntime").finish_non_exhaustive()
    }
}
