use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Schedulers;
use crate::error::{Error, Result};

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct Inner<T> {
    value: Option<Result<T>>,
    continuation: Option<Continuation<T>>,
    awaited: bool,
    fulfilled: bool,
}

pub(super) struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> Shared<T> {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            inner: Mutex::new(Inner {
                value: None,
                continuation: None,
                awaited: false,
                fulfilled: false,
            }),
        })
    }

    fn fulfill(&self, result: Result<T>) {
        let continuation = {
            let mut inner = self.inner.lock();
            assert!(!inner.fulfilled, "future fulfilled twice");
            inner.fulfilled = true;
            match inner.continuation.take() {
                Some(continuation) => Some(continuation),
                None => {
                    inner.value = Some(result);
                    return;
                }
            }
        };
        if let Some(continuation) = continuation {
            continuation(result);
        }
    }

    fn attach(&self, continuation: Continuation<T>) {
        let ready = {
            let mut inner = self.inner.lock();
            assert!(!inner.awaited, "future awaited twice");
            inner.awaited = true;
            match inner.value.take() {
                Some(value) => Some(value),
                None => {
                    inner.continuation = Some(continuation);
                    return;
                }
            }
        };
        if let Some(value) = ready {
            continuation(value);
        }
    }
}

pub(super) fn pair<T: Send + 'static>(
    schedulers: Arc<Schedulers>,
) -> (Promise<T>, Future<T>) {
    let shared = Shared::new();
    (
        Promise { shared: Some(Arc::clone(&shared)) },
        Future { shared, schedulers },
    )
}

/// The producing half of a one-shot future.
///
/// Exactly one of [`resolve`](Promise::resolve) or
/// [`reject`](Promise::reject) may be called; dropping an unfulfilled
/// promise rejects the paired future with [`Error::Abandoned`].
pub struct Promise<T: Send + 'static> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Send + 'static> Promise<T> {
    /// Completes the paired future with a value.
    pub fn resolve(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.fulfill(Ok(value));
        }
    }

    /// Completes the paired future with an error.
    pub fn reject(mut self, error: Error) {
        if let Some(shared) = self.shared.take() {
            shared.fulfill(Err(error));
        }
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.fulfill(Err(Error::Abandoned));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}

/// A one-shot value that will resolve on one of the runtime's schedulers.
///
/// Futures are move-only: every awaiting method consumes `self`, so a future
/// cannot be awaited twice. Work chained with `then_*` runs only after the
/// upstream continuation has completed, even across schedulers; a rejection
/// skips `then_*` continuations and propagates until a
/// [`catch_main`](Future::catch_main) intercepts it.
pub struct Future<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    schedulers: Arc<Schedulers>,
}

impl<T: Send + 'static> Future<T> {
    /// Runs `f` on the worker pool with the resolved value.
    pub fn then_worker<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let schedulers = Arc::clone(&self.schedulers);
        let (promise, future) = pair(Arc::clone(&self.schedulers));
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => schedulers
                .spawn_worker(Box::new(move || promise.resolve(f(value)))),
            Err(error) => promise.reject(error),
        }));
        future
    }

    /// Runs `f` on the worker pool; the future it returns is flattened into
    /// the result, so the awaiter never observes nesting.
    pub fn then_worker_future<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let schedulers = Arc::clone(&self.schedulers);
        let (promise, future) = pair(Arc::clone(&self.schedulers));
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => schedulers
                .spawn_worker(Box::new(move || f(value).forward(promise))),
            Err(error) => promise.reject(error),
        }));
        future
    }

    /// Runs `f` on the main scheduler with the resolved value. The
    /// continuation executes inside a later [`drain_main`] call.
    ///
    /// [`drain_main`]: super::AsyncRuntime::drain_main
    pub fn then_main<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let schedulers = Arc::clone(&self.schedulers);
        let (promise, future) = pair(Arc::clone(&self.schedulers));
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => schedulers
                .spawn_main(Box::new(move || promise.resolve(f(value)))),
            Err(error) => promise.reject(error),
        }));
        future
    }

    /// Runs `f` on the main scheduler and flattens the future it returns.
    pub fn then_main_future<U, F>(self, f: F) -> Future<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let schedulers = Arc::clone(&self.schedulers);
        let (promise, future) = pair(Arc::clone(&self.schedulers));
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => schedulers
                .spawn_main(Box::new(move || f(value).forward(promise))),
            Err(error) => promise.reject(error),
        }));
        future
    }

    /// Intercepts a rejection on the main scheduler.
    ///
    /// `f` may recover by returning `Ok` or substitute a new rejection. A
    /// resolved upstream value passes through untouched.
    pub fn catch_main<F>(self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        let schedulers = Arc::clone(&self.schedulers);
        let (promise, future) = pair(Arc::clone(&self.schedulers));
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => promise.resolve(value),
            Err(error) => schedulers.spawn_main(Box::new(move || match f(error) {
                Ok(value) => promise.resolve(value),
                Err(error) => promise.reject(error),
            })),
        }));
        future
    }

    /// Routes this future's result into `promise` once it settles.
    pub(super) fn forward(self, promise: Promise<T>) {
        self.shared.attach(Box::new(move |result| match result {
            Ok(value) => promise.resolve(value),
            Err(error) => promise.reject(error),
        }));
    }

    /// True once the future has settled and the result is still unclaimed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.inner.lock().value.is_some()
    }

    /// Blocks until the future settles, draining the main scheduler while
    /// waiting.
    ///
    /// Call this from the thread that drains the main scheduler; a chain
    /// ending in a main-scheduler continuation can only settle there.
    pub fn wait(self) -> Result<T> {
        loop {
            self.schedulers.drain_main();
            {
                let mut inner = self.shared.inner.lock();
                assert!(!inner.awaited, "future awaited twice");
                if let Some(value) = inner.value.take() {
                    inner.awaited = true;
                    return value;
                }
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("ready", &self.is_ready()).finish()
    }
}
