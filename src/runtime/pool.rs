use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of native threads draining one shared job queue.
///
/// Threads exit once every sender half of the queue is gone and the queue
/// has drained, so closing the injector is the shutdown signal.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn start(threads: usize, receiver: Receiver<Job>) -> WorkerPool {
        let threads = threads.max(1);
        let handles = (0..threads)
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("asset-cache-worker-{index}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { handles }
    }

    /// True when the calling thread is one of the pool's own threads.
    pub(crate) fn owns_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.handles.iter().any(|handle| handle.thread().id() == current)
    }

    /// Blocks until every worker has exited. The injector must already be
    /// closed or this never returns.
    pub(crate) fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Abandons the threads; they unwind on their own once the queue closes.
    pub(crate) fn detach(&mut self) {
        self.handles.clear();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.handles.len())
            .finish()
    }
}
