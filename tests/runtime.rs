//! Cross-thread behavior of the runtime as an embedder would drive it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use asset_cache::AsyncRuntime;

#[test]
fn main_continuations_run_on_the_draining_thread() {
    let runtime = AsyncRuntime::new(2);
    let seen_thread = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen_thread);
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = Arc::clone(&done);

    let fut = runtime.spawn_worker(|| 7).then_main(move |n| {
        *sink.lock().unwrap() = Some(thread::current().id());
        done_flag.store(true, Ordering::SeqCst);
        n
    });

    // A dedicated embedder thread owns the main queue.
    let embedder_runtime = runtime.clone();
    let embedder_done = Arc::clone(&done);
    let embedder = thread::spawn(move || {
        while !embedder_done.load(Ordering::SeqCst) {
            embedder_runtime.drain_main();
            thread::sleep(Duration::from_millis(1));
        }
        thread::current().id()
    });
    let embedder_id = embedder.join().unwrap();

    assert_eq!(*seen_thread.lock().unwrap(), Some(embedder_id));
    assert!(fut.is_ready());
    assert_eq!(fut.wait().unwrap(), 7);
}

#[test]
fn promises_can_be_fulfilled_from_foreign_threads() {
    // The shape a real transport uses: keep the promise, resolve it from
    // wherever the I/O completes.
    let runtime = AsyncRuntime::new(1);
    let (promise, future) = runtime.promise::<String>();
    let io_thread = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        promise.resolve("payload".to_owned());
    });
    let chained = future.then_worker(|payload| payload.len());
    io_thread.join().unwrap();
    assert_eq!(chained.wait().unwrap(), 7);
}

#[test]
fn chains_can_bounce_between_pools_repeatedly() {
    let runtime = AsyncRuntime::new(2);
    let mut fut = runtime.resolved(0_u32);
    for _ in 0..10 {
        fut = fut.then_worker(|n| n + 1).then_main(|n| n + 1);
    }
    assert_eq!(fut.wait().unwrap(), 20);
}

#[test]
fn drain_main_is_cheap_when_idle() {
    let runtime = AsyncRuntime::new(1);
    for _ in 0..1000 {
        runtime.drain_main();
    }
}
