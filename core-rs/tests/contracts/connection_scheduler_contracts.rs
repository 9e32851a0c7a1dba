// Connection Scheduler Contract Tests
//
// The control plane must never see more than one request from this client,
// except through the immediate-priority bypass. These tests pin that behavior.

use kvis_core::connection::{
    CompletionHandle, ConnectionScheduler, RequestOptions, SchedulerConfig,
    IMMEDIATE_BYPASS_THRESHOLD,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn scheduler() -> ConnectionScheduler {
    ConnectionScheduler::new(SchedulerConfig::default()).unwrap()
}

fn submit(
    scheduler: &ConnectionScheduler,
    options: RequestOptions,
    started: &mpsc::Sender<(String, CompletionHandle)>,
) {
    let started = started.clone();
    scheduler.submit(options, move |options, handle| {
        let _ = started.send((options.path, handle));
    });
}

fn request(path: &str) -> RequestOptions {
    RequestOptions::new("kube.local", path)
}

/// WHY: An idle scheduler starts work in the caller's context
/// REASON: Queueing on an idle slot only adds latency
/// BREAKS: First request of a burst waits for nothing
#[test]
fn idle_submit_starts_synchronously() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    submit(&scheduler, request("/api/v1beta1/pods"), &tx);

    let started = rx.try_recv();
    assert!(started.is_ok(), "request must start before submit returns");
    assert_eq!(scheduler.in_flight(), 1);
}

/// WHY: Six back-to-back requests run one at a time in submission order
/// REASON: The control plane is not hammered by this client
/// BREAKS: Concurrent load on the master, reordered operations
#[test]
fn six_requests_dispatch_fifo() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    for n in 1..=6 {
        submit(&scheduler, request(&format!("/{}", n)), &tx);
    }

    let (first, handle) = rx.try_recv().unwrap();
    assert_eq!(first, "/1");
    assert!(rx.try_recv().is_err(), "requests 2-6 must be queued");
    assert_eq!(scheduler.queue_depth(), 5);

    let mut handle = handle;
    for n in 2..=6 {
        handle.complete();
        let (path, next) = rx.try_recv().unwrap();
        assert_eq!(path, format!("/{}", n));
        assert_eq!(scheduler.in_flight(), 1);
        handle = next;
    }
    handle.complete();

    assert!(scheduler.is_idle());
}

/// WHY: Immediate requests only bypass a backlog deeper than the threshold
/// REASON: Bypass is overload shedding, not a second lane
/// BREAKS: Routine immediate calls double the load on the master
#[test]
fn immediate_waits_when_backlog_is_shallow() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    submit(&scheduler, request("/active"), &tx);
    for n in 0..IMMEDIATE_BYPASS_THRESHOLD {
        submit(&scheduler, request(&format!("/queued/{}", n)), &tx);
    }
    submit(&scheduler, request("/delete").immediate(), &tx);

    let started: Vec<_> = rx.try_iter().collect();
    assert_eq!(started.len(), 1);
    assert_eq!(scheduler.queue_depth(), IMMEDIATE_BYPASS_THRESHOLD + 1);
}

/// WHY: A congested backlog lets immediate requests run next to the active one
/// REASON: A delete must not starve behind a long run of polling calls
/// BREAKS: User actions hang until the whole backlog drains
#[test]
fn immediate_bypasses_deep_backlog() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    submit(&scheduler, request("/active"), &tx);
    for n in 0..=IMMEDIATE_BYPASS_THRESHOLD {
        submit(&scheduler, request(&format!("/queued/{}", n)), &tx);
    }
    submit(&scheduler, request("/delete").immediate(), &tx);

    let started: Vec<_> = rx.try_iter().collect();
    let paths: Vec<&str> = started.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(paths, vec!["/active", "/delete"]);
    assert_eq!(scheduler.in_flight(), 2);
    assert_eq!(scheduler.queue_depth(), IMMEDIATE_BYPASS_THRESHOLD + 1);
}

/// WHY: Every completion attempts exactly one advance, and advancing is idempotent
/// REASON: Completion may race with submit from another thread
/// BREAKS: Two queued requests started at once, or a wedged queue
#[test]
fn completions_from_other_threads_keep_one_active() {
    let scheduler = scheduler();
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    for n in 0..20 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let finished = Arc::clone(&finished);
        let done_tx = done_tx.clone();

        scheduler.submit(request(&format!("/{}", n)), move |options, handle| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            thread::spawn(move || {
                thread::sleep(Duration::from_millis(2));
                finished.lock().unwrap().push(options.path);
                running.fetch_sub(1, Ordering::SeqCst);
                handle.complete();
                let _ = done_tx.send(());
            });
        });
    }

    for _ in 0..20 {
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("request never completed");
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let expected: Vec<String> = (0..20).map(|n| format!("/{}", n)).collect();
    assert_eq!(*finished.lock().unwrap(), expected);
    assert!(scheduler.is_idle());
}

/// WHY: A handle that is never completed still releases the slot when dropped
/// REASON: A crashed request must not wedge every later call
/// BREAKS: Dashboard stops refreshing after one failed request
#[test]
fn dropped_handle_advances_queue() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    submit(&scheduler, request("/crashes"), &tx);
    submit(&scheduler, request("/next"), &tx);

    let (_, crashed) = rx.try_recv().unwrap();
    drop(crashed);

    let (path, _next) = rx.try_recv().unwrap();
    assert_eq!(path, "/next");
}

/// WHY: Queued requests that complete inline drain without growing the stack
/// REASON: Requests without an async runtime finish inside their start action
/// BREAKS: Process aborts with a stack overflow once the backlog is deep
#[test]
fn synchronous_completions_drain_deep_backlog() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();
    let completed = Arc::new(AtomicUsize::new(0));

    submit(&scheduler, request("/hold"), &tx);
    for n in 0..10_000 {
        let completed = Arc::clone(&completed);
        scheduler.submit(request(&format!("/{}", n)), move |_, handle| {
            completed.fetch_add(1, Ordering::SeqCst);
            handle.complete();
        });
    }
    assert_eq!(scheduler.queue_depth(), 10_000);

    let (_, hold) = rx.try_recv().unwrap();
    hold.complete();

    assert_eq!(completed.load(Ordering::SeqCst), 10_000);
    assert!(scheduler.is_idle());
}

/// WHY: A transport that reports completion twice advances the queue once
/// REASON: The completion handle is consumed by the first signal
/// BREAKS: Two queued requests started together behind one completion
#[test]
fn double_callback_advances_once() {
    let scheduler = scheduler();
    let (tx, rx) = mpsc::channel();

    for path in ["/a", "/b", "/c"] {
        submit(&scheduler, request(path), &tx);
    }

    let (_, handle) = rx.try_recv().unwrap();
    let slot = Mutex::new(Some(handle));
    let callback = || {
        if let Some(handle) = slot.lock().unwrap().take() {
            handle.complete();
        }
    };
    callback();
    callback();

    let started: Vec<_> = rx.try_iter().collect();
    let paths: Vec<&str> = started.iter().map(|(path, _)| path.as_str()).collect();
    assert_eq!(paths, vec!["/b"]);
    assert_eq!(scheduler.queue_depth(), 1);
    assert_eq!(scheduler.in_flight(), 1);
}

/// WHY: Bypass and active completions racing on two threads keep the slot count sane
/// REASON: Both signals touch the same state; only the active one frees the slot
/// BREAKS: Three connections open at once, or a backlog that never drains
#[test]
fn bypass_and_active_completing_together_drain_to_idle() {
    let scheduler = scheduler();
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let backlog = IMMEDIATE_BYPASS_THRESHOLD + 3;

    submit(&scheduler, request("/active"), &tx);
    for n in 0..backlog {
        let observer = scheduler.clone();
        let peak = Arc::clone(&peak);
        let done_tx = done_tx.clone();

        scheduler.submit(request(&format!("/poll/{}", n)), move |_, handle| {
            peak.fetch_max(observer.in_flight(), Ordering::SeqCst);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(1));
                handle.complete();
                let _ = done_tx.send(());
            });
        });
    }
    submit(&scheduler, request("/delete").immediate(), &tx);

    let started: Vec<_> = rx.try_iter().collect();
    assert_eq!(started.len(), 2);
    assert!(started[1].1.is_bypass());
    peak.fetch_max(scheduler.in_flight(), Ordering::SeqCst);

    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = started
        .into_iter()
        .map(|(_, handle)| {
            let barrier = Arc::clone(&barrier);
            let observer = scheduler.clone();
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                barrier.wait();
                handle.complete();
                peak.fetch_max(observer.in_flight(), Ordering::SeqCst);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for _ in 0..backlog {
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("queued request never completed");
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(scheduler.is_idle());
}
