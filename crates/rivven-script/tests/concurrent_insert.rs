//! Concurrency tests: many worker threads, one runtime
//!
//! Run with: cargo test -p rivven-script --test concurrent_insert

mod common;

use common::{bridge, ScriptDir};
use rivven_script::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 8;
const RECORDS_PER_WORKER: usize = 25;

/// Counters updated from inside script code
#[derive(Default)]
struct Tracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Tracker {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn tracked_runtime(dir: &ScriptDir, tracker: Arc<Tracker>) -> Arc<RuntimeHandle> {
    dir.runtime_with(move |engine| {
        let enter = tracker.clone();
        engine.register_fn("enter_script", move || {
            enter.enter();
            // widen the window for an overlapping caller
            thread::sleep(Duration::from_micros(200));
        });
        let exit = tracker;
        engine.register_fn("exit_script", move || exit.exit());
    })
}

#[test]
fn test_script_code_never_runs_concurrently() {
    let dir = ScriptDir::new().module(
        "dest",
        r#"
fn queue(r) {
    enter_script();
    let total = 0;
    for i in 0..r.n { total += i; }
    exit_script();
    if r.fail { throw "worker " + r.worker; }
}
"#,
    );
    let tracker = Arc::new(Tracker::default());
    let runtime = tracked_runtime(&dir, tracker.clone());
    let (bridge, observer) = bridge(BridgeConfig::builder("dest").build(), runtime.clone());
    let bridge = Arc::new(bridge);

    assert!(bridge.start());

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut dropped = 0;
                for n in 0..RECORDS_PER_WORKER {
                    let record = record!({
                        "worker": worker,
                        "n": n,
                        "fail": n % 5 == 0
                    });
                    if bridge.insert(&record) == WorkerInsertResult::Drop {
                        dropped += 1;
                    }
                }
                dropped
            })
        })
        .collect();

    let dropped: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let total = WORKERS * RECORDS_PER_WORKER;
    let expected_failures = WORKERS * RECORDS_PER_WORKER.div_ceil(5);

    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.calls.load(Ordering::SeqCst), total);
    assert_eq!(dropped, expected_failures);
    assert_eq!(observer.invocation_failures().len(), expected_failures);
    assert_eq!(bridge.seq_num(), total as u64);
    assert!(!runtime.is_locked());

    assert!(bridge.stop());
}

#[test]
fn test_bridges_share_one_runtime() {
    let dir = ScriptDir::new()
        .module("first", "fn queue(r) { enter_script(); exit_script(); }")
        .module("second", "fn send(r) { enter_script(); exit_script(); }");
    let tracker = Arc::new(Tracker::default());
    let runtime = tracked_runtime(&dir, tracker.clone());

    let (first, _) = bridge(BridgeConfig::builder("first").build(), runtime.clone());
    let (second, _) = bridge(
        BridgeConfig::builder("second").queue_func("send").build(),
        runtime.clone(),
    );
    let bridges: Vec<Arc<ScriptBridge>> = vec![Arc::new(first), Arc::new(second)];
    assert!(bridges.iter().all(|b| b.start()));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let bridge = bridges[worker % bridges.len()].clone();
            thread::spawn(move || {
                (0..RECORDS_PER_WORKER)
                    .filter(|n| bridge.insert(&record!({"n": n})).is_success())
                    .count()
            })
        })
        .collect();

    let delivered: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(delivered, WORKERS * RECORDS_PER_WORKER);
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    assert!(bridges.iter().all(|b| b.stop()));
}

#[test]
fn test_stop_races_inserts() {
    let dir = ScriptDir::new().module("dest", "fn queue(r) { enter_script(); exit_script(); }");
    let tracker = Arc::new(Tracker::default());
    let runtime = tracked_runtime(&dir, tracker.clone());
    let (bridge, _observer) = bridge(BridgeConfig::builder("dest").build(), runtime.clone());
    let bridge = Arc::new(bridge);
    assert!(bridge.start());

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                for n in 0..RECORDS_PER_WORKER {
                    bridge.insert(&record!({"n": n}));
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(1));
    assert!(bridge.stop());
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bridge.state(), BridgeState::Stopped);
    assert!(bridge.bindings().is_none());
    assert_eq!(tracker.active.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
    assert!(!runtime.is_locked());
}
