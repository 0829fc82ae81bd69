//! Concurrent execution: one shared Program, independent interpreters.

use monty_vm::{HostValue, Monty, MontyOptions, Outcome, RunOptions, StartOptions};
use std::time::Instant;

const LOOP_CODE: &str = "
x = 0
for i in range(200_000):
    x += 1
x
";

#[test]
fn same_program_runs_on_many_threads() {
    let m = Monty::new(LOOP_CODE).unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                scope.spawn(move || m.run(RunOptions::default()).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), HostValue::Int(200_000));
        }
    });
}

#[test]
fn runs_are_independent() {
    // no cross-run state leak: the same instance re-runs from scratch
    let m = Monty::with_options(
        "x * 2",
        MontyOptions { inputs: vec!["x".to_string()], ..Default::default() },
    )
    .unwrap();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|n| {
                let m = m.clone();
                scope.spawn(move || {
                    let out = m
                        .run(RunOptions {
                            inputs: vec![("x".to_string(), HostValue::Int(n))],
                            ..Default::default()
                        })
                        .unwrap();
                    (n, out)
                })
            })
            .collect();
        for handle in handles {
            let (n, out) = handle.join().unwrap();
            assert_eq!(out, HostValue::Int(n * 2));
        }
    });
}

#[test]
fn snapshots_resume_on_other_threads() {
    let m = Monty::with_options(
        "x = double(1)\nfor i in range(50_000):\n    x += 1\nx",
        MontyOptions { external_functions: vec!["double".to_string()], ..Default::default() },
    )
    .unwrap();
    let snapshots: Vec<_> = (0..4)
        .map(|_| m.start(StartOptions::default()).unwrap().into_snapshot().unwrap())
        .collect();
    std::thread::scope(|scope| {
        let handles: Vec<_> = snapshots
            .into_iter()
            .map(|mut snapshot| {
                scope.spawn(move || {
                    snapshot
                        .resume(Outcome::Return(HostValue::Int(2)))
                        .unwrap()
                        .into_complete()
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().output(), &HostValue::Int(50_002));
        }
    });
}

/// CPU-bound scripts must scale near-linearly across threads: the whole
/// point of a per-interpreter heap is zero contention. Skipped on CI boxes
/// with a single core.
#[test]
fn parallel_execution_scales() {
    if std::env::var("CI").is_ok() {
        return;
    }
    if std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) < 4 {
        return;
    }
    let m = Monty::new(LOOP_CODE).unwrap();

    let start = Instant::now();
    assert_eq!(m.run(RunOptions::default()).unwrap(), HostValue::Int(200_000));
    let single = start.elapsed();

    let start = Instant::now();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = m.clone();
                scope.spawn(move || m.run(RunOptions::default()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });
    let parallel = start.elapsed();

    let ratio = parallel.as_secs_f64() / single.as_secs_f64().max(1e-9);
    assert!(
        ratio < 1.5,
        "4 parallel runs took {ratio:.2}x one run; expected near-linear scaling"
    );
}
