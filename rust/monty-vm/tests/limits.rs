//! Resource limits: allocation caps, heap cap, deadline, recursion depth,
//! and sweep behaviour.

use monty_vm::{HostValue, Monty, MontyError, ResourceLimits, RunOptions};
use std::time::Duration;

fn run_limited(source: &str, limits: ResourceLimits) -> Result<HostValue, MontyError> {
    Monty::new(source)
        .unwrap()
        .run(RunOptions { limits, ..Default::default() })
}

// ─── Allocation count ───

#[test]
fn allocation_cap_allows_small_programs() {
    let out = run_limited("1 + 2", ResourceLimits::new().max_allocations(1000)).unwrap();
    assert_eq!(out, HostValue::Int(3));
}

#[test]
fn allocation_cap_stops_allocation_heavy_programs() {
    let code = "
xs = []
for i in range(2000):
    xs.append([i])
xs
";
    let err = run_limited(code, ResourceLimits::new().max_allocations(1000)).unwrap_err();
    assert_eq!(err.exception_kind(), Some("MemoryError"));
}

#[test]
fn allocation_count_is_monotone_across_sweeps() {
    // garbage is reclaimed, but the allocation count never resets
    let code = "
for i in range(600):
    x = [i]
'done'
";
    let err = run_limited(
        code,
        ResourceLimits::new().max_allocations(500).gc_interval(50),
    )
    .unwrap_err();
    assert_eq!(err.exception_kind(), Some("MemoryError"));
}

// ─── Heap bytes ───

#[test]
fn memory_cap_stops_heap_growth() {
    let code = "
s = 'x'
while True:
    s = s + s
s
";
    let err = run_limited(code, ResourceLimits::new().max_memory(64 * 1024)).unwrap_err();
    assert_eq!(err.exception_kind(), Some("MemoryError"));
}

#[test]
fn sweeping_keeps_garbage_heavy_programs_under_cap() {
    // each iteration drops the previous list; the sweep reclaims it
    let code = "
for i in range(500):
    data = ['padding' + str(i)] * 50
'ok'
";
    let out = run_limited(
        code,
        ResourceLimits::new().max_memory(256 * 1024).gc_interval(25),
    )
    .unwrap();
    assert_eq!(out, HostValue::Str("ok".to_string()));
}

#[test]
fn memory_error_is_uncatchable_from_script() {
    let code = "
try:
    s = 'x'
    while True:
        s = s + s
except BaseException:
    caught = 'should not happen'
'finished'
";
    let err = run_limited(code, ResourceLimits::new().max_memory(64 * 1024)).unwrap_err();
    assert_eq!(err.exception_kind(), Some("MemoryError"));
}

// ─── Deadline ───

#[test]
fn deadline_stops_infinite_loops() {
    let code = "
n = 0
while True:
    n = n + 1
";
    let err = run_limited(
        code,
        ResourceLimits::new().max_duration(Duration::from_millis(50)),
    )
    .unwrap_err();
    assert_eq!(err.exception_kind(), Some("TimeoutError"));
}

#[test]
fn timeout_is_uncatchable_from_script() {
    let code = "
try:
    while True:
        pass
except BaseException:
    pass
'finished'
";
    let err = run_limited(
        code,
        ResourceLimits::new().max_duration(Duration::from_millis(50)),
    )
    .unwrap_err();
    assert_eq!(err.exception_kind(), Some("TimeoutError"));
}

#[test]
fn fast_programs_beat_the_deadline() {
    let out = run_limited(
        "sum(range(100))",
        ResourceLimits::new().max_duration(Duration::from_secs(5)),
    )
    .unwrap();
    assert_eq!(out, HostValue::Int(4950));
}

// ─── Recursion depth ───

#[test]
fn recursion_limit_stops_runaway_recursion() {
    let code = "
def f():
    return f()

f()
";
    let err = run_limited(code, ResourceLimits::new()).unwrap_err();
    assert_eq!(err.exception_kind(), Some("RecursionError"));
}

#[test]
fn recursion_limit_is_configurable() {
    let code = "
def depth(n):
    if n == 0:
        return 0
    return depth(n - 1) + 1

depth(20)
";
    let err = run_limited(code, ResourceLimits::new().max_recursion_depth(10)).unwrap_err();
    assert_eq!(err.exception_kind(), Some("RecursionError"));

    let out = run_limited(code, ResourceLimits::new().max_recursion_depth(100)).unwrap();
    assert_eq!(out, HostValue::Int(20));
}

#[test]
fn recursion_error_is_uncatchable_from_script() {
    let code = "
def f():
    return f()

try:
    f()
except BaseException:
    pass
'finished'
";
    let err = run_limited(code, ResourceLimits::new()).unwrap_err();
    assert_eq!(err.exception_kind(), Some("RecursionError"));
}

// ─── Cycles ───

#[test]
fn reference_cycles_are_swept() {
    // cycles cannot be freed by reference counting; mark-and-sweep must
    // reclaim them or the cap trips
    let code = "
for i in range(300):
    a = [i]
    b = [a]
    a.append(b)
'ok'
";
    let out = run_limited(
        code,
        ResourceLimits::new().max_memory(128 * 1024).gc_interval(20),
    )
    .unwrap();
    assert_eq!(out, HostValue::Str("ok".to_string()));
}
