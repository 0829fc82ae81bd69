//! Future joins: awaiting external calls and `asyncio.gather`.

use monty_vm::{
    HostException, HostValue, Monty, MontyOptions, Outcome, Progress, StartOptions,
};

fn monty(source: &str, external: &[&str]) -> Monty {
    Monty::with_options(
        source,
        MontyOptions {
            external_functions: external.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
    )
    .expect("source should compile")
}

fn int(n: i64) -> HostValue {
    HostValue::Int(n)
}

#[test]
fn await_single_external_call() {
    let m = monty("await foobar(1, 2)", &["foobar"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "foobar");
    assert_eq!(snapshot.args(), &[int(1), int(2)]);
    let call_id = snapshot.call_id();

    let mut waiting = snapshot
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .expect("awaiting the future should pause");
    assert_eq!(waiting.pending_call_ids(), &[call_id]);

    let complete = waiting
        .resume(vec![(call_id, Outcome::Return(int(3)))])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(3));
}

#[test]
fn await_synchronous_answer_passes_through() {
    // a host may answer an awaited call synchronously; the await resolves
    // in place
    let m = monty("await foobar()", &["foobar"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let complete = snapshot
        .resume(Outcome::Return(int(7)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(7));
}

#[test]
fn gather_joins_two_calls_in_argument_order() {
    let code = "
import asyncio

await asyncio.gather(foo(1), bar(2))
";
    let m = monty(code, &["foo", "bar"]);

    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(first.function_name(), "foo");
    assert_eq!(first.args(), &[int(1)]);
    let foo_id = first.call_id();

    let mut second = first
        .resume(Outcome::Future)
        .unwrap()
        .into_snapshot()
        .expect("the second call pauses next");
    assert_eq!(second.function_name(), "bar");
    assert_eq!(second.args(), &[int(2)]);
    let bar_id = second.call_id();

    let mut waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .expect("gather should wait on both ids");
    let mut pending = waiting.pending_call_ids().to_vec();
    pending.sort();
    let mut expected = vec![foo_id, bar_id];
    expected.sort();
    assert_eq!(pending, expected);

    let complete = waiting
        .resume(vec![
            (foo_id, Outcome::Return(int(3))),
            (bar_id, Outcome::Return(int(4))),
        ])
        .unwrap()
        .into_complete()
        .unwrap();
    // result order follows argument order, not completion order
    assert_eq!(complete.output(), &HostValue::List(vec![int(3), int(4)]));
}

#[test]
fn gather_result_order_ignores_completion_order() {
    let code = "
import asyncio

await asyncio.gather(foo(1), bar(2))
";
    let m = monty(code, &["foo", "bar"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut second = first.resume(Outcome::Future).unwrap().into_snapshot().unwrap();
    let bar_id = second.call_id();
    let mut waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    // deliver bar before foo
    let complete = waiting
        .resume(vec![
            (bar_id, Outcome::Return(int(14))),
            (foo_id, Outcome::Return(int(13))),
        ])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![int(13), int(14)]));
}

#[test]
fn gather_partial_completion_pauses_again() {
    let code = "
import asyncio

await asyncio.gather(foo(1), bar(2))
";
    let m = monty(code, &["foo", "bar"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut second = first.resume(Outcome::Future).unwrap().into_snapshot().unwrap();
    let bar_id = second.call_id();
    let mut waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();

    // only bar completes; foo stays pending
    let mut still_waiting = waiting
        .resume(vec![
            (bar_id, Outcome::Return(int(14))),
            (foo_id, Outcome::Future),
        ])
        .unwrap()
        .into_future_snapshot()
        .expect("foo is still pending");
    assert_eq!(still_waiting.pending_call_ids(), &[foo_id]);

    let complete = still_waiting
        .resume(vec![(foo_id, Outcome::Return(int(144)))])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![int(144), int(14)]));
}

#[test]
fn gather_propagates_child_exception() {
    let code = "
import asyncio

await asyncio.gather(foo(), bar())
";
    let m = monty(code, &["foo", "bar"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut second = first.resume(Outcome::Future).unwrap().into_snapshot().unwrap();
    let bar_id = second.call_id();
    let mut waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();

    let err = waiting
        .resume(vec![
            (foo_id, Outcome::Return(int(1))),
            (bar_id, Outcome::Exception(HostException::new("ValueError", "child failed"))),
        ])
        .unwrap_err();
    assert_eq!(err.exception_kind(), Some("ValueError"));
    assert_eq!(err.to_string(), "ValueError: child failed");
}

#[test]
fn gather_exception_is_catchable_in_script() {
    let code = "
import asyncio

try:
    await asyncio.gather(foo())
except ValueError as e:
    r = 'caught: ' + str(e)
r
";
    let m = monty(code, &["foo"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut waiting = first
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    let complete = waiting
        .resume(vec![(foo_id, Outcome::Exception(HostException::new(
            "ValueError",
            "boom",
        )))])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::Str("caught: boom".to_string()));
}

#[test]
fn gather_results_flow_back_into_script() {
    let code = "
import asyncio

parts = await asyncio.gather(foo(), bar())
parts[0] + parts[1]
";
    let m = monty(code, &["foo", "bar"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut second = first.resume(Outcome::Future).unwrap().into_snapshot().unwrap();
    let bar_id = second.call_id();
    let mut waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    let complete = waiting
        .resume(vec![
            (foo_id, Outcome::Return(int(40))),
            (bar_id, Outcome::Return(int(2))),
        ])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(42));
}

#[test]
fn future_snapshot_resume_requires_progress() {
    let m = monty("await func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let call_id = snapshot.call_id();
    let mut waiting = snapshot
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    // marking the only pending call as still-pending makes no progress
    let err = waiting
        .resume(vec![(call_id, Outcome::Future)])
        .unwrap_err();
    assert!(matches!(err, monty_vm::MontyError::InvalidArgument(_)));
    // the state is still usable afterwards
    let complete = waiting
        .resume(vec![(call_id, Outcome::Return(int(9)))])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(9));
}

#[test]
fn unknown_call_id_is_rejected() {
    let m = monty("await func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut waiting = snapshot
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    let err = waiting
        .resume(vec![(9999, Outcome::Return(int(1)))])
        .unwrap_err();
    assert!(matches!(err, monty_vm::MontyError::InvalidArgument(_)));
}

#[test]
fn unused_progress_debug_formats() {
    let m = monty("func()", &["func"]);
    let progress = m.start(StartOptions::default()).unwrap();
    let text = format!("{progress:?}");
    assert!(text.contains("Snapshot"));
    match progress {
        Progress::Snapshot(s) => assert_eq!(s.function_name(), "func"),
        other => panic!("unexpected progress {other:?}"),
    }
}
