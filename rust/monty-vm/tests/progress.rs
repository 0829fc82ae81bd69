//! The start/resume progress protocol for external function calls.

use monty_vm::{
    CaptureSink, HostException, HostValue, Monty, MontyError, MontyOptions, Outcome, Progress,
    StartOptions,
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

// ─── Completion without mediation ───

#[test]
fn start_without_external_calls_completes_directly() {
    let m = Monty::new("1 + 2").unwrap();
    let progress = m.start(StartOptions::default()).unwrap();
    let complete = progress.into_complete().expect("should complete");
    assert_eq!(complete.output(), &int(3));
}

// ─── Snapshots ───

#[test]
fn external_call_yields_snapshot() {
    let m = monty("func()", &["func"]);
    let progress = m.start(StartOptions::default()).unwrap();
    let snapshot = progress.into_snapshot().expect("should pause");
    assert_eq!(snapshot.script_name(), "main.py");
    assert_eq!(snapshot.function_name(), "func");
    assert!(!snapshot.is_os_function());
    assert!(snapshot.args().is_empty());
    assert!(snapshot.kwargs().is_empty());
}

#[test]
fn snapshot_resume_returns_complete() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let complete = snapshot
        .resume(Outcome::Return(int(42)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(42));
}

#[test]
fn snapshot_carries_positional_args() {
    let m = monty("func(1, 2, 3)", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.args(), &[int(1), int(2), int(3)]);
}

#[test]
fn snapshot_carries_kwargs() {
    let m = monty("func(a=1, b=\"two\")", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert!(snapshot.args().is_empty());
    assert_eq!(
        snapshot.kwargs(),
        &[
            ("a".to_string(), int(1)),
            ("b".to_string(), HostValue::Str("two".to_string())),
        ]
    );
}

#[test]
fn snapshot_mixed_args_and_kwargs() {
    let m = monty("func(1, 2, x=\"hello\", y=True)", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.args(), &[int(1), int(2)]);
    assert_eq!(
        snapshot.kwargs(),
        &[
            ("x".to_string(), HostValue::Str("hello".to_string())),
            ("y".to_string(), HostValue::Bool(true)),
        ]
    );
}

#[test]
fn multiple_external_calls_in_sequence() {
    let m = monty("a() + b()", &["a", "b"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(first.function_name(), "a");
    let mut second = first
        .resume(Outcome::Return(int(10)))
        .unwrap()
        .into_snapshot()
        .unwrap();
    assert_eq!(second.function_name(), "b");
    let complete = second
        .resume(Outcome::Return(int(5)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(15));
}

#[test]
fn chain_of_external_calls() {
    let m = monty("c() + c() + c()", &["c"]);
    let mut call_count = 0i64;
    let mut progress = m.start(StartOptions::default()).unwrap();
    loop {
        match progress {
            Progress::Snapshot(mut snapshot) => {
                assert_eq!(snapshot.function_name(), "c");
                call_count += 1;
                progress = snapshot.resume(Outcome::Return(int(call_count))).unwrap();
            }
            Progress::Complete(complete) => {
                assert_eq!(complete.output(), &int(6));
                break;
            }
            Progress::FutureSnapshot(_) => panic!("no futures in this program"),
        }
    }
    assert_eq!(call_count, 3);
}

#[test]
fn call_ids_are_monotonic() {
    let m = monty("a() + b()", &["a", "b"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let first_id = first.call_id();
    let second = first
        .resume(Outcome::Return(int(0)))
        .unwrap()
        .into_snapshot()
        .unwrap();
    assert!(second.call_id() > first_id);
}

#[test]
fn resume_with_exception_raises_at_call_site() {
    let code = "
try:
    fetch()
except ValueError as e:
    r = 'caught: ' + str(e)
r
";
    let m = monty(code, &["fetch"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let complete = snapshot
        .resume(Outcome::Exception(HostException::new("ValueError", "bad fetch")))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(
        complete.output(),
        &HostValue::Str("caught: bad fetch".to_string())
    );
}

#[test]
fn uncaught_host_exception_surfaces_as_envelope() {
    let m = monty("fetch()", &["fetch"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let err = snapshot
        .resume(Outcome::Exception(HostException::new("KeyError", "'fetch'")))
        .unwrap_err();
    assert_eq!(err.exception_kind(), Some("KeyError"));
}

#[test]
fn resume_twice_fails() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    snapshot.resume(Outcome::Return(int(1))).unwrap();
    let err = snapshot.resume(Outcome::Return(int(2))).unwrap_err();
    assert_eq!(err.to_string(), "Progress already resumed");
}

#[test]
fn dropping_a_snapshot_cancels_execution() {
    let m = monty("func()", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    drop(snapshot);
    // the same program starts cleanly again
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.function_name(), "func");
}

#[test]
fn complex_return_value_round_trips() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let value = HostValue::Dict(vec![
        (
            HostValue::Str("a".to_string()),
            HostValue::List(vec![int(1), int(2), int(3)]),
        ),
        (
            HostValue::Str("b".to_string()),
            HostValue::Dict(vec![(HostValue::Str("nested".to_string()), HostValue::Bool(true))]),
        ),
    ]);
    let complete = snapshot
        .resume(Outcome::Return(value.clone()))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &value);
}

#[test]
fn resume_with_none() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let complete = snapshot
        .resume(Outcome::Return(HostValue::None))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::None);
}

#[test]
fn script_transforms_external_results() {
    let code = "
raw = fetch('item')
[x * 2 for x in raw]
";
    let m = monty(code, &["fetch"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    assert_eq!(snapshot.args(), &[HostValue::Str("item".to_string())]);
    let complete = snapshot
        .resume(Outcome::Return(HostValue::List(vec![int(1), int(2)])))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![int(2), int(4)]));
}

// ─── Inputs through start ───

#[test]
fn start_with_inputs() {
    let m = Monty::with_options(
        "process(x)",
        MontyOptions {
            inputs: vec!["x".to_string()],
            external_functions: vec!["process".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    let snapshot = m
        .start(StartOptions {
            inputs: vec![("x".to_string(), int(100))],
            ..Default::default()
        })
        .unwrap()
        .into_snapshot()
        .unwrap();
    assert_eq!(snapshot.function_name(), "process");
    assert_eq!(snapshot.args(), &[int(100)]);
}

// ─── Print mediation ───

#[test]
fn print_goes_to_the_sink() {
    let sink = CaptureSink::new();
    let m = Monty::new("print(\"hello\")").unwrap();
    let progress = m
        .start(StartOptions {
            print: Some(Box::new(sink.clone())),
            ..Default::default()
        })
        .unwrap();
    assert!(progress.into_complete().is_some());
    assert_eq!(
        sink.events(),
        vec![
            ("stdout".to_string(), "hello".to_string()),
            ("stdout".to_string(), "\n".to_string()),
        ]
    );
}

#[test]
fn print_supports_sep_and_end() {
    let sink = CaptureSink::new();
    let m = Monty::new("print(1, 2, sep='-', end='!')").unwrap();
    m.start(StartOptions {
        print: Some(Box::new(sink.clone())),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        sink.events(),
        vec![
            ("stdout".to_string(), "1-2".to_string()),
            ("stdout".to_string(), "!".to_string()),
        ]
    );
}

#[test]
fn print_resumes_after_external_call() {
    let sink = CaptureSink::new();
    let m = monty("print(\"before\"); func(); print(\"after\")", &["func"]);
    let mut snapshot = m
        .start(StartOptions {
            print: Some(Box::new(sink.clone())),
            ..Default::default()
        })
        .unwrap()
        .into_snapshot()
        .unwrap();
    assert_eq!(
        sink.events(),
        vec![
            ("stdout".to_string(), "before".to_string()),
            ("stdout".to_string(), "\n".to_string()),
        ]
    );
    sink.clear();
    let complete = snapshot
        .resume(Outcome::Return(HostValue::None))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::None);
    assert_eq!(
        sink.events(),
        vec![
            ("stdout".to_string(), "after".to_string()),
            ("stdout".to_string(), "\n".to_string()),
        ]
    );
}

// ─── run() mediation rules ───

#[test]
fn run_without_external_handler_fails() {
    let m = monty("func()", &["func"]);
    let err = m.run(monty_vm::RunOptions::default()).unwrap_err();
    assert_eq!(err.exception_kind(), Some("NotImplementedError"));
}

struct Doubler;

impl monty_vm::ExternalHandler for Doubler {
    fn call(
        &mut self,
        name: &str,
        args: &[HostValue],
        _kwargs: &[(String, HostValue)],
    ) -> Result<HostValue, HostException> {
        assert_eq!(name, "double");
        match args {
            [HostValue::Int(n)] => Ok(HostValue::Int(n * 2)),
            _ => Err(HostException::new("TypeError", "expected one int")),
        }
    }
}

#[test]
fn run_with_external_handler() {
    let m = monty("double(21)", &["double"]);
    let mut handler = Doubler;
    let out = m
        .run(monty_vm::RunOptions {
            external: Some(&mut handler),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, int(42));
}

#[test]
fn run_handler_exception_is_catchable() {
    let code = "
try:
    double('not an int')
except TypeError:
    r = 'caught'
r
";
    let m = monty(code, &["double"]);
    let mut handler = Doubler;
    let out = m
        .run(monty_vm::RunOptions {
            external: Some(&mut handler),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, HostValue::Str("caught".to_string()));
}

// ─── Independent executions ───

#[test]
fn awaited_call_resumed_as_future_pauses_again() {
    let m = monty("await func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let progress = snapshot.resume(Outcome::Future).unwrap();
    match progress {
        Progress::FutureSnapshot(fs) => {
            assert_eq!(fs.pending_call_ids().len(), 1);
        }
        other => panic!("expected a future snapshot, got {other:?}"),
    }
}

#[test]
fn errors_match_montyerror_variants() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    snapshot.resume(Outcome::Return(int(0))).unwrap();
    assert!(matches!(
        snapshot.resume(Outcome::Return(int(0))),
        Err(MontyError::Operation(_))
    ));
}
