//! Persistence: programs and paused executions round-trip through the
//! binary envelope and resume identically.

use monty_vm::{
    FutureSnapshot, HostValue, Monty, MontyOptions, Outcome, RunOptions, Snapshot, StartOptions,
};

fn int(n: i64) -> HostValue {
    HostValue::Int(n)
}

fn s(text: &str) -> HostValue {
    HostValue::Str(text.to_string())
}

fn monty(source: &str, external: &[&str]) -> Monty {
    Monty::with_options(
        source,
        MontyOptions {
            external_functions: external.iter().map(|x| x.to_string()).collect(),
            ..Default::default()
        },
    )
    .unwrap()
}

// ─── Program round-trips ───

#[test]
fn program_dump_load_runs_identically() {
    let m = Monty::with_options(
        "x + 1",
        MontyOptions { inputs: vec!["x".to_string()], ..Default::default() },
    )
    .unwrap();
    let data = m.dump();
    assert!(!data.is_empty());
    assert_eq!(&data[..4], b"MNTY");

    let loaded = Monty::load(&data).unwrap();
    let out = loaded
        .run(RunOptions {
            inputs: vec![("x".to_string(), int(41))],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, int(42));
}

#[test]
fn program_dump_preserves_metadata() {
    let m = Monty::with_options(
        "func()",
        MontyOptions {
            script_name: Some("custom.py".to_string()),
            external_functions: vec!["func".to_string()],
            type_check_stubs: Some("def func() -> int: ...".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let loaded = Monty::load(&m.dump()).unwrap();
    assert_eq!(loaded.script_name(), "custom.py");
    assert_eq!(loaded.external_functions(), &["func".to_string()]);
    assert_eq!(
        loaded.repr(),
        "Monty(<1 line of code>, script_name='custom.py', external_functions=[\"func\"])"
    );
}

#[test]
fn program_load_rejects_truncated_data() {
    let m = Monty::new("1 + 1").unwrap();
    let data = m.dump();
    let err = Monty::load(&data[..6]).unwrap_err();
    assert_eq!(err.to_string(), "Hit the end of buffer, expected more data");
}

#[test]
fn program_dump_load_various_outputs() {
    for (code, expected) in [
        ("1 + 1", int(2)),
        ("\"hello\"", s("hello")),
        ("[1, 2, 3]", HostValue::List(vec![int(1), int(2), int(3)])),
        ("{\"a\": 1}", HostValue::Dict(vec![(s("a"), int(1))])),
        ("True", HostValue::Bool(true)),
        ("None", HostValue::None),
    ] {
        let m = Monty::new(code).unwrap();
        let loaded = Monty::load(&m.dump()).unwrap();
        assert_eq!(loaded.run(RunOptions::default()).unwrap(), expected, "{code}");
    }
}

// ─── Snapshot round-trips ───

#[test]
fn snapshot_dump_load_preserves_call_info() {
    let m = monty("func(1, 2)", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let data = snapshot.dump().unwrap();
    assert!(!data.is_empty());

    let mut loaded = Snapshot::load(&data).unwrap();
    assert_eq!(loaded.function_name(), "func");
    assert_eq!(loaded.args(), &[int(1), int(2)]);
    assert!(loaded.kwargs().is_empty());

    let complete = loaded
        .resume(Outcome::Return(int(100)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(100));
}

#[test]
fn snapshot_load_in_fresh_process_resumes_like_the_original() {
    // the "unbroken" run
    let m = monty("a() + b()", &["a", "b"]);
    let mut s1 = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut s2 = s1.resume(Outcome::Return(int(10))).unwrap().into_snapshot().unwrap();
    let direct = s2
        .resume(Outcome::Return(int(5)))
        .unwrap()
        .into_complete()
        .unwrap();

    // the broken run: dump between the external calls, reload, resume
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut second = first.resume(Outcome::Return(int(10))).unwrap().into_snapshot().unwrap();
    let data = second.dump().unwrap();
    let mut restored = Snapshot::load(&data).unwrap();
    assert_eq!(restored.function_name(), "b");
    let resumed = restored
        .resume(Outcome::Return(int(5)))
        .unwrap()
        .into_complete()
        .unwrap();

    assert_eq!(direct.output(), resumed.output());
    assert_eq!(resumed.output(), &int(15));
}

#[test]
fn snapshot_preserves_heap_state_across_dump() {
    let code = "
items = [1, 2, 3]
lookup = {'scale': 10}
extra = fetch()
[x * lookup['scale'] for x in items] + [extra]
";
    let m = monty(code, &["fetch"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    let complete = loaded
        .resume(Outcome::Return(int(99)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(
        complete.output(),
        &HostValue::List(vec![int(10), int(20), int(30), int(99)])
    );
}

#[test]
fn snapshot_preserves_functions_and_closures() {
    let code = "
def scale_by(factor):
    def scale(x):
        return x * factor
    return scale

double = scale_by(2)
double(fetch())
";
    let m = monty(code, &["fetch"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    let complete = loaded
        .resume(Outcome::Return(int(21)))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(42));
}

#[test]
fn snapshot_dump_after_resume_fails() {
    let m = monty("func()", &["func"]);
    let mut snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    snapshot.resume(Outcome::Return(int(1))).unwrap();
    let err = snapshot.dump().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot dump progress that has already been resumed"
    );
}

#[test]
fn snapshot_load_rejects_garbage() {
    assert!(Snapshot::load(b"invalid data").is_err());
}

#[test]
fn snapshot_preserves_script_name() {
    let m = Monty::with_options(
        "func()",
        MontyOptions {
            script_name: Some("test.py".to_string()),
            external_functions: vec!["func".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    assert_eq!(loaded.script_name(), "test.py");
}

#[test]
fn snapshot_preserves_limit_counters() {
    let m = monty("xs = [1] * 100\nfunc()\nlen(xs)", &["func"]);
    let snapshot = m
        .start(StartOptions {
            limits: monty_vm::ResourceLimits::new().max_allocations(10_000),
            ..Default::default()
        })
        .unwrap()
        .into_snapshot()
        .unwrap();
    let mut loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    let complete = loaded
        .resume(Outcome::Return(HostValue::None))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &int(100));
}

// ─── FutureSnapshot round-trips ───

#[test]
fn future_snapshot_round_trips_and_replays() {
    let code = "
import asyncio

await asyncio.gather(foo(1), bar(2))
";
    let m = monty(code, &["foo", "bar"]);
    let mut first = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let foo_id = first.call_id();
    let mut second = first.resume(Outcome::Future).unwrap().into_snapshot().unwrap();
    let bar_id = second.call_id();
    let waiting = second
        .resume(Outcome::Future)
        .unwrap()
        .into_future_snapshot()
        .unwrap();

    let data = waiting.dump().unwrap();

    // first replay
    let mut replay = FutureSnapshot::load(&data).unwrap();
    let mut pending = replay.pending_call_ids().to_vec();
    pending.sort();
    let mut expected = vec![foo_id, bar_id];
    expected.sort();
    assert_eq!(pending, expected);
    let complete = replay
        .resume(vec![
            (bar_id, Outcome::Return(int(14))),
            (foo_id, Outcome::Return(int(13))),
        ])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![int(13), int(14)]));

    // second replay from the same bytes, partial first
    let mut replay = FutureSnapshot::load(&data).unwrap();
    let mut still = replay
        .resume(vec![
            (bar_id, Outcome::Return(int(14))),
            (foo_id, Outcome::Future),
        ])
        .unwrap()
        .into_future_snapshot()
        .unwrap();
    assert_eq!(still.pending_call_ids(), &[foo_id]);
    let complete = still
        .resume(vec![(foo_id, Outcome::Return(int(144)))])
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &HostValue::List(vec![int(144), int(14)]));
}

// ─── Host dataclasses ───

#[test]
fn registered_dataclass_round_trips_through_execution() {
    let mut m = Monty::with_options(
        "x",
        MontyOptions { inputs: vec!["x".to_string()], ..Default::default() },
    )
    .unwrap();
    m.register_dataclass("Person");
    let person = HostValue::Dataclass {
        name: "Person".to_string(),
        fields: vec![
            ("name".to_string(), s("Alice")),
            ("age".to_string(), int(30)),
        ],
    };
    let out = m
        .run(RunOptions {
            inputs: vec![("x".to_string(), person.clone())],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, person);
}

#[test]
fn dataclass_survives_snapshot_round_trip() {
    let m = monty("p = func()\np.name", &["func"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    let person = HostValue::Dataclass {
        name: "Person".to_string(),
        fields: vec![
            ("name".to_string(), s("Alice")),
            ("age".to_string(), int(30)),
        ],
    };
    let complete = loaded
        .resume(Outcome::Return(person))
        .unwrap()
        .into_complete()
        .unwrap();
    assert_eq!(complete.output(), &s("Alice"));
}

#[test]
fn script_dataclass_state_survives_dump() {
    let code = "
from dataclasses import dataclass

@dataclass
class Point:
    x: int
    y: int

p = Point(1, 2)
offset = fetch()
Point(p.x + offset, p.y + offset)
";
    let m = monty(code, &["fetch"]);
    let snapshot = m.start(StartOptions::default()).unwrap().into_snapshot().unwrap();
    let mut loaded = Snapshot::load(&snapshot.dump().unwrap()).unwrap();
    let complete = loaded
        .resume(Outcome::Return(int(10)))
        .unwrap()
        .into_complete()
        .unwrap();
    let HostValue::Dataclass { name, fields } = complete.output() else {
        panic!("expected a dataclass output");
    };
    assert_eq!(name, "Point");
    assert_eq!(fields[0].1, int(11));
    assert_eq!(fields[1].1, int(12));
}
