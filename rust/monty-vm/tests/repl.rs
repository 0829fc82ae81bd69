//! REPL: persistent top-level scope across feeds, with dump/load.

use monty_vm::{HostValue, Repl, ReplOptions};

fn int(n: i64) -> HostValue {
    HostValue::Int(n)
}

#[test]
fn create_and_feed_share_state() {
    let (mut repl, output) = Repl::create("counter = 0").unwrap();
    assert_eq!(output, HostValue::None);
    assert_eq!(repl.feed("counter = counter + 1").unwrap(), HostValue::None);
    assert_eq!(repl.feed("counter").unwrap(), int(1));
}

#[test]
fn feed_returns_final_expression_value() {
    let (mut repl, _) = Repl::create("x = 40").unwrap();
    assert_eq!(repl.feed("x + 2").unwrap(), int(42));
    assert_eq!(repl.feed("y = x").unwrap(), HostValue::None);
}

#[test]
fn functions_defined_earlier_stay_callable() {
    let (mut repl, _) = Repl::create("def double(x):\n    return x * 2\n").unwrap();
    assert_eq!(repl.feed("double(4)").unwrap(), int(8));
    assert_eq!(repl.feed("double(double(3))").unwrap(), int(12));
}

#[test]
fn heap_objects_persist_across_feeds() {
    let (mut repl, _) = Repl::create("xs = [1, 2]").unwrap();
    repl.feed("xs.append(3)").unwrap();
    assert_eq!(
        repl.feed("xs").unwrap(),
        HostValue::List(vec![int(1), int(2), int(3)])
    );
}

#[test]
fn create_with_start_inputs() {
    let (mut repl, output) = Repl::create_with(
        "counter = start",
        ReplOptions {
            inputs: vec!["start".to_string()],
            start_inputs: vec![("start".to_string(), int(0))],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(output, HostValue::None);
    assert_eq!(repl.feed("counter = counter + 1").unwrap(), HostValue::None);
    assert_eq!(repl.feed("counter").unwrap(), int(1));
}

#[test]
fn dump_load_round_trip() {
    let (mut repl, _) = Repl::create("x = 40").unwrap();
    repl.feed("x = x + 1").unwrap();

    let serialized = repl.dump();
    let mut loaded = Repl::load(&serialized).unwrap();
    assert_eq!(loaded.feed("x + 1").unwrap(), int(42));
}

#[test]
fn dump_preserves_functions_and_classes() {
    let source = "
from dataclasses import dataclass

@dataclass
class Point:
    x: int
    y: int

def shift(p, d):
    return Point(p.x + d, p.y + d)

origin = Point(0, 0)
";
    let (repl, _) = Repl::create(source).unwrap();
    let mut loaded = Repl::load(&repl.dump()).unwrap();
    assert_eq!(
        loaded.feed("repr(shift(origin, 2))").unwrap(),
        HostValue::Str("Point(x=2, y=2)".to_string())
    );
}

#[test]
fn feed_errors_leave_scope_usable() {
    let (mut repl, _) = Repl::create("x = 1").unwrap();
    let err = repl.feed("1 / 0").unwrap_err();
    assert_eq!(err.exception_kind(), Some("ZeroDivisionError"));
    assert_eq!(repl.feed("x + 1").unwrap(), int(2));
}

#[test]
fn syntax_error_in_feed_is_reported() {
    let (mut repl, _) = Repl::create("x = 1").unwrap();
    assert!(repl.feed("def broken(:").is_err());
    assert_eq!(repl.feed("x").unwrap(), int(1));
}

#[test]
fn limits_carry_across_feeds() {
    let (mut repl, _) = Repl::create_with(
        "xs = []",
        ReplOptions {
            limits: monty_vm::ResourceLimits::new().max_allocations(400),
            ..Default::default()
        },
    )
    .unwrap();
    // each feed allocates; the budget is shared by the whole session
    let mut failed = false;
    for _ in 0..100 {
        if repl.feed("xs.append([1, 2, 3])").is_err() {
            failed = true;
            break;
        }
    }
    assert!(failed, "the shared allocation budget should run out");
}

#[test]
fn heap_stats_reflect_live_objects() {
    let (mut repl, _) = Repl::create("xs = list(range(100))").unwrap();
    let (count_before, bytes_before) = repl.heap_stats();
    assert!(count_before > 0);
    assert!(bytes_before > 0);
    repl.feed("ys = list(range(100))").unwrap();
    let (_, bytes_after) = repl.heap_stats();
    assert!(bytes_after > bytes_before);
}
