//! End-to-end tests: compile Monty source and run it to completion.

use monty_vm::{HostValue, Monty, MontyError, RunOptions};

/// Helper: compile and run a script with no inputs or handlers.
fn run(source: &str) -> HostValue {
    let m = Monty::new(source).expect("source should compile");
    m.run(RunOptions::default()).expect("script should run")
}

/// Helper: run and return the error the script raised.
fn run_err(source: &str) -> MontyError {
    let m = Monty::new(source).expect("source should compile");
    m.run(RunOptions::default()).expect_err("script should fail")
}

fn int(n: i64) -> HostValue {
    HostValue::Int(n)
}

fn s(text: &str) -> HostValue {
    HostValue::Str(text.to_string())
}

// ─── Expressions ───

#[test]
fn simple_arithmetic() {
    assert_eq!(run("1 + 2 * 3"), int(7));
}

#[test]
fn operator_precedence_and_parens() {
    assert_eq!(run("(1 + 2) * 3"), int(9));
    assert_eq!(run("2 ** 3 ** 2"), int(512));
    assert_eq!(run("-2 ** 2"), int(-4));
}

#[test]
fn true_division_is_float() {
    assert_eq!(run("7 / 2"), HostValue::Float(3.5));
}

#[test]
fn floor_division_and_modulo_signs() {
    assert_eq!(run("-7 // 2"), int(-4));
    assert_eq!(run("7 // -2"), int(-4));
    assert_eq!(run("-7 % 2"), int(1));
    assert_eq!(run("7 % -2"), int(-1));
}

#[test]
fn arbitrary_precision_integers() {
    let HostValue::BigInt(n) = run("2 ** 100") else {
        panic!("expected a big integer");
    };
    assert_eq!(n.to_string(), "1267650600228229401496703205376");
}

#[test]
fn big_integer_arithmetic_round_trips_to_small() {
    assert_eq!(run("(2 ** 100) // (2 ** 90)"), int(1024));
}

#[test]
fn string_concatenation() {
    assert_eq!(run("\"hello\" + \" \" + \"world\""), s("hello world"));
}

#[test]
fn string_repetition() {
    assert_eq!(run("'ab' * 3"), s("ababab"));
}

#[test]
fn fstring_interpolation() {
    assert_eq!(run("x = 6\nf'value={x * 7}!'"), s("value=42!"));
}

#[test]
fn fstring_repr_conversion() {
    assert_eq!(run("name = 'bob'\nf'{name!r}'"), s("'bob'"));
}

#[test]
fn boolean_operators_short_circuit() {
    assert_eq!(run("True and 2"), int(2));
    assert_eq!(run("0 or 'fallback'"), s("fallback"));
    assert_eq!(run("False and undefined_name"), HostValue::Bool(false));
}

#[test]
fn chained_comparison() {
    assert_eq!(run("1 < 2 < 3"), HostValue::Bool(true));
    assert_eq!(run("1 < 2 > 3"), HostValue::Bool(false));
    assert_eq!(run("x = 5\n0 <= x <= 10 <= 9"), HostValue::Bool(false));
}

#[test]
fn conditional_expression() {
    assert_eq!(run("'a' if 1 > 2 else 'b'"), s("b"));
}

#[test]
fn bool_equals_int() {
    assert_eq!(run("True == 1"), HostValue::Bool(true));
    assert_eq!(run("False == 0"), HostValue::Bool(true));
    assert_eq!(run("True is 1"), HostValue::Bool(false));
}

#[test]
fn membership_tests() {
    assert_eq!(run("2 in [1, 2, 3]"), HostValue::Bool(true));
    assert_eq!(run("'ell' in 'hello'"), HostValue::Bool(true));
    assert_eq!(run("'k' not in {'a': 1}"), HostValue::Bool(true));
}

// ─── Statements and control flow ───

#[test]
fn multiline_assignment() {
    assert_eq!(run("x = 1\ny = 2\nx + y"), int(3));
}

#[test]
fn augmented_assignment() {
    assert_eq!(run("x = 10\nx += 5\nx *= 2\nx"), int(30));
}

#[test]
fn chained_assignment() {
    assert_eq!(run("a = b = 3\na + b"), int(6));
}

#[test]
fn tuple_unpacking() {
    assert_eq!(run("a, b = 1, 2\na + b"), int(3));
    assert_eq!(run("a, b = b, a = 1, 2\na + b"), int(3));
}

#[test]
fn if_elif_else() {
    let code = "
x = 7
if x > 10:
    r = 'big'
elif x > 5:
    r = 'medium'
else:
    r = 'small'
r
";
    assert_eq!(run(code), s("medium"));
}

#[test]
fn while_loop_with_break_continue() {
    let code = "
total = 0
i = 0
while True:
    i += 1
    if i > 10:
        break
    if i % 2 == 0:
        continue
    total += i
total
";
    assert_eq!(run(code), int(25));
}

#[test]
fn for_loop_over_range() {
    assert_eq!(run("t = 0\nfor i in range(5):\n    t += i\nt"), int(10));
}

#[test]
fn for_loop_unpacks_pairs() {
    let code = "
total = 0
for k, v in {'a': 1, 'b': 2}.items():
    total += v
total
";
    assert_eq!(run(code), int(3));
}

#[test]
fn nested_loops() {
    let code = "
pairs = []
for i in range(3):
    for j in range(2):
        pairs.append(i * 10 + j)
pairs
";
    assert_eq!(
        run(code),
        HostValue::List(vec![int(0), int(1), int(10), int(11), int(20), int(21)])
    );
}

#[test]
fn semicolons_separate_statements() {
    assert_eq!(run("x = 1; y = 2; x + y"), int(3));
}

#[test]
fn del_removes_bindings() {
    let err = run_err("x = 1\ndel x\nx");
    assert_eq!(err.exception_kind(), Some("NameError"));
}

#[test]
fn assert_failure_raises() {
    let err = run_err("assert 1 == 2, 'mismatch'");
    assert_eq!(err.exception_kind(), Some("AssertionError"));
    assert!(err.to_string().contains("mismatch"));
}

// ─── Functions and closures ───

#[test]
fn function_definition_and_call() {
    let code = "
def add(a, b):
    return a + b

add(3, 4)
";
    assert_eq!(run(code), int(7));
}

#[test]
fn default_parameters() {
    let code = "
def greet(name, greeting='hello'):
    return greeting + ' ' + name

greet('bob') + '|' + greet('eve', greeting='hi')
";
    assert_eq!(run(code), s("hello bob|hi eve"));
}

#[test]
fn keyword_arguments() {
    let code = "
def sub(a, b):
    return a - b

sub(b=3, a=10)
";
    assert_eq!(run(code), int(7));
}

#[test]
fn recursion() {
    let code = "
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)

fib(10)
";
    assert_eq!(run(code), int(55));
}

#[test]
fn closures_capture_enclosing_variables() {
    let code = "
def make_counter():
    count = 0
    def bump():
        nonlocal count
        count += 1
        return count
    return bump

c = make_counter()
c()
c()
c()
";
    assert_eq!(run(code), int(3));
}

#[test]
fn closures_read_outer_scope() {
    let code = "
def outer():
    x = 10
    def inner():
        return x * 2
    return inner()

outer()
";
    assert_eq!(run(code), int(20));
}

#[test]
fn global_statement_writes_module_scope() {
    let code = "
count = 0

def bump():
    global count
    count = count + 1

bump()
bump()
count
";
    assert_eq!(run(code), int(2));
}

#[test]
fn lambda_expressions() {
    assert_eq!(run("double = lambda x: x * 2\ndouble(21)"), int(42));
}

#[test]
fn wrong_arity_raises_type_error() {
    let err = run_err("def f(a):\n    return a\nf(1, 2)");
    assert_eq!(err.exception_kind(), Some("TypeError"));
}

// ─── Collections ───

#[test]
fn list_literals_and_methods() {
    let code = "
xs = [3, 1, 2]
xs.append(4)
xs.sort()
xs
";
    assert_eq!(run(code), HostValue::List(vec![int(1), int(2), int(3), int(4)]));
}

#[test]
fn list_indexing_and_slicing() {
    assert_eq!(run("[10, 20, 30][-1]"), int(30));
    assert_eq!(
        run("[0, 1, 2, 3, 4][1:4:2]"),
        HostValue::List(vec![int(1), int(3)])
    );
    assert_eq!(
        run("[0, 1, 2, 3][::-1]"),
        HostValue::List(vec![int(3), int(2), int(1), int(0)])
    );
}

#[test]
fn string_slicing() {
    assert_eq!(run("'hello'[1:4]"), s("ell"));
    assert_eq!(run("'hello'[::-1]"), s("olleh"));
}

#[test]
fn dict_operations() {
    let code = "
d = {'a': 1}
d['b'] = 2
d['a'] += 10
[d['a'], d.get('b'), d.get('missing', 99), len(d)]
";
    assert_eq!(
        run(code),
        HostValue::List(vec![int(11), int(2), int(99), int(2)])
    );
}

#[test]
fn dict_preserves_insertion_order() {
    let code = "
d = {}
d['z'] = 1
d['a'] = 2
d['m'] = 3
list(d.keys())
";
    assert_eq!(run(code), HostValue::List(vec![s("z"), s("a"), s("m")]));
}

#[test]
fn missing_key_raises() {
    let err = run_err("{'a': 1}['b']");
    assert_eq!(err.exception_kind(), Some("KeyError"));
}

#[test]
fn set_operations() {
    assert_eq!(run("len({1, 2, 2, 3})"), int(3));
    assert_eq!(run("{1, 2} | {2, 3} == {1, 2, 3}"), HostValue::Bool(true));
    assert_eq!(run("{1, 2, 3} & {2, 3, 4} == {2, 3}"), HostValue::Bool(true));
    assert_eq!(run("{1, 2}.issubset({1, 2, 3})"), HostValue::Bool(true));
}

#[test]
fn tuple_values() {
    assert_eq!(
        run("(1, 'two', 3.0)"),
        HostValue::Tuple(vec![int(1), s("two"), HostValue::Float(3.0)])
    );
}

#[test]
fn list_comprehension() {
    assert_eq!(
        run("[x * 2 for x in range(4)]"),
        HostValue::List(vec![int(0), int(2), int(4), int(6)])
    );
}

#[test]
fn comprehension_with_condition() {
    assert_eq!(
        run("[x for x in range(10) if x % 3 == 0]"),
        HostValue::List(vec![int(0), int(3), int(6), int(9)])
    );
}

#[test]
fn nested_comprehension() {
    assert_eq!(
        run("[i * 10 + j for i in range(2) for j in range(2)]"),
        HostValue::List(vec![int(0), int(1), int(10), int(11)])
    );
}

#[test]
fn dict_and_set_comprehensions() {
    assert_eq!(run("{x: x * x for x in range(3)}[2]"), int(4));
    assert_eq!(run("len({x % 3 for x in range(10)})"), int(3));
}

#[test]
fn string_methods() {
    assert_eq!(run("'Hello World'.upper()"), s("HELLO WORLD"));
    assert_eq!(run("'  pad  '.strip()"), s("pad"));
    assert_eq!(
        run("'a,b,c'.split(',')"),
        HostValue::List(vec![s("a"), s("b"), s("c")])
    );
    assert_eq!(run("'-'.join(['a', 'b'])"), s("a-b"));
    assert_eq!(run("'hello'.replace('l', 'L')"), s("heLLo"));
    assert_eq!(run("'hello'.startswith('he')"), HostValue::Bool(true));
    assert_eq!(run("'hello'.find('ll')"), int(2));
    assert_eq!(run("'hello'.find('zz')"), int(-1));
}

#[test]
fn bytes_round_trip() {
    assert_eq!(run("b'abc' + b'def'"), HostValue::Bytes(b"abcdef".to_vec()));
    assert_eq!(run("'hi'.encode().decode()"), s("hi"));
    assert_eq!(run("b'abc'[1]"), int(98));
}

// ─── Built-ins ───

#[test]
fn builtin_len() {
    assert_eq!(run("len('hello')"), int(5));
    assert_eq!(run("len([1, 2, 3])"), int(3));
    assert_eq!(run("len(range(10))"), int(10));
}

#[test]
fn builtin_conversions() {
    assert_eq!(run("int('42')"), int(42));
    assert_eq!(run("int('ff', 16)"), int(255));
    assert_eq!(run("int(3.9)"), int(3));
    assert_eq!(run("float('2.5')"), HostValue::Float(2.5));
    assert_eq!(run("str(42)"), s("42"));
    assert_eq!(run("bool([])"), HostValue::Bool(false));
}

#[test]
fn builtin_aggregates() {
    assert_eq!(run("sum([1, 2, 3])"), int(6));
    assert_eq!(run("sum(range(101))"), int(5050));
    assert_eq!(run("min(3, 1, 2)"), int(1));
    assert_eq!(run("max([5, 9, 2])"), int(9));
    assert_eq!(run("any([0, '', 3])"), HostValue::Bool(true));
    assert_eq!(run("all([1, 2, 0])"), HostValue::Bool(false));
}

#[test]
fn builtin_sorted_with_key_and_reverse() {
    assert_eq!(
        run("sorted([3, 1, 2], reverse=True)"),
        HostValue::List(vec![int(3), int(2), int(1)])
    );
    assert_eq!(
        run("sorted(['bbb', 'a', 'cc'], key=len)"),
        HostValue::List(vec![s("a"), s("cc"), s("bbb")])
    );
    assert_eq!(
        run("sorted([(2, 'b'), (1, 'a')], key=lambda p: p[0])"),
        HostValue::List(vec![
            HostValue::Tuple(vec![int(1), s("a")]),
            HostValue::Tuple(vec![int(2), s("b")]),
        ])
    );
}

#[test]
fn builtin_zip_enumerate_reversed() {
    assert_eq!(
        run("list(zip([1, 2], ['a', 'b']))"),
        HostValue::List(vec![
            HostValue::Tuple(vec![int(1), s("a")]),
            HostValue::Tuple(vec![int(2), s("b")]),
        ])
    );
    assert_eq!(
        run("[i * v for i, v in enumerate([5, 6])]"),
        HostValue::List(vec![int(0), int(6)])
    );
    assert_eq!(
        run("list(reversed([1, 2, 3]))"),
        HostValue::List(vec![int(3), int(2), int(1)])
    );
}

#[test]
fn builtin_numeric_helpers() {
    assert_eq!(run("abs(-5)"), int(5));
    assert_eq!(run("divmod(7, 2)"), HostValue::Tuple(vec![int(3), int(1)]));
    assert_eq!(run("pow(2, 10)"), int(1024));
    assert_eq!(run("pow(2, 10, 1000)"), int(24));
    assert_eq!(run("round(2.5)"), int(2));
    assert_eq!(run("round(3.5)"), int(4));
    assert_eq!(run("hex(255)"), s("0xff"));
    assert_eq!(run("bin(5)"), s("0b101"));
    assert_eq!(run("ord('A')"), int(65));
    assert_eq!(run("chr(97)"), s("a"));
}

#[test]
fn builtin_isinstance() {
    assert_eq!(run("isinstance(1, int)"), HostValue::Bool(true));
    assert_eq!(run("isinstance(True, int)"), HostValue::Bool(true));
    assert_eq!(run("isinstance('x', int)"), HostValue::Bool(false));
    assert_eq!(run("isinstance([], list)"), HostValue::Bool(true));
}

#[test]
fn builtin_repr() {
    assert_eq!(run("repr('hi')"), s("'hi'"));
    assert_eq!(run("repr([1, 'a', None])"), s("[1, 'a', None]"));
    assert_eq!(run("repr(1.0)"), s("1.0"));
    assert_eq!(run("repr((1,))"), s("(1,)"));
}

#[test]
fn hash_equal_values_hash_equal() {
    assert_eq!(run("hash(1) == hash(True)"), HostValue::Bool(true));
    assert_eq!(run("hash(1) == hash(1.0)"), HostValue::Bool(true));
}

// ─── Classes and dataclasses ───

#[test]
fn plain_class_with_init_and_method() {
    let code = "
class Counter:
    def __init__(self, start):
        self.value = start

    def bump(self, by=1):
        self.value = self.value + by
        return self.value

c = Counter(10)
c.bump()
c.bump(by=5)
c.value
";
    assert_eq!(run(code), int(16));
}

#[test]
fn dataclass_init_repr_eq() {
    let code = "
from dataclasses import dataclass

@dataclass
class Point:
    x: int
    y: int = 0

[repr(Point(1, 2)), Point(1) == Point(1, 0), Point(1) == Point(2)]
";
    assert_eq!(
        run(code),
        HostValue::List(vec![
            s("Point(x=1, y=2)"),
            HostValue::Bool(true),
            HostValue::Bool(false),
        ])
    );
}

#[test]
fn frozen_dataclass_rejects_assignment() {
    let code = "
from dataclasses import dataclass

@dataclass(frozen=True)
class Point:
    x: int
    y: int

p = Point(1, 2)
p.x = 10
";
    let err = run_err(code);
    assert_eq!(err.exception_kind(), Some("FrozenInstanceError"));
    assert!(err.to_string().contains("cannot assign to field 'x'"));
}

#[test]
fn frozen_dataclass_rejects_new_attributes() {
    let code = "
from dataclasses import dataclass

@dataclass(frozen=True)
class Point:
    x: int
    y: int

p = Point(1, 2)
p.z = 42
";
    let err = run_err(code);
    assert_eq!(err.exception_kind(), Some("FrozenInstanceError"));
    assert!(err.to_string().contains("cannot assign to field 'z'"));
}

#[test]
fn dataclass_converts_to_host_value() {
    let code = "
from dataclasses import dataclass

@dataclass
class Person:
    name: str
    age: int

Person('Alice', 30)
";
    let HostValue::Dataclass { name, fields } = run(code) else {
        panic!("expected a dataclass value");
    };
    assert_eq!(name, "Person");
    assert_eq!(fields[0], ("name".to_string(), s("Alice")));
    assert_eq!(fields[1], ("age".to_string(), int(30)));
}

#[test]
fn method_on_dataclass() {
    let code = "
from dataclasses import dataclass

@dataclass
class Rect:
    w: int
    h: int

    def area(self):
        return self.w * self.h

Rect(3, 4).area()
";
    assert_eq!(run(code), int(12));
}

// ─── Exceptions ───

#[test]
fn try_except_catches() {
    let code = "
try:
    1 / 0
except ZeroDivisionError:
    r = 'caught'
r
";
    assert_eq!(run(code), s("caught"));
}

#[test]
fn except_matches_by_inheritance() {
    let code = "
try:
    1 / 0
except ArithmeticError as e:
    r = str(e)
r
";
    assert_eq!(run(code), s("division by zero"));
}

#[test]
fn except_tuple_of_kinds() {
    let code = "
try:
    [1][5]
except (KeyError, IndexError):
    r = 'caught'
r
";
    assert_eq!(run(code), s("caught"));
}

#[test]
fn unmatched_exception_propagates() {
    let code = "
try:
    1 / 0
except KeyError:
    r = 'wrong'
";
    let err = run_err(code);
    assert_eq!(err.exception_kind(), Some("ZeroDivisionError"));
}

#[test]
fn finally_runs_on_both_paths() {
    let code = "
events = []
try:
    events.append('body')
except ValueError:
    events.append('handler')
finally:
    events.append('finally')
events
";
    assert_eq!(run(code), HostValue::List(vec![s("body"), s("finally")]));

    let code = "
events = []
try:
    try:
        raise ValueError('boom')
    finally:
        events.append('finally')
except ValueError:
    events.append('caught')
events
";
    assert_eq!(run(code), HostValue::List(vec![s("finally"), s("caught")]));
}

#[test]
fn try_else_runs_without_exception() {
    let code = "
r = []
try:
    r.append('body')
except ValueError:
    r.append('handler')
else:
    r.append('else')
r
";
    assert_eq!(run(code), HostValue::List(vec![s("body"), s("else")]));
}

#[test]
fn raise_with_message() {
    let err = run_err("raise ValueError('bad value')");
    assert_eq!(err.exception_kind(), Some("ValueError"));
    assert_eq!(err.to_string(), "ValueError: bad value");
}

#[test]
fn bare_raise_rethrows() {
    let code = "
try:
    try:
        raise KeyError('k')
    except KeyError:
        raise
except KeyError:
    r = 'outer'
r
";
    assert_eq!(run(code), s("outer"));
}

#[test]
fn finally_runs_before_return() {
    let code = "
events = []

def f():
    try:
        return 'returned'
    finally:
        events.append('finally')

[f(), events]
";
    assert_eq!(
        run(code),
        HostValue::List(vec![s("returned"), HostValue::List(vec![s("finally")])])
    );
}

#[test]
fn traceback_text_includes_frames() {
    let code = "
def inner():
    raise ValueError('deep')

def outer():
    return inner()

outer()
";
    let err = run_err(code);
    let traceback = err.traceback().expect("runtime errors carry a traceback");
    assert!(traceback.starts_with("Traceback (most recent call last):"));
    assert!(traceback.contains("in outer"));
    assert!(traceback.contains("in inner"));
    assert!(traceback.ends_with("ValueError: deep"));
}

#[test]
fn name_error_message() {
    let err = run_err("unknown_variable");
    assert_eq!(err.to_string(), "NameError: name 'unknown_variable' is not defined");
}

#[test]
fn attribute_error_message() {
    let err = run_err("'text'.missing_method");
    assert_eq!(
        err.to_string(),
        "AttributeError: 'str' object has no attribute 'missing_method'"
    );
}

#[test]
fn type_error_on_mixed_operands() {
    let err = run_err("1 + 'x'");
    assert_eq!(
        err.to_string(),
        "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
    );
}

// ─── Imports ───

#[test]
fn allowlisted_imports_succeed() {
    assert_eq!(run("import os\nimport sys\nimport asyncio\n1"), int(1));
}

#[test]
fn unknown_import_fails_at_import_opcode() {
    let code = "
condition = True
if condition:
    import nonexistent_at_runtime
";
    let err = run_err(code);
    assert_eq!(err.exception_kind(), Some("ModuleNotFoundError"));
    assert_eq!(
        err.to_string(),
        "ModuleNotFoundError: No module named 'nonexistent_at_runtime'"
    );
}

#[test]
fn unknown_import_not_reached_is_fine() {
    let code = "
condition = False
if condition:
    import nonexistent_at_runtime
'ok'
";
    assert_eq!(run(code), s("ok"));
}

#[test]
fn type_checking_guard_is_false() {
    let code = "
from typing import TYPE_CHECKING

if TYPE_CHECKING:
    import not_a_real_module

'ok'
";
    assert_eq!(run(code), s("ok"));
}

#[test]
fn sys_version_info_attributes() {
    assert_eq!(run("import sys\nsys.version_info.major"), int(3));
    let err = run_err("import sys\nsys.version_info.foobar");
    assert_eq!(
        err.to_string(),
        "AttributeError: 'sys.version_info' object has no attribute 'foobar'"
    );
}

// ─── Inputs ───

#[test]
fn inputs_bind_as_globals() {
    let m = Monty::with_options(
        "x + y",
        monty_vm::MontyOptions {
            inputs: vec!["x".to_string(), "y".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    let out = m
        .run(RunOptions {
            inputs: vec![("x".to_string(), int(10)), ("y".to_string(), int(20))],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, int(30));
    // reuse with different values: no cross-run state leak
    let out = m
        .run(RunOptions {
            inputs: vec![("x".to_string(), int(100)), ("y".to_string(), int(200))],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(out, int(300));
}

#[test]
fn missing_input_is_invalid_argument() {
    let m = Monty::with_options(
        "x",
        monty_vm::MontyOptions { inputs: vec!["x".to_string()], ..Default::default() },
    )
    .unwrap();
    let err = m.run(RunOptions::default()).unwrap_err();
    assert!(matches!(err, MontyError::InvalidArgument(_)));
}

#[test]
fn extra_input_is_invalid_argument() {
    let m = Monty::new("1").unwrap();
    let err = m
        .run(RunOptions {
            inputs: vec![("x".to_string(), int(1))],
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, MontyError::InvalidArgument(_)));
}

// ─── Monty metadata ───

#[test]
fn repr_shows_line_count_and_names() {
    let m = Monty::new("1 + 1").unwrap();
    assert_eq!(m.repr(), "Monty(<1 line of code>, script_name='main.py')");

    let m = Monty::with_options(
        "foo(x)",
        monty_vm::MontyOptions {
            inputs: vec!["x".to_string()],
            external_functions: vec!["foo".to_string()],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        m.repr(),
        "Monty(<1 line of code>, script_name='main.py', inputs=[\"x\"], external_functions=[\"foo\"])"
    );
}

#[test]
fn syntax_error_reports_script_name() {
    let err = Monty::new("def broken(:\n    pass").unwrap_err();
    let MontyError::Syntax(syntax) = err else {
        panic!("expected a syntax error");
    };
    assert_eq!(syntax.script_name, "main.py");
    assert_eq!(syntax.line, 1);
}

#[test]
fn script_output_none_for_trailing_statement() {
    assert_eq!(run("x = 1"), HostValue::None);
}

#[test]
fn various_literal_outputs() {
    assert_eq!(run("None"), HostValue::None);
    assert_eq!(run("True"), HostValue::Bool(true));
    assert_eq!(run("'hello'"), s("hello"));
    assert_eq!(run("[1, 2, 3]"), HostValue::List(vec![int(1), int(2), int(3)]));
    assert_eq!(
        run("{'a': 1}"),
        HostValue::Dict(vec![(s("a"), int(1))])
    );
}
