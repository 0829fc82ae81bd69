//! Binary, unary, and comparison operator semantics.
//!
//! Integer arithmetic has arbitrary precision: the i64 fast path uses
//! checked operations and promotes to a heap big integer on overflow.
//! `//` truncates toward negative infinity and `%` takes the sign of the
//! divisor.

use crate::exception::{ExcKind, RunError, RunResult};
use crate::heap::{Heap, HeapId};
use crate::object::{DictData, HeapData, SetData};
use crate::values::{
    as_number, is_truthy, py_hash, type_name, values_equal, Number, StrRef, Value,
};
use monty_compiler::{BinOp, CmpOp, UnOp};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::cmp::Ordering;

/// Store a big integer, demoting to an immediate when it fits.
pub(crate) fn fit_big(heap: &mut Heap, n: BigInt) -> RunResult<Value> {
    match n.to_i64() {
        Some(small) => Ok(Value::Int(small)),
        None => Ok(Value::Ref(heap.alloc(HeapData::BigInt(n))?)),
    }
}

fn big_of(heap: &Heap, n: Number) -> BigInt {
    match n {
        Number::Int(x) => BigInt::from(x),
        Number::Big(id) => heap.big(id).clone(),
        Number::Float(_) => unreachable!("float has no big integer form"),
    }
}

fn float_of(heap: &Heap, n: Number) -> f64 {
    match n {
        Number::Int(x) => x as f64,
        Number::Big(id) => heap.big(id).to_f64().unwrap_or(f64::INFINITY),
        Number::Float(f) => f,
    }
}

fn type_error_binary(op: BinOp, a: Value, b: Value, heap: &Heap) -> RunError {
    RunError::spec(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            type_name(a, heap),
            type_name(b, heap)
        ),
    )
}

/// Evaluate `a op b`.
pub(crate) fn binary_op(heap: &mut Heap, op: BinOp, a: Value, b: Value) -> RunResult<Value> {
    // bools keep their type under bitwise operators
    if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(x & y)),
            BinOp::BitOr => return Ok(Value::Bool(x | y)),
            BinOp::BitXor => return Ok(Value::Bool(x ^ y)),
            _ => {}
        }
    }
    if let (Some(x), Some(y)) = (as_number(a, heap), as_number(b, heap)) {
        return numeric_op(heap, op, x, y).map_err(|e| match e {
            RunError::Spec { kind, message } if message.is_empty() => {
                let _ = kind;
                type_error_binary(op, a, b, heap)
            }
            other => other,
        });
    }
    match op {
        BinOp::Add => add_values(heap, a, b),
        BinOp::Mul => mul_values(heap, a, b),
        BinOp::Div => {
            // path / str joins paths
            if let Value::Ref(id) = a {
                if let HeapData::Path(base) = heap.get(id) {
                    let base = base.clone();
                    let seg = match b {
                        Value::Str(s) => heap.str_of(s).to_string(),
                        Value::Ref(o) => match heap.get(o) {
                            HeapData::Path(p) => p.clone(),
                            HeapData::Str(s) => s.clone(),
                            _ => return Err(type_error_binary(op, a, b, heap)),
                        },
                        _ => return Err(type_error_binary(op, a, b, heap)),
                    };
                    let joined = crate::os::join_paths(&base, &seg);
                    return Ok(Value::Ref(heap.alloc(HeapData::Path(joined))?));
                }
            }
            Err(type_error_binary(op, a, b, heap))
        }
        BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor => set_op(heap, op, a, b),
        _ => Err(type_error_binary(op, a, b, heap)),
    }
}

fn numeric_op(heap: &mut Heap, op: BinOp, x: Number, y: Number) -> RunResult<Value> {
    // any float operand forces float arithmetic
    if matches!(x, Number::Float(_)) || matches!(y, Number::Float(_)) {
        return float_arith(op, float_of(heap, x), float_of(heap, y));
    }
    if let (Number::Int(a), Number::Int(b)) = (x, y) {
        if let Some(v) = int_fast_path(op, a, b)? {
            return Ok(v);
        }
    }
    let a = big_of(heap, x);
    let b = big_of(heap, y);
    big_arith(heap, op, a, b)
}

/// Checked i64 arithmetic; `Ok(None)` means promote to big integers.
fn int_fast_path(op: BinOp, a: i64, b: i64) -> RunResult<Option<Value>> {
    let out = match op {
        BinOp::Add => a.checked_add(b).map(Value::Int),
        BinOp::Sub => a.checked_sub(b).map(Value::Int),
        BinOp::Mul => a.checked_mul(b).map(Value::Int),
        BinOp::Div => {
            if b == 0 {
                return Err(RunError::spec(ExcKind::ZeroDivisionError, "division by zero"));
            }
            Some(Value::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(RunError::spec(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            match (a.checked_div(b), a.checked_rem(b)) {
                (Some(q), Some(r)) => {
                    let q = if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q };
                    Some(Value::Int(q))
                }
                _ => None,
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RunError::spec(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            match a.checked_rem(b) {
                Some(r) => {
                    let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
                    Some(Value::Int(r))
                }
                None => None,
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(RunError::spec(
                        ExcKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Some(Value::Float((a as f64).powf(b as f64))));
            }
            match u32::try_from(b).ok().and_then(|e| a.checked_pow(e)) {
                Some(n) => Some(Value::Int(n)),
                None => None,
            }
        }
        BinOp::BitAnd => Some(Value::Int(a & b)),
        BinOp::BitOr => Some(Value::Int(a | b)),
        BinOp::BitXor => Some(Value::Int(a ^ b)),
        BinOp::Shl => {
            if b < 0 {
                return Err(RunError::spec(ExcKind::ValueError, "negative shift count"));
            }
            if b < 63 && a.checked_shl(b as u32).is_some_and(|n| n >> b == a) {
                Some(Value::Int(a << b))
            } else {
                None
            }
        }
        BinOp::Shr => {
            if b < 0 {
                return Err(RunError::spec(ExcKind::ValueError, "negative shift count"));
            }
            Some(Value::Int(a >> b.min(63)))
        }
    };
    Ok(out)
}

fn big_arith(heap: &mut Heap, op: BinOp, a: BigInt, b: BigInt) -> RunResult<Value> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b.is_zero() {
                return Err(RunError::spec(ExcKind::ZeroDivisionError, "division by zero"));
            }
            let x = a.to_f64().unwrap_or(f64::INFINITY);
            let y = b.to_f64().unwrap_or(f64::INFINITY);
            return Ok(Value::Float(x / y));
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return Err(RunError::spec(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let q = &a / &b;
            let r = &a % &b;
            if !r.is_zero() && r.is_negative() != b.is_negative() {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b.is_zero() {
                return Err(RunError::spec(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let r = &a % &b;
            if !r.is_zero() && r.is_negative() != b.is_negative() {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            let Some(exp) = b.to_u32() else {
                if b.is_negative() {
                    let x = a.to_f64().unwrap_or(f64::INFINITY);
                    let y = b.to_f64().unwrap_or(f64::NEG_INFINITY);
                    return Ok(Value::Float(x.powf(y)));
                }
                return Err(RunError::spec(
                    ExcKind::OverflowError,
                    "exponent too large to compute",
                ));
            };
            num_traits::pow::pow(a, exp as usize)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => {
            let Some(shift) = b.to_usize() else {
                return Err(RunError::spec(ExcKind::ValueError, "negative shift count"));
            };
            a << shift
        }
        BinOp::Shr => {
            let Some(shift) = b.to_usize() else {
                return Err(RunError::spec(ExcKind::ValueError, "negative shift count"));
            };
            a >> shift
        }
    };
    fit_big(heap, result)
}

/// IEEE 754 float arithmetic, with the language's division-by-zero errors.
fn float_arith(op: BinOp, x: f64, y: f64) -> RunResult<Value> {
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(RunError::spec(ExcKind::ZeroDivisionError, "float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(RunError::spec(ExcKind::ZeroDivisionError, "float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(RunError::spec(ExcKind::ZeroDivisionError, "float modulo"));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => x.powf(y),
        _ => return Err(RunError::spec(ExcKind::TypeError, String::new())),
    };
    Ok(Value::Float(result))
}

fn add_values(heap: &mut Heap, a: Value, b: Value) -> RunResult<Value> {
    // strings
    if let (Some(x), Some(y)) = (str_of(a, heap), str_of(b, heap)) {
        let joined = format!("{x}{y}");
        return heap.alloc_string(joined);
    }
    if let (Value::Ref(x), Value::Ref(y)) = (a, b) {
        match (heap.get(x), heap.get(y)) {
            (HeapData::List(u), HeapData::List(v)) => {
                let joined: Vec<Value> = u.iter().chain(v).copied().collect();
                return Ok(Value::Ref(heap.alloc(HeapData::List(joined))?));
            }
            (HeapData::Tuple(u), HeapData::Tuple(v)) => {
                let joined: Vec<Value> = u.iter().chain(v).copied().collect();
                return Ok(Value::Ref(heap.alloc(HeapData::Tuple(joined))?));
            }
            (HeapData::Bytes(u), HeapData::Bytes(v)) => {
                let joined: Vec<u8> = u.iter().chain(v).copied().collect();
                return Ok(Value::Ref(heap.alloc(HeapData::Bytes(joined))?));
            }
            _ => {}
        }
    }
    Err(type_error_binary(BinOp::Add, a, b, heap))
}

fn mul_values(heap: &mut Heap, a: Value, b: Value) -> RunResult<Value> {
    let (seq, count) = match (a, b) {
        (v, Value::Int(n)) => (v, n),
        (Value::Int(n), v) => (v, n),
        _ => return Err(type_error_binary(BinOp::Mul, a, b, heap)),
    };
    let count = count.max(0) as usize;
    if let Some(s) = str_of(seq, heap) {
        let repeated = s.repeat(count);
        return heap.alloc_string(repeated);
    }
    if let Value::Ref(id) = seq {
        match heap.get(id) {
            HeapData::List(items) => {
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().copied());
                }
                return Ok(Value::Ref(heap.alloc(HeapData::List(out))?));
            }
            HeapData::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().copied());
                }
                return Ok(Value::Ref(heap.alloc(HeapData::Tuple(out))?));
            }
            HeapData::Bytes(bytes) => {
                let mut out = Vec::with_capacity(bytes.len() * count);
                for _ in 0..count {
                    out.extend_from_slice(bytes);
                }
                return Ok(Value::Ref(heap.alloc(HeapData::Bytes(out))?));
            }
            _ => {}
        }
    }
    Err(type_error_binary(BinOp::Mul, a, b, heap))
}

fn set_op(heap: &mut Heap, op: BinOp, a: Value, b: Value) -> RunResult<Value> {
    let (Value::Ref(x), Value::Ref(y)) = (a, b) else {
        return Err(type_error_binary(op, a, b, heap));
    };
    let (frozen, lhs) = match heap.get(x) {
        HeapData::Set(s) => (false, s.clone()),
        HeapData::FrozenSet(s) => (true, s.clone()),
        _ => return Err(type_error_binary(op, a, b, heap)),
    };
    let rhs = match heap.get(y) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s.clone(),
        _ => return Err(type_error_binary(op, a, b, heap)),
    };
    let mut out = SetData::default();
    match op {
        BinOp::BitOr => {
            out = lhs.clone();
            for &(h, v) in &rhs.entries {
                if !out.contains(heap, h, v, 0)? {
                    out.entries.push((h, v));
                }
            }
        }
        BinOp::BitAnd => {
            for &(h, v) in &lhs.entries {
                if rhs.contains(heap, h, v, 0)? {
                    out.entries.push((h, v));
                }
            }
        }
        BinOp::Sub => {
            for &(h, v) in &lhs.entries {
                if !rhs.contains(heap, h, v, 0)? {
                    out.entries.push((h, v));
                }
            }
        }
        BinOp::BitXor => {
            for &(h, v) in &lhs.entries {
                if !rhs.contains(heap, h, v, 0)? {
                    out.entries.push((h, v));
                }
            }
            for &(h, v) in &rhs.entries {
                if !lhs.contains(heap, h, v, 0)? {
                    out.entries.push((h, v));
                }
            }
        }
        _ => return Err(type_error_binary(op, a, b, heap)),
    }
    let data = if frozen { HeapData::FrozenSet(out) } else { HeapData::Set(out) };
    Ok(Value::Ref(heap.alloc(data)?))
}

fn str_of(v: Value, heap: &Heap) -> Option<&str> {
    match v {
        Value::Str(s) => Some(heap.str_of(s)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

/// Evaluate a unary operator.
pub(crate) fn unary_op(heap: &mut Heap, op: UnOp, v: Value) -> RunResult<Value> {
    match op {
        UnOp::Not => Ok(Value::Bool(!is_truthy(v, heap))),
        UnOp::Pos => match as_number(v, heap) {
            Some(_) => Ok(v),
            None => Err(RunError::spec(
                ExcKind::TypeError,
                format!("bad operand type for unary +: '{}'", type_name(v, heap)),
            )),
        },
        UnOp::Neg => match as_number(v, heap) {
            Some(Number::Int(n)) => match n.checked_neg() {
                Some(neg) => Ok(Value::Int(neg)),
                None => fit_big(heap, -BigInt::from(n)),
            },
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            Some(Number::Big(id)) => {
                let n = heap.big(id).clone();
                fit_big(heap, -n)
            }
            None => Err(RunError::spec(
                ExcKind::TypeError,
                format!("bad operand type for unary -: '{}'", type_name(v, heap)),
            )),
        },
        UnOp::Invert => match as_number(v, heap) {
            Some(Number::Int(n)) => Ok(Value::Int(!n)),
            Some(Number::Big(id)) => {
                let n = heap.big(id).clone();
                fit_big(heap, -n - 1)
            }
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                format!("bad operand type for unary ~: '{}'", type_name(v, heap)),
            )),
        },
    }
}

/// Total-order comparison for `<`/`<=`/`>`/`>=`; `None` when unorderable.
pub(crate) fn py_cmp(a: Value, b: Value, heap: &Heap) -> RunResult<Option<Ordering>> {
    if let (Some(x), Some(y)) = (as_number(a, heap), as_number(b, heap)) {
        return Ok(numbers_cmp(x, y, heap));
    }
    if let (Some(x), Some(y)) = (str_of(a, heap), str_of(b, heap)) {
        return Ok(Some(x.cmp(y)));
    }
    if let (Value::Ref(x), Value::Ref(y)) = (a, b) {
        match (heap.get(x), heap.get(y)) {
            (HeapData::List(u), HeapData::List(v)) | (HeapData::Tuple(u), HeapData::Tuple(v)) => {
                let (u, v) = (u.clone(), v.clone());
                return seq_cmp(&u, &v, heap);
            }
            (HeapData::Bytes(u), HeapData::Bytes(v)) => return Ok(Some(u.cmp(v))),
            (HeapData::Path(u), HeapData::Path(v)) => return Ok(Some(u.cmp(v))),
            _ => {}
        }
    }
    Ok(None)
}

fn numbers_cmp(x: Number, y: Number, heap: &Heap) -> Option<Ordering> {
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
        (Number::Big(a), Number::Big(b)) => Some(heap.big(a).cmp(heap.big(b))),
        (Number::Big(a), Number::Int(b)) => Some(heap.big(a).cmp(&BigInt::from(b))),
        (Number::Int(a), Number::Big(b)) => Some(BigInt::from(a).cmp(heap.big(b))),
        (a, b) => float_of(heap, a).partial_cmp(&float_of(heap, b)),
    }
}

fn seq_cmp(u: &[Value], v: &[Value], heap: &Heap) -> RunResult<Option<Ordering>> {
    for (&a, &b) in u.iter().zip(v) {
        if values_equal(a, b, heap)? {
            continue;
        }
        return py_cmp(a, b, heap);
    }
    Ok(Some(u.len().cmp(&v.len())))
}

/// Evaluate a comparison operator, including membership and identity.
pub(crate) fn compare_op(heap: &Heap, op: CmpOp, a: Value, b: Value) -> RunResult<Value> {
    let result = match op {
        CmpOp::Eq => values_equal(a, b, heap)?,
        CmpOp::Ne => !values_equal(a, b, heap)?,
        CmpOp::Is => identical(a, b),
        CmpOp::IsNot => !identical(a, b),
        CmpOp::In => contains(heap, b, a)?,
        CmpOp::NotIn => !contains(heap, b, a)?,
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            // set comparison is subset ordering
            if let Some(result) = set_relation(heap, op, a, b)? {
                return Ok(Value::Bool(result));
            }
            let Some(ordering) = py_cmp(a, b, heap)? else {
                // NaN comparisons are false, not errors
                if as_number(a, heap).is_some() && as_number(b, heap).is_some() {
                    return Ok(Value::Bool(false));
                }
                let symbol = match op {
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    _ => ">=",
                };
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "'{symbol}' not supported between instances of '{}' and '{}'",
                        type_name(a, heap),
                        type_name(b, heap)
                    ),
                ));
            };
            match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }
        }
    };
    Ok(Value::Bool(result))
}

fn identical(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Ref(x), Value::Ref(y)) => x == y,
        (Value::Str(StrRef::Interned(x)), Value::Str(StrRef::Interned(y))) => x == y,
        (Value::Str(StrRef::Heap(x)), Value::Str(StrRef::Heap(y))) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::ExcClass(x), Value::ExcClass(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::ExtFunction(x), Value::ExtFunction(y)) => x == y,
        _ => false,
    }
}

fn set_relation(heap: &Heap, op: CmpOp, a: Value, b: Value) -> RunResult<Option<bool>> {
    let (Value::Ref(x), Value::Ref(y)) = (a, b) else {
        return Ok(None);
    };
    let lhs = match heap.get(x) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s,
        _ => return Ok(None),
    };
    let rhs = match heap.get(y) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s,
        _ => return Ok(None),
    };
    let mut lhs_subset = true;
    for &(h, v) in &lhs.entries {
        if !rhs.contains(heap, h, v, 0)? {
            lhs_subset = false;
            break;
        }
    }
    let mut rhs_subset = true;
    for &(h, v) in &rhs.entries {
        if !lhs.contains(heap, h, v, 0)? {
            rhs_subset = false;
            break;
        }
    }
    Ok(Some(match op {
        CmpOp::Lt => lhs_subset && !rhs_subset,
        CmpOp::Le => lhs_subset,
        CmpOp::Gt => rhs_subset && !lhs_subset,
        _ => rhs_subset,
    }))
}

/// Membership test: `item in container`.
pub(crate) fn contains(heap: &Heap, container: Value, item: Value) -> RunResult<bool> {
    if let Some(haystack) = str_of(container, heap) {
        let Some(needle) = str_of(item, heap) else {
            return Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    type_name(item, heap)
                ),
            ));
        };
        return Ok(haystack.contains(needle));
    }
    let Value::Ref(id) = container else {
        return Err(RunError::spec(
            ExcKind::TypeError,
            format!("argument of type '{}' is not iterable", type_name(container, heap)),
        ));
    };
    match heap.get(id) {
        HeapData::List(items) | HeapData::Tuple(items) => {
            for &v in items {
                if values_equal(v, item, heap)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        HeapData::NamedTuple(t) => {
            for &v in &t.values {
                if values_equal(v, item, heap)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        HeapData::Dict(d) => {
            let hash = py_hash(item, heap)?;
            Ok(d.find(heap, hash, item, 0)?.is_some())
        }
        HeapData::Set(s) | HeapData::FrozenSet(s) => {
            let hash = py_hash(item, heap)?;
            s.contains(heap, hash, item, 0)
        }
        HeapData::Range(r) => match item {
            Value::Int(n) => {
                if r.step > 0 {
                    Ok(n >= r.start && n < r.stop && (n - r.start) % r.step == 0)
                } else {
                    Ok(n <= r.start && n > r.stop && (r.start - n) % (-r.step) == 0)
                }
            }
            _ => Ok(false),
        },
        HeapData::Bytes(bytes) => match item {
            Value::Int(n) => Ok((0..=255).contains(&n) && bytes.contains(&(n as u8))),
            Value::Ref(o) => match heap.get(o) {
                HeapData::Bytes(needle) => {
                    Ok(needle.is_empty()
                        || bytes.windows(needle.len()).any(|w| w == needle.as_slice()))
                }
                _ => Ok(false),
            },
            _ => Ok(false),
        },
        _ => Err(RunError::spec(
            ExcKind::TypeError,
            format!("argument of type '{}' is not iterable", type_name(container, heap)),
        )),
    }
}

/// Build a fresh dict from key/value pairs (used by `BuildDict`).
pub(crate) fn dict_from_pairs(heap: &mut Heap, pairs: &[(Value, Value)]) -> RunResult<HeapId> {
    let mut data = DictData::default();
    for &(k, v) in pairs {
        let hash = py_hash(k, heap)?;
        let mut replaced = false;
        for entry in &mut data.entries {
            if entry.0 == hash && values_equal(entry.1, k, heap)? {
                entry.2 = v;
                replaced = true;
                break;
            }
        }
        if !replaced {
            data.entries.push((hash, k, v));
        }
    }
    heap.alloc(HeapData::Dict(data))
}

/// Build a fresh set from values (used by `BuildSet` and the constructors).
pub(crate) fn set_from_values(
    heap: &mut Heap,
    values: &[Value],
    frozen: bool,
) -> RunResult<HeapId> {
    let mut data = SetData::default();
    for &v in values {
        let hash = py_hash(v, heap)?;
        if !data.contains(heap, hash, v, 0)? {
            data.entries.push((hash, v));
        }
    }
    let data = if frozen { HeapData::FrozenSet(data) } else { HeapData::Set(data) };
    heap.alloc(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(None, None, None)
    }

    #[test]
    fn int_overflow_promotes_to_big() {
        let mut h = heap();
        let v = binary_op(&mut h, BinOp::Mul, Value::Int(i64::MAX), Value::Int(2)).unwrap();
        let Value::Ref(id) = v else { panic!("expected big integer") };
        assert!(matches!(h.get(id), HeapData::BigInt(_)));
    }

    #[test]
    fn floor_div_rounds_toward_negative_infinity() {
        let mut h = heap();
        let cases = [(-7, 2, -4), (7, -2, -4), (7, 2, 3), (-7, -2, 3)];
        for (a, b, want) in cases {
            let v = binary_op(&mut h, BinOp::FloorDiv, Value::Int(a), Value::Int(b)).unwrap();
            assert!(matches!(v, Value::Int(n) if n == want), "{a} // {b}");
        }
    }

    #[test]
    fn modulo_takes_divisor_sign() {
        let mut h = heap();
        let cases = [(-7, 2, 1), (7, -2, -1), (7, 2, 1)];
        for (a, b, want) in cases {
            let v = binary_op(&mut h, BinOp::Mod, Value::Int(a), Value::Int(b)).unwrap();
            assert!(matches!(v, Value::Int(n) if n == want), "{a} % {b}");
        }
    }

    #[test]
    fn true_division_yields_float() {
        let mut h = heap();
        let v = binary_op(&mut h, BinOp::Div, Value::Int(7), Value::Int(2)).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 3.5));
    }

    #[test]
    fn division_by_zero_raises() {
        let mut h = heap();
        let err = binary_op(&mut h, BinOp::Div, Value::Int(1), Value::Int(0)).unwrap_err();
        assert!(matches!(
            err,
            RunError::Spec { kind: ExcKind::ZeroDivisionError, .. }
        ));
    }

    #[test]
    fn string_concat_allocates() {
        let mut h = heap();
        let a = Value::Ref(h.alloc(HeapData::Str("foo".into())).unwrap());
        let b = Value::Ref(h.alloc(HeapData::Str("bar".into())).unwrap());
        let v = binary_op(&mut h, BinOp::Add, a, b).unwrap();
        let Value::Ref(id) = v else { panic!() };
        assert!(matches!(h.get(id), HeapData::Str(s) if s == "foobar"));
    }

    #[test]
    fn bool_equals_one() {
        let h = heap();
        let v = compare_op(&h, CmpOp::Eq, Value::Bool(true), Value::Int(1)).unwrap();
        assert!(matches!(v, Value::Bool(true)));
    }

    #[test]
    fn mixed_type_ordering_raises() {
        let mut h = heap();
        let s = Value::Ref(h.alloc(HeapData::Str("x".into())).unwrap());
        let err = compare_op(&h, CmpOp::Lt, Value::Int(1), s).unwrap_err();
        assert!(matches!(err, RunError::Spec { kind: ExcKind::TypeError, .. }));
    }

    #[test]
    fn range_membership() {
        let mut h = heap();
        let r = Value::Ref(
            h.alloc(HeapData::Range(crate::object::RangeData { start: 0, stop: 10, step: 2 }))
                .unwrap(),
        );
        assert!(contains(&h, r, Value::Int(4)).unwrap());
        assert!(!contains(&h, r, Value::Int(5)).unwrap());
        assert!(!contains(&h, r, Value::Int(10)).unwrap());
    }
}
