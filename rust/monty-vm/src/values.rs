//! Tagged value representation.
//!
//! A [`Value`] is `Copy`: immediates carry their payload inline, everything
//! else is a handle into the interpreter's [`Heap`]. Equality, hashing,
//! truthiness and `repr` follow the scripting language's conventions
//! (`True == 1`, value equality for containers, distinct types unequal).

use crate::builtins::Builtin;
use crate::exception::{ExcKind, RunError, RunResult};
use crate::heap::{Heap, HeapId};
use crate::object::{HeapData, IterData};
use num_traits::ToPrimitive;

/// Interpreter string reference: interned (program constant pool) or heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StrRef {
    Interned(u32),
    Heap(HeapId),
}

/// Allowlisted importable modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Module {
    Os,
    Pathlib,
    Sys,
    Asyncio,
    Typing,
    Dataclasses,
}

impl Module {
    pub fn name(self) -> &'static str {
        match self {
            Module::Os => "os",
            Module::Pathlib => "pathlib",
            Module::Sys => "sys",
            Module::Asyncio => "asyncio",
            Module::Typing => "typing",
            Module::Dataclasses => "dataclasses",
        }
    }

    pub fn from_name(name: &str) -> Option<Module> {
        Some(match name {
            "os" => Module::Os,
            "pathlib" => Module::Pathlib,
            "sys" => Module::Sys,
            "asyncio" => Module::Asyncio,
            "typing" => Module::Typing,
            "dataclasses" => Module::Dataclasses,
            _ => return None,
        })
    }
}

/// A runtime value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Value {
    /// An unbound local slot.
    Undefined,
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrRef),
    Builtin(Builtin),
    ExcClass(ExcKind),
    Module(Module),
    /// Declared external function (index into the program's declaration list).
    ExtFunction(u16),
    Ref(HeapId),
}

impl Value {
    pub fn heap_id(self) -> Option<HeapId> {
        match self {
            Value::Ref(id) => Some(id),
            Value::Str(StrRef::Heap(id)) => Some(id),
            _ => None,
        }
    }
}

/// The scripting-language type name of a value, for error messages.
pub(crate) fn type_name(v: Value, heap: &Heap) -> String {
    match v {
        Value::Undefined => "undefined".to_string(),
        Value::None => "NoneType".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Int(_) => "int".to_string(),
        Value::Float(_) => "float".to_string(),
        Value::Str(_) => "str".to_string(),
        Value::Builtin(_) => "builtin_function_or_method".to_string(),
        Value::ExcClass(_) => "type".to_string(),
        Value::Module(_) => "module".to_string(),
        Value::ExtFunction(_) => "function".to_string(),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(_) => "str".to_string(),
            HeapData::Bytes(_) => "bytes".to_string(),
            HeapData::BigInt(_) => "int".to_string(),
            HeapData::List(_) => "list".to_string(),
            HeapData::Tuple(_) => "tuple".to_string(),
            HeapData::Dict(_) => "dict".to_string(),
            HeapData::Set(_) => "set".to_string(),
            HeapData::FrozenSet(_) => "frozenset".to_string(),
            HeapData::Range(_) => "range".to_string(),
            HeapData::Slice(_) => "slice".to_string(),
            HeapData::Closure(_) => "function".to_string(),
            HeapData::BoundMethod(_) => "method".to_string(),
            HeapData::Class(c) => c.name.clone(),
            HeapData::Instance(i) => match heap.get(i.class) {
                HeapData::Class(c) => c.name.clone(),
                _ => "object".to_string(),
            },
            HeapData::Path(_) => "PurePosixPath".to_string(),
            HeapData::NamedTuple(t) => t.type_name.clone(),
            HeapData::Exception(e) => e.kind.name().to_string(),
            HeapData::Cell(_) => "cell".to_string(),
            HeapData::Iter(_) => "iterator".to_string(),
            HeapData::Future(_) => "Future".to_string(),
        },
    }
}

pub(crate) fn is_truthy(v: Value, heap: &Heap) -> bool {
    match v {
        Value::Undefined | Value::None => false,
        Value::Bool(b) => b,
        Value::Int(n) => n != 0,
        Value::Float(f) => f != 0.0,
        Value::Str(s) => !heap.str_of(s).is_empty(),
        Value::Builtin(_) | Value::ExcClass(_) | Value::Module(_) | Value::ExtFunction(_) => true,
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => !s.is_empty(),
            HeapData::Bytes(b) => !b.is_empty(),
            HeapData::BigInt(n) => !num_traits::Zero::is_zero(n),
            HeapData::List(items) | HeapData::Tuple(items) => !items.is_empty(),
            HeapData::Dict(d) => !d.entries.is_empty(),
            HeapData::Set(s) | HeapData::FrozenSet(s) => !s.entries.is_empty(),
            HeapData::Range(r) => r.len() > 0,
            HeapData::NamedTuple(t) => !t.values.is_empty(),
            _ => true,
        },
    }
}

const EQ_DEPTH_LIMIT: usize = 200;

/// Structural value equality.
pub(crate) fn values_equal(a: Value, b: Value, heap: &Heap) -> RunResult<bool> {
    values_equal_inner(a, b, heap, 0)
}

pub(crate) fn values_equal_inner(a: Value, b: Value, heap: &Heap, depth: usize) -> RunResult<bool> {
    if depth > EQ_DEPTH_LIMIT {
        return Err(RunError::spec(
            ExcKind::RecursionError,
            "maximum recursion depth exceeded in comparison",
        ));
    }
    // numeric cross-type equality: True == 1, 1 == 1.0
    if let (Some(x), Some(y)) = (as_number(a, heap), as_number(b, heap)) {
        return Ok(numbers_equal(x, y, heap));
    }
    // strings compare by content whether interned or heap-allocated
    if let Some(x) = value_str(a, heap) {
        return Ok(matches!(value_str(b, heap), Some(y) if x == y));
    }
    if value_str(b, heap).is_some() {
        return Ok(false);
    }
    match (a, b) {
        (Value::None, Value::None) => Ok(true),
        (Value::Builtin(x), Value::Builtin(y)) => Ok(x == y),
        (Value::ExcClass(x), Value::ExcClass(y)) => Ok(x == y),
        (Value::Module(x), Value::Module(y)) => Ok(x == y),
        (Value::ExtFunction(x), Value::ExtFunction(y)) => Ok(x == y),
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return Ok(true);
            }
            heap_equal(x, y, heap, depth)
        }
        _ => Ok(false),
    }
}

/// String content of a value, covering both representations.
pub(crate) fn value_str(v: Value, heap: &Heap) -> Option<&str> {
    match v {
        Value::Str(s) => Some(heap.str_of(s)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

fn heap_equal(x: HeapId, y: HeapId, heap: &Heap, depth: usize) -> RunResult<bool> {
    match (heap.get(x), heap.get(y)) {
        (HeapData::List(a), HeapData::List(b)) | (HeapData::Tuple(a), HeapData::Tuple(b)) => {
            seq_equal(a, b, heap, depth)
        }
        // named tuples (stat results) compare equal to plain tuples
        (HeapData::NamedTuple(a), HeapData::Tuple(b)) => seq_equal(&a.values, b, heap, depth),
        (HeapData::Tuple(a), HeapData::NamedTuple(b)) => seq_equal(a, &b.values, heap, depth),
        (HeapData::NamedTuple(a), HeapData::NamedTuple(b)) => {
            seq_equal(&a.values, &b.values, heap, depth)
        }
        (HeapData::Dict(a), HeapData::Dict(b)) => {
            if a.entries.len() != b.entries.len() {
                return Ok(false);
            }
            for &(hash, k, v) in &a.entries {
                let Some(other) = b.find(heap, hash, k, depth + 1)? else {
                    return Ok(false);
                };
                if !values_equal_inner(v, other, heap, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (HeapData::Set(a), HeapData::Set(b))
        | (HeapData::FrozenSet(a), HeapData::FrozenSet(b))
        | (HeapData::Set(a), HeapData::FrozenSet(b))
        | (HeapData::FrozenSet(a), HeapData::Set(b)) => {
            if a.entries.len() != b.entries.len() {
                return Ok(false);
            }
            for &(hash, v) in &a.entries {
                if !b.contains(heap, hash, v, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (HeapData::Path(a), HeapData::Path(b)) => Ok(a == b),
        (HeapData::Range(a), HeapData::Range(b)) => {
            Ok(a.start == b.start && a.stop == b.stop && a.step == b.step)
        }
        (HeapData::Instance(a), HeapData::Instance(b)) => {
            let (HeapData::Class(ca), HeapData::Class(cb)) = (heap.get(a.class), heap.get(b.class))
            else {
                return Ok(x == y);
            };
            // dataclasses compare structurally by class name, so values
            // injected by the host compare equal to script-built ones
            if !ca.dataclass || !cb.dataclass || ca.name != cb.name {
                return Ok(x == y);
            }
            if a.attrs.len() != b.attrs.len() {
                return Ok(false);
            }
            for ((_, va), (_, vb)) in a.attrs.iter().zip(&b.attrs) {
                if !values_equal_inner(*va, *vb, heap, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn seq_equal(a: &[Value], b: &[Value], heap: &Heap, depth: usize) -> RunResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (&x, &y) in a.iter().zip(b) {
        if !values_equal_inner(x, y, heap, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Numeric view of a value, for cross-type comparison.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Big(HeapId),
    Float(f64),
}

pub(crate) fn as_number(v: Value, heap: &Heap) -> Option<Number> {
    match v {
        Value::Bool(b) => Some(Number::Int(b as i64)),
        Value::Int(n) => Some(Number::Int(n)),
        Value::Float(f) => Some(Number::Float(f)),
        Value::Ref(id) => match heap.get(id) {
            HeapData::BigInt(_) => Some(Number::Big(id)),
            _ => None,
        },
        _ => None,
    }
}

fn numbers_equal(x: Number, y: Number, heap: &Heap) -> bool {
    use num_bigint::BigInt;
    match (x, y) {
        (Number::Int(a), Number::Int(b)) => a == b,
        (Number::Float(a), Number::Float(b)) => a == b,
        (Number::Int(a), Number::Float(b)) | (Number::Float(b), Number::Int(a)) => a as f64 == b,
        (Number::Big(a), Number::Big(b)) => heap.big(a) == heap.big(b),
        (Number::Big(a), Number::Int(b)) | (Number::Int(b), Number::Big(a)) => {
            heap.big(a) == &BigInt::from(b)
        }
        (Number::Big(a), Number::Float(b)) | (Number::Float(b), Number::Big(a)) => {
            heap.big(a).to_f64().is_some_and(|f| f == b)
        }
    }
}

// ── hashing ──

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn hash_i64(n: i64) -> u64 {
    fnv1a(&n.to_le_bytes())
}

/// Value hash. Mutable containers are unhashable; numeric values that
/// compare equal hash equal (`hash(True) == hash(1) == hash(1.0)`).
pub(crate) fn py_hash(v: Value, heap: &Heap) -> RunResult<u64> {
    match v {
        Value::None => Ok(0x6eb0c5e0a6f3c8d1),
        Value::Bool(b) => Ok(hash_i64(b as i64)),
        Value::Int(n) => Ok(hash_i64(n)),
        Value::Float(f) => {
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(hash_i64(f as i64))
            } else {
                Ok(fnv1a(&f.to_bits().to_le_bytes()))
            }
        }
        Value::Str(s) => Ok(fnv1a(heap.str_of(s).as_bytes())),
        Value::Builtin(b) => Ok(hash_i64(b as i64 ^ 0x42)),
        Value::ExcClass(k) => Ok(fnv1a(k.name().as_bytes())),
        Value::Module(m) => Ok(fnv1a(m.name().as_bytes())),
        Value::ExtFunction(i) => Ok(hash_i64(i as i64 ^ 0x5ca1ab1e)),
        Value::Undefined => Err(RunError::internal("hash of undefined value")),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Ok(fnv1a(s.as_bytes())),
            HeapData::Bytes(b) => Ok(fnv1a(b)),
            HeapData::BigInt(n) => match n.to_i64() {
                Some(small) => Ok(hash_i64(small)),
                None => Ok(fnv1a(n.to_string().as_bytes())),
            },
            HeapData::Tuple(items) => {
                let mut hash = FNV_OFFSET;
                for &item in items {
                    hash = hash.wrapping_mul(FNV_PRIME) ^ py_hash(item, heap)?;
                }
                Ok(hash)
            }
            HeapData::NamedTuple(t) => {
                let mut hash = FNV_OFFSET;
                for &item in &t.values {
                    hash = hash.wrapping_mul(FNV_PRIME) ^ py_hash(item, heap)?;
                }
                Ok(hash)
            }
            HeapData::FrozenSet(s) => {
                let mut hash = 0u64;
                for &(h, _) in &s.entries {
                    hash ^= h;
                }
                Ok(hash)
            }
            HeapData::Path(p) => Ok(fnv1a(p.as_bytes())),
            HeapData::Range(r) => Ok(hash_i64(r.start) ^ hash_i64(r.stop) ^ hash_i64(r.step)),
            HeapData::Closure(_) | HeapData::BoundMethod(_) | HeapData::Class(_) => {
                Ok(hash_i64(id as i64 ^ 0x7a11))
            }
            HeapData::Instance(inst) => {
                let frozen_dataclass = matches!(
                    heap.get(inst.class),
                    HeapData::Class(c) if c.dataclass && c.frozen
                );
                if frozen_dataclass {
                    let mut hash = FNV_OFFSET;
                    for (_, v) in &inst.attrs {
                        hash = hash.wrapping_mul(FNV_PRIME) ^ py_hash(*v, heap)?;
                    }
                    Ok(hash)
                } else {
                    Ok(hash_i64(id as i64 ^ 0x0b1ec7))
                }
            }
            HeapData::Exception(_) => Ok(hash_i64(id as i64)),
            other => Err(RunError::spec(
                ExcKind::TypeError,
                format!("unhashable type: '{}'", data_type_name(other)),
            )),
        },
    }
}

fn data_type_name(data: &HeapData) -> &'static str {
    match data {
        HeapData::List(_) => "list",
        HeapData::Dict(_) => "dict",
        HeapData::Set(_) => "set",
        HeapData::Slice(_) => "slice",
        HeapData::Iter(_) => "iterator",
        HeapData::Future(_) => "Future",
        HeapData::Cell(_) => "cell",
        _ => "object",
    }
}

// ── repr / str ──

const REPR_DEPTH_LIMIT: usize = 16;

/// `repr(v)`.
pub(crate) fn py_repr(v: Value, heap: &Heap) -> RunResult<String> {
    repr_inner(v, heap, 0)
}

/// `str(v)` — like `repr` except strings and paths print bare.
pub(crate) fn py_str(v: Value, heap: &Heap) -> RunResult<String> {
    match v {
        Value::Str(s) => Ok(heap.str_of(s).to_string()),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Ok(s.clone()),
            HeapData::Path(p) => Ok(p.clone()),
            HeapData::Exception(e) => Ok(e.message.clone()),
            _ => py_repr(v, heap),
        },
        _ => py_repr(v, heap),
    }
}

/// Float formatting matching the parent language (`1.0`, not `1`).
pub(crate) fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{f}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

/// String repr with quote selection as in the parent language.
pub(crate) fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn repr_inner(v: Value, heap: &Heap, depth: usize) -> RunResult<String> {
    if depth > REPR_DEPTH_LIMIT {
        return Ok("...".to_string());
    }
    Ok(match v {
        Value::Undefined => "<undefined>".to_string(),
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => float_repr(f),
        Value::Str(s) => str_repr(heap.str_of(s)),
        Value::Builtin(b) => format!("<built-in function {}>", b.name()),
        Value::ExcClass(k) => format!("<class '{}'>", k.name()),
        Value::Module(m) => format!("<module '{}'>", m.name()),
        Value::ExtFunction(i) => format!("<external function {i}>"),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => str_repr(s),
            HeapData::Bytes(bytes) => bytes_repr(bytes),
            HeapData::BigInt(n) => n.to_string(),
            HeapData::List(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for &item in items {
                    parts.push(repr_inner(item, heap, depth + 1)?);
                }
                format!("[{}]", parts.join(", "))
            }
            HeapData::Tuple(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for &item in items {
                    parts.push(repr_inner(item, heap, depth + 1)?);
                }
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            HeapData::Dict(d) => {
                let mut parts = Vec::with_capacity(d.entries.len());
                for &(_, k, val) in &d.entries {
                    parts.push(format!(
                        "{}: {}",
                        repr_inner(k, heap, depth + 1)?,
                        repr_inner(val, heap, depth + 1)?
                    ));
                }
                format!("{{{}}}", parts.join(", "))
            }
            HeapData::Set(s) => {
                if s.entries.is_empty() {
                    "set()".to_string()
                } else {
                    let mut parts = Vec::with_capacity(s.entries.len());
                    for &(_, item) in &s.entries {
                        parts.push(repr_inner(item, heap, depth + 1)?);
                    }
                    format!("{{{}}}", parts.join(", "))
                }
            }
            HeapData::FrozenSet(s) => {
                if s.entries.is_empty() {
                    "frozenset()".to_string()
                } else {
                    let mut parts = Vec::with_capacity(s.entries.len());
                    for &(_, item) in &s.entries {
                        parts.push(repr_inner(item, heap, depth + 1)?);
                    }
                    format!("frozenset({{{}}})", parts.join(", "))
                }
            }
            HeapData::Range(r) => {
                if r.step == 1 {
                    format!("range({}, {})", r.start, r.stop)
                } else {
                    format!("range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            HeapData::Slice(s) => format!(
                "slice({}, {}, {})",
                repr_inner(s.start, heap, depth + 1)?,
                repr_inner(s.stop, heap, depth + 1)?,
                repr_inner(s.step, heap, depth + 1)?
            ),
            HeapData::Closure(c) => format!("<function {}>", heap.str_of(c.name)),
            HeapData::BoundMethod(_) => "<bound method>".to_string(),
            HeapData::Class(c) => format!("<class '{}'>", c.name),
            HeapData::Instance(inst) => {
                let HeapData::Class(class) = heap.get(inst.class) else {
                    return Ok("<object>".to_string());
                };
                if class.dataclass {
                    let mut parts = Vec::with_capacity(inst.attrs.len());
                    for (name, value) in &inst.attrs {
                        parts.push(format!("{}={}", name, repr_inner(*value, heap, depth + 1)?));
                    }
                    format!("{}({})", class.name, parts.join(", "))
                } else {
                    format!("<{} object>", class.name)
                }
            }
            HeapData::Path(p) => format!("PurePosixPath({})", str_repr(p)),
            HeapData::NamedTuple(t) => {
                let mut parts = Vec::with_capacity(t.values.len());
                for (name, &value) in t.names.iter().zip(&t.values) {
                    parts.push(format!("{}={}", name, repr_inner(value, heap, depth + 1)?));
                }
                format!("{}({})", t.type_name, parts.join(", "))
            }
            HeapData::Exception(e) => format!("{}({})", e.kind.name(), str_repr(&e.message)),
            HeapData::Cell(_) => "<cell>".to_string(),
            HeapData::Iter(IterData::Range { .. }) => "<range_iterator>".to_string(),
            HeapData::Iter(_) => "<iterator>".to_string(),
            HeapData::Future(_) => "<Future>".to_string(),
        },
    })
}

pub(crate) fn bytes_repr(bytes: &[u8]) -> String {
    let mut out = String::from("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('\'');
    out
}
