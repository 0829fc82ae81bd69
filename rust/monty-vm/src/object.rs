//! Heap-managed object kinds.

use crate::exception::{ExcKind, RunResult, TraceEntry};
use crate::heap::{Heap, HeapId};
use crate::methods::BuiltinMethod;
use crate::os::OsFunction;
use crate::values::{py_hash, values_equal_inner, StrRef, Value};
use num_bigint::BigInt;

/// Payload of one heap slot.
#[derive(Debug, Clone)]
pub(crate) enum HeapData {
    Str(String),
    Bytes(Vec<u8>),
    BigInt(BigInt),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(DictData),
    Set(SetData),
    FrozenSet(SetData),
    Range(RangeData),
    Slice(SliceData),
    Closure(ClosureData),
    BoundMethod(BoundMethodData),
    Class(ClassData),
    Instance(InstanceData),
    Path(String),
    NamedTuple(NamedTupleData),
    Exception(ExcData),
    /// A closure cell holding one captured variable.
    Cell(Value),
    Iter(IterData),
    Future(FutureData),
}

/// Insertion-ordered mapping; entries carry their key hash so lookups only
/// fall back to structural equality on hash collisions.
#[derive(Debug, Clone, Default)]
pub(crate) struct DictData {
    pub entries: Vec<(u64, Value, Value)>,
}

impl DictData {
    pub fn find(&self, heap: &Heap, hash: u64, key: Value, depth: usize) -> RunResult<Option<Value>> {
        for &(h, k, v) in &self.entries {
            if h == hash && values_equal_inner(k, key, heap, depth)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub fn find_index(&self, heap: &Heap, hash: u64, key: Value) -> RunResult<Option<usize>> {
        for (i, &(h, k, _)) in self.entries.iter().enumerate() {
            if h == hash && values_equal_inner(k, key, heap, 0)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

/// Insertion-ordered set with the same hashing scheme as [`DictData`].
#[derive(Debug, Clone, Default)]
pub(crate) struct SetData {
    pub entries: Vec<(u64, Value)>,
}

impl SetData {
    pub fn contains(&self, heap: &Heap, hash: u64, value: Value, depth: usize) -> RunResult<bool> {
        for &(h, v) in &self.entries {
            if h == hash && values_equal_inner(v, value, heap, depth)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeData {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeData {
    pub fn len(&self) -> i64 {
        if self.step > 0 {
            ((self.stop - self.start).max(0) + self.step - 1) / self.step
        } else {
            ((self.start - self.stop).max(0) + (-self.step) - 1) / (-self.step)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SliceData {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

/// A user function: code reference plus evaluated defaults and captured cells.
#[derive(Debug, Clone)]
pub(crate) struct ClosureData {
    /// Global code index (merged across REPL feeds).
    pub code: u32,
    pub name: StrRef,
    pub defaults: Vec<Value>,
    pub cells: Vec<HeapId>,
}

#[derive(Debug, Clone)]
pub(crate) enum MethodKind {
    /// Bound user function (`Value::Ref` to a closure).
    Function(Value),
    Builtin(BuiltinMethod),
    Os(OsFunction),
}

#[derive(Debug, Clone)]
pub(crate) struct BoundMethodData {
    pub kind: MethodKind,
    pub recv: Value,
}

#[derive(Debug, Clone)]
pub(crate) struct FieldInfo {
    pub name: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct ClassData {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<(String, Value)>,
    pub dataclass: bool,
    pub frozen: bool,
}

impl ClassData {
    pub fn method(&self, name: &str) -> Option<Value> {
        self.methods
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }
}

/// A class or dataclass instance: insertion-ordered attribute slots.
#[derive(Debug, Clone)]
pub(crate) struct InstanceData {
    pub class: HeapId,
    pub attrs: Vec<(String, Value)>,
}

impl InstanceData {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.iter().find(|(n, _)| n == name).map(|&(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        for entry in &mut self.attrs {
            if entry.0 == name {
                entry.1 = value;
                return;
            }
        }
        self.attrs.push((name.to_string(), value));
    }
}

/// Stat results and `sys.version_info`: a tuple with named field accessors.
#[derive(Debug, Clone)]
pub(crate) struct NamedTupleData {
    pub type_name: String,
    pub names: Vec<String>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct ExcData {
    pub kind: ExcKind,
    pub message: String,
    pub cause: Option<HeapId>,
    pub traceback: Vec<TraceEntry>,
}

#[derive(Debug, Clone)]
pub(crate) enum IterData {
    /// Index-based iteration over a heap sequence (list, tuple, bytes,
    /// named tuple).
    Seq { seq: HeapId, idx: usize },
    /// Character iteration over a string.
    Chars { s: StrRef, idx: usize },
    Range { cur: i64, stop: i64, step: i64 },
    /// Snapshot iteration over dict keys or set members.
    Keys { keys: Vec<Value>, idx: usize },
    Zip { iters: Vec<HeapId> },
    Enumerate { inner: HeapId, count: i64 },
    Reversed { seq: HeapId, remaining: usize },
}

/// An awaitable: a single pending external call, or a `gather` join.
#[derive(Debug, Clone)]
pub(crate) enum FutureData {
    External { call_id: u64 },
    /// Ordered parts; each is a future handle or an already-known value.
    Gather { parts: Vec<Value> },
}

// ── dict / set operations ──
//
// Lookup scans immutably (equality needs `&Heap`), then mutation re-borrows
// the container slot. Sizes are recharged after growth.

pub(crate) fn dict_get(heap: &Heap, dict: HeapId, key: Value) -> RunResult<Option<Value>> {
    let hash = py_hash(key, heap)?;
    let HeapData::Dict(d) = heap.get(dict) else {
        return Ok(None);
    };
    d.find(heap, hash, key, 0)
}

pub(crate) fn dict_set(heap: &mut Heap, dict: HeapId, key: Value, value: Value) -> RunResult<()> {
    let hash = py_hash(key, heap)?;
    let index = {
        let HeapData::Dict(d) = heap.get(dict) else {
            return Ok(());
        };
        d.find_index(heap, hash, key)?
    };
    let HeapData::Dict(d) = heap.get_mut(dict) else {
        return Ok(());
    };
    match index {
        Some(i) => d.entries[i].2 = value,
        None => {
            d.entries.push((hash, key, value));
            heap.recharge(dict)?;
        }
    }
    Ok(())
}

pub(crate) fn dict_remove(heap: &mut Heap, dict: HeapId, key: Value) -> RunResult<Option<Value>> {
    let hash = py_hash(key, heap)?;
    let index = {
        let HeapData::Dict(d) = heap.get(dict) else {
            return Ok(None);
        };
        d.find_index(heap, hash, key)?
    };
    let HeapData::Dict(d) = heap.get_mut(dict) else {
        return Ok(None);
    };
    Ok(index.map(|i| d.entries.remove(i).2))
}

pub(crate) fn set_contains(heap: &Heap, set: HeapId, value: Value) -> RunResult<bool> {
    let hash = py_hash(value, heap)?;
    match heap.get(set) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s.contains(heap, hash, value, 0),
        _ => Ok(false),
    }
}

pub(crate) fn set_add(heap: &mut Heap, set: HeapId, value: Value) -> RunResult<()> {
    let hash = py_hash(value, heap)?;
    let present = match heap.get(set) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s.contains(heap, hash, value, 0)?,
        _ => return Ok(()),
    };
    if present {
        return Ok(());
    }
    match heap.get_mut(set) {
        HeapData::Set(s) | HeapData::FrozenSet(s) => s.entries.push((hash, value)),
        _ => {}
    }
    heap.recharge(set)
}

pub(crate) fn set_remove(heap: &mut Heap, set: HeapId, value: Value) -> RunResult<bool> {
    let hash = py_hash(value, heap)?;
    let index = {
        let entries = match heap.get(set) {
            HeapData::Set(s) | HeapData::FrozenSet(s) => &s.entries,
            _ => return Ok(false),
        };
        let mut found = None;
        for (i, &(h, v)) in entries.iter().enumerate() {
            if h == hash && values_equal_inner(v, value, heap, 0)? {
                found = Some(i);
                break;
            }
        }
        found
    };
    match (index, heap.get_mut(set)) {
        (Some(i), HeapData::Set(s) | HeapData::FrozenSet(s)) => {
            s.entries.remove(i);
            Ok(true)
        }
        _ => Ok(false),
    }
}
