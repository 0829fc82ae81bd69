//! Built-in methods on strings, collections, bytes, and paths.
//!
//! Attribute lookup on a built-in kind goes through a fixed per-kind table;
//! a hit allocates a bound method carrying the receiver.

use crate::builtins::{sort_values, value_len};
use crate::exception::{ExcKind, RunError, RunResult};
use crate::heap::Heap;
use crate::interp::Interp;
use crate::object::{dict_get, dict_remove, dict_set, set_add, set_remove, HeapData, MethodKind, SetData};
use crate::values::{py_hash, py_str, type_name, values_equal, Value};

/// Built-in bound-method identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltinMethod {
    StrUpper,
    StrLower,
    StrStrip,
    StrLstrip,
    StrRstrip,
    StrSplit,
    StrJoin,
    StrReplace,
    StrStartswith,
    StrEndswith,
    StrFind,
    StrIndex,
    StrCount,
    StrIsdigit,
    StrIsalpha,
    StrEncode,

    ListAppend,
    ListExtend,
    ListPop,
    ListInsert,
    ListRemove,
    ListIndex,
    ListCount,
    ListSort,
    ListReverse,
    ListClear,
    ListCopy,

    DictGet,
    DictKeys,
    DictValues,
    DictItems,
    DictPop,
    DictSetdefault,
    DictUpdate,
    DictClear,
    DictCopy,

    SetAdd,
    SetRemove,
    SetDiscard,
    SetUnion,
    SetIntersection,
    SetDifference,
    SetSymmetricDifference,
    SetUpdate,
    SetClear,
    SetCopy,
    SetPop,
    SetIssubset,
    SetIssuperset,

    TupleCount,
    TupleIndex,

    BytesDecode,

    PathJoinpath,
    PathWithName,
    PathWithSuffix,
    PathAsPosix,
}

/// Stable wire ordering for serialised bound methods. Append only.
pub(crate) const METHOD_WIRE: &[BuiltinMethod] = &[
    BuiltinMethod::StrUpper,
    BuiltinMethod::StrLower,
    BuiltinMethod::StrStrip,
    BuiltinMethod::StrLstrip,
    BuiltinMethod::StrRstrip,
    BuiltinMethod::StrSplit,
    BuiltinMethod::StrJoin,
    BuiltinMethod::StrReplace,
    BuiltinMethod::StrStartswith,
    BuiltinMethod::StrEndswith,
    BuiltinMethod::StrFind,
    BuiltinMethod::StrIndex,
    BuiltinMethod::StrCount,
    BuiltinMethod::StrIsdigit,
    BuiltinMethod::StrIsalpha,
    BuiltinMethod::StrEncode,
    BuiltinMethod::ListAppend,
    BuiltinMethod::ListExtend,
    BuiltinMethod::ListPop,
    BuiltinMethod::ListInsert,
    BuiltinMethod::ListRemove,
    BuiltinMethod::ListIndex,
    BuiltinMethod::ListCount,
    BuiltinMethod::ListSort,
    BuiltinMethod::ListReverse,
    BuiltinMethod::ListClear,
    BuiltinMethod::ListCopy,
    BuiltinMethod::DictGet,
    BuiltinMethod::DictKeys,
    BuiltinMethod::DictValues,
    BuiltinMethod::DictItems,
    BuiltinMethod::DictPop,
    BuiltinMethod::DictSetdefault,
    BuiltinMethod::DictUpdate,
    BuiltinMethod::DictClear,
    BuiltinMethod::DictCopy,
    BuiltinMethod::SetAdd,
    BuiltinMethod::SetRemove,
    BuiltinMethod::SetDiscard,
    BuiltinMethod::SetUnion,
    BuiltinMethod::SetIntersection,
    BuiltinMethod::SetDifference,
    BuiltinMethod::SetSymmetricDifference,
    BuiltinMethod::SetUpdate,
    BuiltinMethod::SetClear,
    BuiltinMethod::SetCopy,
    BuiltinMethod::SetPop,
    BuiltinMethod::SetIssubset,
    BuiltinMethod::SetIssuperset,
    BuiltinMethod::TupleCount,
    BuiltinMethod::TupleIndex,
    BuiltinMethod::BytesDecode,
    BuiltinMethod::PathJoinpath,
    BuiltinMethod::PathWithName,
    BuiltinMethod::PathWithSuffix,
    BuiltinMethod::PathAsPosix,
];

fn str_method(name: &str) -> Option<BuiltinMethod> {
    Some(match name {
        "upper" => BuiltinMethod::StrUpper,
        "lower" => BuiltinMethod::StrLower,
        "strip" => BuiltinMethod::StrStrip,
        "lstrip" => BuiltinMethod::StrLstrip,
        "rstrip" => BuiltinMethod::StrRstrip,
        "split" => BuiltinMethod::StrSplit,
        "join" => BuiltinMethod::StrJoin,
        "replace" => BuiltinMethod::StrReplace,
        "startswith" => BuiltinMethod::StrStartswith,
        "endswith" => BuiltinMethod::StrEndswith,
        "find" => BuiltinMethod::StrFind,
        "index" => BuiltinMethod::StrIndex,
        "count" => BuiltinMethod::StrCount,
        "isdigit" => BuiltinMethod::StrIsdigit,
        "isalpha" => BuiltinMethod::StrIsalpha,
        "encode" => BuiltinMethod::StrEncode,
        _ => return None,
    })
}

fn list_method(name: &str) -> Option<BuiltinMethod> {
    Some(match name {
        "append" => BuiltinMethod::ListAppend,
        "extend" => BuiltinMethod::ListExtend,
        "pop" => BuiltinMethod::ListPop,
        "insert" => BuiltinMethod::ListInsert,
        "remove" => BuiltinMethod::ListRemove,
        "index" => BuiltinMethod::ListIndex,
        "count" => BuiltinMethod::ListCount,
        "sort" => BuiltinMethod::ListSort,
        "reverse" => BuiltinMethod::ListReverse,
        "clear" => BuiltinMethod::ListClear,
        "copy" => BuiltinMethod::ListCopy,
        _ => return None,
    })
}

fn dict_method(name: &str) -> Option<BuiltinMethod> {
    Some(match name {
        "get" => BuiltinMethod::DictGet,
        "keys" => BuiltinMethod::DictKeys,
        "values" => BuiltinMethod::DictValues,
        "items" => BuiltinMethod::DictItems,
        "pop" => BuiltinMethod::DictPop,
        "setdefault" => BuiltinMethod::DictSetdefault,
        "update" => BuiltinMethod::DictUpdate,
        "clear" => BuiltinMethod::DictClear,
        "copy" => BuiltinMethod::DictCopy,
        _ => return None,
    })
}

fn set_method(name: &str, frozen: bool) -> Option<BuiltinMethod> {
    let method = match name {
        "add" => BuiltinMethod::SetAdd,
        "remove" => BuiltinMethod::SetRemove,
        "discard" => BuiltinMethod::SetDiscard,
        "union" => BuiltinMethod::SetUnion,
        "intersection" => BuiltinMethod::SetIntersection,
        "difference" => BuiltinMethod::SetDifference,
        "symmetric_difference" => BuiltinMethod::SetSymmetricDifference,
        "update" => BuiltinMethod::SetUpdate,
        "clear" => BuiltinMethod::SetClear,
        "copy" => BuiltinMethod::SetCopy,
        "pop" => BuiltinMethod::SetPop,
        "issubset" => BuiltinMethod::SetIssubset,
        "issuperset" => BuiltinMethod::SetIssuperset,
        _ => return None,
    };
    if frozen
        && matches!(
            method,
            BuiltinMethod::SetAdd
                | BuiltinMethod::SetRemove
                | BuiltinMethod::SetDiscard
                | BuiltinMethod::SetUpdate
                | BuiltinMethod::SetClear
                | BuiltinMethod::SetPop
        )
    {
        return None;
    }
    Some(method)
}

fn tuple_method(name: &str) -> Option<BuiltinMethod> {
    Some(match name {
        "count" => BuiltinMethod::TupleCount,
        "index" => BuiltinMethod::TupleIndex,
        _ => return None,
    })
}

/// Look up a built-in method for a receiver value.
pub(crate) fn method_of(v: Value, heap: &Heap, name: &str) -> Option<MethodKind> {
    let method = match v {
        Value::Str(_) => str_method(name),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(_) => str_method(name),
            HeapData::List(_) => list_method(name),
            HeapData::Dict(_) => dict_method(name),
            HeapData::Set(_) => set_method(name, false),
            HeapData::FrozenSet(_) => set_method(name, true),
            HeapData::Tuple(_) | HeapData::NamedTuple(_) => tuple_method(name),
            HeapData::Bytes(_) => match name {
                "decode" => Some(BuiltinMethod::BytesDecode),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    };
    method.map(MethodKind::Builtin)
}

/// Pure (non-yielding) path methods; OS methods are resolved separately.
pub(crate) fn path_method(name: &str) -> Option<MethodKind> {
    let method = match name {
        "joinpath" => BuiltinMethod::PathJoinpath,
        "with_name" => BuiltinMethod::PathWithName,
        "with_suffix" => BuiltinMethod::PathWithSuffix,
        "as_posix" => BuiltinMethod::PathAsPosix,
        _ => return None,
    };
    Some(MethodKind::Builtin(method))
}

fn method_str(interp: &Interp, v: Value) -> RunResult<String> {
    py_str(v, &interp.heap)
}

fn expect_no_kwargs(name: &str, kwargs: &[(String, Value)]) -> RunResult<()> {
    if let Some((kw, _)) = kwargs.first() {
        return Err(RunError::spec(
            ExcKind::TypeError,
            format!("{name}() got an unexpected keyword argument '{kw}'"),
        ));
    }
    Ok(())
}

/// Invoke a built-in method.
pub(crate) fn call_method(
    interp: &mut Interp,
    method: BuiltinMethod,
    recv: Value,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> RunResult<Value> {
    use BuiltinMethod as M;
    match method {
        // ── str ──
        M::StrUpper => {
            expect_no_kwargs("upper", kwargs)?;
            let s = method_str(interp, recv)?;
            alloc_str(interp, s.to_uppercase())
        }
        M::StrLower => {
            expect_no_kwargs("lower", kwargs)?;
            let s = method_str(interp, recv)?;
            alloc_str(interp, s.to_lowercase())
        }
        M::StrStrip | M::StrLstrip | M::StrRstrip => {
            let s = method_str(interp, recv)?;
            let chars: Option<Vec<char>> = match args {
                [] => None,
                [v] => Some(method_str(interp, *v)?.chars().collect()),
                _ => return Err(RunError::spec(ExcKind::TypeError, "strip() takes at most 1 argument")),
            };
            let is_strip = |c: char| match &chars {
                None => c.is_whitespace(),
                Some(set) => set.contains(&c),
            };
            let out = match method {
                M::StrStrip => s.trim_matches(is_strip),
                M::StrLstrip => s.trim_start_matches(is_strip),
                _ => s.trim_end_matches(is_strip),
            };
            alloc_str(interp, out.to_string())
        }
        M::StrSplit => {
            expect_no_kwargs("split", kwargs)?;
            let s = method_str(interp, recv)?;
            let parts: Vec<String> = match args {
                [] => s.split_whitespace().map(str::to_string).collect(),
                [sep] => {
                    let sep = method_str(interp, *sep)?;
                    if sep.is_empty() {
                        return Err(RunError::spec(ExcKind::ValueError, "empty separator"));
                    }
                    s.split(&sep).map(str::to_string).collect()
                }
                _ => return Err(RunError::spec(ExcKind::TypeError, "split() takes at most 1 argument")),
            };
            let mut values = Vec::with_capacity(parts.len());
            for part in parts {
                let v = alloc_str(interp, part)?;
                interp.temp_roots.push(v);
                values.push(v);
            }
            interp
                .temp_roots
                .truncate(interp.temp_roots.len() - values.len());
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(values))?))
        }
        M::StrJoin => {
            expect_no_kwargs("join", kwargs)?;
            let sep = method_str(interp, recv)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "join() takes exactly one argument"));
            };
            let items = interp.collect_iterable(*v)?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let is_str = matches!(item, Value::Str(_))
                    || matches!(item, Value::Ref(id) if matches!(interp.heap.get(id), HeapData::Str(_)));
                if !is_str {
                    return Err(RunError::spec(
                        ExcKind::TypeError,
                        format!(
                            "sequence item: expected str instance, {} found",
                            type_name(item, &interp.heap)
                        ),
                    ));
                }
                parts.push(py_str(item, &interp.heap)?);
            }
            alloc_str(interp, parts.join(&sep))
        }
        M::StrReplace => {
            expect_no_kwargs("replace", kwargs)?;
            let s = method_str(interp, recv)?;
            let [from, to] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "replace() takes exactly 2 arguments"));
            };
            let from = method_str(interp, *from)?;
            let to = method_str(interp, *to)?;
            alloc_str(interp, s.replace(&from, &to))
        }
        M::StrStartswith | M::StrEndswith => {
            let s = method_str(interp, recv)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "startswith() takes exactly one argument"));
            };
            let needle = method_str(interp, *v)?;
            let result = if method == M::StrStartswith {
                s.starts_with(&needle)
            } else {
                s.ends_with(&needle)
            };
            Ok(Value::Bool(result))
        }
        M::StrFind | M::StrIndex => {
            let s = method_str(interp, recv)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "find() takes exactly one argument"));
            };
            let needle = method_str(interp, *v)?;
            match s.find(&needle) {
                Some(byte_idx) => Ok(Value::Int(s[..byte_idx].chars().count() as i64)),
                None if method == M::StrFind => Ok(Value::Int(-1)),
                None => Err(RunError::spec(ExcKind::ValueError, "substring not found")),
            }
        }
        M::StrCount => {
            let s = method_str(interp, recv)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "count() takes exactly one argument"));
            };
            let needle = method_str(interp, *v)?;
            if needle.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(&needle).count() as i64))
        }
        M::StrIsdigit => {
            let s = method_str(interp, recv)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }
        M::StrIsalpha => {
            let s = method_str(interp, recv)?;
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }
        M::StrEncode => {
            let s = method_str(interp, recv)?;
            Ok(Value::Ref(interp.heap.alloc(HeapData::Bytes(s.into_bytes()))?))
        }

        // ── list ──
        M::ListAppend => {
            expect_no_kwargs("append", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "append() takes exactly one argument"));
            };
            let id = list_id(interp, recv)?;
            if let HeapData::List(items) = interp.heap.get_mut(id) {
                items.push(*v);
            }
            interp.heap.recharge(id)?;
            Ok(Value::None)
        }
        M::ListExtend => {
            expect_no_kwargs("extend", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "extend() takes exactly one argument"));
            };
            let id = list_id(interp, recv)?;
            let items = interp.collect_iterable(*v)?;
            if let HeapData::List(existing) = interp.heap.get_mut(id) {
                existing.extend(items);
            }
            interp.heap.recharge(id)?;
            Ok(Value::None)
        }
        M::ListPop => {
            expect_no_kwargs("pop", kwargs)?;
            let id = list_id(interp, recv)?;
            let len = value_len(&interp.heap, recv)?;
            if len == 0 {
                return Err(RunError::spec(ExcKind::IndexError, "pop from empty list"));
            }
            let idx = match args {
                [] => len - 1,
                [Value::Int(n)] => {
                    let adjusted = if *n < 0 { *n + len as i64 } else { *n };
                    if adjusted < 0 || adjusted >= len as i64 {
                        return Err(RunError::spec(ExcKind::IndexError, "pop index out of range"));
                    }
                    adjusted as usize
                }
                _ => return Err(RunError::spec(ExcKind::TypeError, "pop() takes at most 1 argument")),
            };
            let HeapData::List(items) = interp.heap.get_mut(id) else {
                return Err(RunError::internal("list receiver changed kind"));
            };
            Ok(items.remove(idx))
        }
        M::ListInsert => {
            expect_no_kwargs("insert", kwargs)?;
            let [Value::Int(idx), v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "insert() takes an index and a value"));
            };
            let id = list_id(interp, recv)?;
            let len = value_len(&interp.heap, recv)? as i64;
            let at = (*idx).clamp(-len, len);
            let at = if at < 0 { (at + len) as usize } else { at as usize };
            if let HeapData::List(items) = interp.heap.get_mut(id) {
                items.insert(at.min(items.len()), *v);
            }
            interp.heap.recharge(id)?;
            Ok(Value::None)
        }
        M::ListRemove => {
            expect_no_kwargs("remove", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "remove() takes exactly one argument"));
            };
            let id = list_id(interp, recv)?;
            let idx = {
                let HeapData::List(items) = interp.heap.get(id) else {
                    return Err(RunError::internal("list receiver changed kind"));
                };
                let mut found = None;
                for (i, &item) in items.iter().enumerate() {
                    if values_equal(item, *v, &interp.heap)? {
                        found = Some(i);
                        break;
                    }
                }
                found
            };
            match idx {
                Some(i) => {
                    if let HeapData::List(items) = interp.heap.get_mut(id) {
                        items.remove(i);
                    }
                    Ok(Value::None)
                }
                None => Err(RunError::spec(ExcKind::ValueError, "list.remove(x): x not in list")),
            }
        }
        M::ListIndex | M::TupleIndex => {
            expect_no_kwargs("index", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "index() takes exactly one argument"));
            };
            let items = seq_items(interp, recv)?;
            for (i, &item) in items.iter().enumerate() {
                if values_equal(item, *v, &interp.heap)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            let repr = crate::values::py_repr(*v, &interp.heap)?;
            Err(RunError::spec(
                ExcKind::ValueError,
                format!("{repr} is not in list"),
            ))
        }
        M::ListCount | M::TupleCount => {
            expect_no_kwargs("count", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "count() takes exactly one argument"));
            };
            let items = seq_items(interp, recv)?;
            let mut count = 0;
            for &item in &items {
                if values_equal(item, *v, &interp.heap)? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        M::ListSort => {
            let id = list_id(interp, recv)?;
            let mut key = None;
            let mut reverse = false;
            for (kw, value) in kwargs {
                match kw.as_str() {
                    "key" => {
                        if !matches!(value, Value::None) {
                            key = Some(*value);
                        }
                    }
                    "reverse" => reverse = matches!(value, Value::Bool(true)),
                    other => {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            format!("sort() got an unexpected keyword argument '{other}'"),
                        ))
                    }
                }
            }
            let items = match interp.heap.get(id) {
                HeapData::List(items) => items.clone(),
                _ => return Err(RunError::internal("list receiver changed kind")),
            };
            let sorted = sort_values(interp, items, key, reverse)?;
            if let HeapData::List(items) = interp.heap.get_mut(id) {
                *items = sorted;
            }
            Ok(Value::None)
        }
        M::ListReverse => {
            expect_no_kwargs("reverse", kwargs)?;
            let id = list_id(interp, recv)?;
            if let HeapData::List(items) = interp.heap.get_mut(id) {
                items.reverse();
            }
            Ok(Value::None)
        }
        M::ListClear => {
            expect_no_kwargs("clear", kwargs)?;
            let id = list_id(interp, recv)?;
            if let HeapData::List(items) = interp.heap.get_mut(id) {
                items.clear();
            }
            Ok(Value::None)
        }
        M::ListCopy => {
            expect_no_kwargs("copy", kwargs)?;
            let items = seq_items(interp, recv)?;
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(items))?))
        }

        // ── dict ──
        M::DictGet => {
            expect_no_kwargs("get", kwargs)?;
            let id = dict_id(interp, recv)?;
            let (key, default) = match args {
                [k] => (*k, Value::None),
                [k, d] => (*k, *d),
                _ => return Err(RunError::spec(ExcKind::TypeError, "get() takes 1 or 2 arguments")),
            };
            Ok(dict_get(&interp.heap, id, key)?.unwrap_or(default))
        }
        M::DictKeys => {
            let id = dict_id(interp, recv)?;
            let keys: Vec<Value> = match interp.heap.get(id) {
                HeapData::Dict(d) => d.entries.iter().map(|&(_, k, _)| k).collect(),
                _ => Vec::new(),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(keys))?))
        }
        M::DictValues => {
            let id = dict_id(interp, recv)?;
            let values: Vec<Value> = match interp.heap.get(id) {
                HeapData::Dict(d) => d.entries.iter().map(|&(_, _, v)| v).collect(),
                _ => Vec::new(),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(values))?))
        }
        M::DictItems => {
            let id = dict_id(interp, recv)?;
            let pairs: Vec<(Value, Value)> = match interp.heap.get(id) {
                HeapData::Dict(d) => d.entries.iter().map(|&(_, k, v)| (k, v)).collect(),
                _ => Vec::new(),
            };
            let mut tuples = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let t = Value::Ref(interp.heap.alloc(HeapData::Tuple(vec![k, v]))?);
                interp.temp_roots.push(t);
                tuples.push(t);
            }
            interp
                .temp_roots
                .truncate(interp.temp_roots.len() - tuples.len());
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(tuples))?))
        }
        M::DictPop => {
            expect_no_kwargs("pop", kwargs)?;
            let id = dict_id(interp, recv)?;
            let (key, default) = match args {
                [k] => (*k, None),
                [k, d] => (*k, Some(*d)),
                _ => return Err(RunError::spec(ExcKind::TypeError, "pop() takes 1 or 2 arguments")),
            };
            match dict_remove(&mut interp.heap, id, key)? {
                Some(v) => Ok(v),
                None => match default {
                    Some(d) => Ok(d),
                    None => Err(RunError::spec(
                        ExcKind::KeyError,
                        crate::values::py_repr(key, &interp.heap)?,
                    )),
                },
            }
        }
        M::DictSetdefault => {
            expect_no_kwargs("setdefault", kwargs)?;
            let id = dict_id(interp, recv)?;
            let (key, default) = match args {
                [k] => (*k, Value::None),
                [k, d] => (*k, *d),
                _ => return Err(RunError::spec(ExcKind::TypeError, "setdefault() takes 1 or 2 arguments")),
            };
            if let Some(v) = dict_get(&interp.heap, id, key)? {
                return Ok(v);
            }
            dict_set(&mut interp.heap, id, key, default)?;
            Ok(default)
        }
        M::DictUpdate => {
            let id = dict_id(interp, recv)?;
            if let [other] = args {
                let pairs: Vec<(Value, Value)> = match other {
                    Value::Ref(oid) => match interp.heap.get(*oid) {
                        HeapData::Dict(d) => d.entries.iter().map(|&(_, k, v)| (k, v)).collect(),
                        _ => {
                            return Err(RunError::spec(
                                ExcKind::TypeError,
                                "update() argument must be a dict",
                            ))
                        }
                    },
                    _ => {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            "update() argument must be a dict",
                        ))
                    }
                };
                for (k, v) in pairs {
                    dict_set(&mut interp.heap, id, k, v)?;
                }
            } else if !args.is_empty() {
                return Err(RunError::spec(ExcKind::TypeError, "update() takes at most 1 argument"));
            }
            for (name, value) in kwargs {
                let key = alloc_str(interp, name.clone())?;
                interp.temp_roots.push(key);
                let set = dict_set(&mut interp.heap, id, key, *value);
                interp.temp_roots.pop();
                set?;
            }
            Ok(Value::None)
        }
        M::DictClear => {
            expect_no_kwargs("clear", kwargs)?;
            let id = dict_id(interp, recv)?;
            if let HeapData::Dict(d) = interp.heap.get_mut(id) {
                d.entries.clear();
            }
            Ok(Value::None)
        }
        M::DictCopy => {
            expect_no_kwargs("copy", kwargs)?;
            let id = dict_id(interp, recv)?;
            let data = match interp.heap.get(id) {
                HeapData::Dict(d) => d.clone(),
                _ => return Err(RunError::internal("dict receiver changed kind")),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::Dict(data))?))
        }

        // ── set ──
        M::SetAdd => {
            expect_no_kwargs("add", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "add() takes exactly one argument"));
            };
            let id = set_id(interp, recv)?;
            set_add(&mut interp.heap, id, *v)?;
            Ok(Value::None)
        }
        M::SetRemove => {
            expect_no_kwargs("remove", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "remove() takes exactly one argument"));
            };
            let id = set_id(interp, recv)?;
            if set_remove(&mut interp.heap, id, *v)? {
                Ok(Value::None)
            } else {
                Err(RunError::spec(
                    ExcKind::KeyError,
                    crate::values::py_repr(*v, &interp.heap)?,
                ))
            }
        }
        M::SetDiscard => {
            expect_no_kwargs("discard", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "discard() takes exactly one argument"));
            };
            let id = set_id(interp, recv)?;
            set_remove(&mut interp.heap, id, *v)?;
            Ok(Value::None)
        }
        M::SetUnion | M::SetIntersection | M::SetDifference | M::SetSymmetricDifference => {
            let id = set_id(interp, recv)?;
            let [other] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "set operation takes exactly one argument"));
            };
            let other_items = interp.collect_iterable(*other)?;
            let other_set = {
                let mut data = SetData::default();
                for v in other_items {
                    let hash = py_hash(v, &interp.heap)?;
                    if !data.contains(&interp.heap, hash, v, 0)? {
                        data.entries.push((hash, v));
                    }
                }
                data
            };
            let lhs = match interp.heap.get(id) {
                HeapData::Set(s) | HeapData::FrozenSet(s) => s.clone(),
                _ => return Err(RunError::internal("set receiver changed kind")),
            };
            let mut out = SetData::default();
            match method {
                M::SetUnion => {
                    out = lhs.clone();
                    for &(h, v) in &other_set.entries {
                        if !out.contains(&interp.heap, h, v, 0)? {
                            out.entries.push((h, v));
                        }
                    }
                }
                M::SetIntersection => {
                    for &(h, v) in &lhs.entries {
                        if other_set.contains(&interp.heap, h, v, 0)? {
                            out.entries.push((h, v));
                        }
                    }
                }
                M::SetDifference => {
                    for &(h, v) in &lhs.entries {
                        if !other_set.contains(&interp.heap, h, v, 0)? {
                            out.entries.push((h, v));
                        }
                    }
                }
                _ => {
                    for &(h, v) in &lhs.entries {
                        if !other_set.contains(&interp.heap, h, v, 0)? {
                            out.entries.push((h, v));
                        }
                    }
                    for &(h, v) in &other_set.entries {
                        if !lhs.contains(&interp.heap, h, v, 0)? {
                            out.entries.push((h, v));
                        }
                    }
                }
            }
            let frozen = matches!(interp.heap.get(id), HeapData::FrozenSet(_));
            let data = if frozen { HeapData::FrozenSet(out) } else { HeapData::Set(out) };
            Ok(Value::Ref(interp.heap.alloc(data)?))
        }
        M::SetUpdate => {
            expect_no_kwargs("update", kwargs)?;
            let [other] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "update() takes exactly one argument"));
            };
            let id = set_id(interp, recv)?;
            let items = interp.collect_iterable(*other)?;
            for v in items {
                set_add(&mut interp.heap, id, v)?;
            }
            Ok(Value::None)
        }
        M::SetClear => {
            expect_no_kwargs("clear", kwargs)?;
            let id = set_id(interp, recv)?;
            match interp.heap.get_mut(id) {
                HeapData::Set(s) | HeapData::FrozenSet(s) => s.entries.clear(),
                _ => {}
            }
            Ok(Value::None)
        }
        M::SetCopy => {
            expect_no_kwargs("copy", kwargs)?;
            let id = set_id(interp, recv)?;
            let (frozen, data) = match interp.heap.get(id) {
                HeapData::Set(s) => (false, s.clone()),
                HeapData::FrozenSet(s) => (true, s.clone()),
                _ => return Err(RunError::internal("set receiver changed kind")),
            };
            let data = if frozen { HeapData::FrozenSet(data) } else { HeapData::Set(data) };
            Ok(Value::Ref(interp.heap.alloc(data)?))
        }
        M::SetPop => {
            expect_no_kwargs("pop", kwargs)?;
            let id = set_id(interp, recv)?;
            match interp.heap.get_mut(id) {
                HeapData::Set(s) if !s.entries.is_empty() => Ok(s.entries.remove(0).1),
                _ => Err(RunError::spec(ExcKind::KeyError, "pop from an empty set")),
            }
        }
        M::SetIssubset | M::SetIssuperset => {
            let id = set_id(interp, recv)?;
            let [other] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "issubset() takes exactly one argument"));
            };
            let other_items = interp.collect_iterable(*other)?;
            let mut other_set = SetData::default();
            for v in other_items {
                let hash = py_hash(v, &interp.heap)?;
                if !other_set.contains(&interp.heap, hash, v, 0)? {
                    other_set.entries.push((hash, v));
                }
            }
            let lhs = match interp.heap.get(id) {
                HeapData::Set(s) | HeapData::FrozenSet(s) => s.clone(),
                _ => return Err(RunError::internal("set receiver changed kind")),
            };
            let (sub, sup) = if method == M::SetIssubset {
                (&lhs, &other_set)
            } else {
                (&other_set, &lhs)
            };
            for &(h, v) in &sub.entries {
                if !sup.contains(&interp.heap, h, v, 0)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }

        // ── bytes ──
        M::BytesDecode => {
            expect_no_kwargs("decode", kwargs)?;
            let Value::Ref(id) = recv else {
                return Err(RunError::internal("bytes receiver missing"));
            };
            let HeapData::Bytes(bytes) = interp.heap.get(id) else {
                return Err(RunError::internal("bytes receiver changed kind"));
            };
            match String::from_utf8(bytes.clone()) {
                Ok(s) => alloc_str(interp, s),
                Err(_) => Err(RunError::spec(
                    ExcKind::ValueError,
                    "invalid utf-8 sequence in decode()",
                )),
            }
        }

        // ── path (lexical) ──
        M::PathJoinpath => {
            expect_no_kwargs("joinpath", kwargs)?;
            let mut path = path_text(interp, recv)?;
            for &arg in args {
                let seg = py_str(arg, &interp.heap)?;
                path = crate::os::join_paths(&path, &seg);
            }
            Ok(Value::Ref(interp.heap.alloc(HeapData::Path(path))?))
        }
        M::PathWithName => {
            expect_no_kwargs("with_name", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "with_name() takes exactly one argument"));
            };
            let path = path_text(interp, recv)?;
            let name = py_str(*v, &interp.heap)?;
            let parent = crate::os::path_parent(&path);
            let joined = crate::os::join_paths(&parent, &name);
            Ok(Value::Ref(interp.heap.alloc(HeapData::Path(joined))?))
        }
        M::PathWithSuffix => {
            expect_no_kwargs("with_suffix", kwargs)?;
            let [v] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "with_suffix() takes exactly one argument"));
            };
            let path = path_text(interp, recv)?;
            let suffix = py_str(*v, &interp.heap)?;
            let parent = crate::os::path_parent(&path);
            let stem = crate::os::path_stem(&path);
            let joined = crate::os::join_paths(&parent, &format!("{stem}{suffix}"));
            Ok(Value::Ref(interp.heap.alloc(HeapData::Path(joined))?))
        }
        M::PathAsPosix => {
            expect_no_kwargs("as_posix", kwargs)?;
            let path = path_text(interp, recv)?;
            alloc_str(interp, path)
        }
    }
}

fn alloc_str(interp: &mut Interp, s: String) -> RunResult<Value> {
    interp.heap.alloc_string(s)
}

fn list_id(interp: &Interp, recv: Value) -> RunResult<crate::heap::HeapId> {
    match recv {
        Value::Ref(id) if matches!(interp.heap.get(id), HeapData::List(_)) => Ok(id),
        _ => Err(RunError::internal("list receiver missing")),
    }
}

fn dict_id(interp: &Interp, recv: Value) -> RunResult<crate::heap::HeapId> {
    match recv {
        Value::Ref(id) if matches!(interp.heap.get(id), HeapData::Dict(_)) => Ok(id),
        _ => Err(RunError::internal("dict receiver missing")),
    }
}

fn set_id(interp: &Interp, recv: Value) -> RunResult<crate::heap::HeapId> {
    match recv {
        Value::Ref(id)
            if matches!(interp.heap.get(id), HeapData::Set(_) | HeapData::FrozenSet(_)) =>
        {
            Ok(id)
        }
        _ => Err(RunError::internal("set receiver missing")),
    }
}

fn seq_items(interp: &Interp, recv: Value) -> RunResult<Vec<Value>> {
    match recv {
        Value::Ref(id) => match interp.heap.get(id) {
            HeapData::List(items) | HeapData::Tuple(items) => Ok(items.clone()),
            HeapData::NamedTuple(t) => Ok(t.values.clone()),
            _ => Err(RunError::internal("sequence receiver missing")),
        },
        _ => Err(RunError::internal("sequence receiver missing")),
    }
}

fn path_text(interp: &Interp, recv: Value) -> RunResult<String> {
    match recv {
        Value::Ref(id) => match interp.heap.get(id) {
            HeapData::Path(p) => Ok(p.clone()),
            _ => Err(RunError::internal("path receiver missing")),
        },
        _ => Err(RunError::internal("path receiver missing")),
    }
}
