//! Built-in functions, implemented directly against the value model.

use crate::exception::{ExcKind, RunError, RunResult};
use crate::heap::Heap;
use crate::interp::Interp;
use crate::object::{FutureData, HeapData, IterData, RangeData};
use crate::ops;
use crate::values::{
    as_number, is_truthy, py_hash, py_repr, py_str, type_name, Number, Value,
};
use monty_compiler::BinOp;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;

/// The fixed registry of built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Len,
    Range,
    Print,
    Repr,
    Str,
    Int,
    Float,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Bytes,
    Sorted,
    Sum,
    Min,
    Max,
    Abs,
    Any,
    All,
    Zip,
    Enumerate,
    Reversed,
    Hash,
    Id,
    Isinstance,
    Chr,
    Ord,
    Hex,
    Bin,
    Oct,
    Pow,
    Divmod,
    Round,
    Type,
    /// `pathlib.Path` — constructs path values.
    PathCtor,
    /// `asyncio.gather` — joins awaitables.
    Gather,
    /// `os.getenv` — always suspends to the host.
    Getenv,
    /// `dataclasses.dataclass` — consumed at compile time.
    DataclassDecorator,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Print => "print",
            Builtin::Repr => "repr",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::FrozenSet => "frozenset",
            Builtin::Bytes => "bytes",
            Builtin::Sorted => "sorted",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Zip => "zip",
            Builtin::Enumerate => "enumerate",
            Builtin::Reversed => "reversed",
            Builtin::Hash => "hash",
            Builtin::Id => "id",
            Builtin::Isinstance => "isinstance",
            Builtin::Chr => "chr",
            Builtin::Ord => "ord",
            Builtin::Hex => "hex",
            Builtin::Bin => "bin",
            Builtin::Oct => "oct",
            Builtin::Pow => "pow",
            Builtin::Divmod => "divmod",
            Builtin::Round => "round",
            Builtin::Type => "type",
            Builtin::PathCtor => "Path",
            Builtin::Gather => "gather",
            Builtin::Getenv => "getenv",
            Builtin::DataclassDecorator => "dataclass",
        }
    }
}

static BUILTIN_NAMES: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for b in [
        Builtin::Len,
        Builtin::Range,
        Builtin::Print,
        Builtin::Repr,
        Builtin::Str,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::List,
        Builtin::Tuple,
        Builtin::Dict,
        Builtin::Set,
        Builtin::FrozenSet,
        Builtin::Bytes,
        Builtin::Sorted,
        Builtin::Sum,
        Builtin::Min,
        Builtin::Max,
        Builtin::Abs,
        Builtin::Any,
        Builtin::All,
        Builtin::Zip,
        Builtin::Enumerate,
        Builtin::Reversed,
        Builtin::Hash,
        Builtin::Id,
        Builtin::Isinstance,
        Builtin::Chr,
        Builtin::Ord,
        Builtin::Hex,
        Builtin::Bin,
        Builtin::Oct,
        Builtin::Pow,
        Builtin::Divmod,
        Builtin::Round,
        Builtin::Type,
    ] {
        map.insert(b.name(), b);
    }
    map
});

/// Resolve a global name against the built-in registry.
pub(crate) fn builtin_from_name(name: &str) -> Option<Builtin> {
    BUILTIN_NAMES.get(name).copied()
}

fn arity_error(name: &str, expected: &str, got: usize) -> RunError {
    RunError::spec(
        ExcKind::TypeError,
        format!("{name}() takes {expected} arguments but {got} were given"),
    )
}

fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> RunResult<()> {
    if let Some((kw, _)) = kwargs.first() {
        return Err(RunError::spec(
            ExcKind::TypeError,
            format!("{name}() got an unexpected keyword argument '{kw}'"),
        ));
    }
    Ok(())
}

/// Invoke a built-in function. `Getenv` is handled by the caller (it
/// suspends); everything else completes inline.
pub(crate) fn call_builtin(
    interp: &mut Interp,
    builtin: Builtin,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> RunResult<Value> {
    match builtin {
        Builtin::Len => {
            no_kwargs("len", kwargs)?;
            let [v] = args else {
                return Err(arity_error("len", "exactly one", args.len()));
            };
            value_len(&interp.heap, *v).map(|n| Value::Int(n as i64))
        }
        Builtin::Range => {
            no_kwargs("range", kwargs)?;
            let int_arg = |v: Value| -> RunResult<i64> {
                match v {
                    Value::Int(n) => Ok(n),
                    Value::Bool(b) => Ok(b as i64),
                    other => Err(RunError::spec(
                        ExcKind::TypeError,
                        format!(
                            "'{}' object cannot be interpreted as an integer",
                            type_name(other, &interp.heap)
                        ),
                    )),
                }
            };
            let (start, stop, step) = match args {
                [stop] => (0, int_arg(*stop)?, 1),
                [start, stop] => (int_arg(*start)?, int_arg(*stop)?, 1),
                [start, stop, step] => (int_arg(*start)?, int_arg(*stop)?, int_arg(*step)?),
                _ => return Err(arity_error("range", "1 to 3", args.len())),
            };
            if step == 0 {
                return Err(RunError::spec(
                    ExcKind::ValueError,
                    "range() arg 3 must not be zero",
                ));
            }
            let id = interp
                .heap
                .alloc(HeapData::Range(RangeData { start, stop, step }))?;
            Ok(Value::Ref(id))
        }
        Builtin::Print => {
            let mut sep = " ".to_string();
            let mut end = "\n".to_string();
            for (name, value) in kwargs {
                match name.as_str() {
                    "sep" => sep = py_str(*value, &interp.heap)?,
                    "end" => end = py_str(*value, &interp.heap)?,
                    other => {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            format!("print() got an unexpected keyword argument '{other}'"),
                        ))
                    }
                }
            }
            let mut parts = Vec::with_capacity(args.len());
            for &arg in args {
                parts.push(py_str(arg, &interp.heap)?);
            }
            let text = parts.join(&sep);
            if !text.is_empty() {
                interp.print.write("stdout", &text);
            }
            if !end.is_empty() {
                interp.print.write("stdout", &end);
            }
            Ok(Value::None)
        }
        Builtin::Repr => {
            no_kwargs("repr", kwargs)?;
            let [v] = args else {
                return Err(arity_error("repr", "exactly one", args.len()));
            };
            let text = py_repr(*v, &interp.heap)?;
            interp.heap.alloc_string(text)
        }
        Builtin::Str => {
            no_kwargs("str", kwargs)?;
            let text = match args {
                [] => String::new(),
                [v] => py_str(*v, &interp.heap)?,
                _ => return Err(arity_error("str", "at most 1", args.len())),
            };
            interp.heap.alloc_string(text)
        }
        Builtin::Int => {
            no_kwargs("int", kwargs)?;
            convert_int(interp, args)
        }
        Builtin::Float => {
            no_kwargs("float", kwargs)?;
            convert_float(interp, args)
        }
        Builtin::Bool => {
            no_kwargs("bool", kwargs)?;
            match args {
                [] => Ok(Value::Bool(false)),
                [v] => Ok(Value::Bool(is_truthy(*v, &interp.heap))),
                _ => Err(arity_error("bool", "at most 1", args.len())),
            }
        }
        Builtin::List => {
            no_kwargs("list", kwargs)?;
            let items = match args {
                [] => Vec::new(),
                [v] => interp.collect_iterable(*v)?,
                _ => return Err(arity_error("list", "at most 1", args.len())),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(items))?))
        }
        Builtin::Tuple => {
            no_kwargs("tuple", kwargs)?;
            let items = match args {
                [] => Vec::new(),
                [v] => interp.collect_iterable(*v)?,
                _ => return Err(arity_error("tuple", "at most 1", args.len())),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::Tuple(items))?))
        }
        Builtin::Dict => {
            let mut pairs: Vec<(Value, Value)> = Vec::new();
            match args {
                [] => {}
                [v] => {
                    if let Value::Ref(id) = v {
                        if let HeapData::Dict(d) = interp.heap.get(*id) {
                            pairs = d.entries.iter().map(|&(_, k, v)| (k, v)).collect();
                        } else {
                            pairs = dict_pairs_from_iterable(interp, *v)?;
                        }
                    } else {
                        pairs = dict_pairs_from_iterable(interp, *v)?;
                    }
                }
                _ => return Err(arity_error("dict", "at most 1 positional", args.len())),
            }
            for (name, value) in kwargs {
                let key = interp.heap.alloc_string(name.clone())?;
                interp.temp_roots.push(key);
                pairs.push((key, *value));
            }
            interp
                .temp_roots
                .truncate(interp.temp_roots.len() - kwargs.len());
            interp.new_dict(pairs)
        }
        Builtin::Set => {
            no_kwargs("set", kwargs)?;
            let items = match args {
                [] => Vec::new(),
                [v] => interp.collect_iterable(*v)?,
                _ => return Err(arity_error("set", "at most 1", args.len())),
            };
            let id = ops::set_from_values(&mut interp.heap, &items, false)?;
            Ok(Value::Ref(id))
        }
        Builtin::FrozenSet => {
            no_kwargs("frozenset", kwargs)?;
            let items = match args {
                [] => Vec::new(),
                [v] => interp.collect_iterable(*v)?,
                _ => return Err(arity_error("frozenset", "at most 1", args.len())),
            };
            let id = ops::set_from_values(&mut interp.heap, &items, true)?;
            Ok(Value::Ref(id))
        }
        Builtin::Bytes => {
            no_kwargs("bytes", kwargs)?;
            let data: Vec<u8> = match args {
                [] => Vec::new(),
                [Value::Int(n)] => {
                    let n = usize::try_from(*n).map_err(|_| {
                        RunError::spec(ExcKind::ValueError, "negative count")
                    })?;
                    vec![0; n]
                }
                [v] => {
                    let items = interp.collect_iterable(*v)?;
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Int(n) if (0..=255).contains(&n) => out.push(n as u8),
                            _ => {
                                return Err(RunError::spec(
                                    ExcKind::ValueError,
                                    "bytes must be in range(0, 256)",
                                ))
                            }
                        }
                    }
                    out
                }
                _ => return Err(arity_error("bytes", "at most 1", args.len())),
            };
            Ok(Value::Ref(interp.heap.alloc(HeapData::Bytes(data))?))
        }
        Builtin::Sorted => {
            let [v] = args else {
                return Err(arity_error("sorted", "exactly one positional", args.len()));
            };
            let (key, reverse) = sort_options("sorted", kwargs)?;
            let items = interp.collect_iterable(*v)?;
            let sorted = sort_values(interp, items, key, reverse)?;
            Ok(Value::Ref(interp.heap.alloc(HeapData::List(sorted))?))
        }
        Builtin::Sum => {
            no_kwargs("sum", kwargs)?;
            let (iterable, start) = match args {
                [v] => (*v, Value::Int(0)),
                [v, s] => (*v, *s),
                _ => return Err(arity_error("sum", "1 or 2", args.len())),
            };
            let items = interp.collect_iterable(iterable)?;
            let mut acc = start;
            for item in items {
                interp.temp_roots.push(acc);
                let next = ops::binary_op(&mut interp.heap, BinOp::Add, acc, item);
                interp.temp_roots.pop();
                acc = next?;
            }
            Ok(acc)
        }
        Builtin::Min => min_max(interp, args, kwargs, true),
        Builtin::Max => min_max(interp, args, kwargs, false),
        Builtin::Abs => {
            no_kwargs("abs", kwargs)?;
            let [v] = args else {
                return Err(arity_error("abs", "exactly one", args.len()));
            };
            match as_number(*v, &interp.heap) {
                Some(Number::Int(n)) => match n.checked_abs() {
                    Some(a) => Ok(Value::Int(a)),
                    None => ops::fit_big(&mut interp.heap, BigInt::from(n).abs()),
                },
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                Some(Number::Big(id)) => {
                    let n = interp.heap.big(id).abs();
                    ops::fit_big(&mut interp.heap, n)
                }
                None => Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("bad operand type for abs(): '{}'", type_name(*v, &interp.heap)),
                )),
            }
        }
        Builtin::Any => {
            no_kwargs("any", kwargs)?;
            let [v] = args else {
                return Err(arity_error("any", "exactly one", args.len()));
            };
            let items = interp.collect_iterable(*v)?;
            Ok(Value::Bool(items.iter().any(|&x| is_truthy(x, &interp.heap))))
        }
        Builtin::All => {
            no_kwargs("all", kwargs)?;
            let [v] = args else {
                return Err(arity_error("all", "exactly one", args.len()));
            };
            let items = interp.collect_iterable(*v)?;
            Ok(Value::Bool(items.iter().all(|&x| is_truthy(x, &interp.heap))))
        }
        Builtin::Zip => {
            no_kwargs("zip", kwargs)?;
            let mut iters = Vec::with_capacity(args.len());
            for &arg in args {
                let it = interp.get_iter(arg)?;
                interp.temp_roots.push(it);
                let Value::Ref(id) = it else {
                    return Err(RunError::internal("iterator is not on the heap"));
                };
                iters.push(id);
            }
            interp
                .temp_roots
                .truncate(interp.temp_roots.len() - iters.len());
            let id = interp.heap.alloc(HeapData::Iter(IterData::Zip { iters }))?;
            Ok(Value::Ref(id))
        }
        Builtin::Enumerate => {
            no_kwargs("enumerate", kwargs)?;
            let (v, start) = match args {
                [v] => (*v, 0),
                [v, Value::Int(n)] => (*v, *n),
                _ => return Err(arity_error("enumerate", "1 or 2", args.len())),
            };
            let it = interp.get_iter(v)?;
            interp.temp_roots.push(it);
            let Value::Ref(inner) = it else {
                return Err(RunError::internal("iterator is not on the heap"));
            };
            let id = interp
                .heap
                .alloc(HeapData::Iter(IterData::Enumerate { inner, count: start }));
            interp.temp_roots.pop();
            Ok(Value::Ref(id?))
        }
        Builtin::Reversed => {
            no_kwargs("reversed", kwargs)?;
            let [v] = args else {
                return Err(arity_error("reversed", "exactly one", args.len()));
            };
            let seq = match v {
                Value::Ref(id)
                    if matches!(
                        interp.heap.get(*id),
                        HeapData::List(_) | HeapData::Tuple(_) | HeapData::NamedTuple(_)
                    ) =>
                {
                    *id
                }
                other => {
                    // strings and other iterables go through a list copy
                    let items = interp.collect_iterable(*other)?;
                    interp.heap.alloc(HeapData::List(items))?
                }
            };
            let remaining = value_len(&interp.heap, Value::Ref(seq))?;
            let id = interp
                .heap
                .alloc(HeapData::Iter(IterData::Reversed { seq, remaining }))?;
            Ok(Value::Ref(id))
        }
        Builtin::Hash => {
            no_kwargs("hash", kwargs)?;
            let [v] = args else {
                return Err(arity_error("hash", "exactly one", args.len()));
            };
            Ok(Value::Int(py_hash(*v, &interp.heap)? as i64))
        }
        Builtin::Id => {
            no_kwargs("id", kwargs)?;
            let [v] = args else {
                return Err(arity_error("id", "exactly one", args.len()));
            };
            let id = match v.heap_id() {
                Some(id) => id as i64,
                None => py_hash(*v, &interp.heap)? as i64,
            };
            Ok(Value::Int(id))
        }
        Builtin::Isinstance => {
            no_kwargs("isinstance", kwargs)?;
            let [v, class] = args else {
                return Err(arity_error("isinstance", "exactly 2", args.len()));
            };
            Ok(Value::Bool(isinstance(&interp.heap, *v, *class)?))
        }
        Builtin::Chr => {
            no_kwargs("chr", kwargs)?;
            let [Value::Int(n)] = args else {
                return Err(RunError::spec(ExcKind::TypeError, "chr() requires an integer"));
            };
            let c = u32::try_from(*n)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    RunError::spec(ExcKind::ValueError, "chr() arg not in range(0x110000)")
                })?;
            interp.heap.alloc_string(c.to_string())
        }
        Builtin::Ord => {
            no_kwargs("ord", kwargs)?;
            let [v] = args else {
                return Err(arity_error("ord", "exactly one", args.len()));
            };
            let text = py_str(*v, &interp.heap)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "ord() expected a character, but string of length {} found",
                        text.chars().count()
                    ),
                )),
            }
        }
        Builtin::Hex => int_to_base(interp, args, kwargs, "hex", 16),
        Builtin::Bin => int_to_base(interp, args, kwargs, "bin", 2),
        Builtin::Oct => int_to_base(interp, args, kwargs, "oct", 8),
        Builtin::Pow => {
            no_kwargs("pow", kwargs)?;
            match args {
                [a, b] => ops::binary_op(&mut interp.heap, BinOp::Pow, *a, *b),
                [a, b, m] => {
                    let (Some(base), Some(exp), Some(modulus)) = (
                        to_bigint(&interp.heap, *a),
                        to_bigint(&interp.heap, *b),
                        to_bigint(&interp.heap, *m),
                    ) else {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            "pow() 3rd argument requires integer operands",
                        ));
                    };
                    if exp.is_negative() {
                        return Err(RunError::spec(
                            ExcKind::ValueError,
                            "pow() 2nd argument cannot be negative when 3rd argument specified",
                        ));
                    }
                    if modulus.to_i64() == Some(0) {
                        return Err(RunError::spec(
                            ExcKind::ValueError,
                            "pow() 3rd argument cannot be 0",
                        ));
                    }
                    ops::fit_big(&mut interp.heap, base.modpow(&exp, &modulus))
                }
                _ => Err(arity_error("pow", "2 or 3", args.len())),
            }
        }
        Builtin::Divmod => {
            no_kwargs("divmod", kwargs)?;
            let [a, b] = args else {
                return Err(arity_error("divmod", "exactly 2", args.len()));
            };
            let q = ops::binary_op(&mut interp.heap, BinOp::FloorDiv, *a, *b)?;
            interp.temp_roots.push(q);
            let r = ops::binary_op(&mut interp.heap, BinOp::Mod, *a, *b);
            interp.temp_roots.pop();
            let r = r?;
            let id = interp.heap.alloc(HeapData::Tuple(vec![q, r]))?;
            Ok(Value::Ref(id))
        }
        Builtin::Round => {
            no_kwargs("round", kwargs)?;
            let (v, ndigits) = match args {
                [v] => (*v, None),
                [v, Value::Int(n)] => (*v, Some(*n)),
                [v, Value::None] => (*v, None),
                _ => return Err(arity_error("round", "1 or 2", args.len())),
            };
            match as_number(v, &interp.heap) {
                Some(Number::Float(f)) => match ndigits {
                    None => {
                        let rounded = f.round_ties_even();
                        if rounded.abs() < i64::MAX as f64 {
                            Ok(Value::Int(rounded as i64))
                        } else {
                            Ok(Value::Float(rounded))
                        }
                    }
                    Some(nd) => {
                        let scale = 10f64.powi(nd.clamp(-308, 308) as i32);
                        Ok(Value::Float((f * scale).round_ties_even() / scale))
                    }
                },
                Some(Number::Int(_) | Number::Big(_)) => Ok(v),
                None => Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "type {} doesn't define __round__ method",
                        type_name(v, &interp.heap)
                    ),
                )),
            }
        }
        Builtin::Type => {
            no_kwargs("type", kwargs)?;
            let [v] = args else {
                return Err(arity_error("type", "exactly one", args.len()));
            };
            Ok(type_of(&interp.heap, *v))
        }
        Builtin::PathCtor => {
            no_kwargs("Path", kwargs)?;
            let mut path = String::new();
            for &arg in args {
                let seg = match arg {
                    Value::Str(s) => interp.heap.str_of(s).to_string(),
                    Value::Ref(id) => match interp.heap.get(id) {
                        HeapData::Str(s) => s.clone(),
                        HeapData::Path(p) => p.clone(),
                        _ => {
                            return Err(RunError::spec(
                                ExcKind::TypeError,
                                "argument should be a str or an os.PathLike object",
                            ))
                        }
                    },
                    _ => {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            "argument should be a str or an os.PathLike object",
                        ))
                    }
                };
                path = if path.is_empty() {
                    seg
                } else {
                    crate::os::join_paths(&path, &seg)
                };
            }
            if path.is_empty() {
                path.push('.');
            }
            Ok(Value::Ref(interp.heap.alloc(HeapData::Path(path))?))
        }
        Builtin::Gather => {
            no_kwargs("gather", kwargs)?;
            let id = interp
                .heap
                .alloc(HeapData::Future(FutureData::Gather { parts: args.to_vec() }))?;
            Ok(Value::Ref(id))
        }
        Builtin::Getenv => Err(RunError::internal("getenv must suspend through the call path")),
        Builtin::DataclassDecorator => Err(RunError::spec(
            ExcKind::TypeError,
            "dataclass() is only supported as a class decorator",
        )),
    }
}

// ── helpers ──

pub(crate) fn value_len(heap: &Heap, v: Value) -> RunResult<usize> {
    match v {
        Value::Str(s) => Ok(heap.str_of(s).chars().count()),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => Ok(s.chars().count()),
            HeapData::Bytes(b) => Ok(b.len()),
            HeapData::List(items) | HeapData::Tuple(items) => Ok(items.len()),
            HeapData::Dict(d) => Ok(d.entries.len()),
            HeapData::Set(s) | HeapData::FrozenSet(s) => Ok(s.entries.len()),
            HeapData::Range(r) => Ok(r.len().max(0) as usize),
            HeapData::NamedTuple(t) => Ok(t.values.len()),
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                format!("object of type '{}' has no len()", type_name(v, heap)),
            )),
        },
        _ => Err(RunError::spec(
            ExcKind::TypeError,
            format!("object of type '{}' has no len()", type_name(v, heap)),
        )),
    }
}

fn convert_int(interp: &mut Interp, args: &[Value]) -> RunResult<Value> {
    let (v, base) = match args {
        [] => return Ok(Value::Int(0)),
        [v] => (*v, None),
        [v, Value::Int(b)] => (*v, Some(*b)),
        _ => return Err(arity_error("int", "at most 2", args.len())),
    };
    if let Some(base) = base {
        let text = py_str(v, &interp.heap)?;
        let trimmed = text.trim();
        let radix = u32::try_from(base)
            .ok()
            .filter(|&b| (2..=36).contains(&b))
            .ok_or_else(|| {
                RunError::spec(ExcKind::ValueError, "int() base must be >= 2 and <= 36")
            })?;
        return parse_int(interp, trimmed, radix);
    }
    match as_number(v, &interp.heap) {
        Some(Number::Int(n)) => Ok(Value::Int(n)),
        Some(Number::Big(id)) => Ok(Value::Ref(id)),
        Some(Number::Float(f)) => {
            let truncated = f.trunc();
            if truncated.abs() < i64::MAX as f64 {
                Ok(Value::Int(truncated as i64))
            } else if truncated.is_finite() {
                let n = BigInt::from(truncated as i128);
                ops::fit_big(&mut interp.heap, n)
            } else {
                Err(RunError::spec(
                    ExcKind::OverflowError,
                    "cannot convert float infinity to integer",
                ))
            }
        }
        None => {
            let text = py_str(v, &interp.heap)?;
            parse_int(interp, text.trim(), 10)
        }
    }
}

fn parse_int(interp: &mut Interp, text: &str, radix: u32) -> RunResult<Value> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let stripped = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
        .filter(|_| radix == 16)
        .unwrap_or(&cleaned);
    match i64::from_str_radix(stripped, radix) {
        Ok(n) => Ok(Value::Int(n)),
        Err(_) => match BigInt::parse_bytes(stripped.as_bytes(), radix) {
            Some(n) => ops::fit_big(&mut interp.heap, n),
            None => Err(RunError::spec(
                ExcKind::ValueError,
                format!("invalid literal for int() with base {radix}: '{text}'"),
            )),
        },
    }
}

fn convert_float(interp: &mut Interp, args: &[Value]) -> RunResult<Value> {
    let v = match args {
        [] => return Ok(Value::Float(0.0)),
        [v] => *v,
        _ => return Err(arity_error("float", "at most 1", args.len())),
    };
    match as_number(v, &interp.heap) {
        Some(Number::Int(n)) => Ok(Value::Float(n as f64)),
        Some(Number::Float(f)) => Ok(Value::Float(f)),
        Some(Number::Big(id)) => Ok(Value::Float(
            interp.heap.big(id).to_f64().unwrap_or(f64::INFINITY),
        )),
        None => {
            let text = py_str(v, &interp.heap)?;
            let trimmed = text.trim();
            match trimmed {
                "inf" | "Infinity" | "+inf" => return Ok(Value::Float(f64::INFINITY)),
                "-inf" | "-Infinity" => return Ok(Value::Float(f64::NEG_INFINITY)),
                "nan" | "+nan" | "-nan" => return Ok(Value::Float(f64::NAN)),
                _ => {}
            }
            trimmed.parse::<f64>().map(Value::Float).map_err(|_| {
                RunError::spec(
                    ExcKind::ValueError,
                    format!("could not convert string to float: '{text}'"),
                )
            })
        }
    }
}

fn int_to_base(
    interp: &mut Interp,
    args: &[Value],
    kwargs: &[(String, Value)],
    name: &str,
    radix: u32,
) -> RunResult<Value> {
    no_kwargs(name, kwargs)?;
    let [v] = args else {
        return Err(arity_error(name, "exactly one", args.len()));
    };
    let Some(n) = to_bigint(&interp.heap, *v) else {
        return Err(RunError::spec(
            ExcKind::TypeError,
            format!(
                "'{}' object cannot be interpreted as an integer",
                type_name(*v, &interp.heap)
            ),
        ));
    };
    let prefix = match radix {
        2 => "0b",
        8 => "0o",
        _ => "0x",
    };
    let digits = n.abs().to_str_radix(radix);
    let text = if n.is_negative() {
        format!("-{prefix}{digits}")
    } else {
        format!("{prefix}{digits}")
    };
    interp.heap.alloc_string(text)
}

fn to_bigint(heap: &Heap, v: Value) -> Option<BigInt> {
    match as_number(v, heap)? {
        Number::Int(n) => Some(BigInt::from(n)),
        Number::Big(id) => Some(heap.big(id).clone()),
        Number::Float(_) => None,
    }
}

fn dict_pairs_from_iterable(interp: &mut Interp, v: Value) -> RunResult<Vec<(Value, Value)>> {
    let items = interp.collect_iterable(v)?;
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        let Value::Ref(id) = item else {
            return Err(RunError::spec(
                ExcKind::TypeError,
                "dict update sequence elements must be pairs",
            ));
        };
        match interp.heap.get(id) {
            HeapData::Tuple(kv) | HeapData::List(kv) if kv.len() == 2 => {
                pairs.push((kv[0], kv[1]));
            }
            _ => {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    "dict update sequence elements must be pairs",
                ))
            }
        }
    }
    Ok(pairs)
}

fn sort_options(
    name: &str,
    kwargs: &[(String, Value)],
) -> RunResult<(Option<Value>, bool)> {
    let mut key = None;
    let mut reverse = false;
    for (kw, value) in kwargs {
        match kw.as_str() {
            "key" => {
                if !matches!(value, Value::None) {
                    key = Some(*value);
                }
            }
            "reverse" => reverse = matches!(value, Value::Bool(true) | Value::Int(1)),
            other => {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("{name}() got an unexpected keyword argument '{other}'"),
                ))
            }
        }
    }
    Ok((key, reverse))
}

/// Stable merge sort with error propagation (unorderable elements raise).
pub(crate) fn sort_values(
    interp: &mut Interp,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> RunResult<Vec<Value>> {
    let saved = interp.temp_roots.len();
    interp.temp_roots.extend(items.iter().copied());
    let result = (|| {
        let mut decorated: Vec<(Value, Value)> = Vec::with_capacity(items.len());
        for &item in &items {
            let sort_key = match key {
                Some(f) => {
                    let k = interp.call_sync(f, vec![item])?;
                    interp.temp_roots.push(k);
                    k
                }
                None => item,
            };
            decorated.push((sort_key, item));
        }
        merge_sort(interp, &mut decorated, reverse)?;
        Ok(decorated.into_iter().map(|(_, v)| v).collect())
    })();
    interp.temp_roots.truncate(saved);
    result
}

fn merge_sort(
    interp: &Interp,
    items: &mut Vec<(Value, Value)>,
    reverse: bool,
) -> RunResult<()> {
    let len = items.len();
    if len < 2 {
        return Ok(());
    }
    let mut right = items.split_off(len / 2);
    merge_sort(interp, items, reverse)?;
    merge_sort(interp, &mut right, reverse)?;
    let left = std::mem::take(items);
    let mut merged = Vec::with_capacity(len);
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let ordering = ops::py_cmp(left[i].0, right[j].0, &interp.heap)?.ok_or_else(|| {
            RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    type_name(right[j].0, &interp.heap),
                    type_name(left[i].0, &interp.heap)
                ),
            )
        })?;
        let take_left = if reverse {
            ordering != Ordering::Less
        } else {
            ordering != Ordering::Greater
        };
        if take_left {
            merged.push(left[i]);
            i += 1;
        } else {
            merged.push(right[j]);
            j += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    *items = merged;
    Ok(())
}

fn min_max(
    interp: &mut Interp,
    args: &[Value],
    kwargs: &[(String, Value)],
    is_min: bool,
) -> RunResult<Value> {
    let name = if is_min { "min" } else { "max" };
    let mut key = None;
    let mut default = None;
    for (kw, value) in kwargs {
        match kw.as_str() {
            "key" => {
                if !matches!(value, Value::None) {
                    key = Some(*value);
                }
            }
            "default" => default = Some(*value),
            other => {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("{name}() got an unexpected keyword argument '{other}'"),
                ))
            }
        }
    }
    let items = match args {
        [] => return Err(arity_error(name, "at least 1", 0)),
        [v] => interp.collect_iterable(*v)?,
        several => several.to_vec(),
    };
    if items.is_empty() {
        return match default {
            Some(d) => Ok(d),
            None => Err(RunError::spec(
                ExcKind::ValueError,
                format!("{name}() arg is an empty sequence"),
            )),
        };
    }
    let saved = interp.temp_roots.len();
    interp.temp_roots.extend(items.iter().copied());
    let result = (|| {
        let mut best = items[0];
        let mut best_key = match key {
            Some(f) => interp.call_sync(f, vec![best])?,
            None => best,
        };
        interp.temp_roots.push(best_key);
        for &item in &items[1..] {
            let item_key = match key {
                Some(f) => {
                    let k = interp.call_sync(f, vec![item])?;
                    interp.temp_roots.push(k);
                    k
                }
                None => item,
            };
            let ordering = ops::py_cmp(item_key, best_key, &interp.heap)?.ok_or_else(|| {
                RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "'<' not supported between instances of '{}' and '{}'",
                        type_name(item_key, &interp.heap),
                        type_name(best_key, &interp.heap)
                    ),
                )
            })?;
            let better = if is_min {
                ordering == Ordering::Less
            } else {
                ordering == Ordering::Greater
            };
            if better {
                best = item;
                best_key = item_key;
            }
        }
        Ok(best)
    })();
    interp.temp_roots.truncate(saved);
    result
}

fn isinstance(heap: &Heap, v: Value, class: Value) -> RunResult<bool> {
    match class {
        Value::Builtin(ctor) => Ok(match ctor {
            Builtin::Bool => matches!(v, Value::Bool(_)),
            Builtin::Int => {
                matches!(v, Value::Int(_) | Value::Bool(_))
                    || matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::BigInt(_)))
            }
            Builtin::Float => matches!(v, Value::Float(_)),
            Builtin::Str => match v {
                Value::Str(_) => true,
                Value::Ref(id) => matches!(heap.get(id), HeapData::Str(_)),
                _ => false,
            },
            Builtin::List => matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::List(_))),
            Builtin::Tuple => matches!(
                v,
                Value::Ref(id)
                    if matches!(heap.get(id), HeapData::Tuple(_) | HeapData::NamedTuple(_))
            ),
            Builtin::Dict => matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::Dict(_))),
            Builtin::Set => matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::Set(_))),
            Builtin::FrozenSet => {
                matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::FrozenSet(_)))
            }
            Builtin::Bytes => matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::Bytes(_))),
            Builtin::PathCtor => {
                matches!(v, Value::Ref(id) if matches!(heap.get(id), HeapData::Path(_)))
            }
            _ => false,
        }),
        Value::ExcClass(of) => match v {
            Value::Ref(id) => match heap.get(id) {
                HeapData::Exception(e) => Ok(e.kind.is_subtype(of)),
                _ => Ok(false),
            },
            _ => Ok(false),
        },
        Value::Ref(class_id) => match heap.get(class_id) {
            HeapData::Class(target) => match v {
                Value::Ref(id) => match heap.get(id) {
                    HeapData::Instance(inst) => {
                        if inst.class == class_id {
                            return Ok(true);
                        }
                        // host-injected dataclasses match by name
                        match heap.get(inst.class) {
                            HeapData::Class(c) => {
                                Ok(c.dataclass && target.dataclass && c.name == target.name)
                            }
                            _ => Ok(false),
                        }
                    }
                    _ => Ok(false),
                },
                _ => Ok(false),
            },
            HeapData::Tuple(classes) => {
                for &c in classes {
                    if isinstance(heap, v, c)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                "isinstance() arg 2 must be a type or tuple of types",
            )),
        },
        _ => Err(RunError::spec(
            ExcKind::TypeError,
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

fn type_of(heap: &Heap, v: Value) -> Value {
    match v {
        Value::Bool(_) => Value::Builtin(Builtin::Bool),
        Value::Int(_) => Value::Builtin(Builtin::Int),
        Value::Float(_) => Value::Builtin(Builtin::Float),
        Value::Str(_) => Value::Builtin(Builtin::Str),
        Value::None | Value::Undefined => Value::None,
        Value::Builtin(_) | Value::ExtFunction(_) => Value::Builtin(Builtin::Type),
        Value::ExcClass(_) => Value::Builtin(Builtin::Type),
        Value::Module(_) => Value::Builtin(Builtin::Type),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(_) => Value::Builtin(Builtin::Str),
            HeapData::BigInt(_) => Value::Builtin(Builtin::Int),
            HeapData::Bytes(_) => Value::Builtin(Builtin::Bytes),
            HeapData::List(_) => Value::Builtin(Builtin::List),
            HeapData::Tuple(_) | HeapData::NamedTuple(_) => Value::Builtin(Builtin::Tuple),
            HeapData::Dict(_) => Value::Builtin(Builtin::Dict),
            HeapData::Set(_) => Value::Builtin(Builtin::Set),
            HeapData::FrozenSet(_) => Value::Builtin(Builtin::FrozenSet),
            HeapData::Range(_) => Value::Builtin(Builtin::Range),
            HeapData::Path(_) => Value::Builtin(Builtin::PathCtor),
            HeapData::Instance(inst) => Value::Ref(inst.class),
            HeapData::Exception(e) => Value::ExcClass(e.kind),
            _ => Value::Builtin(Builtin::Type),
        },
    }
}
