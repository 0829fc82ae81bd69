//! Host value mapping: the boundary between host data and interpreter data.
//!
//! Primitives, text, byte-strings, paths, stat records, containers, and
//! registered dataclasses convert freely both ways; callables and iterators
//! do not. [`HostValue`] carries serde derives and JSON conversions so
//! embedders can move data in and out without touching engine internals.

use crate::exception::{ExcKind, RunError, RunResult};
use crate::heap::Heap;
use crate::object::{
    ClassData, DictData, FieldInfo, HeapData, InstanceData, NamedTupleData, SetData,
};
use crate::os::STAT_FIELDS;
use crate::values::{py_hash, type_name, Value};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A value as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<HostValue>),
    Tuple(Vec<HostValue>),
    Set(Vec<HostValue>),
    FrozenSet(Vec<HostValue>),
    /// Insertion-ordered key/value pairs.
    Dict(Vec<(HostValue, HostValue)>),
    Path(String),
    Stat(StatResult),
    Dataclass {
        name: String,
        fields: Vec<(String, HostValue)>,
    },
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Int(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(s)
    }
}

/// Equivalent of `os.stat_result`: a 10-tuple with named accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatResult {
    pub st_mode: i64,
    pub st_ino: i64,
    pub st_dev: i64,
    pub st_nlink: i64,
    pub st_uid: i64,
    pub st_gid: i64,
    pub st_size: i64,
    pub st_atime: f64,
    pub st_mtime: f64,
    pub st_ctime: f64,
}

impl StatResult {
    /// Stat record for a regular file. A bare permission mode gets the
    /// regular-file type bits added.
    pub fn file_stat(size: i64, mode: i64, mtime: f64) -> Self {
        let mode = if mode < 0o1000 { mode | crate::os::S_IFREG } else { mode };
        Self {
            st_mode: mode,
            st_ino: 0,
            st_dev: 0,
            st_nlink: 1,
            st_uid: 0,
            st_gid: 0,
            st_size: size,
            st_atime: mtime,
            st_mtime: mtime,
            st_ctime: mtime,
        }
    }

    /// Stat record for a directory.
    pub fn dir_stat(mode: i64, mtime: f64) -> Self {
        let mode = if mode < 0o1000 { mode | crate::os::S_IFDIR } else { mode };
        Self {
            st_mode: mode,
            st_ino: 0,
            st_dev: 0,
            st_nlink: 2,
            st_uid: 0,
            st_gid: 0,
            st_size: 4096,
            st_atime: mtime,
            st_mtime: mtime,
            st_ctime: mtime,
        }
    }
}

/// An exception outcome supplied by the host for an external or OS call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostException {
    /// Exception type name; unknown names raise as `RuntimeError`.
    pub kind: String,
    pub message: String,
}

impl HostException {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }

    pub(crate) fn exc_kind(&self) -> ExcKind {
        ExcKind::from_name(&self.kind).unwrap_or(ExcKind::RuntimeError)
    }
}

/// Names of host dataclasses allowed to round-trip through serialisation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataclassRegistry {
    names: Vec<String>,
}

impl DataclassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ── host → interpreter ──

/// Convert a host value into the heap. Freshly allocated children are
/// pushed onto `temp_roots` so an emergency sweep cannot reclaim them
/// mid-conversion.
pub(crate) fn host_to_value(
    heap: &mut Heap,
    temp_roots: &mut Vec<Value>,
    v: &HostValue,
) -> RunResult<Value> {
    let value = match v {
        HostValue::None => Value::None,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(n) => Value::Int(*n),
        HostValue::BigInt(n) => match n.to_i64() {
            Some(small) => Value::Int(small),
            None => Value::Ref(heap.alloc(HeapData::BigInt(n.clone()))?),
        },
        HostValue::Float(f) => Value::Float(*f),
        HostValue::Str(s) => heap.alloc_string(s.clone())?,
        HostValue::Bytes(b) => Value::Ref(heap.alloc(HeapData::Bytes(b.clone()))?),
        HostValue::Path(p) => Value::Ref(heap.alloc(HeapData::Path(p.clone()))?),
        HostValue::Stat(stat) => Value::Ref(heap.alloc(HeapData::NamedTuple(stat_tuple(stat)))?),
        HostValue::List(items) => {
            let values = convert_seq(heap, temp_roots, items)?;
            Value::Ref(heap.alloc(HeapData::List(values))?)
        }
        HostValue::Tuple(items) => {
            let values = convert_seq(heap, temp_roots, items)?;
            Value::Ref(heap.alloc(HeapData::Tuple(values))?)
        }
        HostValue::Set(items) | HostValue::FrozenSet(items) => {
            let values = convert_seq(heap, temp_roots, items)?;
            let mut data = SetData::default();
            for value in values {
                let hash = py_hash(value, heap)?;
                if !data.contains(heap, hash, value, 0)? {
                    data.entries.push((hash, value));
                }
            }
            let data = if matches!(v, HostValue::FrozenSet(_)) {
                HeapData::FrozenSet(data)
            } else {
                HeapData::Set(data)
            };
            Value::Ref(heap.alloc(data)?)
        }
        HostValue::Dict(pairs) => {
            let mut data = DictData::default();
            for (k, val) in pairs {
                let key = host_to_value(heap, temp_roots, k)?;
                temp_roots.push(key);
                let value = host_to_value(heap, temp_roots, val)?;
                temp_roots.push(value);
                let hash = py_hash(key, heap)?;
                if let Some(i) = data.find_index(heap, hash, key)? {
                    data.entries[i].2 = value;
                } else {
                    data.entries.push((hash, key, value));
                }
            }
            Value::Ref(heap.alloc(HeapData::Dict(data))?)
        }
        HostValue::Dataclass { name, fields } => {
            let mut attrs = Vec::with_capacity(fields.len());
            for (field, val) in fields {
                let value = host_to_value(heap, temp_roots, val)?;
                temp_roots.push(value);
                attrs.push((field.clone(), value));
            }
            let class = heap.alloc(HeapData::Class(ClassData {
                name: name.clone(),
                fields: fields
                    .iter()
                    .map(|(n, _)| FieldInfo { name: n.clone(), default: None })
                    .collect(),
                methods: Vec::new(),
                dataclass: true,
                frozen: false,
            }))?;
            temp_roots.push(Value::Ref(class));
            Value::Ref(heap.alloc(HeapData::Instance(InstanceData { class, attrs }))?)
        }
    };
    temp_roots.push(value);
    Ok(value)
}

fn convert_seq(
    heap: &mut Heap,
    temp_roots: &mut Vec<Value>,
    items: &[HostValue],
) -> RunResult<Vec<Value>> {
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        let value = host_to_value(heap, temp_roots, item)?;
        temp_roots.push(value);
        values.push(value);
    }
    Ok(values)
}

fn stat_tuple(stat: &StatResult) -> NamedTupleData {
    NamedTupleData {
        type_name: "os.stat_result".to_string(),
        names: STAT_FIELDS.iter().map(|s| s.to_string()).collect(),
        values: vec![
            Value::Int(stat.st_mode),
            Value::Int(stat.st_ino),
            Value::Int(stat.st_dev),
            Value::Int(stat.st_nlink),
            Value::Int(stat.st_uid),
            Value::Int(stat.st_gid),
            Value::Int(stat.st_size),
            Value::Float(stat.st_atime),
            Value::Float(stat.st_mtime),
            Value::Float(stat.st_ctime),
        ],
    }
}

// ── interpreter → host ──

/// Materialise an interpreter value for the host. Callables and iterators
/// do not convert.
pub(crate) fn value_to_host(heap: &Heap, v: Value) -> RunResult<HostValue> {
    Ok(match v {
        Value::Undefined => {
            return Err(RunError::internal("undefined value escaped to the host"))
        }
        Value::None => HostValue::None,
        Value::Bool(b) => HostValue::Bool(b),
        Value::Int(n) => HostValue::Int(n),
        Value::Float(f) => HostValue::Float(f),
        Value::Str(s) => HostValue::Str(heap.str_of(s).to_string()),
        Value::Builtin(_) | Value::ExcClass(_) | Value::Module(_) | Value::ExtFunction(_) => {
            return Err(not_convertible(v, heap))
        }
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => HostValue::Str(s.clone()),
            HeapData::Bytes(b) => HostValue::Bytes(b.clone()),
            HeapData::BigInt(n) => HostValue::BigInt(n.clone()),
            HeapData::List(items) => HostValue::List(host_seq(heap, items)?),
            HeapData::Tuple(items) => HostValue::Tuple(host_seq(heap, items)?),
            HeapData::Set(s) => {
                HostValue::Set(host_seq(heap, &s.entries.iter().map(|&(_, v)| v).collect::<Vec<_>>())?)
            }
            HeapData::FrozenSet(s) => HostValue::FrozenSet(host_seq(
                heap,
                &s.entries.iter().map(|&(_, v)| v).collect::<Vec<_>>(),
            )?),
            HeapData::Dict(d) => {
                let mut pairs = Vec::with_capacity(d.entries.len());
                for &(_, k, val) in &d.entries {
                    pairs.push((value_to_host(heap, k)?, value_to_host(heap, val)?));
                }
                HostValue::Dict(pairs)
            }
            HeapData::Path(p) => HostValue::Path(p.clone()),
            HeapData::NamedTuple(t) => {
                if let Some(stat) = stat_from_tuple(t) {
                    HostValue::Stat(stat)
                } else {
                    HostValue::Tuple(host_seq(heap, &t.values)?)
                }
            }
            HeapData::Range(r) => {
                let mut items = Vec::new();
                let mut cur = r.start;
                while (r.step > 0 && cur < r.stop) || (r.step < 0 && cur > r.stop) {
                    items.push(HostValue::Int(cur));
                    cur += r.step;
                }
                HostValue::List(items)
            }
            HeapData::Instance(inst) => {
                let HeapData::Class(class) = heap.get(inst.class) else {
                    return Err(not_convertible(v, heap));
                };
                if !class.dataclass {
                    return Err(not_convertible(v, heap));
                }
                let mut fields = Vec::with_capacity(inst.attrs.len());
                for (name, value) in &inst.attrs {
                    fields.push((name.clone(), value_to_host(heap, *value)?));
                }
                HostValue::Dataclass { name: class.name.clone(), fields }
            }
            _ => return Err(not_convertible(v, heap)),
        },
    })
}

fn host_seq(heap: &Heap, items: &[Value]) -> RunResult<Vec<HostValue>> {
    items.iter().map(|&v| value_to_host(heap, v)).collect()
}

fn stat_from_tuple(t: &NamedTupleData) -> Option<StatResult> {
    if t.type_name != "os.stat_result" || t.values.len() != 10 {
        return None;
    }
    let int = |v: &Value| match v {
        Value::Int(n) => Some(*n),
        Value::Float(f) => Some(*f as i64),
        _ => None,
    };
    let float = |v: &Value| match v {
        Value::Float(f) => Some(*f),
        Value::Int(n) => Some(*n as f64),
        _ => None,
    };
    Some(StatResult {
        st_mode: int(&t.values[0])?,
        st_ino: int(&t.values[1])?,
        st_dev: int(&t.values[2])?,
        st_nlink: int(&t.values[3])?,
        st_uid: int(&t.values[4])?,
        st_gid: int(&t.values[5])?,
        st_size: int(&t.values[6])?,
        st_atime: float(&t.values[7])?,
        st_mtime: float(&t.values[8])?,
        st_ctime: float(&t.values[9])?,
    })
}

fn not_convertible(v: Value, heap: &Heap) -> RunError {
    RunError::spec(
        ExcKind::TypeError,
        format!("cannot convert '{}' to a host value", type_name(v, heap)),
    )
}

// ── JSON conversion for embedders ──

impl HostValue {
    /// Lossy-but-practical JSON rendering: tuples and sets become arrays,
    /// non-string dict keys are stringified, bytes become arrays of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map, Number, Value as Json};
        match self {
            HostValue::None => Json::Null,
            HostValue::Bool(b) => json!(b),
            HostValue::Int(n) => json!(n),
            HostValue::BigInt(n) => json!(n.to_string()),
            HostValue::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            HostValue::Str(s) => json!(s),
            HostValue::Bytes(b) => json!(b),
            HostValue::List(items)
            | HostValue::Tuple(items)
            | HostValue::Set(items)
            | HostValue::FrozenSet(items) => {
                Json::Array(items.iter().map(HostValue::to_json).collect())
            }
            HostValue::Dict(pairs) => {
                let mut map = Map::new();
                for (k, v) in pairs {
                    let key = match k {
                        HostValue::Str(s) => s.clone(),
                        other => match other.to_json() {
                            Json::String(s) => s,
                            json => json.to_string(),
                        },
                    };
                    map.insert(key, v.to_json());
                }
                Json::Object(map)
            }
            HostValue::Path(p) => json!(p),
            HostValue::Stat(stat) => serde_json::to_value(stat).unwrap_or(Json::Null),
            HostValue::Dataclass { name, fields } => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                json!({ "__dataclass__": name, "fields": map })
            }
        }
    }

    /// Interpret a JSON document as a host value (objects become dicts,
    /// arrays become lists).
    pub fn from_json(json: &serde_json::Value) -> HostValue {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::None,
            Json::Bool(b) => HostValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HostValue::Int(i)
                } else {
                    HostValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => HostValue::Str(s.clone()),
            Json::Array(items) => HostValue::List(items.iter().map(HostValue::from_json).collect()),
            Json::Object(map) => HostValue::Dict(
                map.iter()
                    .map(|(k, v)| (HostValue::Str(k.clone()), HostValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut heap = Heap::new(None, None, None);
        let mut roots = Vec::new();
        for host in [
            HostValue::None,
            HostValue::Bool(true),
            HostValue::Int(42),
            HostValue::Float(1.5),
            HostValue::Str("hello".into()),
            HostValue::Bytes(vec![1, 2, 3]),
            HostValue::Path("/tmp/x".into()),
        ] {
            let v = host_to_value(&mut heap, &mut roots, &host).unwrap();
            assert_eq!(value_to_host(&heap, v).unwrap(), host);
        }
    }

    #[test]
    fn round_trip_nested_containers() {
        let mut heap = Heap::new(None, None, None);
        let mut roots = Vec::new();
        let host = HostValue::Dict(vec![
            (
                HostValue::Str("a".into()),
                HostValue::List(vec![HostValue::Int(1), HostValue::Int(2)]),
            ),
            (
                HostValue::Str("b".into()),
                HostValue::Dict(vec![(HostValue::Str("nested".into()), HostValue::Bool(true))]),
            ),
        ]);
        let v = host_to_value(&mut heap, &mut roots, &host).unwrap();
        assert_eq!(value_to_host(&heap, v).unwrap(), host);
    }

    #[test]
    fn dataclass_round_trip() {
        let mut heap = Heap::new(None, None, None);
        let mut roots = Vec::new();
        let host = HostValue::Dataclass {
            name: "Person".into(),
            fields: vec![
                ("name".into(), HostValue::Str("Alice".into())),
                ("age".into(), HostValue::Int(30)),
            ],
        };
        let v = host_to_value(&mut heap, &mut roots, &host).unwrap();
        assert_eq!(value_to_host(&heap, v).unwrap(), host);
    }

    #[test]
    fn stat_round_trip() {
        let mut heap = Heap::new(None, None, None);
        let mut roots = Vec::new();
        let host = HostValue::Stat(StatResult::file_stat(1024, 0o644, 12.5));
        let v = host_to_value(&mut heap, &mut roots, &host).unwrap();
        let back = value_to_host(&heap, v).unwrap();
        assert_eq!(back, host);
        let HostValue::Stat(stat) = back else { panic!() };
        assert_eq!(stat.st_mode, 0o100_644);
    }

    #[test]
    fn json_conversion() {
        let host = HostValue::Dict(vec![(
            HostValue::Str("xs".into()),
            HostValue::List(vec![HostValue::Int(1), HostValue::None]),
        )]);
        let json = host.to_json();
        assert_eq!(json["xs"][0], 1);
        let back = HostValue::from_json(&json);
        assert_eq!(back, host);
    }
}
