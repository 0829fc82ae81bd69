//! Bounded managed heap: a contention-free arena owned by one interpreter.
//!
//! Allocation charges a byte estimate against the budget and counts toward
//! the allocation cap. Reclamation is mark-and-sweep from explicit roots;
//! reference cycles need no special handling. Handles are plain indices, so
//! a serialised heap round-trips as a flat table.

use crate::exception::{ResourceError, RunError, RunResult};
use crate::object::{FutureData, HeapData, IterData, MethodKind};
use crate::values::{StrRef, Value};

pub(crate) type HeapId = u32;

#[derive(Debug, Clone)]
struct Slot {
    data: HeapData,
    bytes: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Heap {
    /// Interned strings: program constants, appended per REPL feed.
    strings: Vec<String>,
    slots: Vec<Option<Slot>>,
    free: Vec<HeapId>,
    live_bytes: usize,
    total_allocations: u64,
    allocs_since_gc: u64,
    /// Completed sweeps; serves as the liveness epoch.
    generation: u64,
    max_memory: Option<usize>,
    max_allocations: Option<u64>,
    gc_interval: Option<u64>,
}

impl Heap {
    pub fn new(max_memory: Option<usize>, max_allocations: Option<u64>, gc_interval: Option<u64>) -> Self {
        Self {
            strings: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            live_bytes: 0,
            total_allocations: 0,
            allocs_since_gc: 0,
            generation: 0,
            max_memory,
            max_allocations,
            gc_interval,
        }
    }

    // ── interned strings ──

    /// Append a program's string table; returns the base offset for
    /// resolving that program's local string ids.
    pub fn push_strings(&mut self, strings: &[String]) -> u32 {
        let base = self.strings.len() as u32;
        self.strings.extend_from_slice(strings);
        base
    }

    pub fn interned(&self, id: u32) -> &str {
        &self.strings[id as usize]
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn str_of(&self, r: StrRef) -> &str {
        match r {
            StrRef::Interned(id) => self.interned(id),
            StrRef::Heap(id) => match self.get(id) {
                HeapData::Str(s) => s,
                _ => "",
            },
        }
    }

    pub fn big(&self, id: HeapId) -> &num_bigint::BigInt {
        match self.get(id) {
            HeapData::BigInt(n) => n,
            _ => unreachable!("heap id does not reference a big integer"),
        }
    }

    // ── allocation ──

    /// Would allocating `bytes` more cross the heap cap?
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.max_memory
            .is_some_and(|cap| self.live_bytes + bytes > cap)
    }

    pub fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        let bytes = estimate_size(&data);
        if let Some(cap) = self.max_allocations {
            if self.total_allocations + 1 > cap {
                return Err(RunError::Resource(ResourceError::Memory(format!(
                    "allocation limit of {cap} exceeded"
                ))));
            }
        }
        if let Some(cap) = self.max_memory {
            if self.live_bytes + bytes > cap {
                return Err(RunError::Resource(ResourceError::Memory(format!(
                    "heap memory limit of {cap} bytes exceeded"
                ))));
            }
        }
        self.total_allocations += 1;
        self.allocs_since_gc += 1;
        self.live_bytes += bytes;
        let slot = Slot { data, bytes };
        match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(slot);
                Ok(id)
            }
            None => {
                let id = self.slots.len() as HeapId;
                self.slots.push(Some(slot));
                Ok(id)
            }
        }
    }

    /// Allocate a runtime string. Strings are always surfaced as
    /// `Value::Str`, whether interned or heap-allocated, so equality and
    /// hashing see one representation.
    pub fn alloc_string(&mut self, s: String) -> RunResult<Value> {
        Ok(Value::Str(StrRef::Heap(self.alloc(HeapData::Str(s))?)))
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        match self.slots.get(id as usize) {
            Some(Some(slot)) => &slot.data,
            _ => unreachable!("dangling heap reference {id}"),
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        match self.slots.get_mut(id as usize) {
            Some(Some(slot)) => &mut slot.data,
            _ => unreachable!("dangling heap reference {id}"),
        }
    }

    /// Re-estimate a slot after in-place growth, charging the difference.
    pub fn recharge(&mut self, id: HeapId) -> RunResult<()> {
        let Some(Some(slot)) = self.slots.get_mut(id as usize) else {
            return Ok(());
        };
        let new_bytes = estimate_size(&slot.data);
        let old_bytes = slot.bytes;
        slot.bytes = new_bytes;
        self.live_bytes = self.live_bytes - old_bytes + new_bytes;
        if let Some(cap) = self.max_memory {
            if self.live_bytes > cap {
                return Err(RunError::Resource(ResourceError::Memory(format!(
                    "heap memory limit of {cap} bytes exceeded"
                ))));
            }
        }
        Ok(())
    }

    // ── accounting ──

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn total_allocations(&self) -> u64 {
        self.total_allocations
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A periodic sweep is due (`gc_interval` allocations since the last).
    pub fn should_sweep(&self) -> bool {
        self.gc_interval
            .is_some_and(|interval| self.allocs_since_gc >= interval)
    }

    // ── mark and sweep ──

    /// Mark from `roots` and free everything unmarked.
    pub fn sweep(&mut self, roots: impl IntoIterator<Item = Value>) {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<HeapId> = Vec::new();
        for root in roots {
            if let Some(id) = root.heap_id() {
                worklist.push(id);
            }
        }
        while let Some(id) = worklist.pop() {
            let idx = id as usize;
            if idx >= marked.len() || marked[idx] {
                continue;
            }
            marked[idx] = true;
            if let Some(Some(slot)) = self.slots.get(idx) {
                push_children(&slot.data, &mut worklist);
            }
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !marked[idx] {
                let freed = slot.take().expect("slot checked non-empty");
                self.live_bytes -= freed.bytes;
                self.free.push(idx as HeapId);
            }
        }
        self.allocs_since_gc = 0;
        self.generation += 1;
    }

    // ── serialisation support ──

    pub fn live_entries(&self) -> impl Iterator<Item = (HeapId, &HeapData)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|slot| (i as HeapId, &slot.data)))
    }

    /// Rebuild a heap from decoded parts, recomputing byte sizes.
    pub fn from_parts(
        strings: Vec<String>,
        entries: Vec<(HeapId, HeapData)>,
        total_allocations: u64,
        generation: u64,
        max_memory: Option<usize>,
        max_allocations: Option<u64>,
        gc_interval: Option<u64>,
    ) -> Self {
        let max_id = entries.iter().map(|&(id, _)| id).max();
        let len = max_id.map(|m| m as usize + 1).unwrap_or(0);
        let mut slots: Vec<Option<Slot>> = vec![None; len];
        let mut live_bytes = 0;
        for (id, data) in entries {
            let bytes = estimate_size(&data);
            live_bytes += bytes;
            slots[id as usize] = Some(Slot { data, bytes });
        }
        let free = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i as HeapId)
            .collect();
        Self {
            strings,
            slots,
            free,
            live_bytes,
            total_allocations,
            allocs_since_gc: 0,
            generation,
            max_memory,
            max_allocations,
            gc_interval,
        }
    }
}

/// Byte-size estimate per kind: slot overhead plus payload.
pub(crate) fn estimate_size(data: &HeapData) -> usize {
    const BASE: usize = 40;
    BASE + match data {
        HeapData::Str(s) => s.len(),
        HeapData::Bytes(b) => b.len(),
        HeapData::BigInt(n) => n.bits() as usize / 8 + 8,
        HeapData::List(items) | HeapData::Tuple(items) => items.len() * 16,
        HeapData::Dict(d) => d.entries.len() * 40,
        HeapData::Set(s) | HeapData::FrozenSet(s) => s.entries.len() * 24,
        HeapData::Range(_) => 24,
        HeapData::Slice(_) => 48,
        HeapData::Closure(c) => 32 + c.defaults.len() * 16 + c.cells.len() * 4,
        HeapData::BoundMethod(_) => 32,
        HeapData::Class(c) => {
            64 + c.fields.iter().map(|f| f.name.len() + 24).sum::<usize>()
                + c.methods.iter().map(|(n, _)| n.len() + 24).sum::<usize>()
        }
        HeapData::Instance(i) => i.attrs.iter().map(|(n, _)| n.len() + 24).sum::<usize>(),
        HeapData::Path(p) => p.len(),
        HeapData::NamedTuple(t) => {
            t.type_name.len() + t.names.iter().map(|n| n.len() + 24).sum::<usize>()
        }
        HeapData::Exception(e) => e.message.len() + e.traceback.len() * 64,
        HeapData::Cell(_) => 16,
        HeapData::Iter(IterData::Keys { keys, .. }) => keys.len() * 16,
        HeapData::Iter(_) => 32,
        HeapData::Future(FutureData::Gather { parts }) => parts.len() * 16,
        HeapData::Future(_) => 16,
    }
}

fn push_value(v: &Value, out: &mut Vec<HeapId>) {
    if let Some(id) = v.heap_id() {
        out.push(id);
    }
}

fn push_children(data: &HeapData, out: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_)
        | HeapData::Bytes(_)
        | HeapData::BigInt(_)
        | HeapData::Range(_)
        | HeapData::Path(_) => {}
        HeapData::List(items) | HeapData::Tuple(items) => {
            for v in items {
                push_value(v, out);
            }
        }
        HeapData::Dict(d) => {
            for (_, k, v) in &d.entries {
                push_value(k, out);
                push_value(v, out);
            }
        }
        HeapData::Set(s) | HeapData::FrozenSet(s) => {
            for (_, v) in &s.entries {
                push_value(v, out);
            }
        }
        HeapData::Slice(s) => {
            push_value(&s.start, out);
            push_value(&s.stop, out);
            push_value(&s.step, out);
        }
        HeapData::Closure(c) => {
            if let StrRef::Heap(id) = c.name {
                out.push(id);
            }
            for v in &c.defaults {
                push_value(v, out);
            }
            out.extend(c.cells.iter().copied());
        }
        HeapData::BoundMethod(m) => {
            push_value(&m.recv, out);
            if let MethodKind::Function(f) = &m.kind {
                push_value(f, out);
            }
        }
        HeapData::Class(c) => {
            for field in &c.fields {
                if let Some(d) = &field.default {
                    push_value(d, out);
                }
            }
            for (_, m) in &c.methods {
                push_value(m, out);
            }
        }
        HeapData::Instance(i) => {
            out.push(i.class);
            for (_, v) in &i.attrs {
                push_value(v, out);
            }
        }
        HeapData::NamedTuple(t) => {
            for v in &t.values {
                push_value(v, out);
            }
        }
        HeapData::Exception(e) => {
            if let Some(cause) = e.cause {
                out.push(cause);
            }
        }
        HeapData::Cell(v) => push_value(v, out),
        HeapData::Iter(iter) => match iter {
            IterData::Seq { seq, .. } | IterData::Reversed { seq, .. } => out.push(*seq),
            IterData::Chars { s, .. } => {
                if let StrRef::Heap(id) = s {
                    out.push(*id);
                }
            }
            IterData::Range { .. } => {}
            IterData::Keys { keys, .. } => {
                for v in keys {
                    push_value(v, out);
                }
            }
            IterData::Zip { iters } => out.extend(iters.iter().copied()),
            IterData::Enumerate { inner, .. } => out.push(*inner),
        },
        HeapData::Future(f) => match f {
            FutureData::External { .. } => {}
            FutureData::Gather { parts } => {
                for v in parts {
                    push_value(v, out);
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_heap() -> Heap {
        Heap::new(None, None, None)
    }

    #[test]
    fn alloc_and_read_back() {
        let mut heap = empty_heap();
        let id = heap.alloc(HeapData::Str("hello".to_string())).unwrap();
        assert!(matches!(heap.get(id), HeapData::Str(s) if s == "hello"));
        assert_eq!(heap.total_allocations(), 1);
        assert!(heap.live_bytes() > 0);
    }

    #[test]
    fn allocation_cap_enforced() {
        let mut heap = Heap::new(None, Some(2), None);
        heap.alloc(HeapData::Str("a".into())).unwrap();
        heap.alloc(HeapData::Str("b".into())).unwrap();
        assert!(matches!(
            heap.alloc(HeapData::Str("c".into())),
            Err(RunError::Resource(ResourceError::Memory(_)))
        ));
    }

    #[test]
    fn sweep_frees_unreachable() {
        let mut heap = empty_heap();
        let keep = heap.alloc(HeapData::Str("keep".into())).unwrap();
        let _dead = heap.alloc(HeapData::Str("dead".into())).unwrap();
        heap.sweep([Value::Ref(keep)]);
        assert_eq!(heap.live_count(), 1);
        assert_eq!(heap.generation(), 1);
    }

    #[test]
    fn sweep_follows_references() {
        let mut heap = empty_heap();
        let inner = heap.alloc(HeapData::Str("inner".into())).unwrap();
        let list = heap
            .alloc(HeapData::List(vec![Value::Ref(inner)]))
            .unwrap();
        heap.sweep([Value::Ref(list)]);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn sweep_handles_cycles() {
        let mut heap = empty_heap();
        let a = heap.alloc(HeapData::List(vec![])).unwrap();
        let b = heap.alloc(HeapData::List(vec![Value::Ref(a)])).unwrap();
        if let HeapData::List(items) = heap.get_mut(a) {
            items.push(Value::Ref(b));
        }
        // the cycle is unreachable from the (empty) root set
        heap.sweep([]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = empty_heap();
        let a = heap.alloc(HeapData::Str("a".into())).unwrap();
        heap.sweep([]);
        let b = heap.alloc(HeapData::Str("b".into())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn memory_cap_enforced() {
        let mut heap = Heap::new(Some(120), None, None);
        heap.alloc(HeapData::Str("x".repeat(40))).unwrap();
        assert!(heap.alloc(HeapData::Str("y".repeat(60))).is_err());
    }
}
