//! The dispatch loop: evaluation stack, frame stack, opcode execution,
//! exception propagation, and the suspension exits.
//!
//! Suspension is simply "return from the dispatch loop with a suspend
//! value"; resumption re-enters the loop with restored state. The
//! interpreter owns every piece of mutable state (heap, frames, globals,
//! futures), so a paused execution can move across threads inside a
//! snapshot.

use crate::builtins::{self, Builtin};
use crate::convert::{host_to_value, value_to_host, HostValue};
use crate::exception::{ExcKind, RunError, RunResult, TraceEntry};
use crate::frame::{Frame, Handler};
use crate::futures::{FutureOutcome, FuturesTable};
use crate::heap::{Heap, HeapId};
use crate::limits::{LimitTracker, ResourceLimits};
use crate::methods;
use crate::object::{
    BoundMethodData, ClassData, ClosureData, ExcData, FieldInfo, FutureData, HeapData,
    InstanceData, IterData, MethodKind, NamedTupleData, SliceData,
};
use crate::ops;
use crate::os::OsFunction;
use crate::print::{PrintSink, StdoutSink};
use crate::values::{is_truthy, py_repr, py_str, type_name, Module, StrRef, Value};
use monty_compiler::{ClassDesc, CodeObject, Const, Instr, Program};
use std::collections::HashMap;
use std::sync::Arc;

/// Sweep proactively when within this many bytes of the heap cap.
const SWEEP_RESERVE_BYTES: usize = 4096;

/// One program loaded into the interpreter (REPL feeds append more).
#[derive(Debug, Clone)]
pub(crate) struct CodeEntry {
    pub program: Arc<Program>,
    pub code_idx: u32,
    /// Offset of this program's string table in the merged interns.
    pub str_base: u32,
    /// Offset of this program's code objects in the merged code list.
    pub code_base: u32,
}

/// How a frame delivers its return value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ReturnMode {
    Normal,
    /// Push this value instead of the returned one (`__init__` frames push
    /// the new instance).
    ReplaceWith(Value),
}

/// A call paused for the host.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PausedCall {
    pub call_id: u64,
    pub function: String,
    pub is_os: bool,
    pub args: Vec<HostValue>,
    pub kwargs: Vec<(String, HostValue)>,
}

/// Why the dispatch loop returned to the host.
#[derive(Debug)]
pub(crate) enum Exit {
    Done(Value),
    ExternalCall(PausedCall),
    /// Awaiting any of these pending call ids (first-completed policy).
    FutureWait(Vec<u64>),
}

enum Invoked {
    Value(Value),
    Framed,
    Suspend(PausedCall),
}

pub(crate) struct Interp {
    pub codes: Vec<CodeEntry>,
    pub feeds: Vec<Arc<Program>>,
    pub heap: Heap,
    pub frames: Vec<Frame>,
    pub return_modes: Vec<ReturnMode>,
    pub globals: HashMap<String, Value>,
    pub module_result: Value,
    pub limits: ResourceLimits,
    pub tracker: LimitTracker,
    pub futures: FuturesTable,
    pub next_call_id: u64,
    pub temp_roots: Vec<Value>,
    pub print: Box<dyn PrintSink + Send>,
    /// OS calls suspend only when the host opted in; otherwise they raise
    /// `NotImplementedError` at the call site.
    pub os_enabled: bool,
    /// External calls suspend only from `start`/`resume`; `run_sync`
    /// without a handler fails instead.
    pub ext_enabled: bool,
}

impl std::fmt::Debug for Interp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interp")
            .field("frames", &self.frames.len())
            .field("globals", &self.globals.len())
            .field("heap_objects", &self.heap.live_count())
            .finish()
    }
}

impl Interp {
    /// Create an interpreter for one execution of `program`.
    pub fn new(program: Arc<Program>, limits: ResourceLimits) -> Self {
        let mut heap = Heap::new(limits.max_memory, limits.max_allocations, limits.gc_interval);
        heap.push_strings(&program.strings);
        let codes = (0..program.codes.len() as u32)
            .map(|i| CodeEntry {
                program: Arc::clone(&program),
                code_idx: i,
                str_base: 0,
                code_base: 0,
            })
            .collect();
        let tracker = LimitTracker::new(&limits);
        Self {
            codes,
            feeds: vec![program],
            heap,
            frames: Vec::new(),
            return_modes: Vec::new(),
            globals: HashMap::new(),
            module_result: Value::None,
            limits,
            tracker,
            futures: FuturesTable::default(),
            next_call_id: 1,
            temp_roots: Vec::new(),
            print: Box::new(StdoutSink),
            os_enabled: true,
            ext_enabled: true,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.feeds[0]
    }

    /// Append another compiled feed (REPL); returns its global top-code id.
    pub fn push_feed(&mut self, program: Arc<Program>) -> u32 {
        let str_base = self.heap.push_strings(&program.strings);
        let code_base = self.codes.len() as u32;
        for i in 0..program.codes.len() as u32 {
            self.codes.push(CodeEntry {
                program: Arc::clone(&program),
                code_idx: i,
                str_base,
                code_base,
            });
        }
        let top = code_base + program.top_code;
        self.feeds.push(program);
        top
    }

    /// Seed declared inputs and external functions into globals, then push
    /// the top-level frame.
    pub fn seed_top_frame(
        &mut self,
        top_code: u32,
        inputs: Vec<(String, HostValue)>,
    ) -> RunResult<()> {
        let program = Arc::clone(&self.codes[top_code as usize].program);
        for (i, name) in program.external_functions.iter().enumerate() {
            self.globals.insert(name.clone(), Value::ExtFunction(i as u16));
        }
        let mut roots = std::mem::take(&mut self.temp_roots);
        for (name, host) in &inputs {
            let value = host_to_value(&mut self.heap, &mut roots, host)?;
            self.globals.insert(name.clone(), value);
        }
        roots.clear();
        self.temp_roots = roots;
        let entry = &self.codes[top_code as usize];
        let code = &entry.program.codes[entry.code_idx as usize];
        let n_locals = code.n_locals as usize;
        self.frames.push(Frame::new(top_code, n_locals, "<module>".to_string()));
        self.return_modes.push(ReturnMode::Normal);
        Ok(())
    }

    fn entry(&self, gid: u32) -> &CodeEntry {
        &self.codes[gid as usize]
    }

    fn code(&self, gid: u32) -> &CodeObject {
        let entry = self.entry(gid);
        &entry.program.codes[entry.code_idx as usize]
    }

    /// Resolve a program-local string id for the frame's code entry.
    fn gstr(&self, gid: u32, sid: u32) -> &str {
        let base = self.entry(gid).str_base;
        self.heap.interned(base + sid)
    }

    fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        self.heap.alloc(data)
    }

    fn alloc_str(&mut self, s: String) -> RunResult<Value> {
        self.heap.alloc_string(s)
    }

    // ── roots and sweeping ──

    fn roots(&self) -> Vec<Value> {
        let mut roots = Vec::new();
        for frame in &self.frames {
            roots.extend(frame.stack.iter().copied());
            roots.extend(frame.locals.iter().copied());
            roots.extend(frame.cells.iter().map(|&id| Value::Ref(id)));
            roots.extend(frame.exc_stack.iter().map(|&id| Value::Ref(id)));
        }
        for mode in &self.return_modes {
            if let ReturnMode::ReplaceWith(v) = mode {
                roots.push(*v);
            }
        }
        roots.extend(self.globals.values().copied());
        roots.push(self.module_result);
        roots.extend(self.temp_roots.iter().copied());
        roots.extend(self.futures.roots());
        roots
    }

    /// Stop-the-world sweep from the explicit root set.
    pub fn sweep_now(&mut self) {
        let roots = self.roots();
        self.heap.sweep(roots);
    }

    // ── raising ──

    fn materialize(&mut self, err: RunError) -> RunError {
        match err {
            RunError::Spec { kind, message } => {
                let trace = self.current_trace_entry();
                match self.alloc(HeapData::Exception(ExcData {
                    kind,
                    message,
                    cause: None,
                    traceback: trace.into_iter().collect(),
                })) {
                    Ok(id) => RunError::Raise { exc: id },
                    Err(resource) => resource,
                }
            }
            other => other,
        }
    }

    fn current_trace_entry(&self) -> Option<TraceEntry> {
        let frame = self.frames.last()?;
        let entry = self.entry(frame.code);
        let code = &entry.program.codes[entry.code_idx as usize];
        let line = code.line_for(frame.pc.saturating_sub(1));
        Some(TraceEntry {
            script_name: entry.program.script_name.clone(),
            frame: frame.name.clone(),
            line,
            source_line: entry.program.source_line(line).map(str::to_string),
        })
    }

    /// Unwind to the nearest handler; `Err` propagates past `base_depth`.
    pub(crate) fn dispatch_error(&mut self, err: RunError, base_depth: usize) -> Result<(), RunError> {
        let err = self.materialize(err);
        let exc = match err {
            RunError::Raise { exc } => exc,
            other => return Err(other),
        };
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Err(RunError::Raise { exc });
            };
            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.stack_height);
                frame.exc_stack.truncate(handler.exc_depth);
                if !handler.is_finally {
                    frame.exc_stack.push(exc);
                }
                frame.stack.push(Value::Ref(exc));
                frame.pc = handler.target as usize;
                return Ok(());
            }
            // no handler in this frame: record it in the traceback and pop
            if let Some(entry) = self.current_trace_entry() {
                if let HeapData::Exception(data) = self.heap.get_mut(exc) {
                    if data.traceback.last() != Some(&entry) {
                        data.traceback.push(entry);
                    }
                }
            }
            self.frames.pop();
            self.return_modes.pop();
            if self.frames.len() <= base_depth {
                return Err(RunError::Raise { exc });
            }
        }
    }

    // ── the dispatch loop ──

    /// Run until completion (frame depth returns to `base_depth`) or
    /// suspension.
    pub fn run_loop(&mut self, base_depth: usize) -> RunResult<Exit> {
        loop {
            if self.heap.should_sweep()
                || (self.limits.max_memory.is_some() && self.heap.would_exceed(SWEEP_RESERVE_BYTES))
            {
                self.sweep_now();
            }
            if let Err(e) = self.tracker.tick() {
                return Err(e);
            }

            let frame_idx = self.frames.len() - 1;
            let (instr, gid) = {
                let frame = &self.frames[frame_idx];
                let code = self.code(frame.code);
                debug_assert!(frame.pc < code.instrs.len(), "pc ran off the end");
                (code.instrs[frame.pc], frame.code)
            };
            self.frames[frame_idx].pc += 1;

            let step = self.step(instr, gid, frame_idx);
            match step {
                Ok(StepFlow::Continue) => {}
                Ok(StepFlow::Return(value)) => {
                    let mode = self.return_modes.pop().unwrap_or(ReturnMode::Normal);
                    self.frames.pop();
                    let value = match mode {
                        ReturnMode::Normal => value,
                        ReturnMode::ReplaceWith(v) => v,
                    };
                    if self.frames.len() <= base_depth {
                        return Ok(Exit::Done(value));
                    }
                    self.frames
                        .last_mut()
                        .expect("caller frame present")
                        .stack
                        .push(value);
                }
                Ok(StepFlow::Suspend(paused)) => return Ok(Exit::ExternalCall(paused)),
                Ok(StepFlow::Wait(ids)) => {
                    // re-run the await instruction after outcomes arrive
                    self.frames[frame_idx].pc -= 1;
                    return Ok(Exit::FutureWait(ids));
                }
                Err(e) => self.dispatch_error(e, base_depth)?,
            }
        }
    }

    /// Invoke a callable from native code (sort keys and similar); the
    /// callee must complete without suspending.
    pub(crate) fn call_sync(&mut self, callee: Value, args: Vec<Value>) -> RunResult<Value> {
        let saved = self.temp_roots.len();
        self.temp_roots.push(callee);
        self.temp_roots.extend(args.iter().copied());
        let base = self.frames.len();
        let result = (|| match self.call_value(callee, args, Vec::new())? {
            Invoked::Value(v) => Ok(v),
            Invoked::Suspend(_) => Err(RunError::spec(
                ExcKind::RuntimeError,
                "cannot call a host-mediated function from inside a builtin",
            )),
            Invoked::Framed => match self.run_loop(base)? {
                Exit::Done(v) => Ok(v),
                Exit::ExternalCall(_) | Exit::FutureWait(_) => Err(RunError::spec(
                    ExcKind::RuntimeError,
                    "cannot suspend inside a builtin callback",
                )),
            },
        })();
        self.temp_roots.truncate(saved);
        result
    }

    fn step(&mut self, instr: Instr, gid: u32, frame_idx: usize) -> RunResult<StepFlow> {
        macro_rules! frame {
            () => {
                self.frames[frame_idx]
            };
        }
        macro_rules! pop {
            () => {
                frame!().stack.pop().ok_or_else(|| RunError::internal("value stack underflow"))?
            };
        }
        macro_rules! push {
            ($v:expr) => {{
                let v = $v;
                frame!().stack.push(v);
            }};
        }

        match instr {
            Instr::LoadConst(cid) => {
                let value = self.const_value(gid, cid)?;
                push!(value);
            }
            Instr::LoadLocal(slot) => {
                let v = frame!().locals[slot as usize];
                if matches!(v, Value::Undefined) {
                    let name = self.local_name(gid, slot);
                    return Err(RunError::spec(
                        ExcKind::UnboundLocalError,
                        format!("cannot access local variable '{name}' where it is not associated with a value"),
                    ));
                }
                push!(v);
            }
            Instr::StoreLocal(slot) => {
                let v = pop!();
                frame!().locals[slot as usize] = v;
            }
            Instr::DeleteLocal(slot) => {
                frame!().locals[slot as usize] = Value::Undefined;
            }
            Instr::LoadGlobal(sid) => {
                let name = self.gstr(gid, sid).to_string();
                let value = self.lookup_global(&name)?;
                push!(value);
            }
            Instr::StoreGlobal(sid) => {
                let name = self.gstr(gid, sid).to_string();
                let v = pop!();
                self.globals.insert(name, v);
            }
            Instr::DeleteGlobal(sid) => {
                let name = self.gstr(gid, sid).to_string();
                if self.globals.remove(&name).is_none() {
                    return Err(RunError::spec(
                        ExcKind::NameError,
                        format!("name '{name}' is not defined"),
                    ));
                }
            }
            Instr::LoadCell(idx) => {
                let cell = frame!().cells[idx as usize];
                let HeapData::Cell(v) = self.heap.get(cell) else {
                    return Err(RunError::internal("cell slot does not hold a cell"));
                };
                let v = *v;
                if matches!(v, Value::Undefined) {
                    return Err(RunError::spec(
                        ExcKind::NameError,
                        "cannot access free variable before assignment",
                    ));
                }
                push!(v);
            }
            Instr::StoreCell(idx) => {
                let v = pop!();
                let cell = frame!().cells[idx as usize];
                *self.heap.get_mut(cell) = HeapData::Cell(v);
            }
            Instr::LoadCellRef(idx) => {
                let cell = frame!().cells[idx as usize];
                push!(Value::Ref(cell));
            }

            Instr::Pop => {
                pop!();
            }
            Instr::Dup => {
                let v = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("value stack underflow"))?;
                push!(v);
            }
            Instr::Rot2 => {
                let len = frame!().stack.len();
                if len < 2 {
                    return Err(RunError::internal("value stack underflow"));
                }
                frame!().stack.swap(len - 1, len - 2);
            }
            Instr::Rot3 => {
                let len = frame!().stack.len();
                if len < 3 {
                    return Err(RunError::internal("value stack underflow"));
                }
                let top = frame!().stack.remove(len - 1);
                frame!().stack.insert(len - 3, top);
            }

            Instr::Unary(op) => {
                let v = pop!();
                let r = ops::unary_op(&mut self.heap, op, v)?;
                push!(r);
            }
            Instr::Binary(op) => {
                let b = pop!();
                let a = pop!();
                let r = ops::binary_op(&mut self.heap, op, a, b)?;
                push!(r);
            }
            Instr::Compare(op) => {
                let b = pop!();
                let a = pop!();
                let r = ops::compare_op(&self.heap, op, a, b)?;
                push!(r);
            }

            Instr::BuildList(n) => {
                let items = self.peek_slice(frame_idx, n as usize);
                let id = self.alloc(HeapData::List(items))?;
                self.drop_top(frame_idx, n as usize);
                push!(Value::Ref(id));
            }
            Instr::BuildTuple(n) => {
                let items = self.peek_slice(frame_idx, n as usize);
                let id = self.alloc(HeapData::Tuple(items))?;
                self.drop_top(frame_idx, n as usize);
                push!(Value::Ref(id));
            }
            Instr::BuildSet(n) => {
                let items = self.peek_slice(frame_idx, n as usize);
                let id = ops::set_from_values(&mut self.heap, &items, false)?;
                self.drop_top(frame_idx, n as usize);
                push!(Value::Ref(id));
            }
            Instr::BuildDict(n) => {
                let flat = self.peek_slice(frame_idx, n as usize * 2);
                let pairs: Vec<(Value, Value)> =
                    flat.chunks(2).map(|c| (c[0], c[1])).collect();
                let id = ops::dict_from_pairs(&mut self.heap, &pairs)?;
                self.drop_top(frame_idx, n as usize * 2);
                push!(Value::Ref(id));
            }
            Instr::BuildSlice(n) => {
                let step = if n == 3 { pop!() } else { Value::None };
                let stop = pop!();
                let start = pop!();
                let id = self.alloc(HeapData::Slice(SliceData { start, stop, step }))?;
                push!(Value::Ref(id));
            }
            Instr::BuildString(n) => {
                let parts = self.peek_slice(frame_idx, n as usize);
                let mut out = String::new();
                for part in &parts {
                    out.push_str(&py_str(*part, &self.heap)?);
                }
                let joined = self.heap.alloc_string(out)?;
                self.drop_top(frame_idx, n as usize);
                push!(joined);
            }
            Instr::FormatValue { repr } => {
                let v = pop!();
                let text = if repr {
                    py_repr(v, &self.heap)?
                } else {
                    py_str(v, &self.heap)?
                };
                let r = self.alloc_str(text)?;
                push!(r);
            }

            Instr::ListAppend(depth) => {
                let v = pop!();
                let len = frame!().stack.len();
                let acc = frame!().stack[len - depth as usize];
                let Value::Ref(id) = acc else {
                    return Err(RunError::internal("comprehension accumulator missing"));
                };
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items.push(v);
                }
                self.heap.recharge(id)?;
            }
            Instr::SetAdd(depth) => {
                let v = pop!();
                let len = frame!().stack.len();
                let acc = frame!().stack[len - depth as usize];
                let Value::Ref(id) = acc else {
                    return Err(RunError::internal("comprehension accumulator missing"));
                };
                crate::object::set_add(&mut self.heap, id, v)?;
            }
            Instr::DictInsert(depth) => {
                let v = pop!();
                let k = pop!();
                let len = frame!().stack.len();
                let acc = frame!().stack[len - depth as usize];
                let Value::Ref(id) = acc else {
                    return Err(RunError::internal("comprehension accumulator missing"));
                };
                crate::object::dict_set(&mut self.heap, id, k, v)?;
            }
            Instr::UnpackSequence(n) => {
                let v = pop!();
                let items = self.sequence_items(v)?;
                if items.len() < n as usize {
                    return Err(RunError::spec(
                        ExcKind::ValueError,
                        format!(
                            "not enough values to unpack (expected {n}, got {})",
                            items.len()
                        ),
                    ));
                }
                if items.len() > n as usize {
                    return Err(RunError::spec(
                        ExcKind::ValueError,
                        format!("too many values to unpack (expected {n})"),
                    ));
                }
                for &item in items.iter().rev() {
                    push!(item);
                }
            }

            Instr::Index => {
                let index = pop!();
                let obj = pop!();
                let r = self.index_get(obj, index)?;
                push!(r);
            }
            Instr::StoreIndex => {
                let index = pop!();
                let obj = pop!();
                let value = pop!();
                self.index_set(obj, index, value)?;
            }
            Instr::DeleteIndex => {
                let index = pop!();
                let obj = pop!();
                self.index_del(obj, index)?;
            }
            Instr::LoadAttr(sid) => {
                let obj = pop!();
                let name = self.gstr(gid, sid).to_string();
                match self.attr_get(obj, &name)? {
                    AttrGet::Value(v) => push!(v),
                    AttrGet::OsCall(paused) => return Ok(StepFlow::Suspend(paused)),
                }
            }
            Instr::SetAttr(sid) => {
                let obj = pop!();
                let value = pop!();
                let name = self.gstr(gid, sid).to_string();
                self.attr_set(obj, &name, value)?;
            }

            Instr::Jump(target) => frame!().pc = target as usize,
            Instr::PopJumpIfFalse(target) => {
                let v = pop!();
                if !is_truthy(v, &self.heap) {
                    frame!().pc = target as usize;
                }
            }
            Instr::PopJumpIfTrue(target) => {
                let v = pop!();
                if is_truthy(v, &self.heap) {
                    frame!().pc = target as usize;
                }
            }
            Instr::JumpIfFalseOrPop(target) => {
                let v = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("value stack underflow"))?;
                if is_truthy(v, &self.heap) {
                    pop!();
                } else {
                    frame!().pc = target as usize;
                }
            }
            Instr::JumpIfTrueOrPop(target) => {
                let v = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("value stack underflow"))?;
                if is_truthy(v, &self.heap) {
                    frame!().pc = target as usize;
                } else {
                    pop!();
                }
            }

            Instr::GetIter => {
                let v = pop!();
                let it = self.get_iter(v)?;
                push!(it);
            }
            Instr::ForIter(target) => {
                let it = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("iterator missing"))?;
                let Value::Ref(iter_id) = it else {
                    return Err(RunError::internal("iterator missing"));
                };
                match self.iter_next(iter_id)? {
                    Some(v) => push!(v),
                    None => {
                        pop!();
                        frame!().pc = target as usize;
                    }
                }
            }

            Instr::Call(argc) => {
                return self.do_call(frame_idx, argc as usize, Vec::new());
            }
            Instr::CallKw { argc, names } => {
                let kw_names = self.kw_names(gid, names)?;
                return self.do_call(frame_idx, argc as usize, kw_names);
            }
            Instr::Return => {
                let v = pop!();
                return Ok(StepFlow::Return(v));
            }
            Instr::SetModuleResult => {
                let v = pop!();
                self.module_result = v;
            }

            Instr::MakeFunction { code, n_defaults, n_captures } => {
                let entry = self.entry(gid);
                let code_gid = entry.code_base + code;
                let str_base = entry.str_base;
                let mut cells = Vec::with_capacity(n_captures as usize);
                for _ in 0..n_captures {
                    let Value::Ref(cell) = pop!() else {
                        return Err(RunError::internal("closure capture is not a cell"));
                    };
                    cells.push(cell);
                }
                cells.reverse();
                let mut defaults = Vec::with_capacity(n_defaults as usize);
                for _ in 0..n_defaults {
                    defaults.push(pop!());
                }
                defaults.reverse();
                let name_sid = self.code(code_gid).name;
                let id = self.alloc(HeapData::Closure(ClosureData {
                    code: code_gid,
                    name: StrRef::Interned(str_base + name_sid),
                    defaults,
                    cells,
                }))?;
                push!(Value::Ref(id));
            }
            Instr::BuildClass { desc, n_methods, n_defaults } => {
                return self.build_class(frame_idx, gid, desc, n_methods, n_defaults);
            }

            Instr::Import(sid) => {
                let name = self.gstr(gid, sid).to_string();
                match Module::from_name(&name) {
                    Some(module) => push!(Value::Module(module)),
                    None => {
                        return Err(RunError::spec(
                            ExcKind::ModuleNotFoundError,
                            format!("No module named '{name}'"),
                        ))
                    }
                }
            }
            Instr::ImportFrom { module, name } => {
                let module_name = self.gstr(gid, module).to_string();
                let attr = self.gstr(gid, name).to_string();
                let Some(module) = Module::from_name(&module_name) else {
                    return Err(RunError::spec(
                        ExcKind::ModuleNotFoundError,
                        format!("No module named '{module_name}'"),
                    ));
                };
                match self.module_attr(module, &attr)? {
                    Some(AttrGet::Value(v)) => push!(v),
                    Some(AttrGet::OsCall(paused)) => return Ok(StepFlow::Suspend(paused)),
                    None => {
                        return Err(RunError::spec(
                            ExcKind::ImportError,
                            format!("cannot import name '{attr}' from '{module_name}'"),
                        ))
                    }
                }
            }

            Instr::SetupExcept(target) => {
                let frame = &mut frame!();
                let handler = Handler {
                    target,
                    stack_height: frame.stack.len(),
                    is_finally: false,
                    exc_depth: frame.exc_stack.len(),
                };
                frame.handlers.push(handler);
            }
            Instr::SetupFinally(target) => {
                let frame = &mut frame!();
                let handler = Handler {
                    target,
                    stack_height: frame.stack.len(),
                    is_finally: true,
                    exc_depth: frame.exc_stack.len(),
                };
                frame.handlers.push(handler);
            }
            Instr::PopBlock => {
                frame!().handlers.pop();
            }
            Instr::Raise { argc } => {
                return Err(self.do_raise(frame_idx, argc));
            }
            Instr::ExcMatch => {
                let class = pop!();
                let exc = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("exception missing for match"))?;
                let matched = self.exc_matches(exc, class)?;
                push!(Value::Bool(matched));
            }
            Instr::PopException => {
                frame!().exc_stack.pop();
            }

            Instr::Await => {
                let v = *frame!()
                    .stack
                    .last()
                    .ok_or_else(|| RunError::internal("awaitable missing"))?;
                return self.do_await(frame_idx, v);
            }
        }
        Ok(StepFlow::Continue)
    }

    // ── instruction helpers ──

    fn peek_slice(&self, frame_idx: usize, n: usize) -> Vec<Value> {
        let stack = &self.frames[frame_idx].stack;
        stack[stack.len() - n..].to_vec()
    }

    fn drop_top(&mut self, frame_idx: usize, n: usize) {
        let stack = &mut self.frames[frame_idx].stack;
        let new_len = stack.len() - n;
        stack.truncate(new_len);
    }

    fn const_value(&mut self, gid: u32, cid: u32) -> RunResult<Value> {
        let entry = self.entry(gid);
        let str_base = entry.str_base;
        let constant = entry.program.codes[entry.code_idx as usize]
            .consts
            .get(cid as usize)
            .cloned()
            .ok_or_else(|| RunError::internal("constant index out of bounds"))?;
        Ok(match constant {
            Const::None => Value::None,
            Const::Bool(b) => Value::Bool(b),
            Const::Int(n) => Value::Int(n),
            Const::BigInt(n) => Value::Ref(self.alloc(HeapData::BigInt(n))?),
            Const::Float(f) => Value::Float(f),
            Const::Str(sid) => Value::Str(StrRef::Interned(str_base + sid)),
            Const::Bytes(b) => Value::Ref(self.alloc(HeapData::Bytes(b))?),
            Const::KwNames(_) => {
                return Err(RunError::internal("keyword-name constant loaded as a value"))
            }
        })
    }

    fn kw_names(&self, gid: u32, cid: u32) -> RunResult<Vec<String>> {
        let entry = self.entry(gid);
        let base = entry.str_base;
        match entry.program.codes[entry.code_idx as usize].consts.get(cid as usize) {
            Some(Const::KwNames(ids)) => Ok(ids
                .iter()
                .map(|&sid| self.heap.interned(base + sid).to_string())
                .collect()),
            _ => Err(RunError::internal("missing keyword-name constant")),
        }
    }

    fn local_name(&self, gid: u32, slot: u16) -> String {
        let entry = self.entry(gid);
        let code = &entry.program.codes[entry.code_idx as usize];
        code.params
            .get(slot as usize)
            .map(|p| self.heap.interned(entry.str_base + p.name).to_string())
            .unwrap_or_else(|| format!("<local {slot}>"))
    }

    fn lookup_global(&self, name: &str) -> RunResult<Value> {
        if let Some(&v) = self.globals.get(name) {
            return Ok(v);
        }
        if let Some(b) = builtins::builtin_from_name(name) {
            return Ok(Value::Builtin(b));
        }
        if let Some(kind) = ExcKind::from_name(name) {
            return Ok(Value::ExcClass(kind));
        }
        Err(RunError::spec(
            ExcKind::NameError,
            format!("name '{name}' is not defined"),
        ))
    }

    fn do_raise(&mut self, frame_idx: usize, argc: u8) -> RunError {
        let result = (|| -> RunResult<RunError> {
            match argc {
                0 => {
                    let frame = &self.frames[frame_idx];
                    match frame.exc_stack.last() {
                        Some(&exc) => Ok(RunError::Raise { exc }),
                        None => Ok(RunError::spec(
                            ExcKind::RuntimeError,
                            "No active exception to re-raise",
                        )),
                    }
                }
                1 => {
                    let v = self.frames[frame_idx]
                        .stack
                        .pop()
                        .ok_or_else(|| RunError::internal("value stack underflow"))?;
                    let exc = self.to_exception(v)?;
                    Ok(RunError::Raise { exc })
                }
                _ => {
                    let cause_v = self.frames[frame_idx]
                        .stack
                        .pop()
                        .ok_or_else(|| RunError::internal("value stack underflow"))?;
                    let exc_v = self.frames[frame_idx]
                        .stack
                        .pop()
                        .ok_or_else(|| RunError::internal("value stack underflow"))?;
                    let cause = self.to_exception(cause_v)?;
                    let exc = self.to_exception(exc_v)?;
                    if let HeapData::Exception(data) = self.heap.get_mut(exc) {
                        data.cause = Some(cause);
                    }
                    Ok(RunError::Raise { exc })
                }
            }
        })();
        match result {
            Ok(err) => {
                // stamp the raise site into the traceback
                if let RunError::Raise { exc } = err {
                    if let Some(entry) = self.current_trace_entry() {
                        if let HeapData::Exception(data) = self.heap.get_mut(exc) {
                            if data.traceback.is_empty() {
                                data.traceback.push(entry);
                            }
                        }
                    }
                }
                err
            }
            Err(e) => e,
        }
    }

    /// Coerce a raised value: an exception object passes through, an
    /// exception class is instantiated.
    fn to_exception(&mut self, v: Value) -> RunResult<HeapId> {
        match v {
            Value::ExcClass(kind) => Ok(self.alloc(HeapData::Exception(ExcData {
                kind,
                message: String::new(),
                cause: None,
                traceback: Vec::new(),
            }))?),
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Exception(_)) => Ok(id),
            other => Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "exceptions must derive from BaseException, not '{}'",
                    type_name(other, &self.heap)
                ),
            )),
        }
    }

    fn exc_matches(&self, exc: Value, class: Value) -> RunResult<bool> {
        let kind = match exc {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Exception(e) => e.kind,
                _ => return Ok(false),
            },
            _ => return Ok(false),
        };
        match class {
            Value::ExcClass(of) => Ok(kind.is_subtype(of)),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Tuple(items) => {
                    for &item in items {
                        if let Value::ExcClass(of) = item {
                            if kind.is_subtype(of) {
                                return Ok(true);
                            }
                        }
                    }
                    Ok(false)
                }
                _ => Err(RunError::spec(
                    ExcKind::TypeError,
                    "catching classes that do not inherit from BaseException is not allowed",
                )),
            },
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    // ── calls ──

    fn do_call(
        &mut self,
        frame_idx: usize,
        argc: usize,
        kw_names: Vec<String>,
    ) -> RunResult<StepFlow> {
        let stack_len = self.frames[frame_idx].stack.len();
        if stack_len < argc + 1 {
            return Err(RunError::internal("value stack underflow in call"));
        }
        let callee = self.frames[frame_idx].stack[stack_len - argc - 1];
        let mut all_args: Vec<Value> =
            self.frames[frame_idx].stack[stack_len - argc..].to_vec();
        self.frames[frame_idx].stack.truncate(stack_len - argc - 1);

        let kwargs: Vec<(String, Value)> = if kw_names.is_empty() {
            Vec::new()
        } else {
            let kw_values = all_args.split_off(all_args.len() - kw_names.len());
            kw_names.into_iter().zip(kw_values).collect()
        };

        let saved = self.temp_roots.len();
        self.temp_roots.push(callee);
        self.temp_roots.extend(all_args.iter().copied());
        self.temp_roots.extend(kwargs.iter().map(|&(_, v)| v));
        let result = self.call_value(callee, all_args, kwargs);
        self.temp_roots.truncate(saved);

        match result? {
            Invoked::Value(v) => {
                self.frames[frame_idx].stack.push(v);
                Ok(StepFlow::Continue)
            }
            Invoked::Framed => Ok(StepFlow::Continue),
            Invoked::Suspend(paused) => Ok(StepFlow::Suspend(paused)),
        }
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Invoked> {
        match callee {
            Value::Builtin(Builtin::Getenv) => {
                let paused = self.begin_host_call(
                    OsFunction::Getenv.name().to_string(),
                    true,
                    &args,
                    &kwargs,
                )?;
                Ok(Invoked::Suspend(paused))
            }
            Value::Builtin(b) => {
                let v = builtins::call_builtin(self, b, &args, &kwargs)?;
                Ok(Invoked::Value(v))
            }
            Value::ExcClass(kind) => {
                let message = match args.first() {
                    Some(&v) => py_str(v, &self.heap)?,
                    None => String::new(),
                };
                let id = self.alloc(HeapData::Exception(ExcData {
                    kind,
                    message,
                    cause: None,
                    traceback: Vec::new(),
                }))?;
                Ok(Invoked::Value(Value::Ref(id)))
            }
            Value::ExtFunction(idx) => {
                let name = self
                    .program()
                    .external_functions
                    .get(idx as usize)
                    .cloned()
                    .unwrap_or_default();
                if !self.ext_enabled {
                    return Err(RunError::spec(
                        ExcKind::NotImplementedError,
                        "external function calls not supported by standard execution.",
                    ));
                }
                let paused = self.begin_host_call(name, false, &args, &kwargs)?;
                Ok(Invoked::Suspend(paused))
            }
            Value::Ref(id) => self.call_heap_value(id, args, kwargs),
            other => Err(RunError::spec(
                ExcKind::TypeError,
                format!("'{}' object is not callable", type_name(other, &self.heap)),
            )),
        }
    }

    fn call_heap_value(
        &mut self,
        id: HeapId,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Invoked> {
        match self.heap.get(id) {
            HeapData::Closure(_) => {
                self.push_closure_frame(id, None, args, kwargs, ReturnMode::Normal)?;
                Ok(Invoked::Framed)
            }
            HeapData::BoundMethod(m) => {
                let BoundMethodData { kind, recv } = m.clone();
                match kind {
                    MethodKind::Function(f) => {
                        let Some(func_id) = f.heap_id() else {
                            return Err(RunError::internal("bound method without function"));
                        };
                        self.push_closure_frame(func_id, Some(recv), args, kwargs, ReturnMode::Normal)?;
                        Ok(Invoked::Framed)
                    }
                    MethodKind::Builtin(method) => {
                        let v = methods::call_method(self, method, recv, &args, &kwargs)?;
                        Ok(Invoked::Value(v))
                    }
                    MethodKind::Os(f) => {
                        if !self.os_enabled {
                            return Err(RunError::spec(
                                ExcKind::NotImplementedError,
                                format!("OS function '{}' not implemented", f.name()),
                            ));
                        }
                        let mut full_args = vec![recv];
                        full_args.extend(args);
                        let paused =
                            self.begin_host_call(f.name().to_string(), true, &full_args, &kwargs)?;
                        Ok(Invoked::Suspend(paused))
                    }
                }
            }
            HeapData::Class(_) => self.instantiate(id, args, kwargs),
            other => {
                let name = match other {
                    HeapData::Instance(inst) => match self.heap.get(inst.class) {
                        HeapData::Class(c) => c.name.clone(),
                        _ => "object".to_string(),
                    },
                    _ => type_name(Value::Ref(id), &self.heap),
                };
                Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("'{name}' object is not callable"),
                ))
            }
        }
    }

    /// Allocate a call id and materialise arguments for the host.
    fn begin_host_call(
        &mut self,
        function: String,
        is_os: bool,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> RunResult<PausedCall> {
        if is_os && !self.os_enabled {
            return Err(RunError::spec(
                ExcKind::NotImplementedError,
                format!("OS function '{function}' not implemented"),
            ));
        }
        let mut host_args = Vec::with_capacity(args.len());
        for &arg in args {
            host_args.push(value_to_host(&self.heap, arg)?);
        }
        let mut host_kwargs = Vec::with_capacity(kwargs.len());
        for (name, value) in kwargs {
            host_kwargs.push((name.clone(), value_to_host(&self.heap, *value)?));
        }
        let call_id = self.next_call_id;
        self.next_call_id += 1;
        Ok(PausedCall {
            call_id,
            function,
            is_os,
            args: host_args,
            kwargs: host_kwargs,
        })
    }

    fn push_closure_frame(
        &mut self,
        func: HeapId,
        self_arg: Option<Value>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        mode: ReturnMode,
    ) -> RunResult<()> {
        let HeapData::Closure(closure) = self.heap.get(func) else {
            return Err(RunError::internal("callee is not a function"));
        };
        let closure = closure.clone();
        let func_name = self.heap.str_of(closure.name).to_string();
        self.tracker.check_recursion(self.frames.len() + 1)?;
        self.tracker.check_deadline()?;

        let entry = self.entry(closure.code);
        let str_base = entry.str_base;
        let code = &entry.program.codes[entry.code_idx as usize];
        let n_params = code.params.len();
        let n_locals = code.n_locals as usize;
        let param_names: Vec<String> = code
            .params
            .iter()
            .map(|p| self.heap.interned(str_base + p.name).to_string())
            .collect();
        let cell_params = code.cell_params.clone();
        let n_cellvars = code.n_cellvars as usize;
        let n_freevars = code.n_freevars as usize;

        let mut positional = Vec::with_capacity(args.len() + 1);
        if let Some(s) = self_arg {
            positional.push(s);
        }
        positional.extend(args);

        if positional.len() > n_params {
            return Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "{func_name}() takes {n_params} positional argument{} but {} were given",
                    if n_params == 1 { "" } else { "s" },
                    positional.len()
                ),
            ));
        }

        let mut locals = vec![Value::Undefined; n_locals.max(n_params)];
        let bound = positional.len();
        locals[..bound].copy_from_slice(&positional);

        for (name, value) in &kwargs {
            let Some(idx) = param_names.iter().position(|p| p == name) else {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("{func_name}() got an unexpected keyword argument '{name}'"),
                ));
            };
            if idx < bound || !matches!(locals[idx], Value::Undefined) {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("{func_name}() got multiple values for argument '{name}'"),
                ));
            }
            locals[idx] = *value;
        }

        // defaults cover the trailing parameters
        let defaults_start = n_params - closure.defaults.len();
        for (i, &default) in closure.defaults.iter().enumerate() {
            let slot = defaults_start + i;
            if matches!(locals[slot], Value::Undefined) {
                locals[slot] = default;
            }
        }
        for (slot, name) in param_names.iter().enumerate() {
            if matches!(locals[slot], Value::Undefined) {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("{func_name}() missing required argument: '{name}'"),
                ));
            }
        }

        // build cells: own cells first (parameters moved in), then captures
        let mut cells = Vec::with_capacity(n_cellvars + n_freevars);
        let mut param_cells: Vec<(usize, usize)> = cell_params
            .iter()
            .map(|&(slot, cell)| (slot as usize, cell as usize))
            .collect();
        param_cells.sort_by_key(|&(_, cell)| cell);
        for cell_idx in 0..n_cellvars {
            let initial = param_cells
                .iter()
                .find(|&&(_, c)| c == cell_idx)
                .map(|&(slot, _)| locals[slot])
                .unwrap_or(Value::Undefined);
            cells.push(self.alloc(HeapData::Cell(initial))?);
        }
        if closure.cells.len() != n_freevars {
            return Err(RunError::internal("closure capture count mismatch"));
        }
        cells.extend(closure.cells.iter().copied());

        let mut frame = Frame::new(closure.code, locals.len(), func_name);
        frame.locals = locals;
        frame.cells = cells;
        self.frames.push(frame);
        self.return_modes.push(mode);
        Ok(())
    }

    fn instantiate(
        &mut self,
        class_id: HeapId,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> RunResult<Invoked> {
        let HeapData::Class(class) = self.heap.get(class_id) else {
            return Err(RunError::internal("instantiating a non-class"));
        };
        let class = class.clone();
        if class.dataclass {
            // generated __init__: bind arguments to fields
            let mut attrs: Vec<(String, Value)> = Vec::with_capacity(class.fields.len());
            if args.len() > class.fields.len() {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "{}.__init__() takes {} positional arguments but {} were given",
                        class.name,
                        class.fields.len() + 1,
                        args.len() + 1
                    ),
                ));
            }
            for (i, field) in class.fields.iter().enumerate() {
                let value = if i < args.len() {
                    if kwargs.iter().any(|(n, _)| n == &field.name) {
                        return Err(RunError::spec(
                            ExcKind::TypeError,
                            format!(
                                "{}.__init__() got multiple values for argument '{}'",
                                class.name, field.name
                            ),
                        ));
                    }
                    args[i]
                } else if let Some(&(_, v)) = kwargs.iter().find(|(n, _)| n == &field.name) {
                    v
                } else if let Some(default) = field.default {
                    default
                } else {
                    return Err(RunError::spec(
                        ExcKind::TypeError,
                        format!(
                            "{}.__init__() missing required argument: '{}'",
                            class.name, field.name
                        ),
                    ));
                };
                attrs.push((field.name.clone(), value));
            }
            for (name, _) in &kwargs {
                if !class.fields.iter().any(|f| &f.name == name) {
                    return Err(RunError::spec(
                        ExcKind::TypeError,
                        format!(
                            "{}.__init__() got an unexpected keyword argument '{}'",
                            class.name, name
                        ),
                    ));
                }
            }
            let id = self.alloc(HeapData::Instance(InstanceData { class: class_id, attrs }))?;
            return Ok(Invoked::Value(Value::Ref(id)));
        }

        // plain class: fields with defaults seed the instance, then
        // __init__ runs if defined
        let mut attrs = Vec::new();
        for field in &class.fields {
            if let Some(default) = field.default {
                attrs.push((field.name.clone(), default));
            }
        }
        let instance = self.alloc(HeapData::Instance(InstanceData { class: class_id, attrs }))?;
        match class.method("__init__") {
            Some(init) => {
                let Some(func_id) = init.heap_id() else {
                    return Err(RunError::internal("__init__ is not a function"));
                };
                self.temp_roots.push(Value::Ref(instance));
                let pushed = self.push_closure_frame(
                    func_id,
                    Some(Value::Ref(instance)),
                    args,
                    kwargs,
                    ReturnMode::ReplaceWith(Value::Ref(instance)),
                );
                self.temp_roots.pop();
                pushed?;
                Ok(Invoked::Framed)
            }
            None => {
                if !args.is_empty() || !kwargs.is_empty() {
                    return Err(RunError::spec(
                        ExcKind::TypeError,
                        format!("{}() takes no arguments", class.name),
                    ));
                }
                Ok(Invoked::Value(Value::Ref(instance)))
            }
        }
    }

    fn build_class(
        &mut self,
        frame_idx: usize,
        gid: u32,
        desc: u16,
        n_methods: u16,
        n_defaults: u16,
    ) -> RunResult<StepFlow> {
        let entry = self.entry(gid);
        let str_base = entry.str_base;
        let code = &entry.program.codes[entry.code_idx as usize];
        let desc: ClassDesc = code
            .classes
            .get(desc as usize)
            .cloned()
            .ok_or_else(|| RunError::internal("class descriptor out of bounds"))?;

        let frame = &mut self.frames[frame_idx];
        let mut methods = Vec::with_capacity(n_methods as usize);
        for _ in 0..n_methods {
            methods.push(
                frame
                    .stack
                    .pop()
                    .ok_or_else(|| RunError::internal("value stack underflow"))?,
            );
        }
        methods.reverse();
        let mut defaults = Vec::with_capacity(n_defaults as usize);
        for _ in 0..n_defaults {
            defaults.push(
                frame
                    .stack
                    .pop()
                    .ok_or_else(|| RunError::internal("value stack underflow"))?,
            );
        }
        defaults.reverse();

        let name = self.heap.interned(str_base + desc.name).to_string();
        let mut default_iter = defaults.into_iter();
        let fields: Vec<FieldInfo> = desc
            .fields
            .iter()
            .map(|&(sid, has_default)| FieldInfo {
                name: self.heap.interned(str_base + sid).to_string(),
                default: if has_default { default_iter.next() } else { None },
            })
            .collect();
        let method_pairs: Vec<(String, Value)> = desc
            .method_names
            .iter()
            .zip(methods)
            .map(|(&sid, v)| (self.heap.interned(str_base + sid).to_string(), v))
            .collect();

        let id = self.alloc(HeapData::Class(ClassData {
            name,
            fields,
            methods: method_pairs,
            dataclass: desc.dataclass,
            frozen: desc.frozen,
        }))?;
        self.frames[frame_idx].stack.push(Value::Ref(id));
        Ok(StepFlow::Continue)
    }

    // ── attributes ──

    fn attr_get(&mut self, obj: Value, name: &str) -> RunResult<AttrGet> {
        match obj {
            Value::Module(module) => match self.module_attr(module, name)? {
                Some(get) => Ok(get),
                None => Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!("module '{}' has no attribute '{name}'", module.name()),
                )),
            },
            Value::Ref(id) => self.heap_attr_get(id, name),
            other => match methods::method_of(other, &self.heap, name) {
                Some(kind) => {
                    let id = self.alloc(HeapData::BoundMethod(BoundMethodData {
                        kind,
                        recv: other,
                    }))?;
                    Ok(AttrGet::Value(Value::Ref(id)))
                }
                None => Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object has no attribute '{name}'",
                        type_name(other, &self.heap)
                    ),
                )),
            },
        }
    }

    fn heap_attr_get(&mut self, id: HeapId, name: &str) -> RunResult<AttrGet> {
        match self.heap.get(id) {
            HeapData::Instance(inst) => {
                if let Some(v) = inst.get(name) {
                    return Ok(AttrGet::Value(v));
                }
                let class_id = inst.class;
                let method = match self.heap.get(class_id) {
                    HeapData::Class(c) => c.method(name),
                    _ => None,
                };
                match method {
                    Some(m) => {
                        let bm = self.alloc(HeapData::BoundMethod(BoundMethodData {
                            kind: MethodKind::Function(m),
                            recv: Value::Ref(id),
                        }))?;
                        Ok(AttrGet::Value(Value::Ref(bm)))
                    }
                    None => {
                        let class_name = match self.heap.get(class_id) {
                            HeapData::Class(c) => c.name.clone(),
                            _ => "object".to_string(),
                        };
                        Err(RunError::spec(
                            ExcKind::AttributeError,
                            format!("'{class_name}' object has no attribute '{name}'"),
                        ))
                    }
                }
            }
            HeapData::Class(c) => match c.method(name) {
                Some(m) => Ok(AttrGet::Value(m)),
                None => Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!("type object '{}' has no attribute '{name}'", c.name),
                )),
            },
            HeapData::Path(p) => {
                let p = p.clone();
                self.path_attr(id, &p, name)
            }
            HeapData::NamedTuple(t) => match t.names.iter().position(|n| n == name) {
                Some(i) => Ok(AttrGet::Value(t.values[i])),
                None => Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!("'{}' object has no attribute '{name}'", t.type_name),
                )),
            },
            _ => match methods::method_of(Value::Ref(id), &self.heap, name) {
                Some(kind) => {
                    let bm = self.alloc(HeapData::BoundMethod(BoundMethodData {
                        kind,
                        recv: Value::Ref(id),
                    }))?;
                    Ok(AttrGet::Value(Value::Ref(bm)))
                }
                None => Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object has no attribute '{name}'",
                        type_name(Value::Ref(id), &self.heap)
                    ),
                )),
            },
        }
    }

    fn path_attr(&mut self, id: HeapId, path: &str, name: &str) -> RunResult<AttrGet> {
        use crate::os;
        match name {
            "name" => {
                let v = self.alloc_str(os::path_name(path).to_string())?;
                Ok(AttrGet::Value(v))
            }
            "stem" => {
                let v = self.alloc_str(os::path_stem(path))?;
                Ok(AttrGet::Value(v))
            }
            "suffix" => {
                let v = self.alloc_str(os::path_suffix(path))?;
                Ok(AttrGet::Value(v))
            }
            "parent" => {
                let v = self.alloc(HeapData::Path(os::path_parent(path)))?;
                Ok(AttrGet::Value(Value::Ref(v)))
            }
            "parts" => {
                let mut parts = Vec::new();
                for part in os::path_parts(path) {
                    let v = self.alloc_str(part)?;
                    self.temp_roots.push(v);
                    parts.push(v);
                }
                self.temp_roots.truncate(self.temp_roots.len() - parts.len());
                let tuple = self.alloc(HeapData::Tuple(parts))?;
                Ok(AttrGet::Value(Value::Ref(tuple)))
            }
            _ => {
                if let Some(os_fn) = OsFunction::from_path_method(name) {
                    let bm = self.alloc(HeapData::BoundMethod(BoundMethodData {
                        kind: MethodKind::Os(os_fn),
                        recv: Value::Ref(id),
                    }))?;
                    return Ok(AttrGet::Value(Value::Ref(bm)));
                }
                if let Some(kind) = methods::path_method(name) {
                    let bm = self.alloc(HeapData::BoundMethod(BoundMethodData {
                        kind,
                        recv: Value::Ref(id),
                    }))?;
                    return Ok(AttrGet::Value(Value::Ref(bm)));
                }
                Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!("'PurePosixPath' object has no attribute '{name}'"),
                ))
            }
        }
    }

    fn module_attr(&mut self, module: Module, name: &str) -> RunResult<Option<AttrGet>> {
        let got = match (module, name) {
            (Module::Os, "getenv") => Some(AttrGet::Value(Value::Builtin(Builtin::Getenv))),
            (Module::Os, "environ") => {
                let paused =
                    self.begin_host_call(OsFunction::Environ.name().to_string(), true, &[], &[])?;
                Some(AttrGet::OsCall(paused))
            }
            (Module::Pathlib, "Path" | "PurePosixPath") => {
                Some(AttrGet::Value(Value::Builtin(Builtin::PathCtor)))
            }
            (Module::Sys, "version_info") => {
                let id = self.alloc(HeapData::NamedTuple(NamedTupleData {
                    type_name: "sys.version_info".to_string(),
                    names: vec!["major".to_string(), "minor".to_string(), "micro".to_string()],
                    values: vec![Value::Int(3), Value::Int(12), Value::Int(0)],
                }))?;
                Some(AttrGet::Value(Value::Ref(id)))
            }
            (Module::Asyncio, "gather") => Some(AttrGet::Value(Value::Builtin(Builtin::Gather))),
            (Module::Typing, "TYPE_CHECKING") => Some(AttrGet::Value(Value::Bool(false))),
            (Module::Typing, _) => Some(AttrGet::Value(Value::None)),
            (Module::Dataclasses, "dataclass") => {
                Some(AttrGet::Value(Value::Builtin(Builtin::DataclassDecorator)))
            }
            (Module::Dataclasses, "FrozenInstanceError") => {
                Some(AttrGet::Value(Value::ExcClass(ExcKind::FrozenInstanceError)))
            }
            _ => None,
        };
        Ok(got)
    }

    fn attr_set(&mut self, obj: Value, name: &str, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(RunError::spec(
                ExcKind::AttributeError,
                format!(
                    "'{}' object has no attribute '{name}'",
                    type_name(obj, &self.heap)
                ),
            ));
        };
        let class_id = match self.heap.get(id) {
            HeapData::Instance(inst) => inst.class,
            _ => {
                return Err(RunError::spec(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object has no attribute '{name}'",
                        type_name(obj, &self.heap)
                    ),
                ))
            }
        };
        if let HeapData::Class(c) = self.heap.get(class_id) {
            if c.dataclass && c.frozen {
                return Err(RunError::spec(
                    ExcKind::FrozenInstanceError,
                    format!("cannot assign to field '{name}'"),
                ));
            }
        }
        if let HeapData::Instance(inst) = self.heap.get_mut(id) {
            inst.set(name, value);
        }
        self.heap.recharge(id)
    }

    // ── subscripts ──

    fn index_get(&mut self, obj: Value, index: Value) -> RunResult<Value> {
        // slice objects take the slow path
        if let Value::Ref(idx_id) = index {
            if let HeapData::Slice(slice) = self.heap.get(idx_id) {
                let slice = *slice;
                return self.slice_get(obj, slice);
            }
        }
        match obj {
            Value::Str(s) => {
                let text = self.heap.str_of(s).to_string();
                let chars: Vec<char> = text.chars().collect();
                let i = self.seq_index(index, chars.len(), "string index out of range")?;
                self.alloc_str(chars[i].to_string())
            }
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let i = self.seq_index(index, chars.len(), "string index out of range")?;
                    self.alloc_str(chars[i].to_string())
                }
                HeapData::List(items) => {
                    let i = self.seq_index(index, items.len(), "list index out of range")?;
                    Ok(self.list_item(id, i))
                }
                HeapData::Tuple(items) => {
                    let i = self.seq_index(index, items.len(), "tuple index out of range")?;
                    let HeapData::Tuple(items) = self.heap.get(id) else { unreachable!() };
                    Ok(items[i])
                }
                HeapData::NamedTuple(t) => {
                    let i = self.seq_index(index, t.values.len(), "tuple index out of range")?;
                    let HeapData::NamedTuple(t) = self.heap.get(id) else { unreachable!() };
                    Ok(t.values[i])
                }
                HeapData::Bytes(bytes) => {
                    let i = self.seq_index(index, bytes.len(), "index out of range")?;
                    let HeapData::Bytes(bytes) = self.heap.get(id) else { unreachable!() };
                    Ok(Value::Int(bytes[i] as i64))
                }
                HeapData::Dict(_) => {
                    match crate::object::dict_get(&self.heap, id, index)? {
                        Some(v) => Ok(v),
                        None => Err(RunError::spec(
                            ExcKind::KeyError,
                            py_repr(index, &self.heap)?,
                        )),
                    }
                }
                HeapData::Range(r) => {
                    let r = *r;
                    let len = r.len().max(0) as usize;
                    let i = self.seq_index(index, len, "range object index out of range")?;
                    Ok(Value::Int(r.start + r.step * i as i64))
                }
                _ => Err(self.not_subscriptable(obj)),
            },
            _ => Err(self.not_subscriptable(obj)),
        }
    }

    fn list_item(&self, id: HeapId, i: usize) -> Value {
        match self.heap.get(id) {
            HeapData::List(items) => items[i],
            _ => Value::None,
        }
    }

    fn not_subscriptable(&self, obj: Value) -> RunError {
        RunError::spec(
            ExcKind::TypeError,
            format!(
                "'{}' object is not subscriptable",
                type_name(obj, &self.heap)
            ),
        )
    }

    /// Normalise an integer index against a sequence length.
    fn seq_index(&self, index: Value, len: usize, msg: &str) -> RunResult<usize> {
        let i = match index {
            Value::Int(n) => n,
            Value::Bool(b) => b as i64,
            other => {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "indices must be integers, not '{}'",
                        type_name(other, &self.heap)
                    ),
                ))
            }
        };
        let adjusted = if i < 0 { i + len as i64 } else { i };
        if adjusted < 0 || adjusted >= len as i64 {
            return Err(RunError::spec(ExcKind::IndexError, msg));
        }
        Ok(adjusted as usize)
    }

    fn slice_get(&mut self, obj: Value, slice: SliceData) -> RunResult<Value> {
        let len = match obj {
            Value::Str(s) => self.heap.str_of(s).chars().count(),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => s.chars().count(),
                HeapData::List(items) | HeapData::Tuple(items) => items.len(),
                HeapData::Bytes(b) => b.len(),
                _ => return Err(self.not_subscriptable(obj)),
            },
            _ => return Err(self.not_subscriptable(obj)),
        };
        let indices = self.slice_indices(slice, len)?;
        match obj {
            Value::Str(s) => {
                let text: Vec<char> = self.heap.str_of(s).chars().collect();
                let out: String = indices.into_iter().map(|i| text[i]).collect();
                self.alloc_str(out)
            }
            Value::Ref(id) => match self.heap.get(id).clone() {
                HeapData::Str(s) => {
                    let text: Vec<char> = s.chars().collect();
                    let out: String = indices.into_iter().map(|i| text[i]).collect();
                    self.alloc_str(out)
                }
                HeapData::List(items) => {
                    let out: Vec<Value> = indices.into_iter().map(|i| items[i]).collect();
                    Ok(Value::Ref(self.alloc(HeapData::List(out))?))
                }
                HeapData::Tuple(items) => {
                    let out: Vec<Value> = indices.into_iter().map(|i| items[i]).collect();
                    Ok(Value::Ref(self.alloc(HeapData::Tuple(out))?))
                }
                HeapData::Bytes(bytes) => {
                    let out: Vec<u8> = indices.into_iter().map(|i| bytes[i]).collect();
                    Ok(Value::Ref(self.alloc(HeapData::Bytes(out))?))
                }
                _ => Err(self.not_subscriptable(obj)),
            },
            _ => Err(self.not_subscriptable(obj)),
        }
    }

    /// Resolve slice bounds into concrete element indices.
    fn slice_indices(&self, slice: SliceData, len: usize) -> RunResult<Vec<usize>> {
        let as_int = |v: Value| -> RunResult<Option<i64>> {
            match v {
                Value::None => Ok(None),
                Value::Int(n) => Ok(Some(n)),
                other => Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "slice indices must be integers or None, not '{}'",
                        type_name(other, &self.heap)
                    ),
                )),
            }
        };
        let step = as_int(slice.step)?.unwrap_or(1);
        if step == 0 {
            return Err(RunError::spec(ExcKind::ValueError, "slice step cannot be zero"));
        }
        let len = len as i64;
        let clamp = |n: i64, lo: i64, hi: i64| n.clamp(lo, hi);
        let (start, stop) = if step > 0 {
            let start = match as_int(slice.start)? {
                Some(n) if n < 0 => clamp(n + len, 0, len),
                Some(n) => clamp(n, 0, len),
                None => 0,
            };
            let stop = match as_int(slice.stop)? {
                Some(n) if n < 0 => clamp(n + len, 0, len),
                Some(n) => clamp(n, 0, len),
                None => len,
            };
            (start, stop)
        } else {
            let start = match as_int(slice.start)? {
                Some(n) if n < 0 => clamp(n + len, -1, len - 1),
                Some(n) => clamp(n, -1, len - 1),
                None => len - 1,
            };
            let stop = match as_int(slice.stop)? {
                Some(n) if n < 0 => clamp(n + len, -1, len - 1),
                Some(n) => clamp(n, -1, len - 1),
                None => -1,
            };
            (start, stop)
        };
        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Ok(out)
    }

    fn index_set(&mut self, obj: Value, index: Value, value: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    type_name(obj, &self.heap)
                ),
            ));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let i = self.seq_index(index, items.len(), "list assignment index out of range")?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items[i] = value;
                }
                Ok(())
            }
            HeapData::Dict(_) => crate::object::dict_set(&mut self.heap, id, index, value),
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'{}' object does not support item assignment",
                    type_name(obj, &self.heap)
                ),
            )),
        }
    }

    fn index_del(&mut self, obj: Value, index: Value) -> RunResult<()> {
        let Value::Ref(id) = obj else {
            return Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'{}' object does not support item deletion",
                    type_name(obj, &self.heap)
                ),
            ));
        };
        match self.heap.get(id) {
            HeapData::List(items) => {
                let i = self.seq_index(index, items.len(), "list assignment index out of range")?;
                if let HeapData::List(items) = self.heap.get_mut(id) {
                    items.remove(i);
                }
                Ok(())
            }
            HeapData::Dict(_) => match crate::object::dict_remove(&mut self.heap, id, index)? {
                Some(_) => Ok(()),
                None => Err(RunError::spec(
                    ExcKind::KeyError,
                    py_repr(index, &self.heap)?,
                )),
            },
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "'{}' object does not support item deletion",
                    type_name(obj, &self.heap)
                ),
            )),
        }
    }

    // ── iteration ──

    pub(crate) fn get_iter(&mut self, v: Value) -> RunResult<Value> {
        let data = match v {
            Value::Str(s) => IterData::Chars { s, idx: 0 },
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => IterData::Chars { s: StrRef::Heap(id), idx: 0 },
                HeapData::List(_) | HeapData::Tuple(_) | HeapData::Bytes(_)
                | HeapData::NamedTuple(_) => IterData::Seq { seq: id, idx: 0 },
                HeapData::Dict(d) => IterData::Keys {
                    keys: d.entries.iter().map(|&(_, k, _)| k).collect(),
                    idx: 0,
                },
                HeapData::Set(s) | HeapData::FrozenSet(s) => IterData::Keys {
                    keys: s.entries.iter().map(|&(_, v)| v).collect(),
                    idx: 0,
                },
                HeapData::Range(r) => IterData::Range { cur: r.start, stop: r.stop, step: r.step },
                HeapData::Iter(_) => return Ok(v),
                _ => {
                    return Err(RunError::spec(
                        ExcKind::TypeError,
                        format!("'{}' object is not iterable", type_name(v, &self.heap)),
                    ))
                }
            },
            _ => {
                return Err(RunError::spec(
                    ExcKind::TypeError,
                    format!("'{}' object is not iterable", type_name(v, &self.heap)),
                ))
            }
        };
        Ok(Value::Ref(self.alloc(HeapData::Iter(data))?))
    }

    pub(crate) fn iter_next(&mut self, iter_id: HeapId) -> RunResult<Option<Value>> {
        let HeapData::Iter(data) = self.heap.get(iter_id) else {
            return Err(RunError::internal("advancing a non-iterator"));
        };
        match data.clone() {
            IterData::Seq { seq, idx } => {
                let item = match self.heap.get(seq) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.get(idx).copied(),
                    HeapData::NamedTuple(t) => t.values.get(idx).copied(),
                    HeapData::Bytes(b) => b.get(idx).map(|&x| Value::Int(x as i64)),
                    _ => None,
                };
                match item {
                    Some(v) => {
                        self.set_iter(iter_id, IterData::Seq { seq, idx: idx + 1 });
                        Ok(Some(v))
                    }
                    None => Ok(None),
                }
            }
            IterData::Chars { s, idx } => {
                let c = self.heap.str_of(s).chars().nth(idx);
                match c {
                    Some(c) => {
                        self.set_iter(iter_id, IterData::Chars { s, idx: idx + 1 });
                        let v = self.alloc_str(c.to_string())?;
                        Ok(Some(v))
                    }
                    None => Ok(None),
                }
            }
            IterData::Range { cur, stop, step } => {
                let live = (step > 0 && cur < stop) || (step < 0 && cur > stop);
                if !live {
                    return Ok(None);
                }
                self.set_iter(iter_id, IterData::Range { cur: cur + step, stop, step });
                Ok(Some(Value::Int(cur)))
            }
            IterData::Keys { keys, idx } => match keys.get(idx).copied() {
                Some(v) => {
                    self.set_iter(iter_id, IterData::Keys { keys, idx: idx + 1 });
                    Ok(Some(v))
                }
                None => Ok(None),
            },
            IterData::Zip { iters } => {
                let mut items = Vec::with_capacity(iters.len());
                for &inner in &iters {
                    match self.iter_next(inner)? {
                        Some(v) => items.push(v),
                        None => return Ok(None),
                    }
                }
                if items.is_empty() {
                    return Ok(None);
                }
                let tuple = self.alloc(HeapData::Tuple(items))?;
                Ok(Some(Value::Ref(tuple)))
            }
            IterData::Enumerate { inner, count } => match self.iter_next(inner)? {
                Some(v) => {
                    self.set_iter(iter_id, IterData::Enumerate { inner, count: count + 1 });
                    let tuple = self.alloc(HeapData::Tuple(vec![Value::Int(count), v]))?;
                    Ok(Some(Value::Ref(tuple)))
                }
                None => Ok(None),
            },
            IterData::Reversed { seq, remaining } => {
                if remaining == 0 {
                    return Ok(None);
                }
                let idx = remaining - 1;
                let item = match self.heap.get(seq) {
                    HeapData::List(items) | HeapData::Tuple(items) => items.get(idx).copied(),
                    HeapData::NamedTuple(t) => t.values.get(idx).copied(),
                    _ => None,
                };
                self.set_iter(iter_id, IterData::Reversed { seq, remaining: idx });
                Ok(item)
            }
        }
    }

    fn set_iter(&mut self, iter_id: HeapId, data: IterData) {
        *self.heap.get_mut(iter_id) = HeapData::Iter(data);
    }

    /// Materialise any iterable into a vector (eager builtins).
    pub(crate) fn collect_iterable(&mut self, v: Value) -> RunResult<Vec<Value>> {
        match v {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => return Ok(items.clone()),
                HeapData::NamedTuple(t) => return Ok(t.values.clone()),
                HeapData::Dict(d) => {
                    return Ok(d.entries.iter().map(|&(_, k, _)| k).collect())
                }
                HeapData::Set(s) | HeapData::FrozenSet(s) => {
                    return Ok(s.entries.iter().map(|&(_, v)| v).collect())
                }
                _ => {}
            },
            _ => {}
        }
        let iter = self.get_iter(v)?;
        let Value::Ref(iter_id) = iter else {
            return Err(RunError::internal("iterator is not on the heap"));
        };
        self.temp_roots.push(iter);
        let mut out = Vec::new();
        let result = loop {
            match self.iter_next(iter_id) {
                Ok(Some(item)) => {
                    self.temp_roots.push(item);
                    out.push(item);
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.temp_roots
            .truncate(self.temp_roots.len() - out.len() - 1);
        result.map(|_| out)
    }

    fn sequence_items(&self, v: Value) -> RunResult<Vec<Value>> {
        match v {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::List(items) | HeapData::Tuple(items) => Ok(items.clone()),
                HeapData::NamedTuple(t) => Ok(t.values.clone()),
                _ => Err(RunError::spec(
                    ExcKind::TypeError,
                    format!(
                        "cannot unpack non-iterable '{}' object",
                        type_name(v, &self.heap)
                    ),
                )),
            },
            _ => Err(RunError::spec(
                ExcKind::TypeError,
                format!(
                    "cannot unpack non-iterable '{}' object",
                    type_name(v, &self.heap)
                ),
            )),
        }
    }

    // ── await ──

    fn do_await(&mut self, frame_idx: usize, v: Value) -> RunResult<StepFlow> {
        let Value::Ref(id) = v else {
            // a host answered synchronously: awaiting a plain value is the
            // value itself
            return Ok(StepFlow::Continue);
        };
        let future = match self.heap.get(id) {
            HeapData::Future(f) => f.clone(),
            _ => return Ok(StepFlow::Continue),
        };
        match future {
            FutureData::External { call_id } => match self.futures.get(call_id) {
                None | Some(crate::futures::FutureState::Pending) => {
                    Ok(StepFlow::Wait(vec![call_id]))
                }
                Some(crate::futures::FutureState::Completed { outcome, .. }) => {
                    self.futures.take(call_id);
                    self.frames[frame_idx].stack.pop();
                    match outcome {
                        FutureOutcome::Return(value) => {
                            self.frames[frame_idx].stack.push(value);
                            Ok(StepFlow::Continue)
                        }
                        FutureOutcome::Exception(exc) => Err(RunError::Raise { exc }),
                    }
                }
            },
            FutureData::Gather { parts } => {
                let mut pending = Vec::new();
                let mut raised: Option<(u64, HeapId, usize)> = None;
                let mut results = Vec::with_capacity(parts.len());
                for (pos, &part) in parts.iter().enumerate() {
                    let call_id = match part {
                        Value::Ref(pid) => match self.heap.get(pid) {
                            HeapData::Future(FutureData::External { call_id }) => Some(*call_id),
                            _ => None,
                        },
                        _ => None,
                    };
                    let Some(call_id) = call_id else {
                        results.push(part);
                        continue;
                    };
                    match self.futures.get(call_id) {
                        None | Some(crate::futures::FutureState::Pending) => {
                            pending.push(call_id);
                            results.push(Value::None);
                        }
                        Some(crate::futures::FutureState::Completed { outcome, epoch }) => {
                            match outcome {
                                FutureOutcome::Return(value) => results.push(value),
                                FutureOutcome::Exception(exc) => {
                                    // first-raised wins, leftmost on ties
                                    let replace = match raised {
                                        None => true,
                                        Some((best_epoch, _, best_pos)) => {
                                            epoch < best_epoch
                                                || (epoch == best_epoch && pos < best_pos)
                                        }
                                    };
                                    if replace {
                                        raised = Some((epoch, exc, pos));
                                    }
                                    results.push(Value::None);
                                }
                            }
                        }
                    }
                }
                if let Some((_, exc, _)) = raised {
                    self.frames[frame_idx].stack.pop();
                    return Err(RunError::Raise { exc });
                }
                if !pending.is_empty() {
                    return Ok(StepFlow::Wait(pending));
                }
                // consume the table entries and deliver ordered results
                for &part in &parts {
                    if let Value::Ref(pid) = part {
                        if let HeapData::Future(FutureData::External { call_id }) =
                            self.heap.get(pid)
                        {
                            let call_id = *call_id;
                            self.futures.take(call_id);
                        }
                    }
                }
                self.frames[frame_idx].stack.pop();
                let list = self.alloc(HeapData::List(results))?;
                self.frames[frame_idx].stack.push(Value::Ref(list));
                Ok(StepFlow::Continue)
            }
        }
    }

    /// Host resumed an external call: push its outcome into the paused
    /// frame.
    pub fn apply_call_outcome(&mut self, outcome: ResumeValue) -> RunResult<()> {
        match outcome {
            ResumeValue::Return(host) => {
                let mut roots = std::mem::take(&mut self.temp_roots);
                let value = host_to_value(&mut self.heap, &mut roots, &host);
                roots.clear();
                self.temp_roots = roots;
                let value = value?;
                self.frames
                    .last_mut()
                    .ok_or_else(|| RunError::internal("no paused frame"))?
                    .stack
                    .push(value);
                Ok(())
            }
            ResumeValue::Exception { kind, message } => {
                let exc = self.alloc(HeapData::Exception(ExcData {
                    kind,
                    message,
                    cause: None,
                    traceback: Vec::new(),
                }))?;
                Err(RunError::Raise { exc })
            }
            ResumeValue::Future(call_id) => {
                self.futures.mark_pending(call_id);
                let fut = self.alloc(HeapData::Future(FutureData::External { call_id }))?;
                self.frames
                    .last_mut()
                    .ok_or_else(|| RunError::internal("no paused frame"))?
                    .stack
                    .push(Value::Ref(fut));
                Ok(())
            }
        }
    }

    /// Record a completed future outcome delivered by the host.
    pub fn record_future_outcome(
        &mut self,
        call_id: u64,
        outcome: ResumeValue,
    ) -> RunResult<()> {
        match outcome {
            ResumeValue::Return(host) => {
                let mut roots = std::mem::take(&mut self.temp_roots);
                let value = host_to_value(&mut self.heap, &mut roots, &host);
                roots.clear();
                self.temp_roots = roots;
                self.futures.complete(call_id, FutureOutcome::Return(value?));
                Ok(())
            }
            ResumeValue::Exception { kind, message } => {
                let exc = self.alloc(HeapData::Exception(ExcData {
                    kind,
                    message,
                    cause: None,
                    traceback: Vec::new(),
                }))?;
                self.futures.complete(call_id, FutureOutcome::Exception(exc));
                Ok(())
            }
            ResumeValue::Future(_) => Ok(()), // still pending
        }
    }

    /// Convert the module result for the host at completion.
    pub fn output(&self) -> RunResult<HostValue> {
        value_to_host(&self.heap, self.module_result)
    }

    /// Build a dict/list helper for builtins that need fresh containers.
    pub(crate) fn new_dict(&mut self, pairs: Vec<(Value, Value)>) -> RunResult<Value> {
        let id = ops::dict_from_pairs(&mut self.heap, &pairs)?;
        Ok(Value::Ref(id))
    }
}

/// An outcome supplied by the host when resuming.
#[derive(Debug, Clone)]
pub enum ResumeValue {
    Return(HostValue),
    Exception { kind: ExcKind, message: String },
    /// The call remains pending as an awaitable future.
    Future(u64),
}

enum StepFlow {
    Continue,
    Return(Value),
    Suspend(PausedCall),
    Wait(Vec<u64>),
}

enum AttrGet {
    Value(Value),
    OsCall(PausedCall),
}
