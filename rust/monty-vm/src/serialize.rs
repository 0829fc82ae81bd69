//! The binary serialisation envelope.
//!
//! Every persisted artifact — programs, snapshots, future snapshots, REPL
//! state — shares one format: a 4-byte magic, a version byte, a kind byte,
//! then type-tagged records with little-endian integers. Truncated input
//! fails with exactly "Hit the end of buffer, expected more data"; unknown
//! tags report the offending value.

use crate::builtins::{builtin_from_name, Builtin};
use crate::convert::{HostValue, StatResult};
use crate::exception::{ExcKind, TraceEntry};
use crate::frame::{Frame, Handler};
use crate::futures::{FutureOutcome, FutureState, FuturesTable};
use crate::heap::Heap;
use crate::interp::{CodeEntry, Interp, PausedCall, ReturnMode};
use crate::limits::{LimitTracker, ResourceLimits, DEFAULT_RECURSION_LIMIT};
use crate::methods::{BuiltinMethod, METHOD_WIRE};
use crate::monty::MontyError;
use crate::object::{
    BoundMethodData, ClassData, ClosureData, DictData, ExcData, FieldInfo, FutureData, HeapData,
    InstanceData, IterData, MethodKind, NamedTupleData, RangeData, SetData, SliceData,
};
use crate::os::OsFunction;
use crate::print::StdoutSink;
use crate::snapshot::{FutureSnapshot, Snapshot};
use crate::values::{Module, StrRef, Value};
use monty_compiler::{
    BinOp, ClassDesc, CmpOp, CodeObject, Const, Instr, ParamDesc, Program, UnOp,
};
use num_bigint::{BigInt, Sign};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAGIC: &[u8; 4] = b"MNTY";
const VERSION: u8 = 1;

const KIND_PROGRAM: u8 = 1;
const KIND_SNAPSHOT: u8 = 2;
const KIND_FUTURE_SNAPSHOT: u8 = 3;
const KIND_REPL: u8 = 4;

fn eof() -> MontyError {
    MontyError::Decode("Hit the end of buffer, expected more data".to_string())
}

fn bad_tag(what: &str, tag: u8) -> MontyError {
    MontyError::Decode(format!("unknown {what} tag {tag}"))
}

// ── writer ──

#[derive(Default)]
struct Enc {
    buf: Vec<u8>,
}

impl Enc {
    fn header(kind: u8) -> Enc {
        let mut enc = Enc::default();
        enc.buf.extend_from_slice(MAGIC);
        enc.u8(VERSION);
        enc.u8(kind);
        enc
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    fn str(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }

    fn opt_str(&mut self, v: Option<&str>) {
        match v {
            Some(s) => {
                self.u8(1);
                self.str(s);
            }
            None => self.u8(0),
        }
    }

    fn opt_u64(&mut self, v: Option<u64>) {
        match v {
            Some(n) => {
                self.u8(1);
                self.u64(n);
            }
            None => self.u8(0),
        }
    }
}

// ── reader ──

struct Dec<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Dec<'a> {
    fn new(data: &'a [u8]) -> Dec<'a> {
        Dec { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MontyError> {
        if self.pos + n > self.data.len() {
            return Err(eof());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, MontyError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, MontyError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, MontyError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, MontyError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, MontyError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn i64(&mut self) -> Result<i64, MontyError> {
        Ok(self.u64()? as i64)
    }

    fn f64(&mut self) -> Result<f64, MontyError> {
        Ok(f64::from_bits(self.u64()?))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, MontyError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn str(&mut self) -> Result<String, MontyError> {
        let raw = self.bytes()?;
        String::from_utf8(raw).map_err(|_| MontyError::Decode("invalid utf-8 in string".to_string()))
    }

    fn opt_str(&mut self) -> Result<Option<String>, MontyError> {
        Ok(if self.u8()? == 1 { Some(self.str()?) } else { None })
    }

    fn opt_u64(&mut self) -> Result<Option<u64>, MontyError> {
        Ok(if self.u8()? == 1 { Some(self.u64()?) } else { None })
    }

    fn header(&mut self, expected_kind: u8) -> Result<(), MontyError> {
        let magic = self.take(4)?;
        if magic != MAGIC {
            return Err(MontyError::Decode("not Monty serialised data".to_string()));
        }
        let version = self.u8()?;
        if version != VERSION {
            return Err(MontyError::Decode(format!(
                "unsupported format version {version}"
            )));
        }
        let kind = self.u8()?;
        if kind != expected_kind {
            return Err(MontyError::Decode(format!(
                "wrong payload kind {kind}, expected {expected_kind}"
            )));
        }
        Ok(())
    }
}

// ── public entry points ──

pub(crate) fn encode_program(program: &Program) -> Vec<u8> {
    let mut enc = Enc::header(KIND_PROGRAM);
    write_program(&mut enc, program);
    enc.buf
}

pub(crate) fn decode_program(data: &[u8]) -> Result<Program, MontyError> {
    let mut dec = Dec::new(data);
    dec.header(KIND_PROGRAM)?;
    read_program(&mut dec)
}

pub(crate) fn encode_snapshot(interp: &Interp, call: &PausedCall) -> Result<Vec<u8>, MontyError> {
    let mut enc = Enc::header(KIND_SNAPSHOT);
    write_state(&mut enc, interp);
    write_paused_call(&mut enc, call);
    Ok(enc.buf)
}

pub(crate) fn decode_snapshot(data: &[u8]) -> Result<Snapshot, MontyError> {
    let mut dec = Dec::new(data);
    dec.header(KIND_SNAPSHOT)?;
    let interp = read_state(&mut dec)?;
    let call = read_paused_call(&mut dec)?;
    let script_name = interp.program().script_name.clone();
    Ok(Snapshot {
        state: Some(Box::new(interp)),
        call,
        script_name,
    })
}

pub(crate) fn encode_future_snapshot(
    interp: &Interp,
    pending: &[u64],
) -> Result<Vec<u8>, MontyError> {
    let mut enc = Enc::header(KIND_FUTURE_SNAPSHOT);
    write_state(&mut enc, interp);
    enc.u32(pending.len() as u32);
    for &id in pending {
        enc.u64(id);
    }
    Ok(enc.buf)
}

pub(crate) fn decode_future_snapshot(data: &[u8]) -> Result<FutureSnapshot, MontyError> {
    let mut dec = Dec::new(data);
    dec.header(KIND_FUTURE_SNAPSHOT)?;
    let interp = read_state(&mut dec)?;
    let n = dec.u32()? as usize;
    let mut pending = Vec::with_capacity(n);
    for _ in 0..n {
        pending.push(dec.u64()?);
    }
    let script_name = interp.program().script_name.clone();
    Ok(FutureSnapshot {
        state: Some(Box::new(interp)),
        pending,
        script_name,
    })
}

pub(crate) fn encode_repl(interp: &Interp) -> Vec<u8> {
    let mut enc = Enc::header(KIND_REPL);
    write_state(&mut enc, interp);
    enc.buf
}

pub(crate) fn decode_repl(data: &[u8]) -> Result<Interp, MontyError> {
    let mut dec = Dec::new(data);
    dec.header(KIND_REPL)?;
    read_state(&mut dec)
}

// ── program ──

fn write_program(enc: &mut Enc, program: &Program) {
    enc.str(&program.script_name);
    enc.u32(program.strings.len() as u32);
    for s in &program.strings {
        enc.str(s);
    }
    enc.u32(program.codes.len() as u32);
    for code in &program.codes {
        write_code(enc, code);
    }
    enc.u32(program.top_code);
    enc.u32(program.input_names.len() as u32);
    for name in &program.input_names {
        enc.str(name);
    }
    enc.u32(program.external_functions.len() as u32);
    for name in &program.external_functions {
        enc.str(name);
    }
    enc.opt_str(program.type_check_stubs.as_deref());
    enc.str(&program.source);
}

fn read_program(dec: &mut Dec) -> Result<Program, MontyError> {
    let script_name = dec.str()?;
    let n_strings = dec.u32()? as usize;
    let mut strings = Vec::with_capacity(n_strings);
    for _ in 0..n_strings {
        strings.push(dec.str()?);
    }
    let n_codes = dec.u32()? as usize;
    let mut codes = Vec::with_capacity(n_codes);
    for _ in 0..n_codes {
        codes.push(read_code(dec)?);
    }
    let top_code = dec.u32()?;
    let n_inputs = dec.u32()? as usize;
    let mut input_names = Vec::with_capacity(n_inputs);
    for _ in 0..n_inputs {
        input_names.push(dec.str()?);
    }
    let n_ext = dec.u32()? as usize;
    let mut external_functions = Vec::with_capacity(n_ext);
    for _ in 0..n_ext {
        external_functions.push(dec.str()?);
    }
    let type_check_stubs = dec.opt_str()?;
    let source = dec.str()?;
    Ok(Program {
        script_name,
        strings,
        codes,
        top_code,
        input_names,
        external_functions,
        type_check_stubs,
        source,
    })
}

fn write_code(enc: &mut Enc, code: &CodeObject) {
    enc.u32(code.name);
    enc.u32(code.params.len() as u32);
    for p in &code.params {
        enc.u32(p.name);
    }
    enc.u16(code.n_locals);
    enc.u16(code.n_cellvars);
    enc.u16(code.n_freevars);
    enc.u32(code.cell_params.len() as u32);
    for &(slot, cell) in &code.cell_params {
        enc.u16(slot);
        enc.u16(cell);
    }
    enc.u32(code.instrs.len() as u32);
    for &instr in &code.instrs {
        write_instr(enc, instr);
    }
    enc.u32(code.consts.len() as u32);
    for c in &code.consts {
        write_const(enc, c);
    }
    enc.u32(code.lines.len() as u32);
    for &(start, line) in &code.lines {
        enc.u32(start);
        enc.u32(line);
    }
    enc.u32(code.classes.len() as u32);
    for class in &code.classes {
        write_class_desc(enc, class);
    }
}

fn read_code(dec: &mut Dec) -> Result<CodeObject, MontyError> {
    let name = dec.u32()?;
    let n_params = dec.u32()? as usize;
    let mut params = Vec::with_capacity(n_params);
    for _ in 0..n_params {
        params.push(ParamDesc { name: dec.u32()? });
    }
    let n_locals = dec.u16()?;
    let n_cellvars = dec.u16()?;
    let n_freevars = dec.u16()?;
    let n_cell_params = dec.u32()? as usize;
    let mut cell_params = Vec::with_capacity(n_cell_params);
    for _ in 0..n_cell_params {
        let slot = dec.u16()?;
        let cell = dec.u16()?;
        cell_params.push((slot, cell));
    }
    let n_instrs = dec.u32()? as usize;
    let mut instrs = Vec::with_capacity(n_instrs);
    for _ in 0..n_instrs {
        instrs.push(read_instr(dec)?);
    }
    let n_consts = dec.u32()? as usize;
    let mut consts = Vec::with_capacity(n_consts);
    for _ in 0..n_consts {
        consts.push(read_const(dec)?);
    }
    let n_lines = dec.u32()? as usize;
    let mut lines = Vec::with_capacity(n_lines);
    for _ in 0..n_lines {
        let start = dec.u32()?;
        let line = dec.u32()?;
        lines.push((start, line));
    }
    let n_classes = dec.u32()? as usize;
    let mut classes = Vec::with_capacity(n_classes);
    for _ in 0..n_classes {
        classes.push(read_class_desc(dec)?);
    }
    Ok(CodeObject {
        name,
        params,
        n_locals,
        n_cellvars,
        n_freevars,
        cell_params,
        instrs,
        consts,
        lines,
        classes,
    })
}

fn write_class_desc(enc: &mut Enc, desc: &ClassDesc) {
    enc.u32(desc.name);
    enc.u32(desc.fields.len() as u32);
    for &(name, has_default) in &desc.fields {
        enc.u32(name);
        enc.bool(has_default);
    }
    enc.u32(desc.method_names.len() as u32);
    for &name in &desc.method_names {
        enc.u32(name);
    }
    enc.bool(desc.dataclass);
    enc.bool(desc.frozen);
}

fn read_class_desc(dec: &mut Dec) -> Result<ClassDesc, MontyError> {
    let name = dec.u32()?;
    let n_fields = dec.u32()? as usize;
    let mut fields = Vec::with_capacity(n_fields);
    for _ in 0..n_fields {
        let name = dec.u32()?;
        let has_default = dec.bool()?;
        fields.push((name, has_default));
    }
    let n_methods = dec.u32()? as usize;
    let mut method_names = Vec::with_capacity(n_methods);
    for _ in 0..n_methods {
        method_names.push(dec.u32()?);
    }
    let dataclass = dec.bool()?;
    let frozen = dec.bool()?;
    Ok(ClassDesc { name, fields, method_names, dataclass, frozen })
}

fn bin_op_tag(op: BinOp) -> u8 {
    match op {
        BinOp::Add => 0,
        BinOp::Sub => 1,
        BinOp::Mul => 2,
        BinOp::Div => 3,
        BinOp::FloorDiv => 4,
        BinOp::Mod => 5,
        BinOp::Pow => 6,
        BinOp::BitAnd => 7,
        BinOp::BitOr => 8,
        BinOp::BitXor => 9,
        BinOp::Shl => 10,
        BinOp::Shr => 11,
    }
}

fn bin_op_from(tag: u8) -> Result<BinOp, MontyError> {
    Ok(match tag {
        0 => BinOp::Add,
        1 => BinOp::Sub,
        2 => BinOp::Mul,
        3 => BinOp::Div,
        4 => BinOp::FloorDiv,
        5 => BinOp::Mod,
        6 => BinOp::Pow,
        7 => BinOp::BitAnd,
        8 => BinOp::BitOr,
        9 => BinOp::BitXor,
        10 => BinOp::Shl,
        11 => BinOp::Shr,
        other => return Err(bad_tag("binary operator", other)),
    })
}

fn un_op_tag(op: UnOp) -> u8 {
    match op {
        UnOp::Neg => 0,
        UnOp::Pos => 1,
        UnOp::Not => 2,
        UnOp::Invert => 3,
    }
}

fn un_op_from(tag: u8) -> Result<UnOp, MontyError> {
    Ok(match tag {
        0 => UnOp::Neg,
        1 => UnOp::Pos,
        2 => UnOp::Not,
        3 => UnOp::Invert,
        other => return Err(bad_tag("unary operator", other)),
    })
}

fn cmp_op_tag(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::Ne => 1,
        CmpOp::Lt => 2,
        CmpOp::Le => 3,
        CmpOp::Gt => 4,
        CmpOp::Ge => 5,
        CmpOp::In => 6,
        CmpOp::NotIn => 7,
        CmpOp::Is => 8,
        CmpOp::IsNot => 9,
    }
}

fn cmp_op_from(tag: u8) -> Result<CmpOp, MontyError> {
    Ok(match tag {
        0 => CmpOp::Eq,
        1 => CmpOp::Ne,
        2 => CmpOp::Lt,
        3 => CmpOp::Le,
        4 => CmpOp::Gt,
        5 => CmpOp::Ge,
        6 => CmpOp::In,
        7 => CmpOp::NotIn,
        8 => CmpOp::Is,
        9 => CmpOp::IsNot,
        other => return Err(bad_tag("comparison operator", other)),
    })
}

fn write_instr(enc: &mut Enc, instr: Instr) {
    match instr {
        Instr::LoadConst(c) => {
            enc.u8(0);
            enc.u32(c);
        }
        Instr::LoadLocal(s) => {
            enc.u8(1);
            enc.u16(s);
        }
        Instr::StoreLocal(s) => {
            enc.u8(2);
            enc.u16(s);
        }
        Instr::DeleteLocal(s) => {
            enc.u8(3);
            enc.u16(s);
        }
        Instr::LoadGlobal(s) => {
            enc.u8(4);
            enc.u32(s);
        }
        Instr::StoreGlobal(s) => {
            enc.u8(5);
            enc.u32(s);
        }
        Instr::DeleteGlobal(s) => {
            enc.u8(6);
            enc.u32(s);
        }
        Instr::LoadCell(s) => {
            enc.u8(7);
            enc.u16(s);
        }
        Instr::StoreCell(s) => {
            enc.u8(8);
            enc.u16(s);
        }
        Instr::LoadCellRef(s) => {
            enc.u8(9);
            enc.u16(s);
        }
        Instr::Pop => enc.u8(10),
        Instr::Dup => enc.u8(11),
        Instr::Rot2 => enc.u8(12),
        Instr::Rot3 => enc.u8(13),
        Instr::Unary(op) => {
            enc.u8(14);
            enc.u8(un_op_tag(op));
        }
        Instr::Binary(op) => {
            enc.u8(15);
            enc.u8(bin_op_tag(op));
        }
        Instr::Compare(op) => {
            enc.u8(16);
            enc.u8(cmp_op_tag(op));
        }
        Instr::BuildList(n) => {
            enc.u8(17);
            enc.u16(n);
        }
        Instr::BuildTuple(n) => {
            enc.u8(18);
            enc.u16(n);
        }
        Instr::BuildSet(n) => {
            enc.u8(19);
            enc.u16(n);
        }
        Instr::BuildDict(n) => {
            enc.u8(20);
            enc.u16(n);
        }
        Instr::BuildSlice(n) => {
            enc.u8(21);
            enc.u8(n);
        }
        Instr::BuildString(n) => {
            enc.u8(22);
            enc.u16(n);
        }
        Instr::FormatValue { repr } => {
            enc.u8(23);
            enc.bool(repr);
        }
        Instr::ListAppend(n) => {
            enc.u8(24);
            enc.u16(n);
        }
        Instr::SetAdd(n) => {
            enc.u8(25);
            enc.u16(n);
        }
        Instr::DictInsert(n) => {
            enc.u8(26);
            enc.u16(n);
        }
        Instr::UnpackSequence(n) => {
            enc.u8(27);
            enc.u16(n);
        }
        Instr::Index => enc.u8(28),
        Instr::StoreIndex => enc.u8(29),
        Instr::DeleteIndex => enc.u8(30),
        Instr::LoadAttr(s) => {
            enc.u8(31);
            enc.u32(s);
        }
        Instr::SetAttr(s) => {
            enc.u8(32);
            enc.u32(s);
        }
        Instr::Jump(t) => {
            enc.u8(33);
            enc.u32(t);
        }
        Instr::PopJumpIfFalse(t) => {
            enc.u8(34);
            enc.u32(t);
        }
        Instr::PopJumpIfTrue(t) => {
            enc.u8(35);
            enc.u32(t);
        }
        Instr::JumpIfFalseOrPop(t) => {
            enc.u8(36);
            enc.u32(t);
        }
        Instr::JumpIfTrueOrPop(t) => {
            enc.u8(37);
            enc.u32(t);
        }
        Instr::GetIter => enc.u8(38),
        Instr::ForIter(t) => {
            enc.u8(39);
            enc.u32(t);
        }
        Instr::Call(n) => {
            enc.u8(40);
            enc.u16(n);
        }
        Instr::CallKw { argc, names } => {
            enc.u8(41);
            enc.u16(argc);
            enc.u32(names);
        }
        Instr::Return => enc.u8(42),
        Instr::SetModuleResult => enc.u8(43),
        Instr::MakeFunction { code, n_defaults, n_captures } => {
            enc.u8(44);
            enc.u32(code);
            enc.u16(n_defaults);
            enc.u16(n_captures);
        }
        Instr::BuildClass { desc, n_methods, n_defaults } => {
            enc.u8(45);
            enc.u16(desc);
            enc.u16(n_methods);
            enc.u16(n_defaults);
        }
        Instr::Import(s) => {
            enc.u8(46);
            enc.u32(s);
        }
        Instr::ImportFrom { module, name } => {
            enc.u8(47);
            enc.u32(module);
            enc.u32(name);
        }
        Instr::SetupExcept(t) => {
            enc.u8(48);
            enc.u32(t);
        }
        Instr::SetupFinally(t) => {
            enc.u8(49);
            enc.u32(t);
        }
        Instr::PopBlock => enc.u8(50),
        Instr::Raise { argc } => {
            enc.u8(51);
            enc.u8(argc);
        }
        Instr::ExcMatch => enc.u8(52),
        Instr::PopException => enc.u8(53),
        Instr::Await => enc.u8(54),
    }
}

fn read_instr(dec: &mut Dec) -> Result<Instr, MontyError> {
    let tag = dec.u8()?;
    Ok(match tag {
        0 => Instr::LoadConst(dec.u32()?),
        1 => Instr::LoadLocal(dec.u16()?),
        2 => Instr::StoreLocal(dec.u16()?),
        3 => Instr::DeleteLocal(dec.u16()?),
        4 => Instr::LoadGlobal(dec.u32()?),
        5 => Instr::StoreGlobal(dec.u32()?),
        6 => Instr::DeleteGlobal(dec.u32()?),
        7 => Instr::LoadCell(dec.u16()?),
        8 => Instr::StoreCell(dec.u16()?),
        9 => Instr::LoadCellRef(dec.u16()?),
        10 => Instr::Pop,
        11 => Instr::Dup,
        12 => Instr::Rot2,
        13 => Instr::Rot3,
        14 => Instr::Unary(un_op_from(dec.u8()?)?),
        15 => Instr::Binary(bin_op_from(dec.u8()?)?),
        16 => Instr::Compare(cmp_op_from(dec.u8()?)?),
        17 => Instr::BuildList(dec.u16()?),
        18 => Instr::BuildTuple(dec.u16()?),
        19 => Instr::BuildSet(dec.u16()?),
        20 => Instr::BuildDict(dec.u16()?),
        21 => Instr::BuildSlice(dec.u8()?),
        22 => Instr::BuildString(dec.u16()?),
        23 => Instr::FormatValue { repr: dec.bool()? },
        24 => Instr::ListAppend(dec.u16()?),
        25 => Instr::SetAdd(dec.u16()?),
        26 => Instr::DictInsert(dec.u16()?),
        27 => Instr::UnpackSequence(dec.u16()?),
        28 => Instr::Index,
        29 => Instr::StoreIndex,
        30 => Instr::DeleteIndex,
        31 => Instr::LoadAttr(dec.u32()?),
        32 => Instr::SetAttr(dec.u32()?),
        33 => Instr::Jump(dec.u32()?),
        34 => Instr::PopJumpIfFalse(dec.u32()?),
        35 => Instr::PopJumpIfTrue(dec.u32()?),
        36 => Instr::JumpIfFalseOrPop(dec.u32()?),
        37 => Instr::JumpIfTrueOrPop(dec.u32()?),
        38 => Instr::GetIter,
        39 => Instr::ForIter(dec.u32()?),
        40 => Instr::Call(dec.u16()?),
        41 => Instr::CallKw { argc: dec.u16()?, names: dec.u32()? },
        42 => Instr::Return,
        43 => Instr::SetModuleResult,
        44 => Instr::MakeFunction {
            code: dec.u32()?,
            n_defaults: dec.u16()?,
            n_captures: dec.u16()?,
        },
        45 => Instr::BuildClass {
            desc: dec.u16()?,
            n_methods: dec.u16()?,
            n_defaults: dec.u16()?,
        },
        46 => Instr::Import(dec.u32()?),
        47 => Instr::ImportFrom { module: dec.u32()?, name: dec.u32()? },
        48 => Instr::SetupExcept(dec.u32()?),
        49 => Instr::SetupFinally(dec.u32()?),
        50 => Instr::PopBlock,
        51 => Instr::Raise { argc: dec.u8()? },
        52 => Instr::ExcMatch,
        53 => Instr::PopException,
        54 => Instr::Await,
        other => return Err(bad_tag("instruction", other)),
    })
}

fn write_bigint(enc: &mut Enc, n: &BigInt) {
    let (sign, bytes) = n.to_bytes_le();
    enc.u8(match sign {
        Sign::Minus => 0,
        Sign::NoSign => 1,
        Sign::Plus => 2,
    });
    enc.bytes(&bytes);
}

fn read_bigint(dec: &mut Dec) -> Result<BigInt, MontyError> {
    let sign = match dec.u8()? {
        0 => Sign::Minus,
        1 => Sign::NoSign,
        2 => Sign::Plus,
        other => return Err(bad_tag("big integer sign", other)),
    };
    let bytes = dec.bytes()?;
    Ok(BigInt::from_bytes_le(sign, &bytes))
}

fn write_const(enc: &mut Enc, c: &Const) {
    match c {
        Const::None => enc.u8(0),
        Const::Bool(b) => {
            enc.u8(1);
            enc.bool(*b);
        }
        Const::Int(n) => {
            enc.u8(2);
            enc.i64(*n);
        }
        Const::BigInt(n) => {
            enc.u8(3);
            write_bigint(enc, n);
        }
        Const::Float(f) => {
            enc.u8(4);
            enc.f64(*f);
        }
        Const::Str(s) => {
            enc.u8(5);
            enc.u32(*s);
        }
        Const::Bytes(b) => {
            enc.u8(6);
            enc.bytes(b);
        }
        Const::KwNames(names) => {
            enc.u8(7);
            enc.u32(names.len() as u32);
            for &n in names {
                enc.u32(n);
            }
        }
    }
}

fn read_const(dec: &mut Dec) -> Result<Const, MontyError> {
    Ok(match dec.u8()? {
        0 => Const::None,
        1 => Const::Bool(dec.bool()?),
        2 => Const::Int(dec.i64()?),
        3 => Const::BigInt(read_bigint(dec)?),
        4 => Const::Float(dec.f64()?),
        5 => Const::Str(dec.u32()?),
        6 => Const::Bytes(dec.bytes()?),
        7 => {
            let n = dec.u32()? as usize;
            let mut names = Vec::with_capacity(n);
            for _ in 0..n {
                names.push(dec.u32()?);
            }
            Const::KwNames(names)
        }
        other => return Err(bad_tag("constant", other)),
    })
}

// ── values ──

fn builtin_by_wire_name(name: &str) -> Option<Builtin> {
    builtin_from_name(name).or(match name {
        "Path" => Some(Builtin::PathCtor),
        "gather" => Some(Builtin::Gather),
        "getenv" => Some(Builtin::Getenv),
        "dataclass" => Some(Builtin::DataclassDecorator),
        _ => None,
    })
}

fn write_value(enc: &mut Enc, v: Value) {
    match v {
        Value::Undefined => enc.u8(0),
        Value::None => enc.u8(1),
        Value::Bool(b) => {
            enc.u8(2);
            enc.bool(b);
        }
        Value::Int(n) => {
            enc.u8(3);
            enc.i64(n);
        }
        Value::Float(f) => {
            enc.u8(4);
            enc.f64(f);
        }
        Value::Str(StrRef::Interned(id)) => {
            enc.u8(5);
            enc.u32(id);
        }
        Value::Str(StrRef::Heap(id)) => {
            enc.u8(6);
            enc.u32(id);
        }
        Value::Builtin(b) => {
            enc.u8(7);
            enc.str(b.name());
        }
        Value::ExcClass(k) => {
            enc.u8(8);
            enc.str(k.name());
        }
        Value::Module(m) => {
            enc.u8(9);
            enc.str(m.name());
        }
        Value::ExtFunction(i) => {
            enc.u8(10);
            enc.u16(i);
        }
        Value::Ref(id) => {
            enc.u8(11);
            enc.u32(id);
        }
    }
}

fn read_value(dec: &mut Dec) -> Result<Value, MontyError> {
    Ok(match dec.u8()? {
        0 => Value::Undefined,
        1 => Value::None,
        2 => Value::Bool(dec.bool()?),
        3 => Value::Int(dec.i64()?),
        4 => Value::Float(dec.f64()?),
        5 => Value::Str(StrRef::Interned(dec.u32()?)),
        6 => Value::Str(StrRef::Heap(dec.u32()?)),
        7 => {
            let name = dec.str()?;
            Value::Builtin(builtin_by_wire_name(&name).ok_or_else(|| {
                MontyError::Decode(format!("unknown builtin '{name}'"))
            })?)
        }
        8 => {
            let name = dec.str()?;
            Value::ExcClass(ExcKind::from_name(&name).ok_or_else(|| {
                MontyError::Decode(format!("unknown exception kind '{name}'"))
            })?)
        }
        9 => {
            let name = dec.str()?;
            Value::Module(Module::from_name(&name).ok_or_else(|| {
                MontyError::Decode(format!("unknown module '{name}'"))
            })?)
        }
        10 => Value::ExtFunction(dec.u16()?),
        11 => Value::Ref(dec.u32()?),
        other => return Err(bad_tag("value", other)),
    })
}

fn write_values(enc: &mut Enc, values: &[Value]) {
    enc.u32(values.len() as u32);
    for &v in values {
        write_value(enc, v);
    }
}

fn read_values(dec: &mut Dec) -> Result<Vec<Value>, MontyError> {
    let n = dec.u32()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_value(dec)?);
    }
    Ok(out)
}

fn write_str_ref(enc: &mut Enc, s: StrRef) {
    match s {
        StrRef::Interned(id) => {
            enc.u8(0);
            enc.u32(id);
        }
        StrRef::Heap(id) => {
            enc.u8(1);
            enc.u32(id);
        }
    }
}

fn read_str_ref(dec: &mut Dec) -> Result<StrRef, MontyError> {
    Ok(match dec.u8()? {
        0 => StrRef::Interned(dec.u32()?),
        1 => StrRef::Heap(dec.u32()?),
        other => return Err(bad_tag("string reference", other)),
    })
}

// ── heap data ──

fn write_heap_data(enc: &mut Enc, data: &HeapData) {
    match data {
        HeapData::Str(s) => {
            enc.u8(0);
            enc.str(s);
        }
        HeapData::Bytes(b) => {
            enc.u8(1);
            enc.bytes(b);
        }
        HeapData::BigInt(n) => {
            enc.u8(2);
            write_bigint(enc, n);
        }
        HeapData::List(items) => {
            enc.u8(3);
            write_values(enc, items);
        }
        HeapData::Tuple(items) => {
            enc.u8(4);
            write_values(enc, items);
        }
        HeapData::Dict(d) => {
            enc.u8(5);
            enc.u32(d.entries.len() as u32);
            for &(hash, k, v) in &d.entries {
                enc.u64(hash);
                write_value(enc, k);
                write_value(enc, v);
            }
        }
        HeapData::Set(s) | HeapData::FrozenSet(s) => {
            enc.u8(if matches!(data, HeapData::Set(_)) { 6 } else { 7 });
            enc.u32(s.entries.len() as u32);
            for &(hash, v) in &s.entries {
                enc.u64(hash);
                write_value(enc, v);
            }
        }
        HeapData::Range(r) => {
            enc.u8(8);
            enc.i64(r.start);
            enc.i64(r.stop);
            enc.i64(r.step);
        }
        HeapData::Slice(s) => {
            enc.u8(9);
            write_value(enc, s.start);
            write_value(enc, s.stop);
            write_value(enc, s.step);
        }
        HeapData::Closure(c) => {
            enc.u8(10);
            enc.u32(c.code);
            write_str_ref(enc, c.name);
            write_values(enc, &c.defaults);
            enc.u32(c.cells.len() as u32);
            for &cell in &c.cells {
                enc.u32(cell);
            }
        }
        HeapData::BoundMethod(m) => {
            enc.u8(11);
            match &m.kind {
                MethodKind::Function(f) => {
                    enc.u8(0);
                    write_value(enc, *f);
                }
                MethodKind::Builtin(b) => {
                    enc.u8(1);
                    let tag = METHOD_WIRE
                        .iter()
                        .position(|&x| x == *b)
                        .expect("method missing from wire table") as u8;
                    enc.u8(tag);
                }
                MethodKind::Os(f) => {
                    enc.u8(2);
                    enc.str(f.name());
                }
            }
            write_value(enc, m.recv);
        }
        HeapData::Class(c) => {
            enc.u8(12);
            enc.str(&c.name);
            enc.u32(c.fields.len() as u32);
            for field in &c.fields {
                enc.str(&field.name);
                match field.default {
                    Some(v) => {
                        enc.u8(1);
                        write_value(enc, v);
                    }
                    None => enc.u8(0),
                }
            }
            enc.u32(c.methods.len() as u32);
            for (name, v) in &c.methods {
                enc.str(name);
                write_value(enc, *v);
            }
            enc.bool(c.dataclass);
            enc.bool(c.frozen);
        }
        HeapData::Instance(i) => {
            enc.u8(13);
            enc.u32(i.class);
            enc.u32(i.attrs.len() as u32);
            for (name, v) in &i.attrs {
                enc.str(name);
                write_value(enc, *v);
            }
        }
        HeapData::Path(p) => {
            enc.u8(14);
            enc.str(p);
        }
        HeapData::NamedTuple(t) => {
            enc.u8(15);
            enc.str(&t.type_name);
            enc.u32(t.names.len() as u32);
            for name in &t.names {
                enc.str(name);
            }
            write_values(enc, &t.values);
        }
        HeapData::Exception(e) => {
            enc.u8(16);
            enc.str(e.kind.name());
            enc.str(&e.message);
            match e.cause {
                Some(id) => {
                    enc.u8(1);
                    enc.u32(id);
                }
                None => enc.u8(0),
            }
            enc.u32(e.traceback.len() as u32);
            for entry in &e.traceback {
                enc.str(&entry.script_name);
                enc.str(&entry.frame);
                enc.u32(entry.line);
                enc.opt_str(entry.source_line.as_deref());
            }
        }
        HeapData::Cell(v) => {
            enc.u8(17);
            write_value(enc, *v);
        }
        HeapData::Iter(iter) => {
            enc.u8(18);
            match iter {
                IterData::Seq { seq, idx } => {
                    enc.u8(0);
                    enc.u32(*seq);
                    enc.u64(*idx as u64);
                }
                IterData::Chars { s, idx } => {
                    enc.u8(1);
                    write_str_ref(enc, *s);
                    enc.u64(*idx as u64);
                }
                IterData::Range { cur, stop, step } => {
                    enc.u8(2);
                    enc.i64(*cur);
                    enc.i64(*stop);
                    enc.i64(*step);
                }
                IterData::Keys { keys, idx } => {
                    enc.u8(3);
                    write_values(enc, keys);
                    enc.u64(*idx as u64);
                }
                IterData::Zip { iters } => {
                    enc.u8(4);
                    enc.u32(iters.len() as u32);
                    for &it in iters {
                        enc.u32(it);
                    }
                }
                IterData::Enumerate { inner, count } => {
                    enc.u8(5);
                    enc.u32(*inner);
                    enc.i64(*count);
                }
                IterData::Reversed { seq, remaining } => {
                    enc.u8(6);
                    enc.u32(*seq);
                    enc.u64(*remaining as u64);
                }
            }
        }
        HeapData::Future(f) => {
            enc.u8(19);
            match f {
                FutureData::External { call_id } => {
                    enc.u8(0);
                    enc.u64(*call_id);
                }
                FutureData::Gather { parts } => {
                    enc.u8(1);
                    write_values(enc, parts);
                }
            }
        }
    }
}

fn read_heap_data(dec: &mut Dec) -> Result<HeapData, MontyError> {
    Ok(match dec.u8()? {
        0 => HeapData::Str(dec.str()?),
        1 => HeapData::Bytes(dec.bytes()?),
        2 => HeapData::BigInt(read_bigint(dec)?),
        3 => HeapData::List(read_values(dec)?),
        4 => HeapData::Tuple(read_values(dec)?),
        5 => {
            let n = dec.u32()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let hash = dec.u64()?;
                let k = read_value(dec)?;
                let v = read_value(dec)?;
                entries.push((hash, k, v));
            }
            HeapData::Dict(DictData { entries })
        }
        tag @ (6 | 7) => {
            let n = dec.u32()? as usize;
            let mut entries = Vec::with_capacity(n);
            for _ in 0..n {
                let hash = dec.u64()?;
                let v = read_value(dec)?;
                entries.push((hash, v));
            }
            let data = SetData { entries };
            if tag == 6 {
                HeapData::Set(data)
            } else {
                HeapData::FrozenSet(data)
            }
        }
        8 => HeapData::Range(RangeData {
            start: dec.i64()?,
            stop: dec.i64()?,
            step: dec.i64()?,
        }),
        9 => HeapData::Slice(SliceData {
            start: read_value(dec)?,
            stop: read_value(dec)?,
            step: read_value(dec)?,
        }),
        10 => {
            let code = dec.u32()?;
            let name = read_str_ref(dec)?;
            let defaults = read_values(dec)?;
            let n_cells = dec.u32()? as usize;
            let mut cells = Vec::with_capacity(n_cells);
            for _ in 0..n_cells {
                cells.push(dec.u32()?);
            }
            HeapData::Closure(ClosureData { code, name, defaults, cells })
        }
        11 => {
            let kind = match dec.u8()? {
                0 => MethodKind::Function(read_value(dec)?),
                1 => {
                    let tag = dec.u8()?;
                    let method: BuiltinMethod = *METHOD_WIRE
                        .get(tag as usize)
                        .ok_or_else(|| bad_tag("builtin method", tag))?;
                    MethodKind::Builtin(method)
                }
                2 => {
                    let name = dec.str()?;
                    MethodKind::Os(OsFunction::from_name(&name).ok_or_else(|| {
                        MontyError::Decode(format!("unknown OS function '{name}'"))
                    })?)
                }
                other => return Err(bad_tag("method kind", other)),
            };
            let recv = read_value(dec)?;
            HeapData::BoundMethod(BoundMethodData { kind, recv })
        }
        12 => {
            let name = dec.str()?;
            let n_fields = dec.u32()? as usize;
            let mut fields = Vec::with_capacity(n_fields);
            for _ in 0..n_fields {
                let field_name = dec.str()?;
                let default = if dec.u8()? == 1 { Some(read_value(dec)?) } else { None };
                fields.push(FieldInfo { name: field_name, default });
            }
            let n_methods = dec.u32()? as usize;
            let mut methods = Vec::with_capacity(n_methods);
            for _ in 0..n_methods {
                let method_name = dec.str()?;
                let v = read_value(dec)?;
                methods.push((method_name, v));
            }
            let dataclass = dec.bool()?;
            let frozen = dec.bool()?;
            HeapData::Class(ClassData { name, fields, methods, dataclass, frozen })
        }
        13 => {
            let class = dec.u32()?;
            let n = dec.u32()? as usize;
            let mut attrs = Vec::with_capacity(n);
            for _ in 0..n {
                let name = dec.str()?;
                let v = read_value(dec)?;
                attrs.push((name, v));
            }
            HeapData::Instance(InstanceData { class, attrs })
        }
        14 => HeapData::Path(dec.str()?),
        15 => {
            let type_name = dec.str()?;
            let n = dec.u32()? as usize;
            let mut names = Vec::with_capacity(n);
            for _ in 0..n {
                names.push(dec.str()?);
            }
            let values = read_values(dec)?;
            HeapData::NamedTuple(NamedTupleData { type_name, names, values })
        }
        16 => {
            let kind_name = dec.str()?;
            let kind = ExcKind::from_name(&kind_name).ok_or_else(|| {
                MontyError::Decode(format!("unknown exception kind '{kind_name}'"))
            })?;
            let message = dec.str()?;
            let cause = if dec.u8()? == 1 { Some(dec.u32()?) } else { None };
            let n = dec.u32()? as usize;
            let mut traceback = Vec::with_capacity(n);
            for _ in 0..n {
                traceback.push(TraceEntry {
                    script_name: dec.str()?,
                    frame: dec.str()?,
                    line: dec.u32()?,
                    source_line: dec.opt_str()?,
                });
            }
            HeapData::Exception(ExcData { kind, message, cause, traceback })
        }
        17 => HeapData::Cell(read_value(dec)?),
        18 => match dec.u8()? {
            0 => HeapData::Iter(IterData::Seq { seq: dec.u32()?, idx: dec.u64()? as usize }),
            1 => HeapData::Iter(IterData::Chars { s: read_str_ref(dec)?, idx: dec.u64()? as usize }),
            2 => HeapData::Iter(IterData::Range {
                cur: dec.i64()?,
                stop: dec.i64()?,
                step: dec.i64()?,
            }),
            3 => HeapData::Iter(IterData::Keys { keys: read_values(dec)?, idx: dec.u64()? as usize }),
            4 => {
                let n = dec.u32()? as usize;
                let mut iters = Vec::with_capacity(n);
                for _ in 0..n {
                    iters.push(dec.u32()?);
                }
                HeapData::Iter(IterData::Zip { iters })
            }
            5 => HeapData::Iter(IterData::Enumerate { inner: dec.u32()?, count: dec.i64()? }),
            6 => HeapData::Iter(IterData::Reversed {
                seq: dec.u32()?,
                remaining: dec.u64()? as usize,
            }),
            other => return Err(bad_tag("iterator", other)),
        },
        19 => match dec.u8()? {
            0 => HeapData::Future(FutureData::External { call_id: dec.u64()? }),
            1 => HeapData::Future(FutureData::Gather { parts: read_values(dec)? }),
            other => return Err(bad_tag("future", other)),
        },
        other => return Err(bad_tag("heap object", other)),
    })
}

// ── host values ──

fn write_host_value(enc: &mut Enc, v: &HostValue) {
    match v {
        HostValue::None => enc.u8(0),
        HostValue::Bool(b) => {
            enc.u8(1);
            enc.bool(*b);
        }
        HostValue::Int(n) => {
            enc.u8(2);
            enc.i64(*n);
        }
        HostValue::BigInt(n) => {
            enc.u8(3);
            write_bigint(enc, n);
        }
        HostValue::Float(f) => {
            enc.u8(4);
            enc.f64(*f);
        }
        HostValue::Str(s) => {
            enc.u8(5);
            enc.str(s);
        }
        HostValue::Bytes(b) => {
            enc.u8(6);
            enc.bytes(b);
        }
        HostValue::List(items) => {
            enc.u8(7);
            write_host_values(enc, items);
        }
        HostValue::Tuple(items) => {
            enc.u8(8);
            write_host_values(enc, items);
        }
        HostValue::Set(items) => {
            enc.u8(9);
            write_host_values(enc, items);
        }
        HostValue::FrozenSet(items) => {
            enc.u8(10);
            write_host_values(enc, items);
        }
        HostValue::Dict(pairs) => {
            enc.u8(11);
            enc.u32(pairs.len() as u32);
            for (k, v) in pairs {
                write_host_value(enc, k);
                write_host_value(enc, v);
            }
        }
        HostValue::Path(p) => {
            enc.u8(12);
            enc.str(p);
        }
        HostValue::Stat(stat) => {
            enc.u8(13);
            enc.i64(stat.st_mode);
            enc.i64(stat.st_ino);
            enc.i64(stat.st_dev);
            enc.i64(stat.st_nlink);
            enc.i64(stat.st_uid);
            enc.i64(stat.st_gid);
            enc.i64(stat.st_size);
            enc.f64(stat.st_atime);
            enc.f64(stat.st_mtime);
            enc.f64(stat.st_ctime);
        }
        HostValue::Dataclass { name, fields } => {
            enc.u8(14);
            enc.str(name);
            enc.u32(fields.len() as u32);
            for (field, value) in fields {
                enc.str(field);
                write_host_value(enc, value);
            }
        }
    }
}

fn write_host_values(enc: &mut Enc, values: &[HostValue]) {
    enc.u32(values.len() as u32);
    for v in values {
        write_host_value(enc, v);
    }
}

fn read_host_value(dec: &mut Dec) -> Result<HostValue, MontyError> {
    Ok(match dec.u8()? {
        0 => HostValue::None,
        1 => HostValue::Bool(dec.bool()?),
        2 => HostValue::Int(dec.i64()?),
        3 => HostValue::BigInt(read_bigint(dec)?),
        4 => HostValue::Float(dec.f64()?),
        5 => HostValue::Str(dec.str()?),
        6 => HostValue::Bytes(dec.bytes()?),
        7 => HostValue::List(read_host_values(dec)?),
        8 => HostValue::Tuple(read_host_values(dec)?),
        9 => HostValue::Set(read_host_values(dec)?),
        10 => HostValue::FrozenSet(read_host_values(dec)?),
        11 => {
            let n = dec.u32()? as usize;
            let mut pairs = Vec::with_capacity(n);
            for _ in 0..n {
                let k = read_host_value(dec)?;
                let v = read_host_value(dec)?;
                pairs.push((k, v));
            }
            HostValue::Dict(pairs)
        }
        12 => HostValue::Path(dec.str()?),
        13 => HostValue::Stat(StatResult {
            st_mode: dec.i64()?,
            st_ino: dec.i64()?,
            st_dev: dec.i64()?,
            st_nlink: dec.i64()?,
            st_uid: dec.i64()?,
            st_gid: dec.i64()?,
            st_size: dec.i64()?,
            st_atime: dec.f64()?,
            st_mtime: dec.f64()?,
            st_ctime: dec.f64()?,
        }),
        14 => {
            let name = dec.str()?;
            let n = dec.u32()? as usize;
            let mut fields = Vec::with_capacity(n);
            for _ in 0..n {
                let field = dec.str()?;
                let value = read_host_value(dec)?;
                fields.push((field, value));
            }
            HostValue::Dataclass { name, fields }
        }
        other => return Err(bad_tag("host value", other)),
    })
}

fn read_host_values(dec: &mut Dec) -> Result<Vec<HostValue>, MontyError> {
    let n = dec.u32()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(read_host_value(dec)?);
    }
    Ok(out)
}

// ── paused calls ──

fn write_paused_call(enc: &mut Enc, call: &PausedCall) {
    enc.u64(call.call_id);
    enc.str(&call.function);
    enc.bool(call.is_os);
    write_host_values(enc, &call.args);
    enc.u32(call.kwargs.len() as u32);
    for (name, v) in &call.kwargs {
        enc.str(name);
        write_host_value(enc, v);
    }
}

fn read_paused_call(dec: &mut Dec) -> Result<PausedCall, MontyError> {
    let call_id = dec.u64()?;
    let function = dec.str()?;
    let is_os = dec.bool()?;
    let args = read_host_values(dec)?;
    let n = dec.u32()? as usize;
    let mut kwargs = Vec::with_capacity(n);
    for _ in 0..n {
        let name = dec.str()?;
        let v = read_host_value(dec)?;
        kwargs.push((name, v));
    }
    Ok(PausedCall { call_id, function, is_os, args, kwargs })
}

// ── interpreter state ──

fn write_state(enc: &mut Enc, interp: &Interp) {
    enc.u32(interp.feeds.len() as u32);
    for feed in &interp.feeds {
        write_program(enc, feed);
    }

    enc.u32(interp.globals.len() as u32);
    // deterministic order keeps dumps stable across runs
    let mut names: Vec<&String> = interp.globals.keys().collect();
    names.sort();
    for name in names {
        enc.str(name);
        write_value(enc, interp.globals[name]);
    }
    write_value(enc, interp.module_result);

    enc.u32(interp.frames.len() as u32);
    for frame in &interp.frames {
        enc.u32(frame.code);
        enc.u64(frame.pc as u64);
        enc.str(&frame.name);
        write_values(enc, &frame.stack);
        write_values(enc, &frame.locals);
        enc.u32(frame.cells.len() as u32);
        for &cell in &frame.cells {
            enc.u32(cell);
        }
        enc.u32(frame.handlers.len() as u32);
        for handler in &frame.handlers {
            enc.u32(handler.target);
            enc.u64(handler.stack_height as u64);
            enc.bool(handler.is_finally);
            enc.u64(handler.exc_depth as u64);
        }
        enc.u32(frame.exc_stack.len() as u32);
        for &exc in &frame.exc_stack {
            enc.u32(exc);
        }
    }
    enc.u32(interp.return_modes.len() as u32);
    for mode in &interp.return_modes {
        match mode {
            ReturnMode::Normal => enc.u8(0),
            ReturnMode::ReplaceWith(v) => {
                enc.u8(1);
                write_value(enc, *v);
            }
        }
    }

    let entries: Vec<_> = interp.heap.live_entries().collect();
    enc.u32(entries.len() as u32);
    for (id, data) in entries {
        enc.u32(id);
        write_heap_data(enc, data);
    }
    enc.u64(interp.heap.total_allocations());
    enc.u64(interp.heap.generation());

    let futures: Vec<_> = interp.futures.entries().collect();
    enc.u32(futures.len() as u32);
    for (call_id, state) in futures {
        enc.u64(call_id);
        match state {
            FutureState::Pending => enc.u8(0),
            FutureState::Completed { outcome: FutureOutcome::Return(v), epoch } => {
                enc.u8(1);
                write_value(enc, v);
                enc.u64(epoch);
            }
            FutureState::Completed { outcome: FutureOutcome::Exception(exc), epoch } => {
                enc.u8(2);
                enc.u32(exc);
                enc.u64(epoch);
            }
        }
    }
    enc.u64(interp.futures.epoch_counter());
    enc.u64(interp.next_call_id);

    // limits and the re-anchored deadline
    enc.opt_u64(interp.limits.max_allocations);
    enc.opt_u64(interp.limits.max_duration.map(|d| d.as_nanos() as u64));
    enc.opt_u64(interp.limits.max_memory.map(|m| m as u64));
    enc.opt_u64(interp.limits.gc_interval);
    enc.opt_u64(interp.limits.max_recursion_depth.map(|d| d as u64));
    enc.opt_u64(interp.tracker.remaining().map(|d| d.as_nanos() as u64));

    enc.bool(interp.os_enabled);
    enc.bool(interp.ext_enabled);
}

fn read_state(dec: &mut Dec) -> Result<Interp, MontyError> {
    let n_feeds = dec.u32()? as usize;
    if n_feeds == 0 {
        return Err(MontyError::Decode("state has no program".to_string()));
    }
    let mut feeds = Vec::with_capacity(n_feeds);
    for _ in 0..n_feeds {
        feeds.push(Arc::new(read_program(dec)?));
    }

    let n_globals = dec.u32()? as usize;
    let mut globals = HashMap::with_capacity(n_globals);
    for _ in 0..n_globals {
        let name = dec.str()?;
        let v = read_value(dec)?;
        globals.insert(name, v);
    }
    let module_result = read_value(dec)?;

    let n_frames = dec.u32()? as usize;
    let mut frames = Vec::with_capacity(n_frames);
    for _ in 0..n_frames {
        let code = dec.u32()?;
        let pc = dec.u64()? as usize;
        let name = dec.str()?;
        let stack = read_values(dec)?;
        let locals = read_values(dec)?;
        let n_cells = dec.u32()? as usize;
        let mut cells = Vec::with_capacity(n_cells);
        for _ in 0..n_cells {
            cells.push(dec.u32()?);
        }
        let n_handlers = dec.u32()? as usize;
        let mut handlers = Vec::with_capacity(n_handlers);
        for _ in 0..n_handlers {
            handlers.push(Handler {
                target: dec.u32()?,
                stack_height: dec.u64()? as usize,
                is_finally: dec.bool()?,
                exc_depth: dec.u64()? as usize,
            });
        }
        let n_exc = dec.u32()? as usize;
        let mut exc_stack = Vec::with_capacity(n_exc);
        for _ in 0..n_exc {
            exc_stack.push(dec.u32()?);
        }
        frames.push(Frame {
            code,
            pc,
            stack,
            locals,
            cells,
            handlers,
            exc_stack,
            name,
        });
    }
    let n_modes = dec.u32()? as usize;
    let mut return_modes = Vec::with_capacity(n_modes);
    for _ in 0..n_modes {
        return_modes.push(match dec.u8()? {
            0 => ReturnMode::Normal,
            1 => ReturnMode::ReplaceWith(read_value(dec)?),
            other => return Err(bad_tag("return mode", other)),
        });
    }

    let n_entries = dec.u32()? as usize;
    let mut entries = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        let id = dec.u32()?;
        let data = read_heap_data(dec)?;
        entries.push((id, data));
    }
    let total_allocations = dec.u64()?;
    let generation = dec.u64()?;

    let n_futures = dec.u32()? as usize;
    let mut future_entries = Vec::with_capacity(n_futures);
    for _ in 0..n_futures {
        let call_id = dec.u64()?;
        let state = match dec.u8()? {
            0 => FutureState::Pending,
            1 => {
                let v = read_value(dec)?;
                let epoch = dec.u64()?;
                FutureState::Completed { outcome: FutureOutcome::Return(v), epoch }
            }
            2 => {
                let exc = dec.u32()?;
                let epoch = dec.u64()?;
                FutureState::Completed { outcome: FutureOutcome::Exception(exc), epoch }
            }
            other => return Err(bad_tag("future state", other)),
        };
        future_entries.push((call_id, state));
    }
    let next_epoch = dec.u64()?;
    let next_call_id = dec.u64()?;

    let limits = ResourceLimits {
        max_allocations: dec.opt_u64()?,
        max_duration: dec.opt_u64()?.map(Duration::from_nanos),
        max_memory: dec.opt_u64()?.map(|m| m as usize),
        gc_interval: dec.opt_u64()?,
        max_recursion_depth: dec.opt_u64()?.map(|d| d as usize),
    };
    let remaining = dec.opt_u64()?.map(Duration::from_nanos);
    let os_enabled = dec.bool()?;
    let ext_enabled = dec.bool()?;

    // rebuild the merged interns and code table in feed order
    let mut strings = Vec::new();
    let mut codes = Vec::new();
    for feed in &feeds {
        let str_base = strings.len() as u32;
        let code_base = codes.len() as u32;
        strings.extend(feed.strings.iter().cloned());
        for i in 0..feed.codes.len() as u32 {
            codes.push(CodeEntry {
                program: Arc::clone(feed),
                code_idx: i,
                str_base,
                code_base,
            });
        }
    }
    let heap = Heap::from_parts(
        strings,
        entries,
        total_allocations,
        generation,
        limits.max_memory,
        limits.max_allocations,
        limits.gc_interval,
    );
    let tracker = LimitTracker::restore(
        remaining,
        limits.max_recursion_depth.unwrap_or(DEFAULT_RECURSION_LIMIT),
    );

    Ok(Interp {
        codes,
        feeds,
        heap,
        frames,
        return_modes,
        globals,
        module_result,
        limits,
        tracker,
        futures: FuturesTable::restore(future_entries, next_epoch),
        next_call_id,
        temp_roots: Vec::new(),
        print: Box::new(StdoutSink),
        os_enabled,
        ext_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> Program {
        monty_compiler::compile(
            "x = 1\nx + y",
            "main.py",
            &["y".to_string()],
            &["fetch".to_string()],
            Some("stub text".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn program_round_trips() {
        let program = sample_program();
        let data = encode_program(&program);
        assert_eq!(&data[..4], MAGIC);
        let back = decode_program(&data).unwrap();
        assert_eq!(program, back);
    }

    #[test]
    fn truncated_data_reports_eof() {
        let program = sample_program();
        let data = encode_program(&program);
        let err = decode_program(&data[..data.len() / 2]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Hit the end of buffer, expected more data"
        );
    }

    #[test]
    fn empty_buffer_reports_eof() {
        let err = decode_program(&[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Hit the end of buffer, expected more data"
        );
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let err = decode_program(b"XXXXmore-bytes-here").unwrap_err();
        assert!(err.to_string().contains("not Monty serialised data"));
    }

    #[test]
    fn host_value_round_trips() {
        let mut enc = Enc::default();
        let value = HostValue::Dict(vec![
            (
                HostValue::Str("a".into()),
                HostValue::List(vec![HostValue::Int(1), HostValue::Bool(true)]),
            ),
            (HostValue::Int(2), HostValue::Bytes(vec![1, 2, 3])),
        ]);
        write_host_value(&mut enc, &value);
        let mut dec = Dec::new(&enc.buf);
        assert_eq!(read_host_value(&mut dec).unwrap(), value);
    }

    #[test]
    fn big_integers_round_trip() {
        let mut enc = Enc::default();
        let n: BigInt = "123456789012345678901234567890".parse().unwrap();
        write_bigint(&mut enc, &n);
        write_bigint(&mut enc, &(-&n));
        let mut dec = Dec::new(&enc.buf);
        assert_eq!(read_bigint(&mut dec).unwrap(), n);
        assert_eq!(read_bigint(&mut dec).unwrap(), -n);
    }
}
