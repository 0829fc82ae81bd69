//! Bytecode generation: AST to [`Program`].

use crate::ast::*;
use crate::code::*;
use crate::error::SyntaxError;
use crate::scope::{analyze_function, analyze_lambda, ScopeInfo};
use std::collections::{HashMap, HashSet};

/// Compile a parsed module into a [`Program`].
pub fn compile_module(
    stmts: &[Stmt],
    source: &str,
    script_name: &str,
    input_names: &[String],
    external_functions: &[String],
    type_check_stubs: Option<String>,
) -> Result<Program, SyntaxError> {
    let mut compiler = Compiler {
        strings: Vec::new(),
        string_map: HashMap::new(),
        codes: Vec::new(),
        scopes: Vec::new(),
    };
    let top_code = compiler.compile_code("<module>", &[], Body::Module(stmts), None)?;
    Ok(Program {
        script_name: script_name.to_string(),
        strings: compiler.strings,
        codes: compiler.codes,
        top_code,
        input_names: input_names.to_vec(),
        external_functions: external_functions.to_vec(),
        type_check_stubs,
        source: source.to_string(),
    })
}

enum Body<'a> {
    Module(&'a [Stmt]),
    Function(&'a [Stmt]),
    Lambda(&'a Expr),
}

/// Where a name lives in the current scope.
#[derive(Debug, Clone, Copy)]
enum NameLoc {
    Local(u16),
    Cell(u16),
    Global,
}

/// An enclosing function scope, for closure capture resolution.
struct FnScope {
    cellvars: Vec<String>,
    freevars: Vec<String>,
}

impl FnScope {
    fn cell_index(&self, name: &str) -> Option<u16> {
        if let Some(i) = self.cellvars.iter().position(|n| n == name) {
            return Some(i as u16);
        }
        self.freevars
            .iter()
            .position(|n| n == name)
            .map(|i| (self.cellvars.len() + i) as u16)
    }
}

struct Compiler {
    strings: Vec<String>,
    string_map: HashMap<String, u32>,
    codes: Vec<CodeObject>,
    /// Enclosing function scopes, innermost last. Module level is absent.
    scopes: Vec<FnScope>,
}

/// An active `Setup*` block while compiling a function body.
#[derive(Clone)]
enum Block {
    Except,
    Finally(Vec<Stmt>),
}

struct Loop {
    is_for: bool,
    continue_target: u32,
    break_jumps: Vec<usize>,
    /// `blocks.len()` at loop entry; break/continue unwind down to here.
    block_depth: usize,
}

impl Compiler {
    fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.string_map.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_map.insert(s.to_string(), id);
        id
    }

    /// Compile one code object (module, function, method, or lambda).
    fn compile_code(
        &mut self,
        name: &str,
        params: &[Param],
        body: Body<'_>,
        precomputed: Option<ScopeInfo>,
    ) -> Result<CodeId, SyntaxError> {
        let is_module = matches!(body, Body::Module(_));
        let info = match precomputed {
            Some(info) => info,
            None => match &body {
                Body::Module(_) => ScopeInfo {
                    bound: Vec::new(),
                    bound_set: HashSet::new(),
                    globals: HashSet::new(),
                    nonlocals: HashSet::new(),
                    referenced: HashSet::new(),
                    child_needs: HashSet::new(),
                },
                Body::Function(stmts) => analyze_function(params, stmts),
                Body::Lambda(expr) => analyze_lambda(params, expr),
            },
        };

        let (cellvars, freevars, locals) = if is_module {
            (Vec::new(), Vec::new(), HashMap::new())
        } else {
            let cellvars = info.cellvars();
            let mut freevars = Vec::new();
            for candidate in info.free_candidates() {
                let resolvable = self
                    .scopes
                    .iter()
                    .rev()
                    .any(|s| s.cell_index(&candidate).is_some());
                if resolvable {
                    freevars.push(candidate);
                } else if info.nonlocals.contains(&candidate) {
                    return Err(SyntaxError::new(
                        format!("no binding for nonlocal '{candidate}' found"),
                        0,
                        0,
                    ));
                }
            }
            // slots: parameters first (always), then other bound names that
            // are not cells
            let mut locals = HashMap::new();
            for (i, p) in params.iter().enumerate() {
                locals.insert(p.name.clone(), i as u16);
            }
            let mut next = params.len() as u16;
            for name in &info.bound {
                if locals.contains_key(name) || cellvars.contains(name) {
                    continue;
                }
                locals.insert(name.clone(), next);
                next += 1;
            }
            (cellvars, freevars, locals)
        };

        let cell_params: Vec<(u16, u16)> = params
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| {
                cellvars
                    .iter()
                    .position(|c| c == &p.name)
                    .map(|cell| (slot as u16, cell as u16))
            })
            .collect();

        let n_locals = locals.len() as u16;
        let param_descs: Vec<ParamDesc> = params
            .iter()
            .map(|p| ParamDesc { name: self.intern(&p.name) })
            .collect();
        let code_name = self.intern(name);

        self.scopes.push(FnScope {
            cellvars: cellvars.clone(),
            freevars: freevars.clone(),
        });

        let mut builder = CodeBuilder {
            instrs: Vec::new(),
            consts: Vec::new(),
            lines: Vec::new(),
            classes: Vec::new(),
            cur_line: 0,
            is_module,
            locals,
            cellvars,
            freevars,
            globals_decl: info.globals,
            nonlocals_decl: info.nonlocals,
            blocks: Vec::new(),
            loops: Vec::new(),
        };

        let result = (|| -> Result<(), SyntaxError> {
            match body {
                Body::Module(stmts) => {
                    for (i, stmt) in stmts.iter().enumerate() {
                        self.stmt(&mut builder, stmt, i + 1 == stmts.len())?;
                    }
                    let none = builder.add_const(Const::None);
                    builder.emit(Instr::LoadConst(none));
                    builder.emit(Instr::Return);
                }
                Body::Function(stmts) => {
                    for stmt in stmts {
                        self.stmt(&mut builder, stmt, false)?;
                    }
                    let none = builder.add_const(Const::None);
                    builder.emit(Instr::LoadConst(none));
                    builder.emit(Instr::Return);
                }
                Body::Lambda(expr) => {
                    self.expr(&mut builder, expr)?;
                    builder.emit(Instr::Return);
                }
            }
            Ok(())
        })();
        self.scopes.pop();
        result?;

        let n_cellvars = builder.cellvars.len() as u16;
        let n_freevars = builder.freevars.len() as u16;
        let code = CodeObject {
            name: code_name,
            params: param_descs,
            n_locals,
            n_cellvars,
            n_freevars,
            cell_params,
            instrs: builder.instrs,
            consts: builder.consts,
            lines: builder.lines,
            classes: builder.classes,
        };
        let id = self.codes.len() as u32;
        self.codes.push(code);
        Ok(id)
    }

    // ── statements ──

    fn stmt(
        &mut self,
        b: &mut CodeBuilder,
        stmt: &Stmt,
        is_module_tail: bool,
    ) -> Result<(), SyntaxError> {
        b.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expr(b, expr)?;
                if is_module_tail {
                    b.emit(Instr::SetModuleResult);
                } else {
                    b.emit(Instr::Pop);
                }
            }
            StmtKind::Assign { targets, value } => {
                self.expr(b, value)?;
                for _ in 1..targets.len() {
                    b.emit(Instr::Dup);
                }
                for target in targets {
                    self.store_target(b, target)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(b, target, *op, value)?;
            }
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    self.expr(b, value)?;
                    self.store_target(b, target)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(b, test)?;
                let to_else = b.emit_jump(|t| Instr::PopJumpIfFalse(t));
                for s in body {
                    self.stmt(b, s, false)?;
                }
                if orelse.is_empty() {
                    b.patch_here(to_else);
                } else {
                    let to_end = b.emit_jump(Instr::Jump);
                    b.patch_here(to_else);
                    for s in orelse {
                        self.stmt(b, s, false)?;
                    }
                    b.patch_here(to_end);
                }
            }
            StmtKind::While { test, body } => {
                let start = b.here();
                self.expr(b, test)?;
                let to_end = b.emit_jump(|t| Instr::PopJumpIfFalse(t));
                b.loops.push(Loop {
                    is_for: false,
                    continue_target: start,
                    break_jumps: Vec::new(),
                    block_depth: b.blocks.len(),
                });
                for s in body {
                    self.stmt(b, s, false)?;
                }
                b.emit(Instr::Jump(start));
                b.patch_here(to_end);
                let finished = b.loops.pop().expect("loop stack imbalance");
                for jump in finished.break_jumps {
                    b.patch_here(jump);
                }
            }
            StmtKind::For { target, iter, body } => {
                self.expr(b, iter)?;
                b.emit(Instr::GetIter);
                let loop_head = b.here();
                let exhaust = b.emit_jump(Instr::ForIter);
                b.loops.push(Loop {
                    is_for: true,
                    continue_target: loop_head,
                    break_jumps: Vec::new(),
                    block_depth: b.blocks.len(),
                });
                self.store_target(b, target)?;
                for s in body {
                    self.stmt(b, s, false)?;
                }
                b.emit(Instr::Jump(loop_head));
                b.patch_here(exhaust);
                let finished = b.loops.pop().expect("loop stack imbalance");
                for jump in finished.break_jumps {
                    b.patch_here(jump);
                }
            }
            StmtKind::FuncDef(f) => {
                self.make_function(b, &f.name, &f.params, Body::Function(&f.body))?;
                self.store_name(b, &f.name)?;
            }
            StmtKind::ClassDef(c) => {
                self.class_def(b, c)?;
                self.store_name(b, &c.name)?;
            }
            StmtKind::Return(value) => {
                if b.is_module {
                    return Err(SyntaxError::new("'return' outside function", stmt.line, 0));
                }
                match value {
                    Some(v) => self.expr(b, v)?,
                    None => {
                        let none = b.add_const(Const::None);
                        b.emit(Instr::LoadConst(none));
                    }
                }
                // run pending finally bodies before leaving the frame
                self.unwind_blocks(b, 0)?;
                b.emit(Instr::Return);
            }
            StmtKind::Raise { exc, cause } => match (exc, cause) {
                (None, _) => {
                    b.emit(Instr::Raise { argc: 0 });
                }
                (Some(exc), None) => {
                    self.expr(b, exc)?;
                    b.emit(Instr::Raise { argc: 1 });
                }
                (Some(exc), Some(cause)) => {
                    self.expr(b, exc)?;
                    self.expr(b, cause)?;
                    b.emit(Instr::Raise { argc: 2 });
                }
            },
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                self.try_stmt(b, body, handlers, orelse, finalbody)?;
            }
            StmtKind::Import { names } => {
                for (name, alias) in names {
                    let sid = self.intern(name);
                    b.emit(Instr::Import(sid));
                    self.store_name(b, alias.as_ref().unwrap_or(name))?;
                }
            }
            StmtKind::FromImport { module, names } => {
                let module_sid = self.intern(module);
                for (name, alias) in names {
                    let name_sid = self.intern(name);
                    b.emit(Instr::ImportFrom { module: module_sid, name: name_sid });
                    self.store_name(b, alias.as_ref().unwrap_or(name))?;
                }
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => {}
            StmtKind::Assert { test, msg } => {
                self.expr(b, test)?;
                let ok = b.emit_jump(|t| Instr::PopJumpIfTrue(t));
                let sid = self.intern("AssertionError");
                b.emit(Instr::LoadGlobal(sid));
                match msg {
                    Some(m) => {
                        self.expr(b, m)?;
                        b.emit(Instr::Call(1));
                    }
                    None => b.emit(Instr::Call(0)),
                }
                b.emit(Instr::Raise { argc: 1 });
                b.patch_here(ok);
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.del_target(b, target)?;
                }
            }
            StmtKind::Break => {
                let Some(current) = b.loops.last() else {
                    return Err(SyntaxError::new("'break' outside loop", stmt.line, 0));
                };
                let block_depth = current.block_depth;
                let is_for = current.is_for;
                self.unwind_blocks(b, block_depth)?;
                if is_for {
                    b.emit(Instr::Pop); // discard the iterator
                }
                let jump = b.emit_jump(Instr::Jump);
                b.loops
                    .last_mut()
                    .expect("loop stack imbalance")
                    .break_jumps
                    .push(jump);
            }
            StmtKind::Continue => {
                let Some(current) = b.loops.last() else {
                    return Err(SyntaxError::new("'continue' outside loop", stmt.line, 0));
                };
                let block_depth = current.block_depth;
                let target = current.continue_target;
                self.unwind_blocks(b, block_depth)?;
                b.emit(Instr::Jump(target));
            }
        }
        Ok(())
    }

    /// Emit `PopBlock` (and inline finally bodies) for every block above
    /// `base`, without disturbing the compile-time block stack seen by
    /// surrounding code. Finally bodies are compiled with the unwound blocks
    /// removed so a nested `return` does not run them twice.
    fn unwind_blocks(&mut self, b: &mut CodeBuilder, base: usize) -> Result<(), SyntaxError> {
        let n = b.blocks.len();
        for i in (base..n).rev() {
            b.emit(Instr::PopBlock);
            if let Block::Finally(stmts) = b.blocks[i].clone() {
                let saved = std::mem::take(&mut b.blocks);
                b.blocks = saved[..i].to_vec();
                for s in &stmts {
                    self.stmt(b, s, false)?;
                }
                b.blocks = saved;
            }
        }
        Ok(())
    }

    fn try_stmt(
        &mut self,
        b: &mut CodeBuilder,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<(), SyntaxError> {
        let finally_setup = if finalbody.is_empty() {
            None
        } else {
            let j = b.emit_jump(Instr::SetupFinally);
            b.blocks.push(Block::Finally(finalbody.to_vec()));
            Some(j)
        };

        let except_setup = if handlers.is_empty() {
            None
        } else {
            let j = b.emit_jump(Instr::SetupExcept);
            b.blocks.push(Block::Except);
            Some(j)
        };

        for s in body {
            self.stmt(b, s, false)?;
        }

        let mut end_jumps = Vec::new();
        if let Some(setup) = except_setup {
            b.emit(Instr::PopBlock);
            b.blocks.pop();
            for s in orelse {
                self.stmt(b, s, false)?;
            }
            end_jumps.push(b.emit_jump(Instr::Jump));

            // exception dispatch target: stack holds the raised exception
            b.patch_here(setup);
            let mut next_handler: Option<usize> = None;
            for handler in handlers {
                if let Some(j) = next_handler.take() {
                    b.patch_here(j);
                }
                if let Some(types) = &handler.types {
                    // ExcMatch peeks at the exception below the class value
                    self.expr(b, types)?;
                    b.emit(Instr::ExcMatch);
                    next_handler = Some(b.emit_jump(|t| Instr::PopJumpIfFalse(t)));
                }
                match &handler.name {
                    Some(name) => self.store_name(b, name)?,
                    None => b.emit(Instr::Pop),
                }
                for s in &handler.body {
                    self.stmt(b, s, false)?;
                }
                b.emit(Instr::PopException);
                end_jumps.push(b.emit_jump(Instr::Jump));
            }
            if let Some(j) = next_handler {
                b.patch_here(j);
            }
            // no handler matched: propagate the active exception
            b.emit(Instr::Raise { argc: 0 });
        }

        for j in end_jumps {
            b.patch_here(j);
        }

        if let Some(setup) = finally_setup {
            b.emit(Instr::PopBlock);
            b.blocks.pop();
            // normal-path copy of the finally body
            for s in finalbody {
                self.stmt(b, s, false)?;
            }
            let done = b.emit_jump(Instr::Jump);
            // exception-path copy: the raised exception is on the stack
            b.patch_here(setup);
            for s in finalbody {
                self.stmt(b, s, false)?;
            }
            b.emit(Instr::Raise { argc: 1 });
            b.patch_here(done);
        }
        Ok(())
    }

    fn aug_assign(
        &mut self,
        b: &mut CodeBuilder,
        target: &Target,
        op: BinOp,
        value: &Expr,
    ) -> Result<(), SyntaxError> {
        match target {
            Target::Name(name) => {
                self.load_name(b, name);
                self.expr(b, value)?;
                b.emit(Instr::Binary(op));
                self.store_name(b, name)?;
            }
            Target::Attr { value: obj, name } => {
                self.expr(b, obj)?;
                b.emit(Instr::Dup);
                let sid = self.intern(name);
                b.emit(Instr::LoadAttr(sid));
                self.expr(b, value)?;
                b.emit(Instr::Binary(op));
                b.emit(Instr::Rot2);
                b.emit(Instr::SetAttr(sid));
            }
            Target::Index { value: obj, index } => {
                self.expr(b, obj)?;
                b.emit(Instr::Dup);
                self.expr(b, index)?;
                b.emit(Instr::Dup);
                b.emit(Instr::Rot3);
                b.emit(Instr::Index);
                self.expr(b, value)?;
                b.emit(Instr::Binary(op));
                b.emit(Instr::Rot3);
                b.emit(Instr::StoreIndex);
            }
            Target::Tuple(_) => {
                return Err(SyntaxError::new(
                    "illegal target for augmented assignment",
                    0,
                    0,
                ))
            }
        }
        Ok(())
    }

    fn store_target(&mut self, b: &mut CodeBuilder, target: &Target) -> Result<(), SyntaxError> {
        match target {
            Target::Name(name) => self.store_name(b, name)?,
            Target::Attr { value, name } => {
                self.expr(b, value)?;
                let sid = self.intern(name);
                b.emit(Instr::SetAttr(sid));
            }
            Target::Index { value, index } => {
                self.expr(b, value)?;
                self.expr(b, index)?;
                b.emit(Instr::StoreIndex);
            }
            Target::Tuple(targets) => {
                b.emit(Instr::UnpackSequence(targets.len() as u16));
                for t in targets {
                    self.store_target(b, t)?;
                }
            }
        }
        Ok(())
    }

    fn del_target(&mut self, b: &mut CodeBuilder, target: &Target) -> Result<(), SyntaxError> {
        match target {
            Target::Name(name) => match b.name_loc(name) {
                NameLoc::Local(slot) => b.emit(Instr::DeleteLocal(slot)),
                NameLoc::Global => {
                    let sid = self.intern(name);
                    b.emit(Instr::DeleteGlobal(sid));
                }
                NameLoc::Cell(_) => {
                    return Err(SyntaxError::new(
                        format!("cannot delete variable '{name}' captured by a nested function"),
                        0,
                        0,
                    ))
                }
            },
            Target::Index { value, index } => {
                self.expr(b, value)?;
                self.expr(b, index)?;
                b.emit(Instr::DeleteIndex);
            }
            Target::Attr { .. } => {
                return Err(SyntaxError::new("cannot delete attribute", 0, 0))
            }
            Target::Tuple(targets) => {
                for t in targets {
                    self.del_target(b, t)?;
                }
            }
        }
        Ok(())
    }

    fn load_name(&mut self, b: &mut CodeBuilder, name: &str) {
        match b.name_loc(name) {
            NameLoc::Local(slot) => b.emit(Instr::LoadLocal(slot)),
            NameLoc::Cell(idx) => b.emit(Instr::LoadCell(idx)),
            NameLoc::Global => {
                let sid = self.intern(name);
                b.emit(Instr::LoadGlobal(sid));
            }
        }
    }

    fn store_name(&mut self, b: &mut CodeBuilder, name: &str) -> Result<(), SyntaxError> {
        match b.name_loc(name) {
            NameLoc::Local(slot) => b.emit(Instr::StoreLocal(slot)),
            NameLoc::Cell(idx) => b.emit(Instr::StoreCell(idx)),
            NameLoc::Global => {
                let sid = self.intern(name);
                b.emit(Instr::StoreGlobal(sid));
            }
        }
        Ok(())
    }

    /// Compile a nested function and emit `MakeFunction`.
    fn make_function(
        &mut self,
        b: &mut CodeBuilder,
        name: &str,
        params: &[Param],
        body: Body<'_>,
    ) -> Result<(), SyntaxError> {
        let info = match &body {
            Body::Function(stmts) => analyze_function(params, stmts),
            Body::Lambda(expr) => analyze_lambda(params, expr),
            Body::Module(_) => unreachable!("modules are not nested"),
        };
        // defaults are evaluated in the enclosing scope, in order
        let n_defaults = params.iter().filter(|p| p.default.is_some()).count() as u16;
        for p in params {
            if let Some(d) = &p.default {
                self.expr(b, d)?;
            }
        }
        // captures: resolve each freevar against the enclosing scope chain
        let mut freevars = Vec::new();
        for candidate in info.free_candidates() {
            if self
                .scopes
                .iter()
                .rev()
                .any(|s| s.cell_index(&candidate).is_some())
            {
                freevars.push(candidate);
            } else if info.nonlocals.contains(&candidate) {
                return Err(SyntaxError::new(
                    format!("no binding for nonlocal '{candidate}' found"),
                    0,
                    0,
                ));
            }
        }
        for fv in &freevars {
            let Some(idx) = b.cell_index(fv) else {
                return Err(SyntaxError::new(
                    format!("variable '{fv}' is not visible from the enclosing scope"),
                    0,
                    0,
                ));
            };
            b.emit(Instr::LoadCellRef(idx));
        }
        let n_captures = freevars.len() as u16;
        let code = self.compile_code(name, params, body, Some(info))?;
        b.emit(Instr::MakeFunction { code, n_defaults, n_captures });
        Ok(())
    }

    fn class_def(&mut self, b: &mut CodeBuilder, c: &ClassDef) -> Result<(), SyntaxError> {
        // field defaults first, then method function objects
        let mut n_defaults = 0u16;
        for field in &c.fields {
            if let Some(d) = &field.default {
                self.expr(b, d)?;
                n_defaults += 1;
            }
        }
        for m in &c.methods {
            self.make_function(b, &m.name, &m.params, Body::Function(&m.body))?;
        }
        let desc = ClassDesc {
            name: self.intern(&c.name),
            fields: c
                .fields
                .iter()
                .map(|f| (self.intern(&f.name), f.default.is_some()))
                .collect(),
            method_names: c.methods.iter().map(|m| self.intern(&m.name)).collect(),
            dataclass: c.dataclass,
            frozen: c.frozen,
        };
        let desc_id = b.classes.len() as u16;
        b.classes.push(desc);
        b.emit(Instr::BuildClass {
            desc: desc_id,
            n_methods: c.methods.len() as u16,
            n_defaults,
        });
        Ok(())
    }

    // ── expressions ──

    fn expr(&mut self, b: &mut CodeBuilder, expr: &Expr) -> Result<(), SyntaxError> {
        b.set_line(expr.line);
        match &expr.kind {
            ExprKind::NoneLit => {
                let id = b.add_const(Const::None);
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::Bool(v) => {
                let id = b.add_const(Const::Bool(*v));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::Int(n) => {
                let id = b.add_const(Const::Int(*n));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::BigInt(n) => {
                let id = b.add_const(Const::BigInt(n.clone()));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::Float(f) => {
                let id = b.add_const(Const::Float(*f));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::Str(s) => {
                let sid = self.intern(s);
                let id = b.add_const(Const::Str(sid));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::Bytes(bytes) => {
                let id = b.add_const(Const::Bytes(bytes.clone()));
                b.emit(Instr::LoadConst(id));
            }
            ExprKind::FString(parts) => {
                for part in parts {
                    match part {
                        FStringPart::Text(t) => {
                            let sid = self.intern(t);
                            let id = b.add_const(Const::Str(sid));
                            b.emit(Instr::LoadConst(id));
                        }
                        FStringPart::Expr { expr, repr } => {
                            self.expr(b, expr)?;
                            b.emit(Instr::FormatValue { repr: *repr });
                        }
                    }
                }
                b.emit(Instr::BuildString(parts.len() as u16));
            }
            ExprKind::Name(name) => self.load_name(b, name),
            ExprKind::Tuple(items) => {
                for item in items {
                    self.expr(b, item)?;
                }
                b.emit(Instr::BuildTuple(items.len() as u16));
            }
            ExprKind::List(items) => {
                for item in items {
                    self.expr(b, item)?;
                }
                b.emit(Instr::BuildList(items.len() as u16));
            }
            ExprKind::Set(items) => {
                for item in items {
                    self.expr(b, item)?;
                }
                b.emit(Instr::BuildSet(items.len() as u16));
            }
            ExprKind::Dict(items) => {
                for (k, v) in items {
                    self.expr(b, k)?;
                    self.expr(b, v)?;
                }
                b.emit(Instr::BuildDict(items.len() as u16));
            }
            ExprKind::ListComp { elt, clauses } => {
                b.emit(Instr::BuildList(0));
                self.comprehension(b, clauses, 0, &mut |this, b, depth| {
                    this.expr(b, elt)?;
                    b.emit(Instr::ListAppend(depth + 1));
                    Ok(())
                })?;
            }
            ExprKind::SetComp { elt, clauses } => {
                b.emit(Instr::BuildSet(0));
                self.comprehension(b, clauses, 0, &mut |this, b, depth| {
                    this.expr(b, elt)?;
                    b.emit(Instr::SetAdd(depth + 1));
                    Ok(())
                })?;
            }
            ExprKind::DictComp { key, value, clauses } => {
                b.emit(Instr::BuildDict(0));
                self.comprehension(b, clauses, 0, &mut |this, b, depth| {
                    this.expr(b, key)?;
                    this.expr(b, value)?;
                    // key and value are popped first, so the accumulator
                    // sits at the same relative depth as for lists
                    b.emit(Instr::DictInsert(depth + 1));
                    Ok(())
                })?;
            }
            ExprKind::Lambda { params, body } => {
                self.make_function(b, "<lambda>", params, Body::Lambda(body))?;
            }
            ExprKind::Cond { test, body, orelse } => {
                self.expr(b, test)?;
                let to_else = b.emit_jump(|t| Instr::PopJumpIfFalse(t));
                self.expr(b, body)?;
                let to_end = b.emit_jump(Instr::Jump);
                b.patch_here(to_else);
                self.expr(b, orelse)?;
                b.patch_here(to_end);
            }
            ExprKind::BoolOp { and, values } => {
                let mut jumps = Vec::new();
                for (i, value) in values.iter().enumerate() {
                    self.expr(b, value)?;
                    if i + 1 < values.len() {
                        let j = if *and {
                            b.emit_jump(|t| Instr::JumpIfFalseOrPop(t))
                        } else {
                            b.emit_jump(|t| Instr::JumpIfTrueOrPop(t))
                        };
                        jumps.push(j);
                    }
                }
                for j in jumps {
                    b.patch_here(j);
                }
            }
            ExprKind::Unary { op, operand } => {
                self.expr(b, operand)?;
                b.emit(Instr::Unary(*op));
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(b, left)?;
                self.expr(b, right)?;
                b.emit(Instr::Binary(*op));
            }
            ExprKind::Compare { left, ops, comparators } => {
                self.expr(b, left)?;
                if ops.len() == 1 {
                    self.expr(b, &comparators[0])?;
                    b.emit(Instr::Compare(ops[0]));
                } else {
                    let mut fail_jumps = Vec::new();
                    for i in 0..ops.len() - 1 {
                        self.expr(b, &comparators[i])?;
                        b.emit(Instr::Dup);
                        b.emit(Instr::Rot3);
                        b.emit(Instr::Compare(ops[i]));
                        fail_jumps.push(b.emit_jump(|t| Instr::JumpIfFalseOrPop(t)));
                    }
                    self.expr(b, &comparators[ops.len() - 1])?;
                    b.emit(Instr::Compare(ops[ops.len() - 1]));
                    let done = b.emit_jump(Instr::Jump);
                    for j in fail_jumps {
                        b.patch_here(j);
                    }
                    b.emit(Instr::Rot2);
                    b.emit(Instr::Pop);
                    b.patch_here(done);
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                self.expr(b, func)?;
                for arg in args {
                    self.expr(b, arg)?;
                }
                if kwargs.is_empty() {
                    b.emit(Instr::Call(args.len() as u16));
                } else {
                    let mut names = Vec::new();
                    for (name, value) in kwargs {
                        names.push(self.intern(name));
                        self.expr(b, value)?;
                    }
                    let names_const = b.add_const(Const::KwNames(names));
                    b.emit(Instr::CallKw {
                        argc: (args.len() + kwargs.len()) as u16,
                        names: names_const,
                    });
                }
            }
            ExprKind::Attr { value, name } => {
                self.expr(b, value)?;
                let sid = self.intern(name);
                b.emit(Instr::LoadAttr(sid));
            }
            ExprKind::Index { value, index } => {
                self.expr(b, value)?;
                self.expr(b, index)?;
                b.emit(Instr::Index);
            }
            ExprKind::Slice { lower, upper, step } => {
                let parts: [&Option<Box<Expr>>; 2] = [lower, upper];
                for part in parts {
                    match part {
                        Some(e) => self.expr(b, e)?,
                        None => {
                            let id = b.add_const(Const::None);
                            b.emit(Instr::LoadConst(id));
                        }
                    }
                }
                match step {
                    Some(e) => {
                        self.expr(b, e)?;
                        b.emit(Instr::BuildSlice(3));
                    }
                    None => b.emit(Instr::BuildSlice(2)),
                }
            }
            ExprKind::Await(inner) => {
                self.expr(b, inner)?;
                b.emit(Instr::Await);
            }
        }
        Ok(())
    }

    /// Emit nested comprehension loops; `depth` counts active iterators.
    fn comprehension(
        &mut self,
        b: &mut CodeBuilder,
        clauses: &[CompClause],
        depth: u16,
        emit_elt: &mut dyn FnMut(&mut Self, &mut CodeBuilder, u16) -> Result<(), SyntaxError>,
    ) -> Result<(), SyntaxError> {
        let clause = &clauses[0];
        self.expr(b, &clause.iter)?;
        b.emit(Instr::GetIter);
        let head = b.here();
        let exhaust = b.emit_jump(Instr::ForIter);
        self.store_target(b, &clause.target)?;
        for cond in &clause.ifs {
            self.expr(b, cond)?;
            b.emit(Instr::PopJumpIfFalse(head));
        }
        if clauses.len() > 1 {
            self.comprehension(b, &clauses[1..], depth + 1, emit_elt)?;
        } else {
            emit_elt(self, b, depth + 1)?;
        }
        b.emit(Instr::Jump(head));
        b.patch_here(exhaust);
        Ok(())
    }
}

struct CodeBuilder {
    instrs: Vec<Instr>,
    consts: Vec<Const>,
    lines: Vec<(u32, u32)>,
    classes: Vec<ClassDesc>,
    cur_line: u32,
    is_module: bool,
    locals: HashMap<String, u16>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    globals_decl: HashSet<String>,
    nonlocals_decl: HashSet<String>,
    blocks: Vec<Block>,
    loops: Vec<Loop>,
}

impl CodeBuilder {
    fn emit(&mut self, instr: Instr) {
        let idx = self.instrs.len() as u32;
        match self.lines.last() {
            Some(&(_, line)) if line == self.cur_line => {}
            _ => self.lines.push((idx, self.cur_line)),
        }
        self.instrs.push(instr);
    }

    fn set_line(&mut self, line: u32) {
        if line != 0 {
            self.cur_line = line;
        }
    }

    fn here(&self) -> u32 {
        self.instrs.len() as u32
    }

    fn add_const(&mut self, c: Const) -> ConstId {
        // reuse simple constants to keep pools small
        if let Some(i) = self.consts.iter().position(|existing| existing == &c) {
            return i as u32;
        }
        let id = self.consts.len() as u32;
        self.consts.push(c);
        id
    }

    fn emit_jump(&mut self, make: impl Fn(u32) -> Instr) -> usize {
        let idx = self.instrs.len();
        self.emit(make(u32::MAX));
        idx
    }

    fn patch_here(&mut self, idx: usize) {
        let target = self.instrs.len() as u32;
        set_jump_target(&mut self.instrs[idx], target);
    }

    fn name_loc(&self, name: &str) -> NameLoc {
        if self.is_module || self.globals_decl.contains(name) {
            return NameLoc::Global;
        }
        if self.nonlocals_decl.contains(name) {
            if let Some(i) = self.freevars.iter().position(|n| n == name) {
                return NameLoc::Cell((self.cellvars.len() + i) as u16);
            }
        }
        if let Some(i) = self.cellvars.iter().position(|n| n == name) {
            return NameLoc::Cell(i as u16);
        }
        if let Some(&slot) = self.locals.get(name) {
            return NameLoc::Local(slot);
        }
        if let Some(i) = self.freevars.iter().position(|n| n == name) {
            return NameLoc::Cell((self.cellvars.len() + i) as u16);
        }
        NameLoc::Global
    }

    /// Cell index for closure capture (`LoadCellRef`).
    fn cell_index(&self, name: &str) -> Option<u16> {
        if let Some(i) = self.cellvars.iter().position(|n| n == name) {
            return Some(i as u16);
        }
        self.freevars
            .iter()
            .position(|n| n == name)
            .map(|i| (self.cellvars.len() + i) as u16)
    }
}

fn set_jump_target(instr: &mut Instr, target: u32) {
    match instr {
        Instr::Jump(t)
        | Instr::PopJumpIfFalse(t)
        | Instr::PopJumpIfTrue(t)
        | Instr::JumpIfFalseOrPop(t)
        | Instr::JumpIfTrueOrPop(t)
        | Instr::ForIter(t)
        | Instr::SetupExcept(t)
        | Instr::SetupFinally(t) => *t = target,
        other => unreachable!("not a jump instruction: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::token::lex;

    fn compile_src(src: &str) -> Program {
        let stmts = parse(lex(src).unwrap()).unwrap();
        compile_module(&stmts, src, "test.py", &[], &[], None).unwrap()
    }

    #[test]
    fn module_tail_expression_sets_result() {
        let program = compile_src("x = 1\nx + 1");
        let top = program.code(program.top_code);
        assert!(top.instrs.contains(&Instr::SetModuleResult));
    }

    #[test]
    fn function_gets_own_code_object() {
        let program = compile_src("def f(a, b):\n    return a + b\n");
        assert_eq!(program.codes.len(), 2);
        let f = &program.codes[0];
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.n_locals, 2);
    }

    #[test]
    fn closure_captures_become_cells() {
        let program = compile_src(
            "def outer():\n    x = 1\n    def inner():\n        return x\n    return inner\n",
        );
        let outer = program
            .codes
            .iter()
            .find(|c| program.string(c.name) == "outer")
            .unwrap();
        assert_eq!(outer.n_cellvars, 1);
        let inner = program
            .codes
            .iter()
            .find(|c| program.string(c.name) == "inner")
            .unwrap();
        assert_eq!(inner.n_freevars, 1);
    }

    #[test]
    fn jumps_are_patched() {
        let program = compile_src("if a:\n    b = 1\nelse:\n    b = 2\n");
        let top = program.code(program.top_code);
        for instr in &top.instrs {
            if let Instr::PopJumpIfFalse(t) | Instr::Jump(t) = instr {
                assert_ne!(*t, u32::MAX, "unpatched jump");
            }
        }
    }

    #[test]
    fn dataclass_desc_recorded() {
        let program = compile_src(
            "@dataclass(frozen=True)\nclass P:\n    x: int\n    y: int = 2\n",
        );
        let top = program.code(program.top_code);
        assert_eq!(top.classes.len(), 1);
        let desc = &top.classes[0];
        assert!(desc.frozen);
        assert_eq!(desc.fields.len(), 2);
    }

    #[test]
    fn line_table_tracks_statements() {
        let program = compile_src("x = 1\ny = 2\n");
        let top = program.code(program.top_code);
        assert!(top.lines.len() >= 2);
    }
}
