//! Lexical scope analysis: bound names, cell variables, and closures.
//!
//! The code generator asks, per function: which names are local slots, which
//! become cells (captured by nested functions), and which are free (captured
//! from an enclosing function). Module level is name-keyed and needs no
//! analysis.

use crate::ast::*;
use std::collections::{BTreeSet, HashSet};

/// A nested function found while walking a scope body.
enum Nested<'a> {
    Def(&'a FuncDef),
    Lambda { params: &'a [Param], body: &'a Expr },
}

/// Per-function scope facts.
pub struct ScopeInfo {
    /// Names bound in this scope, parameters first, in first-binding order.
    pub bound: Vec<String>,
    pub bound_set: HashSet<String>,
    pub globals: HashSet<String>,
    pub nonlocals: HashSet<String>,
    /// Names referenced (read or written) directly in this scope.
    pub referenced: HashSet<String>,
    /// Names nested functions (transitively) need from this scope or above.
    pub child_needs: HashSet<String>,
}

impl ScopeInfo {
    /// Names this scope must receive from an enclosing function scope,
    /// sorted for deterministic capture order.
    pub fn free_candidates(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        for name in self.referenced.iter().chain(self.child_needs.iter()) {
            if !self.bound_set.contains(name) && !self.globals.contains(name) {
                set.insert(name.clone());
            }
        }
        for name in &self.nonlocals {
            set.insert(name.clone());
        }
        set.into_iter().collect()
    }

    /// Bound names captured by nested functions, in binding order.
    pub fn cellvars(&self) -> Vec<String> {
        self.bound
            .iter()
            .filter(|n| self.child_needs.contains(*n))
            .cloned()
            .collect()
    }
}

/// Analyse one function scope.
pub fn analyze_function(params: &[Param], body: &[Stmt]) -> ScopeInfo {
    let mut walker = Walker::default();
    for param in params {
        walker.bind(&param.name);
    }
    walker.stmts(body);
    walker.finish()
}

/// Analyse a lambda scope.
pub fn analyze_lambda(params: &[Param], body: &Expr) -> ScopeInfo {
    let mut walker = Walker::default();
    for param in params {
        walker.bind(&param.name);
    }
    walker.expr(body);
    walker.finish()
}

/// Names a nested function requires from enclosing scopes.
fn requirements(nested: &Nested<'_>) -> HashSet<String> {
    let info = match nested {
        Nested::Def(f) => analyze_function(&f.params, &f.body),
        Nested::Lambda { params, body } => analyze_lambda(params, body),
    };
    info.free_candidates().into_iter().collect()
}

#[derive(Default)]
struct Walker<'a> {
    bound: Vec<String>,
    bound_set: HashSet<String>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
    referenced: HashSet<String>,
    nested: Vec<Nested<'a>>,
}

impl<'a> Walker<'a> {
    fn finish(self) -> ScopeInfo {
        let mut child_needs = HashSet::new();
        for nested in &self.nested {
            child_needs.extend(requirements(nested));
        }
        ScopeInfo {
            bound: self.bound,
            bound_set: self.bound_set,
            globals: self.globals,
            nonlocals: self.nonlocals,
            referenced: self.referenced,
            child_needs,
        }
    }

    fn bind(&mut self, name: &str) {
        if self.globals.contains(name) || self.nonlocals.contains(name) {
            return;
        }
        if self.bound_set.insert(name.to_string()) {
            self.bound.push(name.to_string());
        }
    }

    fn target(&mut self, target: &'a Target) {
        match target {
            Target::Name(name) => self.bind(name),
            Target::Attr { value, .. } => self.expr(value),
            Target::Index { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            Target::Tuple(items) => {
                for t in items {
                    self.target(t);
                }
            }
        }
    }

    fn stmts(&mut self, stmts: &'a [Stmt]) {
        // declarations first: `global x` affects the whole scope
        for stmt in stmts {
            self.collect_decls(stmt);
        }
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn collect_decls(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Global(names) => {
                for n in names {
                    self.globals.insert(n.clone());
                }
            }
            StmtKind::Nonlocal(names) => {
                for n in names {
                    self.nonlocals.insert(n.clone());
                }
            }
            StmtKind::If { body, orelse, .. } => {
                for s in body.iter().chain(orelse) {
                    self.collect_decls(s);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                for s in body {
                    self.collect_decls(s);
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                for s in body.iter().chain(orelse).chain(finalbody) {
                    self.collect_decls(s);
                }
                for h in handlers {
                    for s in &h.body {
                        self.collect_decls(s);
                    }
                }
            }
            _ => {}
        }
    }

    fn stmt(&mut self, stmt: &'a Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                self.expr(value);
                for t in targets {
                    self.target(t);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(value);
                // an augmented target is also a read
                if let Target::Name(name) = target {
                    self.referenced.insert(name.clone());
                }
                self.target(target);
            }
            StmtKind::AnnAssign { target, value } => {
                if let Some(v) = value {
                    self.expr(v);
                    self.target(target);
                } else if let Target::Name(name) = target {
                    // a bare `x: int` declares the local without binding it
                    self.bind(name);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                for s in body.iter().chain(orelse) {
                    self.stmt(s);
                }
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                for s in body {
                    self.stmt(s);
                }
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter);
                self.target(target);
                for s in body {
                    self.stmt(s);
                }
            }
            StmtKind::FuncDef(f) => {
                for p in &f.params {
                    if let Some(d) = &p.default {
                        self.expr(d);
                    }
                }
                self.bind(&f.name);
                self.nested.push(Nested::Def(f));
            }
            StmtKind::ClassDef(c) => {
                for field in &c.fields {
                    if let Some(d) = &field.default {
                        self.expr(d);
                    }
                }
                for m in &c.methods {
                    for p in &m.params {
                        if let Some(d) = &p.default {
                            self.expr(d);
                        }
                    }
                    self.nested.push(Nested::Def(m));
                }
                self.bind(&c.name);
            }
            StmtKind::Return(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            StmtKind::Raise { exc, cause } => {
                if let Some(e) = exc {
                    self.expr(e);
                }
                if let Some(c) = cause {
                    self.expr(c);
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                for s in body.iter().chain(orelse).chain(finalbody) {
                    self.stmt(s);
                }
                for h in handlers {
                    if let Some(t) = &h.types {
                        self.expr(t);
                    }
                    if let Some(name) = &h.name {
                        self.bind(name);
                    }
                    for s in &h.body {
                        self.stmt(s);
                    }
                }
            }
            StmtKind::Import { names } => {
                for (name, alias) in names {
                    self.bind(alias.as_ref().unwrap_or(name));
                }
            }
            StmtKind::FromImport { names, .. } => {
                for (name, alias) in names {
                    self.bind(alias.as_ref().unwrap_or(name));
                }
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                if let Some(m) = msg {
                    self.expr(m);
                }
            }
            StmtKind::Del(targets) => {
                for t in targets {
                    self.target(t);
                }
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        }
    }

    fn expr(&mut self, expr: &'a Expr) {
        match &expr.kind {
            ExprKind::Name(name) => {
                self.referenced.insert(name.clone());
            }
            ExprKind::NoneLit
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::BigInt(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bytes(_) => {}
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Expr { expr, .. } = part {
                        self.expr(expr);
                    }
                }
            }
            ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Set(items) => {
                for e in items {
                    self.expr(e);
                }
            }
            ExprKind::Dict(items) => {
                for (k, v) in items {
                    self.expr(k);
                    self.expr(v);
                }
            }
            ExprKind::ListComp { elt, clauses } | ExprKind::SetComp { elt, clauses } => {
                self.comp_clauses(clauses);
                self.expr(elt);
            }
            ExprKind::DictComp { key, value, clauses } => {
                self.comp_clauses(clauses);
                self.expr(key);
                self.expr(value);
            }
            ExprKind::Lambda { params, body } => {
                for p in params {
                    if let Some(d) = &p.default {
                        self.expr(d);
                    }
                }
                self.nested.push(Nested::Lambda { params, body });
            }
            ExprKind::Cond { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::BoolOp { values, .. } => {
                for v in values {
                    self.expr(v);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Compare { left, comparators, .. } => {
                self.expr(left);
                for c in comparators {
                    self.expr(c);
                }
            }
            ExprKind::Call { func, args, kwargs } => {
                self.expr(func);
                for a in args {
                    self.expr(a);
                }
                for (_, v) in kwargs {
                    self.expr(v);
                }
            }
            ExprKind::Attr { value, .. } => self.expr(value),
            ExprKind::Index { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            ExprKind::Await(inner) => self.expr(inner),
        }
    }

    /// Comprehensions are compiled inline, so their targets bind in the
    /// enclosing scope.
    fn comp_clauses(&mut self, clauses: &'a [CompClause]) {
        for clause in clauses {
            self.expr(&clause.iter);
            self.target(&clause.target);
            for cond in &clause.ifs {
                self.expr(cond);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::token::lex;

    fn body(src: &str) -> Vec<Stmt> {
        parse(lex(src).unwrap()).unwrap()
    }

    #[test]
    fn params_are_bound_first() {
        let stmts = body("y = x + 1");
        let params = vec![Param { name: "x".into(), default: None }];
        let info = analyze_function(&params, &stmts);
        assert_eq!(info.bound, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn global_declaration_suppresses_binding() {
        let stmts = body("global count\ncount = count + 1");
        let info = analyze_function(&[], &stmts);
        assert!(info.bound.is_empty());
        assert!(info.globals.contains("count"));
    }

    #[test]
    fn captured_name_becomes_cellvar() {
        let stmts = body("x = 1\ndef inner():\n    return x\n");
        let info = analyze_function(&[], &stmts);
        assert_eq!(info.cellvars(), vec!["x".to_string()]);
    }

    #[test]
    fn free_candidates_from_nested_use() {
        let stmts = body("def inner():\n    return outer_var\n");
        let info = analyze_function(&[], &stmts);
        assert!(info.free_candidates().contains(&"outer_var".to_string()));
    }
}
