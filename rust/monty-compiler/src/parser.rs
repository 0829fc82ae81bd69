//! Recursive-descent parser for the Monty subset grammar.

use crate::ast::*;
use crate::code::{BinOp, CmpOp, UnOp};
use crate::error::SyntaxError;
use crate::token::{lex, FStrPart, Kw, Tok, Token};

/// Parse a token stream into a statement list.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser { toks: tokens, pos: 0 };
    parser.file()
}

/// Lex and parse a single expression (used for f-string interpolations).
fn parse_expr_str(src: &str, line: u32) -> Result<Expr, SyntaxError> {
    let tokens = lex(src).map_err(|mut e| {
        e.line = line;
        e
    })?;
    let mut parser = Parser { toks: tokens, pos: 0 };
    let mut expr = parser.testlist()?;
    if !matches!(parser.peek(), Tok::Newline | Tok::Eof) {
        return Err(SyntaxError::new("invalid expression in f-string", line, 0));
    }
    set_line(&mut expr, line);
    Ok(expr)
}

fn set_line(expr: &mut Expr, line: u32) {
    // f-string sub-expressions are re-lexed from line 1; pin them to the
    // line of the enclosing literal
    expr.line = line;
}

struct Parser {
    toks: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn peek_at(&self, n: usize) -> &Tok {
        &self.toks[(self.pos + n).min(self.toks.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos.min(self.toks.len() - 1)].line
    }

    fn col(&self) -> u32 {
        self.toks[self.pos.min(self.toks.len() - 1)].col
    }

    fn bump(&mut self) -> Tok {
        let tok = self.toks[self.pos.min(self.toks.len() - 1)].tok.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), SyntaxError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(n) => {
                self.bump();
                Ok(n)
            }
            _ => Err(self.err(format!("expected {what}"))),
        }
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line(), self.col())
    }

    // ── statements ──

    fn file(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Tok::Newline) {}
            if self.at(&Tok::Eof) {
                break;
            }
            stmts.extend(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        match self.peek() {
            Tok::Kw(Kw::If) => Ok(vec![self.if_stmt()?]),
            Tok::Kw(Kw::While) => Ok(vec![self.while_stmt()?]),
            Tok::Kw(Kw::For) => Ok(vec![self.for_stmt()?]),
            Tok::Kw(Kw::Try) => Ok(vec![self.try_stmt()?]),
            Tok::Kw(Kw::Def) => Ok(vec![self.func_def(false)?]),
            Tok::Kw(Kw::Async) => {
                self.bump();
                if !self.at(&Tok::Kw(Kw::Def)) {
                    return Err(self.err("expected 'def' after 'async'"));
                }
                Ok(vec![self.func_def(true)?])
            }
            Tok::Kw(Kw::Class) => Ok(vec![self.class_def(None)?]),
            Tok::At => {
                let deco = self.decorator()?;
                match self.peek() {
                    Tok::Kw(Kw::Class) => Ok(vec![self.class_def(Some(deco))?]),
                    _ => Err(self.err("decorators are only supported on dataclass classes")),
                }
            }
            _ => self.simple_line(),
        }
    }

    fn simple_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut stmts = vec![self.small_stmt()?];
        while self.eat(&Tok::Semi) {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.small_stmt()?);
        }
        if !self.at(&Tok::Eof) {
            self.expect(&Tok::Newline, "end of statement")?;
        }
        Ok(stmts)
    }

    fn small_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Kw(Kw::Return) => {
                self.bump();
                let value = if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof) {
                    None
                } else {
                    Some(self.testlist()?)
                };
                Ok(Stmt::new(StmtKind::Return(value), line))
            }
            Tok::Kw(Kw::Pass) => {
                self.bump();
                Ok(Stmt::new(StmtKind::Pass, line))
            }
            Tok::Kw(Kw::Break) => {
                self.bump();
                Ok(Stmt::new(StmtKind::Break, line))
            }
            Tok::Kw(Kw::Continue) => {
                self.bump();
                Ok(Stmt::new(StmtKind::Continue, line))
            }
            Tok::Kw(Kw::Raise) => {
                self.bump();
                if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof) {
                    return Ok(Stmt::new(StmtKind::Raise { exc: None, cause: None }, line));
                }
                let exc = self.test()?;
                let cause = if self.eat(&Tok::Kw(Kw::From)) {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(Stmt::new(
                    StmtKind::Raise { exc: Some(exc), cause },
                    line,
                ))
            }
            Tok::Kw(Kw::Import) => {
                self.bump();
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name("module name")?;
                    if self.at(&Tok::Dot) {
                        return Err(self.err("dotted imports are not supported"));
                    }
                    let alias = if self.eat(&Tok::Kw(Kw::As)) {
                        Some(self.expect_name("import alias")?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                Ok(Stmt::new(StmtKind::Import { names }, line))
            }
            Tok::Kw(Kw::From) => {
                self.bump();
                let module = self.expect_name("module name")?;
                self.expect(&Tok::Kw(Kw::Import), "'import'")?;
                if self.at(&Tok::Star) {
                    return Err(self.err("'from ... import *' is not supported"));
                }
                let parens = self.eat(&Tok::LParen);
                let mut names = Vec::new();
                loop {
                    let name = self.expect_name("imported name")?;
                    let alias = if self.eat(&Tok::Kw(Kw::As)) {
                        Some(self.expect_name("import alias")?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                if parens {
                    self.expect(&Tok::RParen, "')'")?;
                }
                Ok(Stmt::new(StmtKind::FromImport { module, names }, line))
            }
            Tok::Kw(Kw::Global) => {
                self.bump();
                let names = self.name_list()?;
                Ok(Stmt::new(StmtKind::Global(names), line))
            }
            Tok::Kw(Kw::Nonlocal) => {
                self.bump();
                let names = self.name_list()?;
                Ok(Stmt::new(StmtKind::Nonlocal(names), line))
            }
            Tok::Kw(Kw::Assert) => {
                self.bump();
                let test = self.test()?;
                let msg = if self.eat(&Tok::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                Ok(Stmt::new(StmtKind::Assert { test, msg }, line))
            }
            Tok::Kw(Kw::Del) => {
                self.bump();
                let mut targets = Vec::new();
                loop {
                    let expr = self.or_expr()?;
                    targets.push(self.to_target(expr)?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                Ok(Stmt::new(StmtKind::Del(targets), line))
            }
            _ => self.expr_or_assign(line),
        }
    }

    fn name_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut names = vec![self.expect_name("name")?];
        while self.eat(&Tok::Comma) {
            names.push(self.expect_name("name")?);
        }
        Ok(names)
    }

    fn expr_or_assign(&mut self, line: u32) -> Result<Stmt, SyntaxError> {
        let first = self.testlist()?;
        match self.peek().clone() {
            Tok::Assign => {
                let mut targets = vec![self.to_target(first)?];
                let mut value;
                loop {
                    self.bump();
                    value = self.testlist()?;
                    if self.at(&Tok::Assign) {
                        targets.push(self.to_target(value.clone())?);
                    } else {
                        break;
                    }
                }
                Ok(Stmt::new(StmtKind::Assign { targets, value }, line))
            }
            Tok::AugAssign(op) => {
                self.bump();
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.err("illegal target for augmented assignment"));
                }
                let value = self.testlist()?;
                Ok(Stmt::new(StmtKind::AugAssign { target, op, value }, line))
            }
            Tok::Colon => {
                self.bump();
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple(_)) {
                    return Err(self.err("only single targets can be annotated"));
                }
                self.test()?; // annotation, discarded
                let value = if self.eat(&Tok::Assign) {
                    Some(self.testlist()?)
                } else {
                    None
                };
                Ok(Stmt::new(StmtKind::AnnAssign { target, value }, line))
            }
            _ => Ok(Stmt::new(StmtKind::Expr(first), line)),
        }
    }

    fn to_target(&self, expr: Expr) -> Result<Target, SyntaxError> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Attr { value, name } => Ok(Target::Attr { value: *value, name }),
            ExprKind::Index { value, index } => {
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(SyntaxError::new(
                        "slice assignment is not supported",
                        expr.line,
                        0,
                    ));
                }
                Ok(Target::Index { value: *value, index: *index })
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let targets = items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Target::Tuple(targets))
            }
            _ => Err(SyntaxError::new("cannot assign to expression", expr.line, 0)),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        if self.eat(&Tok::Newline) {
            self.expect(&Tok::Indent, "an indented block")?;
            let mut stmts = Vec::new();
            loop {
                while self.eat(&Tok::Newline) {}
                if self.eat(&Tok::Dedent) {
                    break;
                }
                if self.at(&Tok::Eof) {
                    break;
                }
                stmts.extend(self.statement()?);
            }
            if stmts.is_empty() {
                return Err(self.err("expected an indented block"));
            }
            Ok(stmts)
        } else {
            self.simple_line()
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump(); // if / elif
        let test = self.test()?;
        self.expect(&Tok::Colon, "':'")?;
        let body = self.block()?;
        let orelse = if self.at(&Tok::Kw(Kw::Elif)) {
            vec![self.if_stmt()?]
        } else if self.eat(&Tok::Kw(Kw::Else)) {
            self.expect(&Tok::Colon, "':'")?;
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, line))
    }

    fn while_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump();
        let test = self.test()?;
        self.expect(&Tok::Colon, "':'")?;
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::While { test, body }, line))
    }

    fn for_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump();
        let target = self.target_list()?;
        self.expect(&Tok::Kw(Kw::In), "'in'")?;
        let iter = self.testlist()?;
        self.expect(&Tok::Colon, "':'")?;
        let body = self.block()?;
        Ok(Stmt::new(StmtKind::For { target, iter, body }, line))
    }

    /// Assignment-target list, parsed below the comparison level so a
    /// following `in` keyword is left for the caller.
    fn target_list(&mut self) -> Result<Target, SyntaxError> {
        let mut exprs = vec![self.bitor()?];
        let mut trailing = false;
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::Kw(Kw::In)) || self.at(&Tok::Assign) {
                trailing = true;
                break;
            }
            exprs.push(self.bitor()?);
        }
        if exprs.len() == 1 && !trailing {
            let expr = exprs.pop().unwrap();
            self.to_target(expr)
        } else {
            let targets = exprs
                .into_iter()
                .map(|e| self.to_target(e))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Target::Tuple(targets))
        }
    }

    fn try_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump();
        self.expect(&Tok::Colon, "':'")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at(&Tok::Kw(Kw::Except)) {
            self.bump();
            let types = if self.at(&Tok::Colon) {
                None
            } else {
                Some(self.test()?)
            };
            let name = if self.eat(&Tok::Kw(Kw::As)) {
                Some(self.expect_name("exception name")?)
            } else {
                None
            };
            self.expect(&Tok::Colon, "':'")?;
            let handler_body = self.block()?;
            handlers.push(ExceptHandler { types, name, body: handler_body });
        }
        let orelse = if self.eat(&Tok::Kw(Kw::Else)) {
            self.expect(&Tok::Colon, "':'")?;
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(&Tok::Kw(Kw::Finally)) {
            self.expect(&Tok::Colon, "':'")?;
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.err("expected 'except' or 'finally' block"));
        }
        if !orelse.is_empty() && handlers.is_empty() {
            return Err(self.err("'else' requires at least one 'except' block"));
        }
        Ok(Stmt::new(
            StmtKind::Try { body, handlers, orelse, finalbody },
            line,
        ))
    }

    fn func_def(&mut self, is_async: bool) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump(); // def
        let name = self.expect_name("function name")?;
        self.expect(&Tok::LParen, "'('")?;
        let params = self.params(&Tok::RParen)?;
        self.expect(&Tok::RParen, "')'")?;
        if self.eat(&Tok::Arrow) {
            self.test()?; // return annotation, discarded
        }
        self.expect(&Tok::Colon, "':'")?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::FuncDef(FuncDef { name, params, body, is_async, line }),
            line,
        ))
    }

    fn params(&mut self, end: &Tok) -> Result<Vec<Param>, SyntaxError> {
        let mut params: Vec<Param> = Vec::new();
        let mut saw_default = false;
        while !self.at(end) {
            if self.at(&Tok::Star) || self.at(&Tok::DoubleStar) {
                return Err(self.err("star parameters are not supported"));
            }
            let name = self.expect_name("parameter name")?;
            if self.eat(&Tok::Colon) {
                self.test()?; // annotation, discarded
            }
            let default = if self.eat(&Tok::Assign) {
                saw_default = true;
                Some(self.test()?)
            } else {
                if saw_default {
                    return Err(self.err("parameter without a default follows parameter with a default"));
                }
                None
            };
            if params.iter().any(|p| p.name == name) {
                return Err(self.err(format!("duplicate parameter '{name}'")));
            }
            params.push(Param { name, default });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn decorator(&mut self) -> Result<DataclassDecorator, SyntaxError> {
        self.bump(); // '@'
        let mut name = self.expect_name("decorator name")?;
        while self.eat(&Tok::Dot) {
            name = self.expect_name("decorator name")?;
        }
        if name != "dataclass" {
            return Err(self.err(format!("unsupported decorator '@{name}'")));
        }
        let mut frozen = false;
        if self.eat(&Tok::LParen) {
            while !self.at(&Tok::RParen) {
                let key = self.expect_name("decorator keyword")?;
                self.expect(&Tok::Assign, "'='")?;
                let value = match self.peek() {
                    Tok::Kw(Kw::True) => true,
                    Tok::Kw(Kw::False) => false,
                    _ => return Err(self.err("dataclass options must be boolean literals")),
                };
                self.bump();
                if key == "frozen" {
                    frozen = value;
                }
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        self.expect(&Tok::Newline, "end of decorator line")?;
        Ok(DataclassDecorator { frozen })
    }

    fn class_def(&mut self, deco: Option<DataclassDecorator>) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        self.bump(); // class
        let name = self.expect_name("class name")?;
        if self.eat(&Tok::LParen) {
            if !self.at(&Tok::RParen) {
                return Err(self.err("base classes are not supported"));
            }
            self.bump();
        }
        self.expect(&Tok::Colon, "':'")?;
        self.expect(&Tok::Newline, "newline")?;
        self.expect(&Tok::Indent, "an indented class body")?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            while self.eat(&Tok::Newline) {}
            if self.eat(&Tok::Dedent) || self.at(&Tok::Eof) {
                break;
            }
            match self.peek().clone() {
                Tok::Kw(Kw::Pass) => {
                    self.bump();
                    self.expect(&Tok::Newline, "end of statement")?;
                }
                Tok::Str(_) => {
                    // docstring
                    self.bump();
                    self.expect(&Tok::Newline, "end of statement")?;
                }
                Tok::Kw(Kw::Def) => {
                    if let StmtKind::FuncDef(f) = self.func_def(false)?.kind {
                        methods.push(f);
                    }
                }
                Tok::Kw(Kw::Async) => {
                    self.bump();
                    if !self.at(&Tok::Kw(Kw::Def)) {
                        return Err(self.err("expected 'def' after 'async'"));
                    }
                    if let StmtKind::FuncDef(f) = self.func_def(true)?.kind {
                        methods.push(f);
                    }
                }
                Tok::Name(field_name) => {
                    self.bump();
                    self.expect(&Tok::Colon, "':' (field annotation)")?;
                    self.test()?; // annotation, discarded
                    let default = if self.eat(&Tok::Assign) {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    self.expect(&Tok::Newline, "end of statement")?;
                    fields.push(FieldDef { name: field_name, default });
                }
                _ => {
                    return Err(self.err(
                        "class bodies may only contain field annotations and methods",
                    ))
                }
            }
        }
        let (dataclass, frozen) = match deco {
            Some(d) => (true, d.frozen),
            None => (false, false),
        };
        Ok(Stmt::new(
            StmtKind::ClassDef(ClassDef { name, fields, methods, dataclass, frozen, line }),
            line,
        ))
    }

    // ── expressions ──

    /// `test (',' test)* [',']` — a tuple when more than one element or a
    /// trailing comma is present.
    fn testlist(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.test()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.testlist_end() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line))
    }

    fn testlist_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Eof
                | Tok::Semi
                | Tok::Assign
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::Colon
        )
    }

    fn test(&mut self) -> Result<Expr, SyntaxError> {
        if self.at(&Tok::Kw(Kw::Lambda)) {
            return self.lambda();
        }
        let line = self.line();
        let body = self.or_expr()?;
        if self.eat(&Tok::Kw(Kw::If)) {
            let test = self.or_expr()?;
            self.expect(&Tok::Kw(Kw::Else), "'else'")?;
            let orelse = self.test()?;
            return Ok(Expr::new(
                ExprKind::Cond {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        self.bump(); // lambda
        let params = self.params(&Tok::Colon)?;
        self.expect(&Tok::Colon, "':'")?;
        let body = self.test()?;
        Ok(Expr::new(
            ExprKind::Lambda { params, body: Box::new(body) },
            line,
        ))
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.and_expr()?;
        if !self.at(&Tok::Kw(Kw::Or)) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::Kw(Kw::Or)) {
            values.push(self.and_expr()?);
        }
        Ok(Expr::new(ExprKind::BoolOp { and: false, values }, line))
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let first = self.not_expr()?;
        if !self.at(&Tok::Kw(Kw::And)) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::Kw(Kw::And)) {
            values.push(self.not_expr()?);
        }
        Ok(Expr::new(ExprKind::BoolOp { and: true, values }, line))
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        if self.eat(&Tok::Kw(Kw::Not)) {
            let operand = self.not_expr()?;
            return Ok(Expr::new(
                ExprKind::Unary { op: UnOp::Not, operand: Box::new(operand) },
                line,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let left = self.bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Lt => CmpOp::Lt,
                Tok::Gt => CmpOp::Gt,
                Tok::Le => CmpOp::Le,
                Tok::Ge => CmpOp::Ge,
                Tok::EqEq => CmpOp::Eq,
                Tok::Ne => CmpOp::Ne,
                Tok::Kw(Kw::In) => CmpOp::In,
                Tok::Kw(Kw::Not) if self.peek_at(1) == &Tok::Kw(Kw::In) => {
                    self.bump();
                    CmpOp::NotIn
                }
                Tok::Kw(Kw::Is) => {
                    if self.peek_at(1) == &Tok::Kw(Kw::Not) {
                        self.bump();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.bump();
            ops.push(op);
            comparators.push(self.bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare { left: Box::new(left), ops, comparators },
            line,
        ))
    }

    fn bitor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.bitxor()?;
        while self.at(&Tok::Pipe) {
            let line = self.line();
            self.bump();
            let right = self.bitxor()?;
            left = binary(BinOp::BitOr, left, right, line);
        }
        Ok(left)
    }

    fn bitxor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.bitand()?;
        while self.at(&Tok::Caret) {
            let line = self.line();
            self.bump();
            let right = self.bitand()?;
            left = binary(BinOp::BitXor, left, right, line);
        }
        Ok(left)
    }

    fn bitand(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.shift()?;
        while self.at(&Tok::Amp) {
            let line = self.line();
            self.bump();
            let right = self.shift()?;
            left = binary(BinOp::BitAnd, left, right, line);
        }
        Ok(left)
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.arith()?;
        loop {
            let op = match self.peek() {
                Tok::Shl => BinOp::Shl,
                Tok::Shr => BinOp::Shr,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.arith()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.term()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.factor()?;
            left = binary(op, left, right, line);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Minus => Some(UnOp::Neg),
            Tok::Plus => Some(UnOp::Pos),
            Tok::Tilde => Some(UnOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.factor()?;
            return Ok(Expr::new(
                ExprKind::Unary { op, operand: Box::new(operand) },
                line,
            ));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let base = if self.eat(&Tok::Kw(Kw::Await)) {
            let inner = self.postfix()?;
            Expr::new(ExprKind::Await(Box::new(inner)), line)
        } else {
            self.postfix()?
        };
        if self.eat(&Tok::DoubleStar) {
            let exp = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exp, line));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    let line = self.line();
                    self.bump();
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::new(
                        ExprKind::Call { func: Box::new(expr), args, kwargs },
                        line,
                    );
                }
                Tok::LBracket => {
                    let line = self.line();
                    self.bump();
                    let index = self.subscript()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Index { value: Box::new(expr), index: Box::new(index) },
                        line,
                    );
                }
                Tok::Dot => {
                    let line = self.line();
                    self.bump();
                    let name = self.expect_name("attribute name")?;
                    expr = Expr::new(
                        ExprKind::Attr { value: Box::new(expr), name },
                        line,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at(&Tok::RParen) {
            if self.at(&Tok::Star) || self.at(&Tok::DoubleStar) {
                return Err(self.err("star arguments are not supported"));
            }
            // keyword argument: Name '='
            if let Tok::Name(name) = self.peek().clone() {
                if self.peek_at(1) == &Tok::Assign {
                    self.bump();
                    self.bump();
                    let value = self.test()?;
                    if kwargs.iter().any(|(k, _)| k == &name) {
                        return Err(self.err(format!("keyword argument repeated: {name}")));
                    }
                    kwargs.push((name, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                    continue;
                }
            }
            if !kwargs.is_empty() {
                return Err(self.err("positional argument follows keyword argument"));
            }
            let arg = self.test()?;
            // a bare generator expression argument: f(x for x in xs)
            if self.at(&Tok::Kw(Kw::For)) && args.is_empty() && kwargs.is_empty() {
                let clauses = self.comp_clauses()?;
                let line = arg.line;
                args.push(Expr::new(
                    ExprKind::ListComp { elt: Box::new(arg), clauses },
                    line,
                ));
                break;
            }
            args.push(arg);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        let lower = if self.at(&Tok::Colon) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        if !self.eat(&Tok::Colon) {
            return match lower {
                Some(index) => Ok(*index),
                None => Err(self.err("expected an index or a slice")),
            };
        }
        let upper = if self.at(&Tok::Colon) || self.at(&Tok::RBracket) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat(&Tok::Colon) {
            if self.at(&Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, line))
    }

    fn comp_clauses(&mut self) -> Result<Vec<CompClause>, SyntaxError> {
        let mut clauses = Vec::new();
        while self.at(&Tok::Kw(Kw::For)) {
            self.bump();
            let target = self.target_list()?;
            self.expect(&Tok::Kw(Kw::In), "'in'")?;
            let iter = self.or_expr()?;
            let mut ifs = Vec::new();
            while self.eat(&Tok::Kw(Kw::If)) {
                ifs.push(self.or_expr()?);
            }
            clauses.push(CompClause { target, iter, ifs });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Kw(Kw::None) => {
                self.bump();
                Ok(Expr::new(ExprKind::NoneLit, line))
            }
            Tok::Kw(Kw::True) => {
                self.bump();
                Ok(Expr::new(ExprKind::Bool(true), line))
            }
            Tok::Kw(Kw::False) => {
                self.bump();
                Ok(Expr::new(ExprKind::Bool(false), line))
            }
            Tok::Int(n) => {
                self.bump();
                Ok(Expr::new(ExprKind::Int(n), line))
            }
            Tok::BigInt(n) => {
                self.bump();
                Ok(Expr::new(ExprKind::BigInt(n), line))
            }
            Tok::Float(f) => {
                self.bump();
                Ok(Expr::new(ExprKind::Float(f), line))
            }
            Tok::Str(s) => {
                self.bump();
                // adjacent string literal concatenation
                let mut text = s;
                while let Tok::Str(next) = self.peek() {
                    text.push_str(next);
                    self.bump();
                }
                Ok(Expr::new(ExprKind::Str(text), line))
            }
            Tok::Bytes(b) => {
                self.bump();
                Ok(Expr::new(ExprKind::Bytes(b), line))
            }
            Tok::FString(parts) => {
                self.bump();
                let mut ast_parts = Vec::new();
                for part in parts {
                    match part {
                        FStrPart::Text(t) => ast_parts.push(FStringPart::Text(t)),
                        FStrPart::Expr { src, repr, line } => {
                            let expr = parse_expr_str(&src, line)?;
                            ast_parts.push(FStringPart::Expr { expr, repr });
                        }
                    }
                }
                Ok(Expr::new(ExprKind::FString(ast_parts), line))
            }
            Tok::Name(name) => {
                self.bump();
                Ok(Expr::new(ExprKind::Name(name), line))
            }
            Tok::Kw(Kw::Lambda) => self.lambda(),
            Tok::LParen => {
                self.bump();
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), line));
                }
                let first = self.test()?;
                if self.at(&Tok::Kw(Kw::For)) {
                    let clauses = self.comp_clauses()?;
                    self.expect(&Tok::RParen, "')'")?;
                    return Ok(Expr::new(
                        ExprKind::ListComp { elt: Box::new(first), clauses },
                        line,
                    ));
                }
                if self.at(&Tok::Comma) {
                    let mut items = vec![first];
                    while self.eat(&Tok::Comma) {
                        if self.at(&Tok::RParen) {
                            break;
                        }
                        items.push(self.test()?);
                    }
                    self.expect(&Tok::RParen, "')'")?;
                    return Ok(Expr::new(ExprKind::Tuple(items), line));
                }
                self.expect(&Tok::RParen, "')'")?;
                Ok(first)
            }
            Tok::LBracket => {
                self.bump();
                if self.eat(&Tok::RBracket) {
                    return Ok(Expr::new(ExprKind::List(Vec::new()), line));
                }
                let first = self.test()?;
                if self.at(&Tok::Kw(Kw::For)) {
                    let clauses = self.comp_clauses()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    return Ok(Expr::new(
                        ExprKind::ListComp { elt: Box::new(first), clauses },
                        line,
                    ));
                }
                let mut items = vec![first];
                while self.eat(&Tok::Comma) {
                    if self.at(&Tok::RBracket) {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(Expr::new(ExprKind::List(items), line))
            }
            Tok::LBrace => {
                self.bump();
                if self.eat(&Tok::RBrace) {
                    return Ok(Expr::new(ExprKind::Dict(Vec::new()), line));
                }
                let first = self.test()?;
                if self.eat(&Tok::Colon) {
                    let value = self.test()?;
                    if self.at(&Tok::Kw(Kw::For)) {
                        let clauses = self.comp_clauses()?;
                        self.expect(&Tok::RBrace, "'}'")?;
                        return Ok(Expr::new(
                            ExprKind::DictComp {
                                key: Box::new(first),
                                value: Box::new(value),
                                clauses,
                            },
                            line,
                        ));
                    }
                    let mut items = vec![(first, value)];
                    while self.eat(&Tok::Comma) {
                        if self.at(&Tok::RBrace) {
                            break;
                        }
                        let k = self.test()?;
                        self.expect(&Tok::Colon, "':'")?;
                        let v = self.test()?;
                        items.push((k, v));
                    }
                    self.expect(&Tok::RBrace, "'}'")?;
                    return Ok(Expr::new(ExprKind::Dict(items), line));
                }
                if self.at(&Tok::Kw(Kw::For)) {
                    let clauses = self.comp_clauses()?;
                    self.expect(&Tok::RBrace, "'}'")?;
                    return Ok(Expr::new(
                        ExprKind::SetComp { elt: Box::new(first), clauses },
                        line,
                    ));
                }
                let mut items = vec![first];
                while self.eat(&Tok::Comma) {
                    if self.at(&Tok::RBrace) {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect(&Tok::RBrace, "'}'")?;
                Ok(Expr::new(ExprKind::Set(items), line))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }
}

struct DataclassDecorator {
    frozen: bool,
}

fn binary(op: BinOp, left: Expr, right: Expr, line: u32) -> Expr {
    Expr::new(
        ExprKind::Binary { op, left: Box::new(left), right: Box::new(right) },
        line,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::lex;

    fn parse_src(src: &str) -> Vec<Stmt> {
        parse(lex(src).unwrap()).unwrap()
    }

    #[test]
    fn parse_precedence() {
        let stmts = parse_src("1 + 2 * 3");
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        let ExprKind::Binary { op: BinOp::Add, right, .. } = &e.kind else {
            panic!("expected addition at the top")
        };
        assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn parse_chained_assignment() {
        let stmts = parse_src("a = b = 1");
        let StmtKind::Assign { targets, .. } = &stmts[0].kind else { panic!() };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn parse_if_elif_else() {
        let stmts = parse_src("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &stmts[0].kind else { panic!() };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn parse_function_with_defaults() {
        let stmts = parse_src("def f(a, b=2):\n    return a + b\n");
        let StmtKind::FuncDef(f) = &stmts[0].kind else { panic!() };
        assert_eq!(f.params.len(), 2);
        assert!(f.params[1].default.is_some());
    }

    #[test]
    fn parse_comprehension() {
        let stmts = parse_src("[x * 2 for x in xs if x]");
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        let ExprKind::ListComp { clauses, .. } = &e.kind else { panic!() };
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].ifs.len(), 1);
    }

    #[test]
    fn parse_dataclass_decorator() {
        let stmts = parse_src(
            "@dataclass(frozen=True)\nclass Point:\n    x: int\n    y: int = 0\n",
        );
        let StmtKind::ClassDef(c) = &stmts[0].kind else { panic!() };
        assert!(c.dataclass);
        assert!(c.frozen);
        assert_eq!(c.fields.len(), 2);
    }

    #[test]
    fn parse_try_except_finally() {
        let stmts = parse_src(
            "try:\n    x = 1\nexcept ValueError as e:\n    x = 2\nfinally:\n    x = 3\n",
        );
        let StmtKind::Try { handlers, finalbody, .. } = &stmts[0].kind else { panic!() };
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert!(!finalbody.is_empty());
    }

    #[test]
    fn parse_await_call() {
        let stmts = parse_src("await foo(1, 2)");
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!() };
        assert!(matches!(e.kind, ExprKind::Await(_)));
    }

    #[test]
    fn parse_rejects_star_args() {
        let toks = lex("f(*a)").unwrap();
        assert!(parse(toks).is_err());
    }

    #[test]
    fn parse_semicolon_statements() {
        let stmts = parse_src("x = 1; y = 2; x + y");
        assert_eq!(stmts.len(), 3);
    }
}
