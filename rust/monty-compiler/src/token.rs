//! Tokens and the indentation-tracking lexer.

use crate::code::BinOp;
use crate::error::SyntaxError;
use num_bigint::BigInt;

/// Reserved words recognised by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
}

fn keyword(name: &str) -> Option<Kw> {
    Some(match name {
        "False" => Kw::False,
        "None" => Kw::None,
        "True" => Kw::True,
        "and" => Kw::And,
        "as" => Kw::As,
        "assert" => Kw::Assert,
        "async" => Kw::Async,
        "await" => Kw::Await,
        "break" => Kw::Break,
        "class" => Kw::Class,
        "continue" => Kw::Continue,
        "def" => Kw::Def,
        "del" => Kw::Del,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "except" => Kw::Except,
        "finally" => Kw::Finally,
        "for" => Kw::For,
        "from" => Kw::From,
        "global" => Kw::Global,
        "if" => Kw::If,
        "import" => Kw::Import,
        "in" => Kw::In,
        "is" => Kw::Is,
        "lambda" => Kw::Lambda,
        "nonlocal" => Kw::Nonlocal,
        "not" => Kw::Not,
        "or" => Kw::Or,
        "pass" => Kw::Pass,
        "raise" => Kw::Raise,
        "return" => Kw::Return,
        "try" => Kw::Try,
        "while" => Kw::While,
        _ => return None,
    })
}

/// One piece of an f-string: literal text or an interpolated expression
/// (kept as source text and re-parsed by the parser).
#[derive(Debug, Clone, PartialEq)]
pub enum FStrPart {
    Text(String),
    Expr { src: String, repr: bool, line: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Kw(Kw),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    FString(Vec<FStrPart>),

    Newline,
    Indent,
    Dedent,
    Eof,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Dot,
    Arrow,
    At,
    Assign,
    AugAssign(BinOp),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub col: u32,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    paren_depth: usize,
    indent_stack: Vec<usize>,
    out: Vec<Token>,
}

/// Tokenise source into a flat token list ending with `Eof`.
pub fn lex(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        paren_depth: 0,
        indent_stack: vec![0],
        out: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.out)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn peek3(&self) -> Option<char> {
        self.chars.get(self.pos + 2).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn push(&mut self, tok: Tok, line: u32, col: u32) {
        self.out.push(Token { tok, line, col });
    }

    fn err(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.line, self.col)
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        let mut at_line_start = true;
        loop {
            if at_line_start && self.paren_depth == 0 {
                match self.handle_indentation()? {
                    LineStart::Eof => break,
                    LineStart::Blank => continue,
                    LineStart::Code => at_line_start = false,
                }
            }
            // skip inline whitespace
            while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
                self.bump();
            }
            let (line, col) = (self.line, self.col);
            let Some(c) = self.peek() else { break };
            match c {
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                '\n' => {
                    self.bump();
                    if self.paren_depth == 0 {
                        if self.last_is_code() {
                            self.push(Tok::Newline, line, col);
                        }
                        at_line_start = true;
                    }
                }
                '\\' if self.peek2() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                c if c.is_ascii_alphabetic() || c == '_' => self.name_or_string()?,
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek2().is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                '"' | '\'' => {
                    let tok = self.string_literal(StrPrefix::default())?;
                    self.push(tok, line, col);
                }
                _ => self.punctuation()?,
            }
        }
        if self.last_is_code() {
            let (line, col) = (self.line, self.col);
            self.push(Tok::Newline, line, col);
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let (line, col) = (self.line, self.col);
            self.push(Tok::Dedent, line, col);
        }
        let (line, col) = (self.line, self.col);
        self.push(Tok::Eof, line, col);
        Ok(())
    }

    /// Whether the previous token is real code (suppresses empty Newlines).
    fn last_is_code(&self) -> bool {
        !matches!(
            self.out.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn handle_indentation(&mut self) -> Result<LineStart, SyntaxError> {
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    self.bump();
                }
                Some('\t') => {
                    width = (width / 8 + 1) * 8;
                    self.bump();
                }
                Some('\r') => {
                    self.bump();
                }
                _ => break,
            }
        }
        match self.peek() {
            None => return Ok(LineStart::Eof),
            Some('\n') => {
                self.bump();
                return Ok(LineStart::Blank);
            }
            Some('#') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
                return Ok(LineStart::Blank);
            }
            _ => {}
        }
        let current = *self.indent_stack.last().unwrap_or(&0);
        let (line, col) = (self.line, self.col);
        if width > current {
            self.indent_stack.push(width);
            self.push(Tok::Indent, line, col);
        } else if width < current {
            while self.indent_stack.len() > 1 && *self.indent_stack.last().unwrap() > width {
                self.indent_stack.pop();
                self.push(Tok::Dedent, line, col);
            }
            if *self.indent_stack.last().unwrap() != width {
                return Err(self.err("unindent does not match any outer indentation level"));
            }
        }
        Ok(LineStart::Code)
    }

    fn name_or_string(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);
        let mut name = String::new();
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            name.push(self.bump().unwrap());
        }
        // string prefixes: f, b, r and two-letter combinations
        if matches!(self.peek(), Some('"') | Some('\'')) {
            if let Some(prefix) = StrPrefix::parse(&name) {
                let tok = self.string_literal(prefix)?;
                self.push(tok, line, col);
                return Ok(());
            }
        }
        match keyword(&name) {
            Some(kw) => self.push(Tok::Kw(kw), line, col),
            None => self.push(Tok::Name(name), line, col),
        }
        Ok(())
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);
        let mut text = String::new();
        if self.peek() == Some('0')
            && matches!(
                self.peek2(),
                Some('x') | Some('X') | Some('o') | Some('O') | Some('b') | Some('B')
            )
        {
            self.bump();
            let radix = match self.bump().unwrap() {
                'x' | 'X' => 16,
                'o' | 'O' => 8,
                _ => 2,
            };
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                let c = self.bump().unwrap();
                if c != '_' {
                    text.push(c);
                }
            }
            if text.is_empty() {
                return Err(self.err("invalid integer literal"));
            }
            let tok = match i64::from_str_radix(&text, radix) {
                Ok(n) => Tok::Int(n),
                Err(_) => match BigInt::parse_bytes(text.as_bytes(), radix) {
                    Some(n) => Tok::BigInt(n),
                    None => return Err(self.err("invalid integer literal")),
                },
            };
            self.push(tok, line, col);
            return Ok(());
        }

        let mut is_float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            let c = self.bump().unwrap();
            if c != '_' {
                text.push(c);
            }
        }
        if self.peek() == Some('.') && self.peek2() != Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                let c = self.bump().unwrap();
                if c != '_' {
                    text.push(c);
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E'))
            && (self.peek2().is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek2(), Some('+') | Some('-'))
                    && self.peek3().is_some_and(|c| c.is_ascii_digit())))
        {
            is_float = true;
            text.push('e');
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                text.push(self.bump().unwrap());
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                let c = self.bump().unwrap();
                if c != '_' {
                    text.push(c);
                }
            }
        }
        let tok = if is_float {
            match text.parse::<f64>() {
                Ok(f) => Tok::Float(f),
                Err(_) => return Err(self.err("invalid float literal")),
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => Tok::Int(n),
                Err(_) => match BigInt::parse_bytes(text.as_bytes(), 10) {
                    Some(n) => Tok::BigInt(n),
                    None => return Err(self.err("invalid integer literal")),
                },
            }
        };
        self.push(tok, line, col);
        Ok(())
    }

    /// Scan a quoted literal. The opening quote is at the current position.
    fn string_literal(&mut self, prefix: StrPrefix) -> Result<Tok, SyntaxError> {
        let start_line = self.line;
        let quote = self.bump().unwrap();
        let triple = self.peek() == Some(quote) && self.peek2() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut raw = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.err("unterminated string literal"));
            };
            if c == '\\' && !prefix.raw {
                // keep the escape for later processing, but consume both chars
                // so an escaped quote does not terminate the scan
                raw.push(self.bump().unwrap());
                match self.bump() {
                    Some(e) => raw.push(e),
                    None => return Err(self.err("unterminated string literal")),
                }
                continue;
            }
            if c == quote {
                if triple {
                    if self.peek2() == Some(quote) && self.peek3() == Some(quote) {
                        self.bump();
                        self.bump();
                        self.bump();
                        break;
                    }
                    raw.push(self.bump().unwrap());
                } else {
                    self.bump();
                    break;
                }
            } else if c == '\n' && !triple {
                return Err(self.err("unterminated string literal"));
            } else {
                raw.push(self.bump().unwrap());
            }
        }
        if prefix.fstring {
            let parts = self.split_fstring(&raw, start_line)?;
            return Ok(Tok::FString(parts));
        }
        let text = if prefix.raw { raw } else { unescape(&raw, start_line)? };
        if prefix.bytes {
            let mut bytes = Vec::with_capacity(text.len());
            for c in text.chars() {
                if (c as u32) > 0xff {
                    return Err(SyntaxError::new(
                        "bytes can only contain ASCII literal characters",
                        start_line,
                        0,
                    ));
                }
                bytes.push(c as u8);
            }
            Ok(Tok::Bytes(bytes))
        } else {
            Ok(Tok::Str(text))
        }
    }

    /// Split raw f-string content into text and expression parts.
    fn split_fstring(&self, raw: &str, line: u32) -> Result<Vec<FStrPart>, SyntaxError> {
        let chars: Vec<char> = raw.chars().collect();
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '{' {
                if chars.get(i + 1) == Some(&'{') {
                    text.push('{');
                    i += 2;
                    continue;
                }
                if !text.is_empty() {
                    parts.push(FStrPart::Text(unescape(&text, line)?));
                    text.clear();
                }
                // scan the expression until the matching close brace
                let mut depth = 0usize;
                let mut expr = String::new();
                let mut repr = false;
                i += 1;
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err(SyntaxError::new(
                            "f-string: expecting '}'",
                            line,
                            0,
                        ));
                    };
                    match c {
                        '{' | '[' | '(' => depth += 1,
                        '}' if depth == 0 => {
                            i += 1;
                            break;
                        }
                        '}' | ']' | ')' => depth = depth.saturating_sub(1),
                        '!' if depth == 0 && chars.get(i + 1) == Some(&'r') && chars.get(i + 2) == Some(&'}') => {
                            repr = true;
                            i += 3;
                            break;
                        }
                        ':' if depth == 0 => {
                            return Err(SyntaxError::new(
                                "f-string format specifiers are not supported",
                                line,
                                0,
                            ));
                        }
                        _ => {}
                    }
                    expr.push(c);
                    i += 1;
                }
                if expr.trim().is_empty() {
                    return Err(SyntaxError::new(
                        "f-string: empty expression not allowed",
                        line,
                        0,
                    ));
                }
                parts.push(FStrPart::Expr { src: expr, repr, line });
                continue;
            }
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    text.push('}');
                    i += 2;
                    continue;
                }
                return Err(SyntaxError::new("f-string: single '}' is not allowed", line, 0));
            }
            text.push(c);
            i += 1;
        }
        if !text.is_empty() {
            parts.push(FStrPart::Text(unescape(&text, line)?));
        }
        Ok(parts)
    }

    fn punctuation(&mut self) -> Result<(), SyntaxError> {
        let (line, col) = (self.line, self.col);
        let c = self.bump().unwrap();
        let next = self.peek();
        let tok = match (c, next) {
            ('*', Some('*')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Tok::AugAssign(BinOp::Pow)
                } else {
                    Tok::DoubleStar
                }
            }
            ('/', Some('/')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Tok::AugAssign(BinOp::FloorDiv)
                } else {
                    Tok::DoubleSlash
                }
            }
            ('<', Some('<')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Tok::AugAssign(BinOp::Shl)
                } else {
                    Tok::Shl
                }
            }
            ('>', Some('>')) => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Tok::AugAssign(BinOp::Shr)
                } else {
                    Tok::Shr
                }
            }
            ('<', Some('=')) => {
                self.bump();
                Tok::Le
            }
            ('>', Some('=')) => {
                self.bump();
                Tok::Ge
            }
            ('=', Some('=')) => {
                self.bump();
                Tok::EqEq
            }
            ('!', Some('=')) => {
                self.bump();
                Tok::Ne
            }
            ('-', Some('>')) => {
                self.bump();
                Tok::Arrow
            }
            ('+', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::Add)
            }
            ('-', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::Sub)
            }
            ('*', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::Mul)
            }
            ('/', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::Div)
            }
            ('%', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::Mod)
            }
            ('&', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::BitAnd)
            }
            ('|', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::BitOr)
            }
            ('^', Some('=')) => {
                self.bump();
                Tok::AugAssign(BinOp::BitXor)
            }
            ('(', _) => {
                self.paren_depth += 1;
                Tok::LParen
            }
            (')', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RParen
            }
            ('[', _) => {
                self.paren_depth += 1;
                Tok::LBracket
            }
            (']', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBracket
            }
            ('{', _) => {
                self.paren_depth += 1;
                Tok::LBrace
            }
            ('}', _) => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBrace
            }
            (',', _) => Tok::Comma,
            (':', _) => Tok::Colon,
            (';', _) => Tok::Semi,
            ('.', _) => Tok::Dot,
            ('@', _) => Tok::At,
            ('=', _) => Tok::Assign,
            ('+', _) => Tok::Plus,
            ('-', _) => Tok::Minus,
            ('*', _) => Tok::Star,
            ('/', _) => Tok::Slash,
            ('%', _) => Tok::Percent,
            ('&', _) => Tok::Amp,
            ('|', _) => Tok::Pipe,
            ('^', _) => Tok::Caret,
            ('~', _) => Tok::Tilde,
            ('<', _) => Tok::Lt,
            ('>', _) => Tok::Gt,
            other => {
                return Err(SyntaxError::new(
                    format!("invalid character {:?}", other.0),
                    line,
                    col,
                ))
            }
        };
        self.push(tok, line, col);
        Ok(())
    }
}

enum LineStart {
    Eof,
    Blank,
    Code,
}

#[derive(Debug, Default, Clone, Copy)]
struct StrPrefix {
    raw: bool,
    bytes: bool,
    fstring: bool,
}

impl StrPrefix {
    fn parse(name: &str) -> Option<StrPrefix> {
        let mut prefix = StrPrefix::default();
        if name.len() > 2 {
            return None;
        }
        for c in name.chars() {
            match c.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'b' if !prefix.bytes && !prefix.fstring => prefix.bytes = true,
                'f' if !prefix.fstring && !prefix.bytes => prefix.fstring = true,
                _ => return None,
            }
        }
        Some(prefix)
    }
}

/// Process backslash escapes. Unknown escapes keep the backslash, matching
/// the parent language.
fn unescape(s: &str, line: u32) -> Result<String, SyntaxError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\n') => {}
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(SyntaxError::new("truncated \\x escape", line, 0));
                };
                let code = u32::from_str_radix(&format!("{hi}{lo}"), 16)
                    .map_err(|_| SyntaxError::new("invalid \\x escape", line, 0))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some('u') => {
                let mut code = String::new();
                for _ in 0..4 {
                    match chars.next() {
                        Some(c) => code.push(c),
                        None => return Err(SyntaxError::new("truncated \\u escape", line, 0)),
                    }
                }
                let code = u32::from_str_radix(&code, 16)
                    .map_err(|_| SyntaxError::new("invalid \\u escape", line, 0))?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        lex(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn lex_simple_expression() {
        assert_eq!(
            kinds("1 + 2"),
            vec![Tok::Int(1), Tok::Plus, Tok::Int(2), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn lex_indentation() {
        let toks = kinds("if x:\n    y = 1\nz");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
    }

    #[test]
    fn lex_underscore_numbers() {
        assert_eq!(kinds("200_000")[0], Tok::Int(200_000));
    }

    #[test]
    fn lex_big_integer_promotes() {
        match &kinds("123456789012345678901234567890")[0] {
            Tok::BigInt(n) => assert_eq!(n.to_string(), "123456789012345678901234567890"),
            other => panic!("expected big int, got {other:?}"),
        }
    }

    #[test]
    fn lex_string_escapes() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Tok::Str("a\nb".to_string()));
    }

    #[test]
    fn lex_fstring_parts() {
        match &kinds("f'v={x!r}!'")[0] {
            Tok::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], FStrPart::Text("v=".to_string()));
                assert!(matches!(&parts[1], FStrPart::Expr { src, repr: true, .. } if src == "x"));
                assert_eq!(parts[2], FStrPart::Text("!".to_string()));
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn lex_newlines_suppressed_in_parens() {
        let toks = kinds("(1,\n 2)");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn lex_unterminated_string_errors() {
        assert!(lex("'abc").is_err());
    }
}
