//! Compile-time errors.

use thiserror::Error;

/// A syntax error with source position and offending line.
#[derive(Debug, Clone, Error)]
#[error("{message} ({script_name}, line {line})")]
pub struct SyntaxError {
    pub message: String,
    pub script_name: String,
    pub line: u32,
    pub column: u32,
    /// The offending source line, when available.
    pub snippet: Option<String>,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            message: message.into(),
            script_name: String::new(),
            line,
            column,
            snippet: None,
        }
    }

    pub(crate) fn attach_source(mut self, script_name: &str, source: &str) -> Self {
        self.script_name = script_name.to_string();
        if self.line > 0 {
            self.snippet = source
                .lines()
                .nth(self.line as usize - 1)
                .map(|l| l.trim_end().to_string());
        }
        self
    }

    /// Multi-line presentation matching the interpreter's traceback style.
    pub fn display_full(&self) -> String {
        let mut out = format!(
            "  File \"{}\", line {}\n",
            if self.script_name.is_empty() { "<unknown>" } else { &self.script_name },
            self.line
        );
        if let Some(snippet) = &self.snippet {
            out.push_str(&format!("    {}\n", snippet.trim_start()));
        }
        out.push_str(&format!("SyntaxError: {}", self.message));
        out
    }
}
