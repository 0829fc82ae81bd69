//! Call activation records.

use crate::heap::HeapId;
use crate::values::Value;

/// A try/except/finally handler registered by `SetupExcept`/`SetupFinally`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Handler {
    /// Instruction index to jump to on an exception.
    pub target: u32,
    /// Value-stack height to restore before entering the handler.
    pub stack_height: usize,
    /// Finally handlers re-raise after running; except handlers dispatch.
    pub is_finally: bool,
    /// Active-exception depth to restore (`Frame::exc_stack`).
    pub exc_depth: usize,
}

/// One activation on the explicit call stack.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Global code index (merged across REPL feeds).
    pub code: u32,
    pub pc: usize,
    pub stack: Vec<Value>,
    pub locals: Vec<Value>,
    /// Own cells first, then captured cells.
    pub cells: Vec<HeapId>,
    pub handlers: Vec<Handler>,
    /// Exceptions being handled (for bare `raise`), innermost last.
    pub exc_stack: Vec<HeapId>,
    /// Frame name for tracebacks (`<module>` or the function name).
    pub name: String,
}

impl Frame {
    pub fn new(code: u32, n_locals: usize, name: String) -> Self {
        Self {
            code,
            pc: 0,
            stack: Vec::new(),
            locals: vec![Value::Undefined; n_locals],
            cells: Vec::new(),
            handlers: Vec::new(),
            exc_stack: Vec::new(),
            name,
        }
    }
}
