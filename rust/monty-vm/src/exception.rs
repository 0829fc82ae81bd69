//! Exception taxonomy and runtime error propagation.

use crate::heap::HeapId;

/// Built-in exception kinds. The inheritance tree is fixed by the engine;
/// `except` clauses and `isinstance` match through [`ExcKind::is_subtype`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    KeyError,
    IndexError,
    OsError,
    FileNotFoundError,
    IsADirectoryError,
    NotADirectoryError,
    FileExistsError,
    PermissionError,
    TimeoutError,
    ValueError,
    TypeError,
    AttributeError,
    FrozenInstanceError,
    NameError,
    UnboundLocalError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    MemoryError,
    AssertionError,
    StopIteration,
    ImportError,
    ModuleNotFoundError,
}

impl ExcKind {
    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::KeyError => "KeyError",
            ExcKind::IndexError => "IndexError",
            ExcKind::OsError => "OSError",
            ExcKind::FileNotFoundError => "FileNotFoundError",
            ExcKind::IsADirectoryError => "IsADirectoryError",
            ExcKind::NotADirectoryError => "NotADirectoryError",
            ExcKind::FileExistsError => "FileExistsError",
            ExcKind::PermissionError => "PermissionError",
            ExcKind::TimeoutError => "TimeoutError",
            ExcKind::ValueError => "ValueError",
            ExcKind::TypeError => "TypeError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::FrozenInstanceError => "FrozenInstanceError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::ImportError => "ImportError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
        }
    }

    /// Parent in the inheritance tree; `None` only for `BaseException`.
    pub fn parent(self) -> Option<ExcKind> {
        Some(match self {
            ExcKind::BaseException => return None,
            ExcKind::Exception => ExcKind::BaseException,
            ExcKind::ArithmeticError
            | ExcKind::LookupError
            | ExcKind::OsError
            | ExcKind::ValueError
            | ExcKind::TypeError
            | ExcKind::AttributeError
            | ExcKind::NameError
            | ExcKind::RuntimeError
            | ExcKind::MemoryError
            | ExcKind::AssertionError
            | ExcKind::StopIteration
            | ExcKind::ImportError => ExcKind::Exception,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::KeyError | ExcKind::IndexError => ExcKind::LookupError,
            ExcKind::FileNotFoundError
            | ExcKind::IsADirectoryError
            | ExcKind::NotADirectoryError
            | ExcKind::FileExistsError
            | ExcKind::PermissionError
            | ExcKind::TimeoutError => ExcKind::OsError,
            ExcKind::FrozenInstanceError => ExcKind::AttributeError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::NotImplementedError | ExcKind::RecursionError => ExcKind::RuntimeError,
            ExcKind::ModuleNotFoundError => ExcKind::ImportError,
        })
    }

    pub fn is_subtype(self, of: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == of {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Look up a built-in exception class by source name.
    pub fn from_name(name: &str) -> Option<ExcKind> {
        Some(match name {
            "BaseException" => ExcKind::BaseException,
            "Exception" => ExcKind::Exception,
            "ArithmeticError" => ExcKind::ArithmeticError,
            "ZeroDivisionError" => ExcKind::ZeroDivisionError,
            "OverflowError" => ExcKind::OverflowError,
            "LookupError" => ExcKind::LookupError,
            "KeyError" => ExcKind::KeyError,
            "IndexError" => ExcKind::IndexError,
            "OSError" => ExcKind::OsError,
            "FileNotFoundError" => ExcKind::FileNotFoundError,
            "IsADirectoryError" => ExcKind::IsADirectoryError,
            "NotADirectoryError" => ExcKind::NotADirectoryError,
            "FileExistsError" => ExcKind::FileExistsError,
            "PermissionError" => ExcKind::PermissionError,
            "TimeoutError" => ExcKind::TimeoutError,
            "ValueError" => ExcKind::ValueError,
            "TypeError" => ExcKind::TypeError,
            "AttributeError" => ExcKind::AttributeError,
            "FrozenInstanceError" => ExcKind::FrozenInstanceError,
            "NameError" => ExcKind::NameError,
            "UnboundLocalError" => ExcKind::UnboundLocalError,
            "RuntimeError" => ExcKind::RuntimeError,
            "NotImplementedError" => ExcKind::NotImplementedError,
            "RecursionError" => ExcKind::RecursionError,
            "MemoryError" => ExcKind::MemoryError,
            "AssertionError" => ExcKind::AssertionError,
            "StopIteration" => ExcKind::StopIteration,
            "ImportError" => ExcKind::ImportError,
            "ModuleNotFoundError" => ExcKind::ModuleNotFoundError,
            _ => return None,
        })
    }
}

/// One rendered traceback frame, captured while unwinding.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub script_name: String,
    pub frame: String,
    pub line: u32,
    pub source_line: Option<String>,
}

/// A resource-limit violation. These bypass script-level handlers so the
/// host is guaranteed forward progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    Memory(String),
    Timeout(String),
    Recursion(String),
}

impl ResourceError {
    pub fn kind(&self) -> ExcKind {
        match self {
            ResourceError::Memory(_) => ExcKind::MemoryError,
            ResourceError::Timeout(_) => ExcKind::TimeoutError,
            ResourceError::Recursion(_) => ExcKind::RecursionError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ResourceError::Memory(m) | ResourceError::Timeout(m) | ResourceError::Recursion(m) => m,
        }
    }
}

/// Internal control-flow error of the dispatch loop.
///
/// `Spec` is an engine-raised exception not yet materialised on the heap;
/// the dispatch loop converts it to `Raise` (allocating the exception
/// object) before handler dispatch.
#[derive(Debug)]
pub(crate) enum RunError {
    Raise { exc: HeapId },
    Spec { kind: ExcKind, message: String },
    Resource(ResourceError),
    Internal(String),
}

impl RunError {
    pub(crate) fn spec(kind: ExcKind, message: impl Into<String>) -> Self {
        RunError::Spec { kind, message: message.into() }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        RunError::Internal(message.into())
    }
}

/// Result type for runtime operations.
pub(crate) type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_through_tree() {
        assert!(ExcKind::ZeroDivisionError.is_subtype(ExcKind::ArithmeticError));
        assert!(ExcKind::ZeroDivisionError.is_subtype(ExcKind::Exception));
        assert!(ExcKind::ZeroDivisionError.is_subtype(ExcKind::BaseException));
        assert!(!ExcKind::ZeroDivisionError.is_subtype(ExcKind::LookupError));
    }

    #[test]
    fn frozen_instance_error_is_attribute_error() {
        assert!(ExcKind::FrozenInstanceError.is_subtype(ExcKind::AttributeError));
    }

    #[test]
    fn timeout_is_os_error() {
        assert!(ExcKind::TimeoutError.is_subtype(ExcKind::OsError));
    }

    #[test]
    fn names_round_trip() {
        for kind in [
            ExcKind::ValueError,
            ExcKind::ModuleNotFoundError,
            ExcKind::OsError,
            ExcKind::FrozenInstanceError,
        ] {
            assert_eq!(ExcKind::from_name(kind.name()), Some(kind));
        }
    }
}
