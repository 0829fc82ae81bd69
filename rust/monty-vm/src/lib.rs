//! Monty execution engine: a sandboxed interpreter for a Python-subset
//! scripting language, embeddable in a host application.
//!
//! Scripts execute under strict resource limits with all I/O mediated by
//! the host. The host starts execution with [`Monty::start`], receives a
//! [`Snapshot`] when the script calls an external function (or touches the
//! `Path`/`os` surface), supplies an [`Outcome`], and the script resumes.
//! Scripts can also spawn concurrent awaitable calls and gather their
//! results, pausing in a [`FutureSnapshot`] until the host delivers
//! outcomes. Paused executions serialise with `dump`/`load` and resume in
//! another process or on another thread.

mod builtins;
mod convert;
mod exception;
mod frame;
mod futures;
mod heap;
mod interp;
mod limits;
mod methods;
mod monty;
mod object;
mod ops;
mod os;
mod print;
mod repl;
mod serialize;
mod snapshot;
mod values;

pub use convert::{DataclassRegistry, HostException, HostValue, StatResult};
pub use exception::ExcKind;
pub use limits::ResourceLimits;
pub use monty::{
    ExternalHandler, Monty, MontyError, MontyOptions, OsHandler, RunOptions, StartOptions,
};
pub use os::{OsFunction, S_IFDIR, S_IFLNK, S_IFREG};
pub use print::{CaptureSink, NullSink, PrintSink, StdoutSink};
pub use repl::{Repl, ReplOptions};
pub use snapshot::{Complete, FutureSnapshot, Outcome, Progress, Snapshot};
