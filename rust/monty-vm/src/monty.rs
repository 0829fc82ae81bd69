//! The embedding API: compile once, execute many times.

use crate::convert::{DataclassRegistry, HostException, HostValue};
use crate::interp::Interp;
use crate::limits::ResourceLimits;
use crate::os::OsFunction;
use crate::print::PrintSink;
use crate::snapshot::{continue_run, os_not_implemented, Outcome, Progress};
use monty_compiler::{Program, SyntaxError};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by every entry point.
#[derive(Debug, Error)]
pub enum MontyError {
    /// Compile-time failure, with file/line/column and a snippet.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    /// Pre-flight type-check failure reported by an external checker.
    #[error("{concise}")]
    Typing { concise: String, full: String },
    /// A script-level exception escaped user code; the traceback is the
    /// rendered `Traceback (most recent call last):` form.
    #[error("{kind}: {message}")]
    Runtime {
        kind: String,
        message: String,
        traceback: String,
    },
    /// Inputs did not match the declaration, or a protocol misuse.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Operational failure (resume-after-resume, dump-after-resume, ...).
    #[error("{0}")]
    Operation(String),
    /// Serialised data could not be decoded.
    #[error("{0}")]
    Decode(String),
}

impl MontyError {
    /// The exception kind name for runtime envelopes.
    pub fn exception_kind(&self) -> Option<&str> {
        match self {
            MontyError::Runtime { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Rendered traceback for runtime envelopes.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            MontyError::Runtime { traceback, .. } => Some(traceback),
            _ => None,
        }
    }
}

/// Construction options for [`Monty`].
#[derive(Debug, Clone, Default)]
pub struct MontyOptions {
    /// File name used in tracebacks; defaults to `main.py`.
    pub script_name: Option<String>,
    /// Declared input names; `start`/`run` inputs must match exactly.
    pub inputs: Vec<String>,
    /// Declared external function names.
    pub external_functions: Vec<String>,
    /// Opaque stubs for an external type checker.
    pub type_check_stubs: Option<String>,
}

/// Options for `start` (host-mediated execution).
#[derive(Default)]
pub struct StartOptions {
    pub inputs: Vec<(String, HostValue)>,
    pub limits: ResourceLimits,
    /// Print sink; defaults to process stdout.
    pub print: Option<Box<dyn PrintSink + Send>>,
}

/// Implements declared external functions for synchronous `run`.
pub trait ExternalHandler {
    fn call(
        &mut self,
        name: &str,
        args: &[HostValue],
        kwargs: &[(String, HostValue)],
    ) -> Result<HostValue, HostException>;
}

/// Implements the OS surface for synchronous `run`.
pub trait OsHandler {
    fn call(
        &mut self,
        function: OsFunction,
        args: &[HostValue],
        kwargs: &[(String, HostValue)],
    ) -> Result<HostValue, HostException>;
}

/// Options for `run` (drives suspensions through the supplied handlers).
#[derive(Default)]
pub struct RunOptions<'a> {
    pub inputs: Vec<(String, HostValue)>,
    pub limits: ResourceLimits,
    pub print: Option<Box<dyn PrintSink + Send>>,
    pub external: Option<&'a mut dyn ExternalHandler>,
    pub os: Option<&'a mut dyn OsHandler>,
}

/// A compiled Monty script, immutable and shareable across threads. Each
/// `start`/`run` creates an independent interpreter with its own heap and
/// limits, so the same instance may execute concurrently.
#[derive(Debug, Clone)]
pub struct Monty {
    program: Arc<Program>,
    registry: DataclassRegistry,
}

impl Monty {
    /// Compile a script with default options.
    pub fn new(source: &str) -> Result<Monty, MontyError> {
        Self::with_options(source, MontyOptions::default())
    }

    pub fn with_options(source: &str, options: MontyOptions) -> Result<Monty, MontyError> {
        let script_name = options.script_name.as_deref().unwrap_or("main.py");
        let program = monty_compiler::compile(
            source,
            script_name,
            &options.inputs,
            &options.external_functions,
            options.type_check_stubs,
        )?;
        Ok(Monty {
            program: Arc::new(program),
            registry: DataclassRegistry::new(),
        })
    }

    pub fn script_name(&self) -> &str {
        &self.program.script_name
    }

    pub fn input_names(&self) -> &[String] {
        &self.program.input_names
    }

    pub fn external_functions(&self) -> &[String] {
        &self.program.external_functions
    }

    /// Allow a host dataclass (by name) to round-trip through
    /// serialisation.
    pub fn register_dataclass(&mut self, name: impl Into<String>) {
        self.registry.register(name);
    }

    pub fn dataclass_registry(&self) -> &DataclassRegistry {
        &self.registry
    }

    /// `Monty(<N lines of code>, script_name='main.py', ...)`
    pub fn repr(&self) -> String {
        let lines = self.program.line_count();
        let mut out = format!(
            "Monty(<{lines} line{} of code>, script_name='{}'",
            if lines == 1 { "" } else { "s" },
            self.program.script_name
        );
        if !self.program.input_names.is_empty() {
            let names: Vec<String> = self
                .program
                .input_names
                .iter()
                .map(|n| format!("\"{n}\""))
                .collect();
            out.push_str(&format!(", inputs=[{}]", names.join(", ")));
        }
        if !self.program.external_functions.is_empty() {
            let names: Vec<String> = self
                .program
                .external_functions
                .iter()
                .map(|n| format!("\"{n}\""))
                .collect();
            out.push_str(&format!(", external_functions=[{}]", names.join(", ")));
        }
        out.push(')');
        out
    }

    fn validate_inputs(&self, inputs: &[(String, HostValue)]) -> Result<(), MontyError> {
        for (name, _) in inputs {
            if !self.program.input_names.contains(name) {
                return Err(MontyError::InvalidArgument(format!(
                    "unexpected input '{name}'"
                )));
            }
        }
        for declared in &self.program.input_names {
            if !inputs.iter().any(|(n, _)| n == declared) {
                return Err(MontyError::InvalidArgument(format!(
                    "missing input '{declared}'"
                )));
            }
        }
        Ok(())
    }

    fn make_interp(
        &self,
        inputs: Vec<(String, HostValue)>,
        limits: ResourceLimits,
        print: Option<Box<dyn PrintSink + Send>>,
        os_enabled: bool,
        ext_enabled: bool,
    ) -> Result<Interp, MontyError> {
        self.validate_inputs(&inputs)?;
        let mut interp = Interp::new(Arc::clone(&self.program), limits);
        if let Some(sink) = print {
            interp.print = sink;
        }
        interp.os_enabled = os_enabled;
        interp.ext_enabled = ext_enabled;
        let top = self.program.top_code;
        interp
            .seed_top_frame(top, inputs)
            .map_err(|e| crate::snapshot::surface(&interp, e))?;
        Ok(interp)
    }

    /// Begin host-mediated execution: runs until the first suspension or
    /// completion.
    pub fn start(&self, options: StartOptions) -> Result<Progress, MontyError> {
        let interp = self.make_interp(options.inputs, options.limits, options.print, true, true)?;
        continue_run(interp)
    }

    /// Run to completion, resolving suspensions through the supplied
    /// handlers. Without handlers, any would-be suspension fails with a
    /// runtime error.
    pub fn run(&self, options: RunOptions<'_>) -> Result<HostValue, MontyError> {
        let RunOptions { inputs, limits, print, mut external, mut os } = options;
        let interp = self.make_interp(
            inputs,
            limits,
            print,
            os.is_some(),
            external.is_some(),
        )?;
        let mut progress = continue_run(interp)?;
        loop {
            match progress {
                Progress::Complete(complete) => return Ok(complete.into_output()),
                Progress::Snapshot(mut snapshot) => {
                    let outcome = if snapshot.is_os_function() {
                        let Some(handler) = os.as_deref_mut() else {
                            return Err(os_not_implemented(snapshot.function_name()));
                        };
                        let function = OsFunction::from_name(snapshot.function_name())
                            .ok_or_else(|| {
                                MontyError::Operation(format!(
                                    "unknown OS function '{}'",
                                    snapshot.function_name()
                                ))
                            })?;
                        match handler.call(function, snapshot.args(), snapshot.kwargs()) {
                            Ok(v) => Outcome::Return(v),
                            Err(e) => Outcome::Exception(e),
                        }
                    } else {
                        let Some(handler) = external.as_deref_mut() else {
                            return Err(MontyError::Runtime {
                                kind: "NotImplementedError".to_string(),
                                message:
                                    "external function calls not supported by standard execution."
                                        .to_string(),
                                traceback:
                                    "NotImplementedError: external function calls not supported by standard execution."
                                        .to_string(),
                            });
                        };
                        match handler.call(
                            snapshot.function_name(),
                            snapshot.args(),
                            snapshot.kwargs(),
                        ) {
                            Ok(v) => Outcome::Return(v),
                            Err(e) => Outcome::Exception(e),
                        }
                    };
                    progress = snapshot.resume(outcome)?;
                }
                Progress::FutureSnapshot(_) => {
                    return Err(MontyError::Operation(
                        "synchronous run cannot wait on futures; use start/resume".to_string(),
                    ))
                }
            }
        }
    }

    /// Serialise the compiled program (not execution state).
    pub fn dump(&self) -> Vec<u8> {
        crate::serialize::encode_program(&self.program)
    }

    /// Reload a program serialised with [`Monty::dump`].
    pub fn load(data: &[u8]) -> Result<Monty, MontyError> {
        let program = crate::serialize::decode_program(data)?;
        Ok(Monty {
            program: Arc::new(program),
            registry: DataclassRegistry::new(),
        })
    }
}
