//! A REPL wrapper: one long-lived interpreter with a persistent top-level
//! scope.
//!
//! Each `feed` compiles a fresh block against the same globals and heap, so
//! bindings, resource accounting, and limits carry across feeds. `dump`
//! persists the whole interpreter, not just bytecode.

use crate::convert::HostValue;
use crate::interp::{Exit, Interp};
use crate::limits::ResourceLimits;
use crate::monty::MontyError;
use crate::print::PrintSink;
use crate::snapshot::surface;
use crate::values::Value;
use std::sync::Arc;

/// Options for [`Repl::create`].
#[derive(Default)]
pub struct ReplOptions {
    /// Declared input names for the first block.
    pub inputs: Vec<String>,
    /// Values for the declared inputs.
    pub start_inputs: Vec<(String, HostValue)>,
    pub limits: ResourceLimits,
    pub print: Option<Box<dyn PrintSink + Send>>,
}

/// A persistent-scope interpreter driven by source blocks.
#[derive(Debug)]
pub struct Repl {
    interp: Interp,
}

impl Repl {
    /// Compile and run the first block, retaining its bindings. Returns
    /// the REPL and the block's final-expression value.
    pub fn create(source: &str) -> Result<(Repl, HostValue), MontyError> {
        Self::create_with(source, ReplOptions::default())
    }

    pub fn create_with(source: &str, options: ReplOptions) -> Result<(Repl, HostValue), MontyError> {
        let program = monty_compiler::compile(source, "main.py", &options.inputs, &[], None)?;
        for (name, _) in &options.start_inputs {
            if !options.inputs.contains(name) {
                return Err(MontyError::InvalidArgument(format!(
                    "unexpected input '{name}'"
                )));
            }
        }
        for declared in &options.inputs {
            if !options.start_inputs.iter().any(|(n, _)| n == declared) {
                return Err(MontyError::InvalidArgument(format!(
                    "missing input '{declared}'"
                )));
            }
        }
        let mut interp = Interp::new(Arc::new(program), options.limits);
        if let Some(sink) = options.print {
            interp.print = sink;
        }
        interp.os_enabled = false;
        interp.ext_enabled = false;
        let top = interp.program().top_code;
        if let Err(e) = interp.seed_top_frame(top, options.start_inputs) {
            return Err(surface(&interp, e));
        }
        let mut repl = Repl { interp };
        let output = repl.drive()?;
        Ok((repl, output))
    }

    /// Compile and run another block against the persistent scope; returns
    /// the block's final-expression value.
    pub fn feed(&mut self, source: &str) -> Result<HostValue, MontyError> {
        let program = monty_compiler::compile(source, "main.py", &[], &[], None)?;
        let top = self.interp.push_feed(Arc::new(program));
        self.interp.module_result = Value::None;
        if let Err(e) = self.interp.seed_top_frame(top, Vec::new()) {
            return Err(surface(&self.interp, e));
        }
        self.drive()
    }

    fn drive(&mut self) -> Result<HostValue, MontyError> {
        match self.interp.run_loop(0) {
            Ok(Exit::Done(_)) => self
                .interp
                .output()
                .map_err(|e| surface(&self.interp, e)),
            Ok(Exit::ExternalCall(_) | Exit::FutureWait(_)) => Err(MontyError::Operation(
                "REPL blocks cannot call host-mediated functions".to_string(),
            )),
            Err(e) => Err(surface(&self.interp, e)),
        }
    }

    /// Serialise the entire interpreter: scope, heap, and limit counters.
    pub fn dump(&self) -> Vec<u8> {
        crate::serialize::encode_repl(&self.interp)
    }

    pub fn load(data: &[u8]) -> Result<Repl, MontyError> {
        let interp = crate::serialize::decode_repl(data)?;
        Ok(Repl { interp })
    }

    /// Live heap statistics, for embedders watching resource use.
    pub fn heap_stats(&self) -> (usize, usize) {
        (self.interp.heap.live_count(), self.interp.heap.live_bytes())
    }
}
