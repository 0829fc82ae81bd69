//! The suspend/resume protocol: `Snapshot`, `FutureSnapshot`, `Complete`.
//!
//! A snapshot owns the paused interpreter outright; resuming on another
//! thread needs no reference to the original execution. Snapshots are
//! single-use: the first `resume` consumes the captured state, a second
//! fails with "Progress already resumed".

use crate::convert::{HostException, HostValue};
use crate::exception::{ExcKind, RunError};
use crate::interp::{Exit, Interp, PausedCall, ResumeValue};
use crate::object::HeapData;
use crate::monty::MontyError;

/// The host-supplied outcome of one external or OS call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Return(HostValue),
    Exception(HostException),
    /// The call becomes an awaitable future; the script resumes with a
    /// future handle and the outcome arrives later by call id.
    Future,
}

/// Terminal successful execution result.
#[derive(Debug, Clone, PartialEq)]
pub struct Complete {
    output: HostValue,
}

impl Complete {
    pub fn output(&self) -> &HostValue {
        &self.output
    }

    pub fn into_output(self) -> HostValue {
        self.output
    }
}

/// Progress of one execution: either finished, paused at a host call, or
/// paused waiting for future outcomes.
#[derive(Debug)]
pub enum Progress {
    Complete(Complete),
    Snapshot(Snapshot),
    FutureSnapshot(FutureSnapshot),
}

impl Progress {
    pub fn into_complete(self) -> Option<Complete> {
        match self {
            Progress::Complete(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self {
            Progress::Snapshot(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_future_snapshot(self) -> Option<FutureSnapshot> {
        match self {
            Progress::FutureSnapshot(s) => Some(s),
            _ => None,
        }
    }
}

/// Paused execution awaiting one external-call outcome.
#[derive(Debug)]
pub struct Snapshot {
    pub(crate) state: Option<Box<Interp>>,
    pub(crate) call: PausedCall,
    pub(crate) script_name: String,
}

impl Snapshot {
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn function_name(&self) -> &str {
        &self.call.function
    }

    pub fn call_id(&self) -> u64 {
        self.call.call_id
    }

    pub fn is_os_function(&self) -> bool {
        self.call.is_os
    }

    pub fn args(&self) -> &[HostValue] {
        &self.call.args
    }

    pub fn kwargs(&self) -> &[(String, HostValue)] {
        &self.call.kwargs
    }

    /// Resume with the call's outcome. Consumes the captured state; a
    /// second call fails.
    pub fn resume(&mut self, outcome: Outcome) -> Result<Progress, MontyError> {
        if self.state.is_none() {
            return Err(MontyError::Operation("Progress already resumed".to_string()));
        }
        if self.call.is_os && matches!(outcome, Outcome::Future) {
            return Err(MontyError::InvalidArgument(
                "OS calls cannot resume as futures".to_string(),
            ));
        }
        let mut interp = self
            .state
            .take()
            .ok_or_else(|| MontyError::Operation("Progress already resumed".to_string()))?;
        let resume_value = match outcome {
            Outcome::Return(v) => ResumeValue::Return(v),
            Outcome::Exception(e) => ResumeValue::Exception {
                kind: e.exc_kind(),
                message: e.message,
            },
            Outcome::Future => ResumeValue::Future(self.call.call_id),
        };
        match interp.apply_call_outcome(resume_value) {
            Ok(()) => {}
            Err(e) => {
                if let Err(fatal) = interp.dispatch_error(e, 0) {
                    return Err(surface(&interp, fatal));
                }
            }
        }
        continue_run(*interp)
    }

    /// Serialise the paused state. Fails after `resume` has consumed it.
    pub fn dump(&self) -> Result<Vec<u8>, MontyError> {
        let interp = self.state.as_ref().ok_or_else(|| {
            MontyError::Operation("Cannot dump progress that has already been resumed".to_string())
        })?;
        crate::serialize::encode_snapshot(interp, &self.call)
    }

    pub fn load(data: &[u8]) -> Result<Snapshot, MontyError> {
        crate::serialize::decode_snapshot(data)
    }

    /// Load with a print sink for resumed output.
    pub fn load_with_print(
        data: &[u8],
        print: Box<dyn crate::print::PrintSink + Send>,
    ) -> Result<Snapshot, MontyError> {
        let mut snapshot = crate::serialize::decode_snapshot(data)?;
        if let Some(state) = snapshot.state.as_mut() {
            state.print = print;
        }
        Ok(snapshot)
    }
}

/// Paused execution awaiting any of a set of pending call outcomes
/// (first-completed semantics: any non-empty subset may resolve).
#[derive(Debug)]
pub struct FutureSnapshot {
    pub(crate) state: Option<Box<Interp>>,
    pub(crate) pending: Vec<u64>,
    pub(crate) script_name: String,
}

impl FutureSnapshot {
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn pending_call_ids(&self) -> &[u64] {
        &self.pending
    }

    /// Resume with a batch of outcomes keyed by call id. Outcomes marked
    /// [`Outcome::Future`] stay pending; at least one call must resolve.
    pub fn resume(&mut self, outcomes: Vec<(u64, Outcome)>) -> Result<Progress, MontyError> {
        if self.state.is_none() {
            return Err(MontyError::Operation("Progress already resumed".to_string()));
        }
        // validate before consuming the captured state so protocol misuse
        // leaves the snapshot resumable
        for (call_id, _) in &outcomes {
            if !self.pending.contains(call_id) {
                return Err(MontyError::InvalidArgument(format!(
                    "call id {call_id} is not pending"
                )));
            }
        }
        let resolved = outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, Outcome::Future))
            .count();
        if resolved == 0 {
            return Err(MontyError::InvalidArgument(
                "at least one pending call must complete".to_string(),
            ));
        }
        let mut interp = self
            .state
            .take()
            .ok_or_else(|| MontyError::Operation("Progress already resumed".to_string()))?;
        for (call_id, outcome) in outcomes {
            let value = match outcome {
                Outcome::Return(v) => ResumeValue::Return(v),
                Outcome::Exception(e) => {
                    ResumeValue::Exception { kind: e.exc_kind(), message: e.message }
                }
                Outcome::Future => ResumeValue::Future(call_id),
            };
            if let Err(e) = interp.record_future_outcome(call_id, value) {
                if let Err(fatal) = interp.dispatch_error(e, 0) {
                    return Err(surface(&interp, fatal));
                }
            }
        }
        continue_run(*interp)
    }

    pub fn dump(&self) -> Result<Vec<u8>, MontyError> {
        let interp = self.state.as_ref().ok_or_else(|| {
            MontyError::Operation("Cannot dump progress that has already been resumed".to_string())
        })?;
        crate::serialize::encode_future_snapshot(interp, &self.pending)
    }

    pub fn load(data: &[u8]) -> Result<FutureSnapshot, MontyError> {
        crate::serialize::decode_future_snapshot(data)
    }
}

/// Drive the interpreter until the next host-visible event.
pub(crate) fn continue_run(mut interp: Interp) -> Result<Progress, MontyError> {
    loop {
        match interp.run_loop(0) {
            Ok(Exit::Done(_)) => {
                let output = interp
                    .output()
                    .map_err(|e| surface(&interp, e))?;
                return Ok(Progress::Complete(Complete { output }));
            }
            Ok(Exit::ExternalCall(call)) => {
                let script_name = interp.program().script_name.clone();
                return Ok(Progress::Snapshot(Snapshot {
                    state: Some(Box::new(interp)),
                    call,
                    script_name,
                }));
            }
            Ok(Exit::FutureWait(pending)) => {
                let script_name = interp.program().script_name.clone();
                return Ok(Progress::FutureSnapshot(FutureSnapshot {
                    state: Some(Box::new(interp)),
                    pending,
                    script_name,
                }));
            }
            Err(e) => return Err(surface(&interp, e)),
        }
    }
}

/// Convert an escaped runtime error into the host-visible envelope.
pub(crate) fn surface(interp: &Interp, err: RunError) -> MontyError {
    match err {
        RunError::Raise { exc } => {
            let HeapData::Exception(data) = interp.heap.get(exc) else {
                return MontyError::Operation("raised object is not an exception".to_string());
            };
            let mut rendered = String::from("Traceback (most recent call last):\n");
            for entry in data.traceback.iter().rev() {
                rendered.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    entry.script_name, entry.line, entry.frame
                ));
                if let Some(src) = &entry.source_line {
                    rendered.push_str(&format!("    {}\n", src.trim_start()));
                }
            }
            rendered.push_str(&format!("{}: {}", data.kind.name(), data.message));
            MontyError::Runtime {
                kind: data.kind.name().to_string(),
                message: data.message.clone(),
                traceback: rendered,
            }
        }
        RunError::Spec { kind, message } => MontyError::Runtime {
            kind: kind.name().to_string(),
            message: message.clone(),
            traceback: format!("{}: {}", kind.name(), message),
        },
        RunError::Resource(r) => MontyError::Runtime {
            kind: r.kind().name().to_string(),
            message: r.message().to_string(),
            traceback: format!("{}: {}", r.kind().name(), r.message()),
        },
        RunError::Internal(m) => MontyError::Operation(format!("internal error: {m}")),
    }
}

/// Engine-raised `NotImplementedError` text for unmediated OS calls.
pub(crate) fn os_not_implemented(function: &str) -> MontyError {
    let kind = ExcKind::NotImplementedError;
    MontyError::Runtime {
        kind: kind.name().to_string(),
        message: format!("OS function '{function}' not implemented"),
        traceback: format!("{}: OS function '{function}' not implemented", kind.name()),
    }
}
