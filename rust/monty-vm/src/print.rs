//! Print mediation: scripts have no stdout, only a host sink.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Receives `print` output. Each `print(...)` call produces two events:
/// the rendered text and the line terminator, both on stream `"stdout"`.
pub trait PrintSink: Send {
    fn write(&mut self, stream: &str, text: &str);
}

/// Forwards to the real process stdout (opt-in, for command-line hosts).
#[derive(Debug, Default)]
pub struct StdoutSink;

impl PrintSink for StdoutSink {
    fn write(&mut self, _stream: &str, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NullSink;

impl PrintSink for NullSink {
    fn write(&mut self, _stream: &str, _text: &str) {}
}

/// Captures `(stream, text)` events behind a shared handle; the host keeps
/// a clone to inspect output after execution.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, String)> {
        self.events.lock().expect("capture sink poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("capture sink poisoned").clear();
    }
}

impl PrintSink for CaptureSink {
    fn write(&mut self, stream: &str, text: &str) {
        self.events
            .lock()
            .expect("capture sink poisoned")
            .push((stream.to_string(), text.to_string()));
    }
}
