//! Where job output and controller messages go.
//!
//! With more than one job running, output from different targets is
//! separated by `--- target ---` markers printed whenever the producing
//! target changes.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

pub struct OutputSink {
    writer: Box<dyn Write + Send>,
    prefix: String,
    markers: bool,
    last_target: Option<String>,
}

impl OutputSink {
    pub fn new(writer: Box<dyn Write + Send>, prefix: impl Into<String>, markers: bool) -> Self {
        Self {
            writer,
            prefix: prefix.into(),
            markers,
            last_target: None,
        }
    }

    pub fn stdout(prefix: impl Into<String>, markers: bool) -> Self {
        Self::new(Box::new(io::stdout()), prefix, markers)
    }

    /// A sink writing into memory, and a handle to read what was written.
    pub fn capture(prefix: impl Into<String>, markers: bool) -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        let sink = Self::new(Box::new(captured.clone()), prefix, markers);
        (sink, captured)
    }

    pub fn set_markers(&mut self, on: bool) {
        self.markers = on;
    }

    fn marker(&mut self, target: &str) {
        if !self.markers || self.prefix.is_empty() {
            return;
        }
        if self.last_target.as_deref() == Some(target) {
            return;
        }
        let line = format!("{} {} ---\n", self.prefix, target);
        self.write(line.as_bytes());
        self.last_target = Some(target.to_string());
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Err(e) = self.writer.write_all(bytes).and_then(|()| self.writer.flush()) {
            tracing::warn!(error = %e, "could not write output");
        }
    }

    /// Complete lines produced by `target`'s job. Lines equal to `no_print`
    /// (the shell's own echo of its echo-off command) are dropped.
    pub fn job_output(&mut self, target: &str, bytes: &[u8], no_print: &str) {
        let text = strip_no_print(bytes, no_print);
        if text.is_empty() {
            return;
        }
        self.marker(target);
        self.write(&text);
    }

    /// A controller message about `target`, such as an echoed command or a
    /// failure report.
    pub fn message_for(&mut self, target: &str, line: &str) {
        self.marker(target);
        self.message(line);
    }

    /// One line from the controller itself.
    pub fn message(&mut self, line: &str) {
        let mut text = line.to_string();
        text.push('\n');
        self.write(text.as_bytes());
    }

    /// Child output passed through untouched.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.write(bytes);
    }
}

fn strip_no_print(bytes: &[u8], no_print: &str) -> Vec<u8> {
    if no_print.is_empty() {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    for line in bytes.split_inclusive(|&b| b == b'\n') {
        let body = line.strip_suffix(b"\n").unwrap_or(line);
        if body != no_print.as_bytes() {
            out.extend_from_slice(line);
        }
    }
    out
}

/// In-memory output shared with a sink, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn text(&self) -> String {
        match self.0.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::other("output buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
