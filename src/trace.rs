//! Execution tracer: one line per directive transition.
//!
//! ```text
//! *** DO[ (pick :obj X) ] : input
//!   --- ACH[ (on :obj X :ref Y) ] : stack-cup
//! ```
//!
//! Indentation (two spaces per level) is the nesting depth. Verdicts are
//! `...` blocked, `---` failure, `:::` dismissed, `***` success and `~~~`
//! escaped. Remarks (`REPEAT`, phase changes) are indented the same way and
//! start with `%`. This stream is a debugging contract of its own and does
//! not go through `tracing`.

use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::plan::DirKind;

/// How a directive transition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Blocked,
    Failure,
    Dismiss,
    Success,
    Escaped,
}

impl Verdict {
    pub fn mark(self) -> &'static str {
        match self {
            Verdict::Blocked => "...",
            Verdict::Failure => "---",
            Verdict::Dismiss => ":::",
            Verdict::Success => "***",
            Verdict::Escaped => "~~~",
        }
    }
}

/// Render one verdict line.
pub fn format_line(depth: usize, verdict: Verdict, kind: DirKind, key: &str, nick: &str) -> String {
    format!(
        "{}{} {}[ {} ] : {}",
        "  ".repeat(depth),
        verdict.mark(),
        kind.name(),
        key,
        nick
    )
}

pub trait Tracer: Send {
    fn verdict(&mut self, depth: usize, verdict: Verdict, kind: DirKind, key: &str, nick: &str);

    fn remark(&mut self, depth: usize, text: &str);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullTracer;

impl Tracer for NullTracer {
    fn verdict(&mut self, _: usize, _: Verdict, _: DirKind, _: &str, _: &str) {}

    fn remark(&mut self, _: usize, _: &str) {}
}

/// Writes lines to any writer (stderr, a file).
pub struct LineTracer<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> LineTracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Tracer for LineTracer<W> {
    fn verdict(&mut self, depth: usize, verdict: Verdict, kind: DirKind, key: &str, nick: &str) {
        let line = format_line(depth, verdict, kind, key, nick);
        if let Err(e) = writeln!(self.out, "{line}") {
            tracing::warn!(error = %e, "trace output failed");
        }
    }

    fn remark(&mut self, depth: usize, text: &str) {
        if let Err(e) = writeln!(self.out, "{}% {text}", "  ".repeat(depth)) {
            tracing::warn!(error = %e, "trace output failed");
        }
    }
}

/// Keeps lines in memory; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line so far.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, line: String) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}

impl Tracer for MemoryTracer {
    fn verdict(&mut self, depth: usize, verdict: Verdict, kind: DirKind, key: &str, nick: &str) {
        self.push(format_line(depth, verdict, kind, key, nick));
    }

    fn remark(&mut self, depth: usize, text: &str) {
        self.push(format!("{}% {text}", "  ".repeat(depth)));
    }
}
