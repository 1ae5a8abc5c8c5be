//! Input and output plumbing between collaborators and the scheduler.
//!
//! Collaborators (parsers, sensors, kernels) run on their own threads and
//! hand chains to the scheduler as text through an [`InputQueue`]. The
//! scheduler is the only consumer. After every tick it publishes a
//! [`CoreStatus`] snapshot to the attached [`OutputSink`].

use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};

use crate::mood::Mood;

/// Where an input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    User,
    #[serde(rename = "self")]
    Own,
    Sensor,
}

impl Source {
    pub fn label(self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Own => "self",
            Source::Sensor => "sensor",
        }
    }
}

/// A chain script delivered to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub source: Source,
    pub script: String,
}

impl Input {
    pub fn chain(source: Source, script: impl Into<String>) -> Self {
        Self {
            source,
            script: script.into(),
        }
    }

    /// A single NOTE of `graphlet`.
    pub fn note(source: Source, graphlet: &str) -> Self {
        Self::chain(source, format!("NOTE {graphlet}"))
    }
}

/// Producer handle; clone one per collaborator thread.
#[derive(Debug, Clone)]
pub struct InputSender {
    tx: Sender<Input>,
}

impl InputSender {
    /// Queue an input. Returns false once the scheduler is gone.
    pub fn send(&self, input: Input) -> bool {
        self.tx.send(input).is_ok()
    }
}

/// The scheduler's end of the input channel.
#[derive(Debug)]
pub struct InputQueue {
    rx: Receiver<Input>,
    tx: Sender<Input>,
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InputQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { rx, tx }
    }

    pub fn sender(&self) -> InputSender {
        InputSender { tx: self.tx.clone() }
    }

    /// Everything queued so far, without blocking.
    pub fn drain(&self) -> Vec<Input> {
        self.rx.try_iter().collect()
    }
}

/// A collaborator polled by the scheduler at the start of each tick.
pub trait InputSource: Send {
    fn poll(&mut self) -> Vec<Input>;
}

/// Receives the published state after each tick.
pub trait OutputSink: Send {
    fn publish(&mut self, status: &CoreStatus);
}

/// Observable state after one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreStatus {
    pub tick: u64,
    pub foci: usize,
    pub goals: usize,
    pub max_depth: usize,
    pub nodes: usize,
    pub version: u64,
    pub collected: usize,
    pub mood: Mood,
    /// Verdicts of foci finished this tick, as status codes.
    pub finished: Vec<i8>,
}

/// Writes one JSON line per tick.
pub struct JsonSink<W: std::io::Write + Send> {
    out: W,
}

impl<W: std::io::Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: std::io::Write + Send> OutputSink for JsonSink<W> {
    fn publish(&mut self, status: &CoreStatus) {
        match serde_json::to_string(status) {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{line}") {
                    tracing::warn!(error = %e, "status output failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "status serialization failed"),
        }
    }
}

/// Inputs fed from a fixed list, one batch per tick.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    batches: std::collections::VecDeque<Vec<Input>>,
}

impl ScriptedSource {
    pub fn new(batches: Vec<Vec<Input>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

impl InputSource for ScriptedSource {
    fn poll(&mut self) -> Vec<Input> {
        self.batches.pop_front().unwrap_or_default()
    }
}
