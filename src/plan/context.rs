//! Per-scheduler state threaded through every directive call.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::warn;

use super::{DirKind, Status};
use crate::config::CoreConfig;
use crate::error::GraphResult;
use crate::graph::text::{node_ref, render};
use crate::graph::{Graphlet, NodeId};
use crate::io::{Input, Source};
use crate::kernel::KernelRegistry;
use crate::library::{Library, OpId};
use crate::memory::WorkingMemory;
use crate::mood::Mood;
use crate::trace::{NullTracer, Tracer, Verdict};

/// A method failure remembered for EDIT.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub op: OpId,
    /// Index of the method step that failed.
    pub step: usize,
    /// Key of the failed step, in working memory.
    pub key: Graphlet,
    pub tick: u64,
}

/// A pending halt: stop every live action matching `key`.
#[derive(Debug, Clone)]
pub struct HaltRequest {
    pub requester: u64,
    pub key: Graphlet,
}

pub struct Context {
    pub wmem: WorkingMemory,
    pub lib: Library,
    pub mood: Mood,
    pub tracer: Box<dyn Tracer>,
    pub kernels: KernelRegistry,
    pub rng: StdRng,
    pub config: CoreConfig,
    pub tick: u64,
    clock: u64,
    next_id: u64,
    halts: Vec<HaltRequest>,
    halt_results: HashMap<u64, usize>,
    notes: Vec<Input>,
    note_refs: Vec<NodeId>,
    failures: VecDeque<FailureRecord>,
    cooldowns: HashMap<(OpId, Vec<(NodeId, NodeId)>), u64>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("tick", &self.tick)
            .field("nodes", &self.wmem.pool().len())
            .field("ops", &self.lib.op_count())
            .field("rules", &self.lib.rule_count())
            .field("mood", &self.mood)
            .finish()
    }
}

impl Context {
    pub fn new(config: CoreConfig, lib: Library) -> GraphResult<Self> {
        let wmem = WorkingMemory::new(&config.memory)?;
        Ok(Self {
            wmem,
            lib,
            mood: Mood::new(&config.mood),
            tracer: Box::new(NullTracer),
            kernels: KernelRegistry::new(),
            rng: StdRng::seed_from_u64(config.scheduler.seed),
            config,
            tick: 0,
            clock: 0,
            next_id: 0,
            halts: Vec::new(),
            halt_results: HashMap::new(),
            notes: Vec::new(),
            note_refs: Vec::new(),
            failures: VecDeque::new(),
            cooldowns: HashMap::new(),
        })
    }

    pub fn with_tracer(mut self, tracer: Box<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Advance the conversational mention clock.
    pub(crate) fn mention_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Ticks covering `seconds`, at least one.
    pub fn ticks_for(&self, seconds: f64) -> u64 {
        self.config.ticks_for(seconds).max(1)
    }

    // -----------------------------------------------------------------------
    // Tracing
    // -----------------------------------------------------------------------

    pub(crate) fn trace(&mut self, depth: usize, status: Status, kind: DirKind, key: &Graphlet, nick: &str) {
        let verdict = match (kind, status) {
            (_, Status::Working) => Verdict::Blocked,
            (DirKind::Esc, Status::Fail) => Verdict::Escaped,
            (_, Status::Done | Status::Alt) => Verdict::Success,
            (_, Status::Stopped) => Verdict::Dismiss,
            (_, Status::Fail | Status::Punt) => Verdict::Failure,
        };
        let text = render(self.wmem.pool(), key);
        self.tracer.verdict(depth, verdict, kind, &text, nick);
    }

    pub(crate) fn remark(&mut self, depth: usize, text: &str) {
        self.tracer.remark(depth, text);
    }

    // -----------------------------------------------------------------------
    // Halts
    // -----------------------------------------------------------------------

    pub(crate) fn request_halt(&mut self, requester: u64, key: Graphlet) {
        self.halts.push(HaltRequest { requester, key });
    }

    pub(crate) fn take_halts(&mut self) -> Vec<HaltRequest> {
        std::mem::take(&mut self.halts)
    }

    pub(crate) fn set_halt_result(&mut self, requester: u64, halted: usize) {
        self.halt_results.insert(requester, halted);
    }

    pub(crate) fn take_halt_result(&mut self, requester: u64) -> Option<usize> {
        self.halt_results.remove(&requester)
    }

    /// Withdraw a requester's pending halt and drop any unread answer.
    pub(crate) fn forget_halt(&mut self, requester: u64) {
        self.halts.retain(|h| h.requester != requester);
        self.halt_results.remove(&requester);
    }

    /// Halt requests and answers not yet consumed.
    pub fn halt_backlog(&self) -> usize {
        self.halts.len() + self.halt_results.len()
    }

    // -----------------------------------------------------------------------
    // Notes fabricated by the core
    // -----------------------------------------------------------------------

    /// Queue a NOTE for injection at the start of the next tick.
    pub fn push_note(&mut self, source: Source, graphlet: &str) {
        self.notes.push(Input::note(source, graphlet));
    }

    pub(crate) fn take_notes(&mut self) -> Vec<Input> {
        self.note_refs.clear();
        std::mem::take(&mut self.notes)
    }

    pub fn has_notes(&self) -> bool {
        !self.notes.is_empty()
    }

    /// Report that the agent could not do `what`: `(act "what" :neg 1 :agt self ...)`.
    /// The key's object is carried along by nickname, or as a `#n` node
    /// reference kept alive until the note is taken.
    pub(crate) fn note_failure(&mut self, what: &str, key: &Graphlet, reason: &str) {
        let pool = self.wmem.pool();
        let obj = key
            .main()
            .and_then(|m| pool.get(m))
            .and_then(|n| n.arg("obj"))
            .filter(|o| pool.contains(*o));
        let what = what.replace('"', "'");
        let text = match obj {
            Some(o) => {
                let term = match pool.get(o).and_then(|n| n.nick()) {
                    Some(nick) => nick.to_string(),
                    None => {
                        self.note_refs.push(o);
                        node_ref(o)
                    }
                };
                format!("(act \"{what}\" :neg 1 :agt self :obj {term})")
            }
            None => format!("(act \"{what}\" :neg 1 :agt self)"),
        };
        warn!(what = %what, reason, "failure reported as note");
        self.push_note(Source::Own, &text);
    }

    // -----------------------------------------------------------------------
    // Failure log and NOTE cooldowns
    // -----------------------------------------------------------------------

    pub(crate) fn log_failure(&mut self, record: FailureRecord) {
        let cap = self.config.plan.failure_log.max(1);
        while self.failures.len() >= cap {
            self.failures.pop_front();
        }
        self.failures.push_back(record);
    }

    /// Method failures, oldest first.
    pub fn failures(&self) -> impl DoubleEndedIterator<Item = &FailureRecord> {
        self.failures.iter()
    }

    /// Whether a NOTE reaction with this operator and signature is still
    /// cooling down.
    pub(crate) fn cooling(&self, op: OpId, sig: &[(NodeId, NodeId)]) -> bool {
        self.cooldowns
            .get(&(op, sig.to_vec()))
            .is_some_and(|until| self.tick < *until)
    }

    pub(crate) fn cool(&mut self, op: OpId, sig: Vec<(NodeId, NodeId)>) {
        let until = self.tick + self.config.plan.note_cooldown;
        self.cooldowns.insert((op, sig), until);
    }

    /// Nodes the context itself refers to.
    pub(crate) fn mark_seeds(&mut self, seeds: &mut HashSet<NodeId>) {
        seeds.extend(self.note_refs.iter().copied());
        for h in &self.halts {
            seeds.extend(h.key.iter());
        }
        for f in &self.failures {
            seeds.extend(f.key.iter());
        }
        let tick = self.tick;
        self.cooldowns.retain(|_, until| *until > tick);
        for (_, sig) in self.cooldowns.keys() {
            for (_, img) in sig {
                seeds.insert(*img);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Band, Bindings};
    use crate::graph::text::parse_graphlet;

    fn ctx() -> Context {
        Context::new(CoreConfig::default(), Library::new()).unwrap()
    }

    #[test]
    fn failure_log_is_bounded() {
        let mut c = ctx();
        c.config.plan.failure_log = 2;
        let op = Library::parse("OP a\n  kind=DO\n  trig: (a)\n  method:\n    PUNT\n")
            .unwrap()
            .op_by_name("a")
            .unwrap();
        for t in 0..5 {
            c.log_failure(FailureRecord {
                op,
                step: 0,
                key: Graphlet::new(),
                tick: t,
            });
        }
        let ticks: Vec<u64> = c.failures().map(|f| f.tick).collect();
        assert_eq!(ticks, vec![3, 4]);
    }

    #[test]
    fn failure_note_names_object() {
        let mut c = ctx();
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(see :obj X)").unwrap();
        c.note_failure("see", &key, "camera offline");
        let notes = c.take_notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].script, "NOTE (act \"see\" :neg 1 :agt self :obj X)");
        assert_eq!(notes[0].source, Source::Own);
    }

    #[test]
    fn failure_note_names_anonymous_object() {
        let mut c = ctx();
        let mut b = Bindings::new();
        let cup = parse_graphlet(c.wmem.pool_mut(), None, "(ako \"cup\" :obj ?c)").unwrap();
        c.wmem.assert(None, &cup, &mut b, 0.5, Band::Hypo).unwrap();
        let var = c.wmem.pool().node(cup.main().unwrap()).unwrap().arg("obj").unwrap();
        let obj = b.lookup(var).unwrap();

        let key = Graphlet::single(c.wmem.pool_mut().create("grab", "").unwrap());
        c.wmem.pool_mut().add_arg(key.main().unwrap(), "obj", obj).unwrap();
        c.note_failure("grab", &key, "out of reach");

        let mut seeds = HashSet::new();
        c.mark_seeds(&mut seeds);
        assert!(seeds.contains(&obj));

        let notes = c.take_notes();
        let text = notes[0].script.strip_prefix("NOTE ").unwrap().to_string();
        assert!(text.ends_with(&format!(":obj #{})", obj.raw())));
        let parsed = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), &text).unwrap();
        let carried = c.wmem.pool().node(parsed.main().unwrap()).unwrap().arg("obj");
        assert_eq!(carried, Some(obj));

        let mut seeds = HashSet::new();
        c.mark_seeds(&mut seeds);
        assert!(!seeds.contains(&obj));
    }

    #[test]
    fn withdrawn_halt_leaves_no_backlog() {
        let mut c = ctx();
        c.request_halt(7, Graphlet::new());
        c.request_halt(8, Graphlet::new());
        c.set_halt_result(9, 1);
        c.forget_halt(7);
        c.forget_halt(9);
        assert_eq!(c.halt_backlog(), 1);
        assert_eq!(c.take_halts()[0].requester, 8);
    }

    #[test]
    fn cooldown_expires() {
        let mut c = ctx();
        c.config.plan.note_cooldown = 3;
        let op = Library::parse("OP a\n  kind=NOTE\n  trig: (a)\n  method:\n    PUNT\n")
            .unwrap()
            .op_by_name("a")
            .unwrap();
        c.cool(op, Vec::new());
        assert!(c.cooling(op, &[]));
        c.tick = 3;
        assert!(!c.cooling(op, &[]));
    }
}
