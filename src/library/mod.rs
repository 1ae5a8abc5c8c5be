//! Operator and rule library.
//!
//! Operators map a directive kind and trigger pattern to a method (a chain
//! template); rules map a pattern to a result that populates the halo. All
//! definitions live in the library's own node pool, separate from working
//! memory: variables are per definition, nicknamed constants are matched by
//! nickname against working memory.
//!
//! - [`select`]: trigger/condition matching, specificity, NRI and the
//!   preference-weighted draw
//! - [`format`]: the `OP`/`RULE` text file and its verbatim round trip

pub mod error;
pub mod format;
pub mod select;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GraphResult;
use crate::graph::{Band, Bindings, Graphlet, NodeId, NodeName, NodePool};
use crate::plan::DirKind;
use crate::plan::script::{ChainSpec, Payload};

pub use error::{LibraryError, LibraryResult};
pub use select::{Choice, Tried};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(u32);

impl RuleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rule{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Usage statistics of an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpStats {
    pub successes: u32,
    pub failures: u32,
    runs: u32,
    mean: f64,
    m2: f64,
}

impl OpStats {
    /// Record one finished method and its duration in seconds.
    pub fn record(&mut self, success: bool, seconds: f64) {
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.runs += 1;
        let delta = seconds - self.mean;
        self.mean += delta / self.runs as f64;
        self.m2 += delta * (seconds - self.mean);
    }

    /// Mean method duration in seconds.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample standard deviation of the duration.
    pub fn stddev(&self) -> f64 {
        if self.runs < 2 {
            0.0
        } else {
            (self.m2 / (self.runs - 1) as f64).sqrt()
        }
    }
}

/// A condition → method definition.
#[derive(Debug, Clone)]
pub struct Operator {
    pub(crate) id: OpId,
    pub(crate) name: String,
    pub(crate) kind: DirKind,
    pub(crate) trigger: Graphlet,
    pub(crate) cond: Graphlet,
    pub(crate) method: ChainSpec,
    pub(crate) pref: f64,
    pub(crate) pref0: f64,
    /// Seconds the method may run; 0 means the directive's default.
    pub(crate) budget: f64,
    pub(crate) stats: OpStats,
    pub(crate) disabled: bool,
    pub(crate) learned: bool,
    pub(crate) source: Option<Vec<String>>,
}

impl Operator {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DirKind {
        self.kind
    }

    pub fn trigger(&self) -> &Graphlet {
        &self.trigger
    }

    pub fn cond(&self) -> &Graphlet {
        &self.cond
    }

    pub fn method(&self) -> &ChainSpec {
        &self.method
    }

    pub fn pref(&self) -> f64 {
        self.pref
    }

    /// The preference the operator was defined with; successes pull toward it.
    pub fn rest_pref(&self) -> f64 {
        self.pref0
    }

    pub fn budget(&self) -> f64 {
        self.budget
    }

    pub fn stats(&self) -> &OpStats {
        &self.stats
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn learned(&self) -> bool {
        self.learned
    }

    /// Whether the definition differs from its source text.
    pub fn dirty(&self) -> bool {
        self.source.is_none()
    }
}

/// A pattern → result inference.
#[derive(Debug, Clone)]
pub struct Rule {
    pub(crate) id: RuleId,
    pub(crate) name: String,
    pub(crate) pattern: Graphlet,
    pub(crate) result: Graphlet,
    pub(crate) conf: f64,
    pub(crate) disabled: bool,
    pub(crate) learned: bool,
    pub(crate) source: Option<Vec<String>>,
}

impl Rule {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Graphlet {
        &self.pattern
    }

    pub fn result(&self) -> &Graphlet {
        &self.result
    }

    pub fn conf(&self) -> f64 {
        self.conf
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    pub fn learned(&self) -> bool {
        self.learned
    }

    pub fn dirty(&self) -> bool {
        self.source.is_none()
    }
}

/// Position of a definition or free text in the library file.
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    Text(Vec<String>),
    Op(OpId),
    Rule(RuleId),
}

/// Indexed store of operators and rules.
#[derive(Debug, Clone)]
pub struct Library {
    pool: NodePool,
    ops: Vec<Operator>,
    rules: Vec<Rule>,
    pub(crate) layout: Vec<Entry>,
    pub(crate) trailing_newline: bool,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

/// Maximum nodes held by a library pool.
const LIBRARY_CAPACITY: usize = 100_000;
/// Maximum arguments per library node.
const LIBRARY_MAX_ARGS: usize = 16;

impl Library {
    pub fn new() -> Self {
        Self {
            pool: NodePool::new(LIBRARY_CAPACITY, LIBRARY_MAX_ARGS),
            ops: Vec::new(),
            rules: Vec::new(),
            layout: Vec::new(),
            trailing_newline: true,
        }
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut NodePool {
        &mut self.pool
    }

    pub fn ops(&self) -> impl Iterator<Item = &Operator> {
        self.ops.iter()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn op(&self, id: OpId) -> Option<&Operator> {
        self.ops.get(id.index())
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.index())
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn op_by_name(&self, name: &str) -> LibraryResult<OpId> {
        self.ops
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.id)
            .ok_or_else(|| LibraryError::UnknownOperator {
                name: name.to_string(),
            })
    }

    pub fn rule_by_name(&self, name: &str) -> LibraryResult<RuleId> {
        self.rules
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.id)
            .ok_or_else(|| LibraryError::UnknownRule {
                name: name.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Installation
    // -----------------------------------------------------------------------

    fn op_signature(&self, kind: DirKind, trigger: &Graphlet, cond: &Graphlet, method: &ChainSpec) -> String {
        let mut all = trigger.clone();
        for id in cond.iter() {
            all.push(id);
        }
        let head = crate::graph::text::canonical(&self.pool, &all);
        format!("{} {head} :: {}", kind.name(), method.canonical(&self.pool))
    }

    fn rule_signature(&self, pattern: &Graphlet, result: &Graphlet) -> String {
        let mut all = pattern.clone();
        for id in result.iter() {
            all.push(id);
        }
        crate::graph::text::canonical(&self.pool, &all)
    }

    /// Install an operator whose graphlets already live in the library pool.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn install_op(
        &mut self,
        name: &str,
        kind: DirKind,
        trigger: Graphlet,
        cond: Graphlet,
        method: ChainSpec,
        pref: f64,
        budget: f64,
        learned: bool,
        source: Option<Vec<String>>,
    ) -> LibraryResult<OpId> {
        let sig = self.op_signature(kind, &trigger, &cond, &method);
        if let Some(dup) = self
            .ops
            .iter()
            .find(|o| self.op_signature(o.kind, &o.trigger, &o.cond, &o.method) == sig)
        {
            return Err(LibraryError::Duplicate {
                what: "operator",
                existing: dup.name.clone(),
            });
        }
        let id = OpId(self.ops.len() as u32);
        let pref = pref.clamp(0.0, 1.0);
        self.ops.push(Operator {
            id,
            name: name.to_string(),
            kind,
            trigger,
            cond,
            method,
            pref,
            pref0: pref,
            budget,
            stats: OpStats::default(),
            disabled: false,
            learned,
            source,
        });
        self.layout.push(Entry::Op(id));
        Ok(id)
    }

    pub(crate) fn install_rule(
        &mut self,
        name: &str,
        pattern: Graphlet,
        result: Graphlet,
        conf: f64,
        learned: bool,
        source: Option<Vec<String>>,
    ) -> LibraryResult<RuleId> {
        let sig = self.rule_signature(&pattern, &result);
        if let Some(dup) = self
            .rules
            .iter()
            .find(|r| self.rule_signature(&r.pattern, &r.result) == sig)
        {
            return Err(LibraryError::Duplicate {
                what: "rule",
                existing: dup.name.clone(),
            });
        }
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule {
            id,
            name: name.to_string(),
            pattern,
            result,
            conf: conf.clamp(0.0, 1.0),
            disabled: false,
            learned,
            source,
        });
        self.layout.push(Entry::Rule(id));
        Ok(id)
    }

    /// Learn a rule from working-memory graphlets (an ADD payload).
    ///
    /// Anonymous objects are generalized into variables; nicknamed constants
    /// stay constants.
    pub fn learn_rule(
        &mut self,
        wm: &NodePool,
        pattern: &Graphlet,
        result: &Graphlet,
        conf: f64,
    ) -> LibraryResult<RuleId> {
        let mut map = HashMap::new();
        let p = export_graphlet(wm, &mut self.pool, pattern, &mut map)?;
        let r = export_graphlet(wm, &mut self.pool, result, &mut map)?;
        let name = format!("learned-rule-{}", self.rules.len());
        let id = self.install_rule(&name, p, r, conf, true, None)?;
        info!(rule = %name, "learned rule");
        Ok(id)
    }

    /// Learn a single-step operator from working-memory graphlets.
    pub fn learn_op(
        &mut self,
        wm: &NodePool,
        kind: DirKind,
        trigger: &Graphlet,
        method_kind: DirKind,
        method_key: &Graphlet,
        pref: f64,
    ) -> LibraryResult<OpId> {
        let mut map = HashMap::new();
        let t = export_graphlet(wm, &mut self.pool, trigger, &mut map)?;
        let k = export_graphlet(wm, &mut self.pool, method_key, &mut map)?;
        let name = format!("learned-op-{}", self.ops.len());
        let id = self.install_op(
            &name,
            kind,
            t,
            Graphlet::new(),
            ChainSpec::single(method_kind, k),
            pref,
            0.0,
            true,
            None,
        )?;
        info!(op = %name, kind = kind.name(), "learned operator");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Adaptation
    // -----------------------------------------------------------------------

    /// Move a rule's confidence toward `target` by `rate`.
    pub fn reinforce_rule(&mut self, id: RuleId, target: f64, rate: f64) {
        if let Some(rule) = self.rules.get_mut(id.index()) {
            let next = (rule.conf + rate * (target - rule.conf)).clamp(0.0, 1.0);
            if next != rule.conf {
                rule.conf = next;
                rule.source = None;
            }
        }
    }

    /// Shift an operator's preference by `delta`, clamped to [0, 1].
    pub fn nudge_pref(&mut self, id: OpId, delta: f64) {
        if let Some(op) = self.ops.get_mut(id.index()) {
            let next = (op.pref + delta).clamp(0.0, 1.0);
            if next != op.pref {
                op.pref = next;
                op.source = None;
            }
        }
    }

    /// Record a finished method in the operator's statistics.
    pub fn record_run(&mut self, id: OpId, success: bool, seconds: f64) {
        if let Some(op) = self.ops.get_mut(id.index()) {
            op.stats.record(success, seconds);
        }
    }

    pub fn set_disabled(&mut self, id: OpId, disabled: bool) {
        if let Some(op) = self.ops.get_mut(id.index()) {
            op.disabled = disabled;
        }
    }

    /// Settle preferences after a directive finishes.
    ///
    /// `history` lists operators in the order they were tried with their
    /// outcome. Failures are nudged down by `step`. A success that a later
    /// attempt failed after is left alone; any other success is pulled
    /// toward the operator's rest preference.
    pub fn adjust_prefs(&mut self, history: &[(OpId, bool)], step: f64) {
        let mut later_failure = false;
        for (op, ok) in history.iter().rev() {
            if *ok {
                if !later_failure {
                    if let Some(o) = self.ops.get(op.index()) {
                        let delta = step * (o.pref0 - o.pref);
                        self.nudge_pref(*op, delta);
                    }
                }
            } else {
                self.nudge_pref(*op, -step);
                later_failure = true;
            }
        }
    }

    /// Replace step `at` of an operator's method with a segment exported
    /// from working memory. Running instances keep their copy.
    pub fn replace_step(
        &mut self,
        id: OpId,
        at: usize,
        wm: &NodePool,
        segment: &ChainSpec,
    ) -> LibraryResult<()> {
        if self.ops.get(id.index()).is_none() {
            return Err(LibraryError::UnknownOperator {
                name: id.to_string(),
            });
        }
        let mut map = HashMap::new();
        let exported = export_chain(wm, &mut self.pool, segment, &mut map)?;
        let op = &mut self.ops[id.index()];
        op.method.splice(at, &exported);
        op.source = None;
        info!(op = %op.name, step = at, added = exported.len(), "operator method edited");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instantiation
    // -----------------------------------------------------------------------

    /// Copy an operator's method into working memory.
    ///
    /// Library nodes bound in `bindings` become their images; other
    /// variables get fresh working-memory variables shared by all steps;
    /// nicknamed constants resolve to working-memory constants.
    pub fn instantiate(
        &self,
        id: OpId,
        bindings: &Bindings,
        wm: &mut NodePool,
    ) -> GraphResult<ChainSpec> {
        let Some(op) = self.op(id) else {
            return Ok(ChainSpec::default());
        };
        let mut map: HashMap<NodeId, NodeId> = bindings.pairs().iter().copied().collect();
        let mut spec = op.method.clone();
        for step in &mut spec.steps {
            step.key = import_graphlet(&self.pool, wm, &step.key, &mut map)?;
            if let Some(payload) = &mut step.payload {
                match payload {
                    Payload::Rule { pattern, result } => {
                        *pattern = import_graphlet(&self.pool, wm, pattern, &mut map)?;
                        *result = import_graphlet(&self.pool, wm, result, &mut map)?;
                    }
                    Payload::Op {
                        trigger,
                        method_key,
                        ..
                    } => {
                        *trigger = import_graphlet(&self.pool, wm, trigger, &mut map)?;
                        *method_key = import_graphlet(&self.pool, wm, method_key, &mut map)?;
                    }
                }
            }
        }
        Ok(spec)
    }
}

// ---------------------------------------------------------------------------
// Cross-pool copies
// ---------------------------------------------------------------------------

fn copy_node(
    src: &NodePool,
    dst: &mut NodePool,
    id: NodeId,
    map: &mut HashMap<NodeId, NodeId>,
    generalize: bool,
) -> GraphResult<NodeId> {
    if let Some(done) = map.get(&id) {
        return Ok(*done);
    }
    let node = src.node(id)?.clone();
    let copy = match node.name() {
        NodeName::Nick(nick) if node.is_object() => match dst.by_nick(nick) {
            Some(existing) => existing,
            None => {
                let c = dst.create_named("", "", NodeName::Nick(nick.clone()))?;
                if !generalize {
                    dst.set_band(c, Some(Band::Main))?;
                }
                c
            }
        },
        _ if node.is_object() && node.kind().is_empty() => {
            let name = match node.name() {
                NodeName::Var(v) => v.clone(),
                _ => format!("o{}", id.raw()),
            };
            let c = dst.create_named("", "", NodeName::Var(name))?;
            dst.set_tags(c, node.tags())?;
            c
        }
        _ => {
            let c = dst.create(node.kind(), node.lex())?;
            map.insert(id, c);
            for (role, target) in node.args() {
                let t = copy_node(src, dst, *target, map, generalize)?;
                dst.add_arg(c, role, t)?;
            }
            dst.set_neg(c, node.neg())?;
            if node.belief() < 1.0 {
                dst.set_belief(c, node.belief())?;
            }
            dst.set_tags(c, node.tags())?;
            if let NodeName::Var(v) = node.name() {
                dst.set_name(c, NodeName::Var(v.clone()))?;
            }
            c
        }
    };
    map.insert(id, copy);
    Ok(copy)
}

/// Copy a library graphlet into working memory as description nodes.
pub(crate) fn import_graphlet(
    lib: &NodePool,
    wm: &mut NodePool,
    g: &Graphlet,
    map: &mut HashMap<NodeId, NodeId>,
) -> GraphResult<Graphlet> {
    g.iter()
        .map(|id| copy_node(lib, wm, id, map, false))
        .collect::<GraphResult<Vec<_>>>()
        .map(Graphlet::from_items)
}

/// Copy a working-memory graphlet into the library, generalizing objects.
pub(crate) fn export_graphlet(
    wm: &NodePool,
    lib: &mut NodePool,
    g: &Graphlet,
    map: &mut HashMap<NodeId, NodeId>,
) -> GraphResult<Graphlet> {
    g.iter()
        .map(|id| copy_node(wm, lib, id, map, true))
        .collect::<GraphResult<Vec<_>>>()
        .map(Graphlet::from_items)
}

pub(crate) fn export_chain(
    wm: &NodePool,
    lib: &mut NodePool,
    spec: &ChainSpec,
    map: &mut HashMap<NodeId, NodeId>,
) -> GraphResult<ChainSpec> {
    let mut out = spec.clone();
    for step in &mut out.steps {
        step.key = export_graphlet(wm, lib, &step.key, map)?;
        if let Some(payload) = &mut step.payload {
            match payload {
                Payload::Rule { pattern, result } => {
                    *pattern = export_graphlet(wm, lib, pattern, map)?;
                    *result = export_graphlet(wm, lib, result, map)?;
                }
                Payload::Op {
                    trigger,
                    method_key,
                    ..
                } => {
                    *trigger = export_graphlet(wm, lib, trigger, map)?;
                    *method_key = export_graphlet(wm, lib, method_key, map)?;
                }
            }
        }
    }
    Ok(out)
}
