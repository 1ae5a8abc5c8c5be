//! Running chains: one live directive at a time, links, scope and loops.
//!
//! A chain walks its template one transition per tick: a tick either starts
//! the step at the program counter or polls it once. Completed steps stay
//! in place so a later step can loop back to an EACH/ANY/FIND/BIND and ask
//! it for its next candidate. Entering a step from an earlier one restarts
//! it from scratch.

use std::collections::HashSet;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, warn};

use super::directive::Directive;
use super::script::{ChainSpec, Link};
use super::{Context, DirKind, PlanError, PlanResult, Status};
use crate::error::SchemaError;
use crate::graph::{Bindings, Graphlet, NodeId, NodePool};
use crate::io::Source;
use crate::library::OpId;
use crate::memory::{MatchOpts, NegMode, matcher};

/// Reject links that leave the template and cycles with no iterating step.
fn validate(spec: &ChainSpec) -> PlanResult<()> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..spec.len()).map(|i| graph.add_node(i)).collect();
    for (i, step) in spec.steps.iter().enumerate() {
        for link in [step.cont, step.alt] {
            if let Link::Step(j) = link {
                let Some(target) = nodes.get(j) else {
                    return Err(SchemaError::new(i + 1, format!("link to missing step {j}")).into());
                };
                graph.update_edge(nodes[i], *target, ());
            }
        }
    }
    for scc in tarjan_scc(&graph) {
        let looped = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if !looped {
            continue;
        }
        let anchored = scc
            .iter()
            .any(|n| spec.steps[graph[*n]].kind.iterates());
        if !anchored {
            let mut members: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
            members.sort_unstable();
            return Err(PlanError::Cycle {
                detail: format!("steps {members:?} loop without an EACH, ANY, FIND or BIND"),
            });
        }
    }
    Ok(())
}

/// A copy of `key` whose clauses no longer change when the live key's
/// rewrites are undone.
fn snapshot(pool: &mut NodePool, key: &Graphlet) -> Graphlet {
    let mut out = Graphlet::new();
    for id in key.iter() {
        let clause = pool.get(id).is_some_and(|n| !n.is_object());
        let copy = if clause {
            pool.clone_node(id, true).unwrap_or(id)
        } else {
            id
        };
        out.push(copy);
    }
    out
}

/// A running instance of a chain template.
#[derive(Debug)]
pub struct Chain {
    spec: ChainSpec,
    steps: Vec<Option<Directive>>,
    /// Scope length when each step was entered.
    marks: Vec<usize>,
    pc: Option<usize>,
    scope: Bindings,
    op: Option<OpId>,
    nick: String,
    depth: usize,
    source: Option<Source>,
    status: Status,
    failed: Option<(usize, Graphlet)>,
    /// Consecutive loop passes with no blocking and no memory change.
    idle: u32,
    last_version: u64,
    blocked: bool,
}

impl Chain {
    /// Validate `spec` and get ready to run it under `scope`.
    pub fn new(
        spec: ChainSpec,
        scope: Bindings,
        op: Option<OpId>,
        nick: &str,
        depth: usize,
        source: Option<Source>,
    ) -> PlanResult<Self> {
        validate(&spec)?;
        let n = spec.len();
        Ok(Self {
            steps: (0..n).map(|_| None).collect(),
            marks: vec![scope.len(); n],
            pc: if n == 0 { None } else { Some(0) },
            spec,
            scope,
            op,
            nick: nick.to_string(),
            depth,
            source,
            status: Status::Working,
            failed: None,
            idle: 0,
            last_version: 0,
            blocked: false,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn op(&self) -> Option<OpId> {
        self.op
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn source(&self) -> Option<Source> {
        self.source
    }

    pub fn spec(&self) -> &ChainSpec {
        &self.spec
    }

    /// Bindings accumulated by FIND/BIND/EACH/ANY steps so far.
    pub fn scope(&self) -> &Bindings {
        &self.scope
    }

    /// The step that failed the chain, if it failed.
    pub fn failed_at(&self) -> Option<usize> {
        self.failed.as_ref().map(|(i, _)| *i)
    }

    /// Key of step `i`. For the failing step this is the key as it was
    /// when it failed, with scope bindings in place.
    pub fn step_key(&self, i: usize) -> Graphlet {
        match &self.failed {
            Some((at, key)) if *at == i => key.clone(),
            _ => self
                .spec
                .steps
                .get(i)
                .map(|s| s.key.clone())
                .unwrap_or_default(),
        }
    }

    /// Advance by one transition.
    pub fn tick(&mut self, ctx: &mut Context) -> Status {
        if self.status != Status::Working {
            return self.status;
        }
        let Some(pc) = self.pc else {
            return self.finish(ctx, Status::Done);
        };

        let status = match &mut self.steps[pc] {
            Some(d) if d.begun() => d.status(ctx),
            slot => {
                let step = &self.spec.steps[pc];
                let mut d = Directive::new(
                    ctx,
                    step.kind,
                    step.key.clone(),
                    step.payload.clone(),
                    self.depth,
                    self.source,
                    &self.nick,
                );
                if step.kind == DirKind::Edit {
                    d.remainder = Some(self.spec.tail(pc + 1));
                }
                let d = slot.insert(d);
                d.start(ctx, &self.scope)
            }
        };
        if status == Status::Working {
            self.blocked = true;
            return Status::Working;
        }
        self.complete(ctx, pc, status)
    }

    /// Route a finished step along its links.
    fn complete(&mut self, ctx: &mut Context, pc: usize, status: Status) -> Status {
        let step = &self.spec.steps[pc];
        let next = match status {
            Status::Done => step.cont,
            Status::Alt => step.alt,
            Status::Fail if step.alt_explicit => step.alt,
            Status::Fail => Link::Fail,
            Status::Stopped | Status::Punt | Status::Working => {
                return self.finish(ctx, status);
            }
        };

        let mark = self.marks[pc];
        self.scope.truncate(mark);
        if status.is_success() {
            if let Some(d) = &self.steps[pc] {
                self.scope.merge(&d.focus);
            }
        }

        match next {
            Link::Done => self.finish(ctx, Status::Done),
            Link::Fail => {
                let key = match &self.steps[pc] {
                    Some(d) => snapshot(ctx.wmem.pool_mut(), d.key()),
                    None => step.key.clone(),
                };
                self.failed = Some((pc, key));
                self.finish(ctx, Status::Fail)
            }
            Link::Step(n) => self.enter(ctx, pc, n),
        }
    }

    fn enter(&mut self, ctx: &mut Context, from: usize, to: usize) -> Status {
        if to <= from && !self.loop_progress(ctx) {
            warn!(
                tick = ctx.tick,
                nick = %self.nick,
                passes = self.idle,
                "chain loops without progress"
            );
            let err = PlanError::Cycle {
                detail: format!("step {to} re-entered {} times with no progress", self.idle),
            };
            debug!(error = %err, "chain abandoned");
            return self.finish(ctx, Status::Fail);
        }

        if to <= from {
            if let Some(d) = &mut self.steps[to] {
                if d.resume() {
                    self.scope.truncate(self.marks[to]);
                    self.pc = Some(to);
                    return Status::Working;
                }
            }
        }
        if let Some(mut old) = self.steps[to].take() {
            old.release(ctx);
        }
        self.marks[to] = self.scope.len();
        self.pc = Some(to);
        Status::Working
    }

    /// Account for one pass around a loop. False once the chain has gone
    /// round too often without blocking or touching working memory.
    fn loop_progress(&mut self, ctx: &Context) -> bool {
        let version = ctx.wmem.version();
        if self.blocked || version != self.last_version {
            self.idle = 0;
        } else {
            self.idle += 1;
        }
        self.blocked = false;
        self.last_version = version;
        self.idle <= ctx.config.plan.max_loop
    }

    /// End the chain and release every directive it still holds.
    fn finish(&mut self, ctx: &mut Context, status: Status) -> Status {
        for slot in self.steps.iter_mut().rev() {
            if let Some(mut d) = slot.take() {
                d.release(ctx);
            }
        }
        self.pc = None;
        self.status = status;
        status
    }

    /// Cancel the live step and its methods. Idempotent.
    pub fn stop(&mut self, ctx: &mut Context) {
        if self.status == Status::Working {
            if let Some(d) = self.pc.and_then(|pc| self.steps[pc].as_mut()) {
                d.stop(ctx);
            }
            self.finish(ctx, Status::Stopped);
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    fn live(&self) -> impl Iterator<Item = &Directive> {
        self.steps.iter().flatten().filter(|d| d.active())
    }

    /// Deepest level reached by this chain and its running methods.
    pub fn max_depth(&self) -> usize {
        self.live()
            .filter_map(|d| d.method())
            .map(Chain::max_depth)
            .fold(self.depth, usize::max)
    }

    /// Live directives in this chain and its running methods.
    pub fn num_goals(&self) -> usize {
        self.live()
            .map(|d| 1 + d.method().map_or(0, Chain::num_goals))
            .sum()
    }

    /// Every node the chain keeps alive.
    pub fn mark_seeds(&self, seeds: &mut HashSet<NodeId>) {
        for g in self.spec.graphlets() {
            seeds.extend(g.iter());
        }
        for (pattern, image) in self.scope.pairs() {
            seeds.insert(*pattern);
            seeds.insert(*image);
        }
        if let Some((_, key)) = &self.failed {
            seeds.extend(key.iter());
        }
        for d in self.steps.iter().flatten() {
            d.mark_seeds(seeds);
        }
    }

    /// Halt every live DO or GND whose key is the negation of `pattern`.
    /// Matching directives are not searched further. Returns how many were
    /// halted.
    pub fn halt_active(&mut self, ctx: &mut Context, pattern: &Graphlet, requester: u64) -> usize {
        let mut halted = 0;
        for slot in &mut self.steps {
            let Some(d) = slot.as_mut() else {
                continue;
            };
            if !d.active() || d.id() == requester {
                continue;
            }
            let acts = matches!(d.kind(), DirKind::Do | DirKind::Gnd);
            if acts && key_matches(ctx.wmem.pool(), pattern, d.key(), NegMode::Anti) {
                if d.halt(ctx) {
                    debug!(tick = ctx.tick, kind = d.kind().name(), "live action halted");
                    halted += 1;
                }
                continue;
            }
            if let Some(m) = d.method_mut() {
                halted += m.halt_active(ctx, pattern, requester);
            }
        }
        halted
    }

    /// Names of the chains leading to a live directive whose key matches
    /// `pattern`, outermost first. Answers "why are you doing that?".
    pub fn find_call(&self, pool: &NodePool, pattern: &Graphlet) -> Option<Vec<String>> {
        for d in self.live() {
            if key_matches(pool, pattern, d.key(), NegMode::Strict) {
                return Some(vec![self.nick.clone()]);
            }
            if let Some(mut path) = d.method().and_then(|m| m.find_call(pool, pattern)) {
                path.insert(0, self.nick.clone());
                return Some(path);
            }
        }
        None
    }
}

fn key_matches(pool: &NodePool, pattern: &Graphlet, key: &Graphlet, neg: NegMode) -> bool {
    let opts = MatchOpts::default().neg(neg).within(key.items());
    matcher::first_match(pool, pattern, pool, &Bindings::new(), &opts).is_some()
}
