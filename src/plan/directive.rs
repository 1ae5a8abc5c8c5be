//! The directive record and the operator-attempt machinery kinds share.
//!
//! Every kind goes through the same three entry points. `start` first
//! substitutes the enclosing scope into the key (recording every rewrite so
//! it can be undone), then dispatches to the kind; `status` polls; `stop`
//! cancels whatever the kind has running. Kind-specific state lives in
//! [`State`], one variant per family, matched once per entry point.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::act::{DoState, GndState};
use super::chain::Chain;
use super::context::{Context, FailureRecord};
use super::find::FindState;
use super::goal::GoalState;
use super::note::NoteState;
use super::script::{ChainSpec, Payload};
use super::{DirKind, PlanError, PlanResult, Status};
use crate::graph::{Bindings, Graphlet, NodeId, NodePool, SubstLog};
use crate::io::Source;
use crate::library::{Choice, OpId, Tried};

/// Kind-specific state.
#[derive(Debug)]
pub(crate) enum State {
    Idle,
    Note(NoteState),
    Do(DoState),
    /// A negated DO waiting for the scheduler to service its halt.
    Halt,
    Gnd(GndState),
    Wait,
    Goal(GoalState),
    Find(FindState),
    Esc,
}

/// Pairs of `b` whose pattern node is a variable (an unbanded object).
pub(crate) fn var_pairs(pool: &NodePool, b: &Bindings) -> Bindings {
    let mut out = Bindings::new();
    for (p, i) in b.pairs() {
        let var = pool
            .get(*p)
            .is_some_and(|n| n.is_object() && n.band().is_none());
        if var && !out.is_bound(*p) {
            out.bind(*p, *i);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Operator attempts
// ---------------------------------------------------------------------------

/// A method running on behalf of a directive.
#[derive(Debug)]
pub(crate) struct MethodRun {
    pub op: OpId,
    pub chain: Box<Chain>,
    started: u64,
    deadline: Option<u64>,
}

/// Operators tried by one directive, their verdicts, and the running method.
#[derive(Debug, Default)]
pub(crate) struct Deliberation {
    pub tried: Vec<Tried>,
    pub history: Vec<(OpId, bool)>,
    pub run: Option<MethodRun>,
}

/// A finished method.
#[derive(Debug)]
pub(crate) struct MethodOutcome {
    pub status: Status,
    /// The method chain's scope when it finished.
    pub scope: Bindings,
}

impl Deliberation {
    pub fn running(&self) -> bool {
        self.run.is_some()
    }

    /// Applicable operators for `key` not yet tried with an equivalent
    /// binding.
    pub fn choices(
        &self,
        ctx: &mut Context,
        kind: DirKind,
        key: &Graphlet,
        partial: bool,
    ) -> PlanResult<Vec<Choice>> {
        Ok(ctx
            .lib
            .get_choices(&mut ctx.wmem, kind, key, &self.tried, &ctx.mood, partial)?)
    }

    /// Draw one of `choices` and start its method as a subgoal at
    /// `depth + 1`. `budget` (seconds) applies when the operator has none
    /// of its own. Returns the index of the chosen choice.
    pub fn launch(
        &mut self,
        ctx: &mut Context,
        choices: &[Choice],
        depth: usize,
        budget: Option<f64>,
    ) -> PlanResult<Option<usize>> {
        if self.tried.len() >= ctx.config.plan.nri_max {
            return Err(PlanError::Overflow {
                what: "NRI history",
                limit: ctx.config.plan.nri_max,
            });
        }
        if depth + 1 > ctx.config.plan.max_depth {
            return Err(PlanError::Overflow {
                what: "subgoal depth",
                limit: ctx.config.plan.max_depth,
            });
        }
        let wild = ctx.mood.wild;
        let Some(idx) = ctx.lib.choose(choices, wild, &mut ctx.rng) else {
            return Ok(None);
        };
        let choice = &choices[idx];
        self.tried.push((choice.op, choice.signature.clone()));

        let mut spec = ctx
            .lib
            .instantiate(choice.op, &choice.bindings, ctx.wmem.pool_mut())?;
        if !choice.residual.is_empty() {
            spec.push_check(choice.residual.clone());
        }
        let (name, op_budget) = match ctx.lib.op(choice.op) {
            Some(op) => (op.name().to_string(), op.budget()),
            None => (choice.op.to_string(), 0.0),
        };
        let chain = Chain::new(spec, Bindings::new(), Some(choice.op), &name, depth + 1, None)?;
        let seconds = if op_budget > 0.0 { Some(op_budget) } else { budget };
        let deadline = seconds.map(|s| ctx.tick + ctx.ticks_for(s));
        debug!(tick = ctx.tick, op = %name, depth = depth + 1, "method launched");
        self.run = Some(MethodRun {
            op: choice.op,
            chain: Box::new(chain),
            started: ctx.tick,
            deadline,
        });
        Ok(Some(idx))
    }

    /// Tick the running method; its outcome once it finished.
    pub fn poll(&mut self, ctx: &mut Context) -> Option<MethodOutcome> {
        let run = self.run.as_mut()?;
        let mut status = run.chain.tick(ctx);
        if status == Status::Working {
            match run.deadline {
                Some(deadline) if ctx.tick >= deadline => {
                    debug!(tick = ctx.tick, op = %run.op, "method over budget");
                    run.chain.stop(ctx);
                    status = Status::Fail;
                }
                _ => return None,
            }
        }
        let run = self.run.take()?;
        let success = status.is_success();
        let seconds = ctx
            .config
            .seconds_for(ctx.tick.saturating_sub(run.started) + 1);
        ctx.lib.record_run(run.op, success, seconds);
        self.history.push((run.op, success));
        if !success {
            if let Some(step) = run.chain.failed_at() {
                ctx.log_failure(FailureRecord {
                    op: run.op,
                    step,
                    key: run.chain.step_key(step),
                    tick: ctx.tick,
                });
            }
        }
        Some(MethodOutcome {
            status,
            scope: run.chain.scope().clone(),
        })
    }

    /// Turn the newest recorded success into a failure.
    pub fn demote_last(&mut self) {
        if let Some(last) = self.history.last_mut() {
            last.1 = false;
        }
    }

    pub fn stop(&mut self, ctx: &mut Context) {
        if let Some(mut run) = self.run.take() {
            run.chain.stop(ctx);
            self.history.push((run.op, false));
        }
    }

    /// Settle operator preferences once the directive is over.
    pub fn settle(&mut self, ctx: &mut Context) {
        if !self.history.is_empty() {
            ctx.lib.adjust_prefs(&self.history, ctx.config.plan.pref_step);
            self.history.clear();
        }
    }

    fn mark_seeds(&self, seeds: &mut HashSet<NodeId>) {
        for (_, sig) in &self.tried {
            seeds.extend(sig.iter().map(|(_, img)| *img));
        }
        if let Some(run) = &self.run {
            run.chain.mark_seeds(seeds);
        }
    }
}

// ---------------------------------------------------------------------------
// Directive
// ---------------------------------------------------------------------------

/// One step of a plan.
#[derive(Debug)]
pub struct Directive {
    pub(crate) id: u64,
    pub(crate) kind: DirKind,
    pub(crate) key: Graphlet,
    pub(crate) payload: Option<Payload>,
    pub(crate) depth: usize,
    pub(crate) source: Option<Source>,
    /// Name of the operator (or input source) whose chain owns this step.
    pub(crate) nick: String,
    pub(crate) state: State,
    pub(crate) delib: Deliberation,
    verdict: Option<Status>,
    begun: bool,
    /// Rewrites applied to the key, oldest first.
    substs: Vec<SubstLog>,
    /// New bindings produced for the enclosing scope.
    pub(crate) focus: Bindings,
    /// Focus images produced so far.
    pub(crate) guesses: Vec<NodeId>,
    /// Hypothetical nodes this directive assumed.
    pub(crate) hypo: Vec<NodeId>,
    pub(crate) started: u64,
    /// Steps after an EDIT, for splicing into the blamed operator.
    pub(crate) remainder: Option<ChainSpec>,
    blocked_traced: bool,
}

impl Directive {
    pub(crate) fn new(
        ctx: &mut Context,
        kind: DirKind,
        key: Graphlet,
        payload: Option<Payload>,
        depth: usize,
        source: Option<Source>,
        nick: &str,
    ) -> Self {
        Self {
            id: ctx.next_id(),
            kind,
            key,
            payload,
            depth,
            source,
            nick: nick.to_string(),
            state: State::Idle,
            delib: Deliberation::default(),
            verdict: None,
            begun: false,
            substs: Vec::new(),
            focus: Bindings::new(),
            guesses: Vec::new(),
            hypo: Vec::new(),
            started: 0,
            remainder: None,
            blocked_traced: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DirKind {
        self.kind
    }

    pub fn key(&self) -> &Graphlet {
        &self.key
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn verdict(&self) -> Option<Status> {
        self.verdict
    }

    pub(crate) fn begun(&self) -> bool {
        self.begun
    }

    /// Started and not finished.
    pub fn active(&self) -> bool {
        self.begun && self.verdict.is_none()
    }

    /// The running method, if any.
    pub(crate) fn method(&self) -> Option<&Chain> {
        self.delib.run.as_ref().map(|r| r.chain.as_ref())
    }

    pub(crate) fn method_mut(&mut self) -> Option<&mut Chain> {
        self.delib.run.as_mut().map(|r| r.chain.as_mut())
    }

    /// Rewrite the key with `scope`, keeping the log for `release`.
    pub(crate) fn substitute(&mut self, ctx: &mut Context, scope: &Bindings) -> PlanResult<()> {
        let log = SubstLog::apply(ctx.wmem.pool_mut(), &mut self.key, scope)?;
        if !log.is_empty() {
            self.substs.push(log);
        }
        Ok(())
    }

    /// Substitute the scope into the key and begin.
    pub fn start(&mut self, ctx: &mut Context, scope: &Bindings) -> Status {
        self.begun = true;
        self.started = ctx.tick;
        if let Err(e) = self.substitute(ctx, scope) {
            warn!(tick = ctx.tick, kind = self.kind.name(), error = %e, "key substitution failed");
            return self.conclude(ctx, Status::Fail);
        }
        let result = match self.kind {
            DirKind::Note => self.start_note(ctx),
            DirKind::Do | DirKind::Ante | DirKind::Gate => self.start_do(ctx),
            DirKind::Gnd => self.start_gnd(ctx),
            DirKind::Wait => self.start_wait(ctx),
            DirKind::Ach | DirKind::Chk => self.start_goal(ctx),
            DirKind::Find | DirKind::Bind | DirKind::Each | DirKind::Any => self.start_find(ctx),
            DirKind::Esc => self.start_esc(ctx),
            DirKind::Punt => Ok(Status::Punt),
            DirKind::Add => self.start_add(ctx),
            DirKind::Edit => self.start_edit(ctx),
        };
        let status = self.recover(ctx, result);
        self.conclude(ctx, status)
    }

    /// Poll.
    pub fn status(&mut self, ctx: &mut Context) -> Status {
        if let Some(status) = self.verdict {
            return status;
        }
        if !self.begun {
            return Status::Working;
        }
        let result = match self.state {
            State::Idle => Ok(Status::Fail),
            State::Note(_) => self.poll_note(ctx),
            State::Do(_) => self.poll_do(ctx),
            State::Halt => self.poll_halt(ctx),
            State::Gnd(_) => self.poll_gnd(ctx),
            State::Wait => self.poll_wait(ctx),
            State::Goal(_) => self.poll_goal(ctx),
            State::Find(_) => self.poll_find(ctx),
            State::Esc => self.poll_esc(ctx),
        };
        let status = self.recover(ctx, result);
        self.conclude(ctx, status)
    }

    /// Cancel whatever is running. Idempotent.
    pub fn stop(&mut self, ctx: &mut Context) {
        if !self.active() {
            return;
        }
        self.cancel(ctx);
        self.verdict = Some(Status::Stopped);
        self.delib.settle(ctx);
        ctx.trace(self.depth, Status::Stopped, self.kind, &self.key, &self.nick);
    }

    /// Stop and undo every key rewrite, ready to be discarded.
    pub(crate) fn release(&mut self, ctx: &mut Context) {
        self.stop(ctx);
        while let Some(log) = self.substs.pop() {
            if let Err(e) = log.revert(ctx.wmem.pool_mut(), &mut self.key) {
                warn!(kind = self.kind.name(), error = %e, "key rewrite could not be undone");
            }
        }
    }

    /// Re-enter an iterating directive from a later step: the next poll
    /// produces its next candidate.
    pub(crate) fn resume(&mut self) -> bool {
        if self.kind.iterates() && matches!(self.verdict, Some(Status::Done)) {
            self.verdict = None;
            self.blocked_traced = false;
            self.focus = Bindings::new();
            return true;
        }
        false
    }

    /// Stop a live action on behalf of a halting DO.
    pub(crate) fn halt(&mut self, ctx: &mut Context) -> bool {
        if !self.active() {
            return false;
        }
        self.cancel(ctx);
        ctx.remark(self.depth, "HALTED");
        self.conclude(ctx, Status::Fail);
        true
    }

    fn cancel(&mut self, ctx: &mut Context) {
        self.delib.stop(ctx);
        match &mut self.state {
            State::Gnd(g) => g.stop(ctx),
            State::Halt => ctx.forget_halt(self.id),
            _ => {}
        }
    }

    fn recover(&mut self, ctx: &mut Context, result: PlanResult<Status>) -> Status {
        match result {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    tick = ctx.tick,
                    kind = self.kind.name(),
                    depth = self.depth,
                    error = %e,
                    "directive failed"
                );
                self.cancel(ctx);
                Status::Fail
            }
        }
    }

    /// Record a verdict: trace it, settle preferences, feed the mood.
    fn conclude(&mut self, ctx: &mut Context, status: Status) -> Status {
        if status == Status::Working {
            let waiting = matches!(self.state, State::Wait | State::Esc);
            if waiting && !self.blocked_traced {
                self.blocked_traced = true;
                ctx.trace(self.depth, Status::Working, self.kind, &self.key, &self.nick);
            }
            return status;
        }
        self.delib.settle(ctx);
        if matches!(status, Status::Done | Status::Alt | Status::Fail) {
            ctx.mood.record(status.is_success());
        }
        ctx.trace(self.depth, status, self.kind, &self.key, &self.nick);
        self.verdict = Some(status);
        status
    }

    /// Every node this directive keeps alive.
    pub(crate) fn mark_seeds(&self, seeds: &mut HashSet<NodeId>) {
        seeds.extend(self.key.iter());
        for log in &self.substs {
            seeds.extend(log.originals());
        }
        match &self.payload {
            Some(Payload::Rule { pattern, result }) => {
                seeds.extend(pattern.iter());
                seeds.extend(result.iter());
            }
            Some(Payload::Op {
                trigger,
                method_key,
                ..
            }) => {
                seeds.extend(trigger.iter());
                seeds.extend(method_key.iter());
            }
            None => {}
        }
        if let Some(rest) = &self.remainder {
            for g in rest.graphlets() {
                seeds.extend(g.iter());
            }
        }
        seeds.extend(self.focus.images());
        seeds.extend(self.guesses.iter().copied());
        seeds.extend(self.hypo.iter().copied());
        if let State::Find(f) = &self.state {
            f.mark_seeds(seeds);
        }
        self.delib.mark_seeds(seeds);
    }
}
