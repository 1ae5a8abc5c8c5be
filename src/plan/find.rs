//! FIND, BIND, EACH and ANY: directives that bind a focus variable.
//!
//! Candidates are the groundings of the key in working memory, one per
//! distinct binding of the key's variables. Each success hands one
//! candidate to the chain; a chain looping back resumes the directive for
//! the next one. When the candidates run out, operators that establish part
//! of the key get a turn (any uncovered remainder is checked by a CHK
//! appended to their method), and then the kind decides: FIND may imagine
//! the object, BIND always does, EACH succeeds if it produced anything, ANY
//! always succeeds.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::directive::{Directive, State, var_pairs};
use super::{Context, DirKind, PlanError, PlanResult, Status};
use crate::graph::{Band, Bindings, Graphlet, NodeId, NodePool};
use crate::memory::MatchOpts;

#[derive(Debug, Default)]
pub(crate) struct FindState {
    pending: VecDeque<Bindings>,
    /// Signatures of every candidate handed out.
    seen: Vec<Vec<(NodeId, NodeId)>>,
    produced: u32,
}

impl FindState {
    pub fn mark_seeds(&self, seeds: &mut HashSet<NodeId>) {
        for b in &self.pending {
            seeds.extend(b.images());
        }
        for sig in &self.seen {
            seeds.extend(sig.iter().map(|(_, i)| *i));
        }
    }
}

fn is_var(pool: &NodePool, id: NodeId) -> bool {
    pool.get(id)
        .is_some_and(|n| n.is_object() && n.band().is_none())
}

/// The variable a FIND-like key is about: a lone object variable, else the
/// main clause's `obj`, else its first variable argument.
pub(crate) fn focus_var(pool: &NodePool, key: &Graphlet) -> Option<NodeId> {
    let main = key.main()?;
    if is_var(pool, main) {
        return Some(main);
    }
    let node = pool.get(main)?;
    node.arg("obj")
        .filter(|a| is_var(pool, *a))
        .or_else(|| {
            node.args()
                .iter()
                .map(|(_, a)| *a)
                .find(|a| is_var(pool, *a))
        })
}

/// Every variable the key mentions directly.
fn key_vars(pool: &NodePool, key: &Graphlet) -> Vec<NodeId> {
    let mut out = Vec::new();
    for item in key.iter() {
        if is_var(pool, item) {
            out.push(item);
            continue;
        }
        if let Some(node) = pool.get(item) {
            for (_, a) in node.args() {
                if is_var(pool, *a) && !out.contains(a) {
                    out.push(*a);
                }
            }
        }
    }
    out
}

impl Directive {
    pub(super) fn start_find(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let pending = self.candidates(ctx)?;
        debug!(
            tick = ctx.tick,
            kind = self.kind.name(),
            candidates = pending.len(),
            "focus candidates"
        );
        self.state = State::Find(FindState {
            pending: pending.into(),
            ..FindState::default()
        });
        self.advance(ctx)
    }

    pub(super) fn poll_find(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        if !self.delib.running() {
            // Resumed by a loop: hand out the next candidate.
            return self.advance(ctx);
        }
        let Some(out) = self.delib.poll(ctx) else {
            return Ok(Status::Working);
        };
        if out.status == Status::Punt {
            return Ok(Status::Punt);
        }
        if out.status.is_success() {
            let found = self.extract(ctx, &out.scope)?;
            if self.offer(ctx, found)? {
                return Ok(Status::Done);
            }
        }
        self.advance(ctx)
    }

    fn candidates(&mut self, ctx: &mut Context) -> PlanResult<Vec<Bindings>> {
        let bth = ctx.mood.bth;
        let opts = if self.kind == DirKind::Bind {
            let hyp = ctx.wmem.config().hyp_belief;
            MatchOpts::default()
                .band(Band::Hypo)
                .threshold(bth.min(hyp))
                .reveal()
        } else {
            MatchOpts::default().band(Band::Halo).threshold(bth)
        };
        let limit = ctx.config.plan.max_loop as usize;
        let found = ctx
            .wmem
            .find_all(&ctx.lib, &self.key, &Bindings::new(), &opts, limit)?;
        let pool = ctx.wmem.pool();
        let mut out: Vec<Bindings> = found.iter().map(|b| var_pairs(pool, b)).collect();

        // Pronoun-like FINDs prefer the most recently mentioned referent.
        if self.kind == DirKind::Find {
            if let Some(f) = focus_var(pool, &self.key) {
                let restricted = pool.get(f).is_some_and(|n| n.tags().restricts_referent());
                if restricted {
                    out.sort_by_key(|b| {
                        Reverse(
                            b.lookup(f)
                                .and_then(|i| pool.get(i))
                                .map_or(0, |n| n.mention()),
                        )
                    });
                }
            }
        }
        Ok(out)
    }

    /// Offer pending candidates, then operators, then the kind's fallback.
    fn advance(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        loop {
            let next = match &mut self.state {
                State::Find(st) => st.pending.pop_front(),
                _ => return Ok(Status::Fail),
            };
            let Some(b) = next else {
                break;
            };
            if self.offer(ctx, b)? {
                return Ok(Status::Done);
            }
        }
        let choices = self.delib.choices(ctx, self.kind, &self.key, true)?;
        if self.delib.launch(ctx, &choices, self.depth, None)?.is_some() {
            return Ok(Status::Working);
        }
        self.exhausted(ctx)
    }

    /// Bindings of the key's variables left by a successful method.
    fn extract(&self, ctx: &Context, scope: &Bindings) -> PlanResult<Bindings> {
        let pool = ctx.wmem.pool();
        let mut b = Bindings::new();
        for v in key_vars(pool, &self.key) {
            if let Some(img) = scope.lookup(v) {
                b.bind(v, img);
            }
        }
        if let Some(f) = focus_var(pool, &self.key) {
            if !b.is_bound(f) {
                return Err(PlanError::Scope { var: pool.label(f) });
            }
        }
        Ok(b)
    }

    /// Hand `b` to the chain unless an equivalent candidate was produced
    /// before.
    fn offer(&mut self, ctx: &mut Context, b: Bindings) -> PlanResult<bool> {
        let limit = ctx.config.plan.max_loop;
        let State::Find(st) = &mut self.state else {
            return Ok(false);
        };
        let sig = b.signature();
        if st.seen.contains(&sig) {
            return Ok(false);
        }
        if st.produced >= limit {
            return Err(PlanError::Overflow {
                what: "loop iterations",
                limit: limit as usize,
            });
        }
        st.seen.push(sig);
        st.produced += 1;

        let pool = ctx.wmem.pool();
        if let Some(img) = focus_var(pool, &self.key).and_then(|f| b.lookup(f)) {
            let hidden = pool.get(img).is_some_and(|n| !n.visible());
            if self.kind == DirKind::Bind && hidden && !self.hypo.contains(&img) {
                ctx.remark(self.depth, "REPEAT");
            }
            if !self.guesses.contains(&img) {
                self.guesses.push(img);
            }
        }
        self.focus = b;
        Ok(true)
    }

    fn exhausted(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let produced = match &self.state {
            State::Find(st) => st.produced,
            _ => 0,
        };
        match self.kind {
            DirKind::Each if produced > 0 => Ok(Status::Alt),
            DirKind::Any => Ok(Status::Alt),
            DirKind::Bind if produced == 0 => self.imagine(ctx),
            DirKind::Find if produced == 0 && ctx.config.plan.find_imagine => self.imagine(ctx),
            _ => Ok(Status::Fail),
        }
    }

    /// Assume the key: assert it hypothetically, hidden, at `hyp_belief`.
    fn imagine(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let hyp = ctx.wmem.config().hyp_belief;
        let mut b = Bindings::new();
        ctx.wmem.assert(None, &self.key, &mut b, hyp, Band::Hypo)?;
        for img in b.images().collect::<Vec<_>>() {
            let node = ctx.wmem.pool().node(img)?;
            if node.band() != Some(Band::Hypo) {
                continue;
            }
            let object = node.is_object();
            let pool = ctx.wmem.pool_mut();
            pool.hide(img)?;
            if object {
                pool.set_belief(img, hyp)?;
            }
            if !self.hypo.contains(&img) {
                self.hypo.push(img);
            }
        }
        ctx.remark(self.depth, "ASSUME");
        let vars = var_pairs(ctx.wmem.pool(), &b);
        if self.offer(ctx, vars)? {
            Ok(Status::Done)
        } else {
            Ok(Status::Fail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::graph::text::parse_graphlet;
    use crate::library::Library;
    use crate::trace::MemoryTracer;

    fn ctx() -> (Context, MemoryTracer) {
        let tracer = MemoryTracer::new();
        let c = Context::new(CoreConfig::default(), Library::new())
            .unwrap()
            .with_tracer(Box::new(tracer.clone()));
        (c, tracer)
    }

    fn fact(c: &mut Context, text: &str) {
        let g = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), text).unwrap();
        c.wmem
            .assert(None, &g, &mut Bindings::new(), 1.0, Band::Main)
            .unwrap();
    }

    fn directive(c: &mut Context, kind: DirKind, text: &str) -> Directive {
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), text).unwrap();
        Directive::new(c, kind, key, None, 0, None, "user")
    }

    #[test]
    fn focus_variable_choice() {
        let mut pool = NodePool::new(32, 4);
        let lone = parse_graphlet(&mut pool, Some(Band::Main), "(?x :tag female)").unwrap();
        assert_eq!(focus_var(&pool, &lone), lone.main());
        let clause = parse_graphlet(&mut pool, Some(Band::Main), "(on :obj ?y :ref table)").unwrap();
        let y = pool.node(clause.main().unwrap()).unwrap().arg("obj");
        assert_eq!(focus_var(&pool, &clause), y);
        let ground = parse_graphlet(&mut pool, Some(Band::Main), "(on :obj cup :ref table)").unwrap();
        assert_eq!(focus_var(&pool, &ground), None);
    }

    #[test]
    fn each_iterates_then_takes_alt() {
        let (mut c, _) = ctx();
        fact(&mut c, "(ako \"cup\" :obj A)");
        fact(&mut c, "(ako \"cup\" :obj B)");
        let mut d = directive(&mut c, DirKind::Each, "(ako \"cup\" :obj ?x)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        let first = d.focus.images().next().unwrap();
        assert!(d.resume());
        assert_eq!(d.status(&mut c), Status::Done);
        let second = d.focus.images().next().unwrap();
        assert_ne!(first, second);
        assert!(d.resume());
        assert_eq!(d.status(&mut c), Status::Alt);
    }

    #[test]
    fn each_without_candidates_fails_and_any_succeeds() {
        let (mut c, _) = ctx();
        let mut each = directive(&mut c, DirKind::Each, "(ako \"plate\" :obj ?x)");
        assert_eq!(each.start(&mut c, &Bindings::new()), Status::Fail);
        let mut any = directive(&mut c, DirKind::Any, "(ako \"plate\" :obj ?x)");
        assert_eq!(any.start(&mut c, &Bindings::new()), Status::Alt);
    }

    #[test]
    fn bind_fabricates_hidden_object_and_repeats() {
        let (mut c, tracer) = ctx();
        let mut first = directive(&mut c, DirKind::Bind, "(ako \"cup\" :obj ?x)");
        assert_eq!(first.start(&mut c, &Bindings::new()), Status::Done);
        let cup = first.focus.images().next().unwrap();
        let node = c.wmem.pool().node(cup).unwrap();
        assert!(!node.visible());
        assert!(node.belief() < 1.0);
        assert_eq!(node.band(), Some(Band::Hypo));

        let mut again = directive(&mut c, DirKind::Bind, "(ako \"cup\" :obj ?y)");
        assert_eq!(again.start(&mut c, &Bindings::new()), Status::Done);
        assert_eq!(again.focus.images().next(), Some(cup));
        let repeats = tracer.lines().iter().filter(|l| l.ends_with("% REPEAT")).count();
        assert_eq!(repeats, 1);
    }

    #[test]
    fn find_imagines_only_when_allowed() {
        let (mut c, _) = ctx();
        c.config.plan.find_imagine = false;
        let mut d = directive(&mut c, DirKind::Find, "(ako \"dog\" :obj ?x)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Fail);
        c.config.plan.find_imagine = true;
        let mut d = directive(&mut c, DirKind::Find, "(ako \"dog\" :obj ?x)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        assert_eq!(d.hypo.len(), 2);
    }
}
