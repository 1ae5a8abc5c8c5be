//! DO, ANTE and GATE: committing to an action. GND: grounding it in a
//! kernel. A negated DO halts matching live actions instead.
//!
//! A DO runs in three phases. ANTE runs every applicable precondition
//! operator, GATE every admission check, and DO commits to one action
//! operator at a time until one succeeds. Failures in the first two phases
//! do not stop the directive; a PUNT from any method does.

use tracing::{debug, info};

use super::directive::{Directive, State};
use super::{Context, DirKind, PlanError, PlanResult, Status};
use crate::kernel::{KernelError, KernelHandle, KernelStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Ante,
    Gate,
    Act,
}

impl Phase {
    fn kind(self) -> DirKind {
        match self {
            Phase::Ante => DirKind::Ante,
            Phase::Gate => DirKind::Gate,
            Phase::Act => DirKind::Do,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DoState {
    phase: Phase,
    /// Last phase this directive runs.
    last: Phase,
}

#[derive(Debug)]
pub(crate) struct GndState {
    func: String,
    handle: KernelHandle,
    progress: Option<f64>,
    last_change: u64,
    deadline: u64,
    stopped: bool,
}

impl GndState {
    pub fn stop(&mut self, ctx: &mut Context) {
        if !self.stopped {
            self.stopped = true;
            ctx.kernels.stop(self.handle);
        }
    }
}

impl Directive {
    fn is_halt(&self, ctx: &Context) -> bool {
        self.kind == DirKind::Do
            && self
                .key
                .main()
                .and_then(|m| ctx.wmem.pool().get(m))
                .is_some_and(|n| n.neg())
    }

    // -----------------------------------------------------------------------
    // DO / ANTE / GATE
    // -----------------------------------------------------------------------

    pub(super) fn start_do(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        if self.is_halt(ctx) {
            ctx.request_halt(self.id, self.key.clone());
            self.state = State::Halt;
            return Ok(Status::Working);
        }
        let (first, last) = match self.kind {
            DirKind::Ante => (Phase::Ante, Phase::Ante),
            DirKind::Gate => (Phase::Gate, Phase::Gate),
            _ => (Phase::Ante, Phase::Act),
        };
        self.state = State::Do(DoState { phase: first, last });
        ctx.remark(self.depth, first.kind().name());
        self.next_action(ctx)
    }

    pub(super) fn poll_do(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let Some(out) = self.delib.poll(ctx) else {
            return Ok(Status::Working);
        };
        if out.status == Status::Punt {
            return Ok(Status::Punt);
        }
        let State::Do(st) = &self.state else {
            return Ok(Status::Fail);
        };
        if st.phase == Phase::Act && out.status.is_success() {
            return Ok(Status::Done);
        }
        self.next_action(ctx)
    }

    /// Launch the next operator of the current phase, moving to the next
    /// phase when this one is exhausted.
    fn next_action(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        loop {
            let State::Do(st) = &self.state else {
                return Ok(Status::Fail);
            };
            let (phase, last) = (st.phase, st.last);
            let choices = self.delib.choices(ctx, phase.kind(), &self.key, false)?;
            if let Some(idx) = self.delib.launch(ctx, &choices, self.depth, None)? {
                if phase == Phase::Act {
                    ctx.wmem.main_mem_only(&choices[idx].bindings, true)?;
                }
                return Ok(Status::Working);
            }
            if phase == last {
                // Stand-alone ANTE and GATE succeed once every operator ran.
                // A DO needs an act operator.
                return Ok(if phase == Phase::Act {
                    Status::Fail
                } else {
                    Status::Done
                });
            }
            let next = match phase {
                Phase::Ante => Phase::Gate,
                _ => Phase::Act,
            };
            debug!(tick = ctx.tick, depth = self.depth, phase = next.kind().name(), "phase change");
            ctx.remark(self.depth, next.kind().name());
            if let State::Do(st) = &mut self.state {
                st.phase = next;
            }
        }
    }

    pub(super) fn poll_halt(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        match ctx.take_halt_result(self.id) {
            None => Ok(Status::Working),
            Some(0) => Ok(Status::Fail),
            Some(n) => {
                info!(tick = ctx.tick, halted = n, "actions halted");
                Ok(Status::Done)
            }
        }
    }

    // -----------------------------------------------------------------------
    // GND
    // -----------------------------------------------------------------------

    pub(super) fn start_gnd(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let pool = ctx.wmem.pool();
        let Some(main) = self.key.main().and_then(|m| pool.get(m)) else {
            return Err(PlanError::Binding {
                var: "function".to_string(),
                kind: "GND",
            });
        };
        for (_, arg) in main.args() {
            let unbound = pool
                .get(*arg)
                .is_some_and(|n| n.is_object() && n.band().is_none());
            if unbound {
                return Err(PlanError::Binding {
                    var: pool.label(*arg),
                    kind: "GND",
                });
            }
        }
        let func = main.kind().to_string();
        let handle = match ctx.kernels.start(&func, ctx.wmem.pool(), &self.key) {
            Ok(h) => h,
            Err(e) => {
                ctx.note_failure(&func, &self.key, &e.to_string());
                return Ok(Status::Fail);
            }
        };
        debug!(tick = ctx.tick, func = %func, "kernel call started");
        self.state = State::Gnd(GndState {
            func,
            handle,
            progress: None,
            last_change: ctx.tick,
            deadline: ctx.tick + ctx.ticks_for(ctx.config.plan.gnd_budget),
            stopped: false,
        });
        Ok(Status::Working)
    }

    pub(super) fn poll_gnd(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let State::Gnd(g) = &mut self.state else {
            return Ok(Status::Fail);
        };
        let failure = match ctx.kernels.status(g.handle) {
            KernelStatus::Done => return Ok(Status::Done),
            KernelStatus::Fail(reason) => KernelError::Failed {
                func: g.func.clone(),
                reason,
            },
            KernelStatus::Working { progress } => {
                if progress != g.progress {
                    g.progress = progress;
                    g.last_change = ctx.tick;
                }
                let idle = ctx.tick.saturating_sub(g.last_change);
                if progress.is_some() && idle >= ctx.config.plan.stall_ticks {
                    KernelError::Stalled {
                        func: g.func.clone(),
                        ticks: idle,
                    }
                } else if ctx.tick >= g.deadline {
                    KernelError::Failed {
                        func: g.func.clone(),
                        reason: "time budget exhausted".to_string(),
                    }
                } else {
                    return Ok(Status::Working);
                }
            }
        };
        g.stop(ctx);
        let func = g.func.clone();
        ctx.note_failure(&func, &self.key, &failure.to_string());
        Ok(Status::Fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::graph::text::parse_graphlet;
    use crate::graph::{Band, Bindings};
    use crate::kernel::{Kernel, KernelResult, TimerKernel};
    use crate::library::Library;
    use crate::trace::MemoryTracer;
    use crate::graph::{Graphlet, NodePool};

    fn directive(c: &mut Context, kind: DirKind, text: &str) -> Directive {
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), text).unwrap();
        Directive::new(c, kind, key, None, 0, None, "user")
    }

    #[test]
    fn gnd_runs_kernel_to_completion() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        c.kernels.register(Box::new(TimerKernel::new(&["walk"], 2)));
        let mut d = directive(&mut c, DirKind::Gnd, "(walk)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Working);
        assert_eq!(d.status(&mut c), Status::Working);
        assert_eq!(d.status(&mut c), Status::Done);
    }

    #[test]
    fn unknown_function_becomes_note() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let mut d = directive(&mut c, DirKind::Gnd, "(see :obj X)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Fail);
        let notes = c.take_notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].script.contains("(act \"see\" :neg 1 :agt self :obj X)"));
    }

    #[test]
    fn unbound_argument_fails() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        c.kernels.register(Box::new(TimerKernel::new(&["grab"], 1)));
        let mut d = directive(&mut c, DirKind::Gnd, "(grab :obj ?x)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Fail);
    }

    /// Reports the same progress forever.
    struct Stuck;

    impl Kernel for Stuck {
        fn functions(&self) -> Vec<String> {
            vec!["dig".to_string()]
        }
        fn start(&mut self, _func: &str, _pool: &NodePool, _key: &Graphlet) -> KernelResult<u64> {
            Ok(1)
        }
        fn status(&mut self, _inst: u64) -> KernelStatus {
            KernelStatus::Working { progress: Some(0.5) }
        }
        fn stop(&mut self, _inst: u64) {}
    }

    #[test]
    fn stalled_kernel_fails() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        c.config.plan.stall_ticks = 3;
        c.kernels.register(Box::new(Stuck));
        let mut d = directive(&mut c, DirKind::Gnd, "(dig)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Working);
        let mut last = Status::Working;
        for _ in 0..10 {
            c.tick += 1;
            last = d.status(&mut c);
            if last != Status::Working {
                break;
            }
        }
        assert_eq!(last, Status::Fail);
        assert!(c.tick <= 5);
        assert_eq!(c.take_notes().len(), 1);
    }

    const PHASED: &str = "\
OP check-reach
  kind=ANTE
  trig: (pick :obj ?x)
  method:
    NOTE (hq \"reachable\" :obj ?x)

OP pick-up
  kind=DO
  trig: (pick :obj ?x)
  method:
    NOTE (hq \"held\" :obj ?x)
";

    #[test]
    fn stopped_halt_drops_its_answer() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let mut d = directive(&mut c, DirKind::Do, "(walk :neg 1)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Working);
        assert_eq!(c.halt_backlog(), 1);
        for req in c.take_halts() {
            c.set_halt_result(req.requester, 0);
        }
        d.stop(&mut c);
        assert_eq!(c.halt_backlog(), 0);

        let mut e = directive(&mut c, DirKind::Do, "(run :neg 1)");
        e.start(&mut c, &Bindings::new());
        e.release(&mut c);
        assert_eq!(c.halt_backlog(), 0);
    }

    #[test]
    fn phases_run_in_order() {
        let tracer = MemoryTracer::new();
        let lib = Library::parse(PHASED).unwrap();
        let mut c = Context::new(CoreConfig::default(), lib)
            .unwrap()
            .with_tracer(Box::new(tracer.clone()));
        let mut d = directive(&mut c, DirKind::Do, "(pick :obj X)");
        let mut status = d.start(&mut c, &Bindings::new());
        while status == Status::Working && c.tick < 20 {
            c.tick += 1;
            status = d.status(&mut c);
        }
        assert_eq!(status, Status::Done);
        let phases: Vec<String> = tracer
            .lines()
            .into_iter()
            .filter(|l| l.trim_start().starts_with('%'))
            .collect();
        assert_eq!(phases, vec!["% ANTE", "% GATE", "% DO"]);
    }
}
