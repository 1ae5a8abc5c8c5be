//! WAIT, ACH, CHK and ESC: directives that watch working memory for their
//! key. ACH and CHK may also run operators to settle it.

use super::directive::{Directive, State};
use super::{Context, PlanResult, Status};
use crate::graph::{Band, Bindings};
use crate::memory::{MatchOpts, NegMode};

/// What working memory currently says about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Truth {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct GoalState {
    /// Methods that finished successfully without settling the key.
    pub idle_successes: u32,
}

impl Directive {
    /// Match the key positively, then negatively, at the mood's belief
    /// threshold.
    pub(crate) fn truth(&self, ctx: &mut Context) -> PlanResult<Truth> {
        let opts = MatchOpts::default().band(Band::Halo).threshold(ctx.mood.bth);
        let seed = Bindings::new();
        if ctx.wmem.find_first(&ctx.lib, &self.key, &seed, &opts)?.is_some() {
            return Ok(Truth::Yes);
        }
        let anti = opts.neg(NegMode::Anti);
        if ctx.wmem.find_first(&ctx.lib, &self.key, &seed, &anti)?.is_some() {
            return Ok(Truth::No);
        }
        Ok(Truth::Unknown)
    }

    // -----------------------------------------------------------------------
    // WAIT / ESC
    // -----------------------------------------------------------------------

    pub(super) fn start_wait(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        self.state = State::Wait;
        self.poll_wait(ctx)
    }

    pub(super) fn poll_wait(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        Ok(match self.truth(ctx)? {
            Truth::Yes => Status::Done,
            _ => Status::Working,
        })
    }

    pub(super) fn start_esc(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        self.state = State::Esc;
        self.poll_esc(ctx)
    }

    /// A true escape condition fails the step (traced as escaped); a false
    /// one lets the chain go on.
    pub(super) fn poll_esc(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        Ok(match self.truth(ctx)? {
            Truth::Yes => Status::Fail,
            Truth::No => Status::Done,
            Truth::Unknown => Status::Working,
        })
    }

    // -----------------------------------------------------------------------
    // ACH / CHK
    // -----------------------------------------------------------------------

    pub(super) fn start_goal(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        self.state = State::Goal(GoalState::default());
        match self.settled(ctx)? {
            Some(status) => Ok(status),
            None => self.next_attempt(ctx),
        }
    }

    pub(super) fn poll_goal(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let Some(out) = self.delib.poll(ctx) else {
            return Ok(Status::Working);
        };
        if out.status == Status::Punt {
            return Ok(Status::Punt);
        }
        if let Some(status) = self.settled(ctx)? {
            return Ok(status);
        }
        if out.status.is_success() {
            // The method claimed success but the key is still open.
            self.delib.demote_last();
            if let State::Goal(g) = &mut self.state {
                g.idle_successes += 1;
            }
        }
        self.next_attempt(ctx)
    }

    /// The verdict implied by working memory alone, if any.
    fn settled(&self, ctx: &mut Context) -> PlanResult<Option<Status>> {
        let check = self.kind == super::DirKind::Chk;
        Ok(match self.truth(ctx)? {
            Truth::Yes => Some(Status::Done),
            Truth::No if check => Some(Status::Alt),
            _ => None,
        })
    }

    fn next_attempt(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let choices = self.delib.choices(ctx, self.kind, &self.key, false)?;
        if self.delib.launch(ctx, &choices, self.depth, None)?.is_some() {
            return Ok(Status::Working);
        }
        // Out of operators: an unsettled check counts as false.
        Ok(if self.kind == super::DirKind::Chk {
            Status::Alt
        } else {
            Status::Fail
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::graph::text::parse_graphlet;
    use crate::library::Library;
    use crate::plan::DirKind;

    fn ctx(lib: &str) -> Context {
        Context::new(CoreConfig::default(), Library::parse(lib).unwrap()).unwrap()
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
    fn check_true_false_unknown() {
        let mut c = ctx("");
        fact(&mut c, "(hq \"red\" :obj X)");
        fact(&mut c, "(hq \"big\" :obj X :neg 1)");
        let mut yes = directive(&mut c, DirKind::Chk, "(hq \"red\" :obj X)");
        assert_eq!(yes.start(&mut c, &Bindings::new()), Status::Done);
        let mut no = directive(&mut c, DirKind::Chk, "(hq \"big\" :obj X)");
        assert_eq!(no.start(&mut c, &Bindings::new()), Status::Alt);
        let mut unknown = directive(&mut c, DirKind::Chk, "(hq \"old\" :obj X)");
        assert_eq!(unknown.start(&mut c, &Bindings::new()), Status::Alt);
    }

    #[test]
    fn escape_mapping() {
        let mut c = ctx("");
        fact(&mut c, "(hq \"tired\" :obj self)");
        fact(&mut c, "(hq \"hungry\" :obj self :neg 1)");
        let mut t = directive(&mut c, DirKind::Esc, "(hq \"tired\" :obj self)");
        assert_eq!(t.start(&mut c, &Bindings::new()), Status::Fail);
        let mut f = directive(&mut c, DirKind::Esc, "(hq \"hungry\" :obj self)");
        assert_eq!(f.start(&mut c, &Bindings::new()), Status::Done);
        let mut u = directive(&mut c, DirKind::Esc, "(hq \"bored\" :obj self)");
        assert_eq!(u.start(&mut c, &Bindings::new()), Status::Working);
    }

    #[test]
    fn wait_completes_when_fact_arrives() {
        let mut c = ctx("");
        let mut w = directive(&mut c, DirKind::Wait, "(hq \"open\" :obj door)");
        assert_eq!(w.start(&mut c, &Bindings::new()), Status::Working);
        fact(&mut c, "(hq \"open\" :obj door)");
        assert_eq!(w.status(&mut c), Status::Done);
    }

    const ACHIEVE: &str = "\
OP open-door
  kind=ACH
  trig: (hq \"open\" :obj ?d)
  method:
    NOTE (hq \"open\" :obj ?d)
";

    #[test]
    fn achieve_runs_operator_until_key_holds() {
        let mut c = ctx(ACHIEVE);
        let mut a = directive(&mut c, DirKind::Ach, "(hq \"open\" :obj door)");
        assert_eq!(a.start(&mut c, &Bindings::new()), Status::Working);
        c.tick += 1;
        assert_eq!(a.status(&mut c), Status::Done);
    }
}
