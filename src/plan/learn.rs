//! ADD and EDIT: changing the library from inside a plan.

use tracing::info;

use super::directive::Directive;
use super::script::Payload;
use super::{Context, PlanResult, Status};
use crate::graph::Bindings;
use crate::library::LibraryError;
use crate::memory::{MatchOpts, NegMode, matcher};

/// Preference given to operators learned by ADD.
const LEARNED_PREF: f64 = 0.5;

impl Directive {
    pub(super) fn start_add(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let Some(payload) = self.payload.clone() else {
            return Ok(Status::Fail);
        };
        let result = match &payload {
            Payload::Rule { pattern, result } => ctx
                .lib
                .learn_rule(ctx.wmem.pool(), pattern, result, 1.0)
                .map(|id| id.to_string()),
            Payload::Op {
                kind,
                trigger,
                method_kind,
                method_key,
            } => ctx
                .lib
                .learn_op(
                    ctx.wmem.pool(),
                    *kind,
                    trigger,
                    *method_kind,
                    method_key,
                    LEARNED_PREF,
                )
                .map(|id| id.to_string()),
        };
        match result {
            Ok(name) => {
                ctx.wmem.invalidate_halo();
                ctx.remark(self.depth, &format!("ADDED {name}"));
                Ok(Status::Done)
            }
            Err(e @ LibraryError::Duplicate { .. }) => {
                ctx.note_failure("add", &self.key, &e.to_string());
                Ok(Status::Fail)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blame the most recent method failure whose failed step matches the
    /// key (or simply the most recent one), then repair or penalize the
    /// operator responsible.
    pub(super) fn start_edit(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let pool = ctx.wmem.pool();
        let opts = MatchOpts::default().neg(NegMode::Indifferent);
        let matching = ctx.failures().rev().find(|f| {
            !self.key.is_empty()
                && matcher::first_match(
                    pool,
                    &self.key,
                    pool,
                    &Bindings::new(),
                    &opts.clone().within(f.key.items()),
                )
                .is_some()
        });
        let blamed = matching.or_else(|| ctx.failures().next_back()).cloned();
        let Some(blamed) = blamed else {
            ctx.remark(self.depth, "NOTHING TO EDIT");
            return Ok(Status::Fail);
        };

        let step = ctx.config.plan.edit_step;
        match self.remainder.take() {
            Some(rest) if !rest.is_empty() => {
                ctx.lib
                    .replace_step(blamed.op, blamed.step, ctx.wmem.pool(), &rest)?;
                ctx.lib.nudge_pref(blamed.op, step);
                self.remainder = Some(rest);
            }
            _ => ctx.lib.nudge_pref(blamed.op, -step),
        }
        info!(op = %blamed.op, step = blamed.step, "operator edited");
        ctx.remark(self.depth, &format!("EDIT {}", blamed.op));
        Ok(Status::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::graph::Band;
    use crate::graph::text::parse_graphlet;
    use crate::library::Library;
    use crate::plan::context::FailureRecord;
    use crate::plan::{ChainSpec, DirKind};

    fn add_step(c: &mut Context, script: &str) -> Directive {
        let spec = ChainSpec::parse_script(c.wmem.pool_mut(), Some(Band::Main), script).unwrap();
        let step = spec.steps[0].clone();
        Directive::new(c, DirKind::Add, step.key, step.payload, 0, None, "user")
    }

    #[test]
    fn add_rule_then_duplicate_reports() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let script = "ADD RULE (ako \"cup\" :obj ?x) => (hq \"hollow\" :obj ?x)";
        let mut d = add_step(&mut c, script);
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        assert_eq!(c.lib.rule_count(), 1);

        let mut again = add_step(&mut c, script);
        assert_eq!(again.start(&mut c, &Bindings::new()), Status::Fail);
        let notes = c.take_notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].script.starts_with("NOTE (act \"add\" :neg 1"));
    }

    #[test]
    fn add_operator() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let mut d = add_step(&mut c, "ADD OP:DO (tidy :obj ?z) => GND (sweep :obj ?z)");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        let op = c.lib.ops().next().unwrap();
        assert_eq!(op.kind(), DirKind::Do);
        assert!(op.learned());
    }

    const LIB: &str = "\
OP fetch
  kind=ACH pref=0.5
  trig: (has :obj ?x)
  method:
    GND (grab :obj ?x)
";

    #[test]
    fn edit_without_remainder_penalizes() {
        let lib = Library::parse(LIB).unwrap();
        let op = lib.op_by_name("fetch").unwrap();
        let mut c = Context::new(CoreConfig::default(), lib).unwrap();
        let failed = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(grab :obj X)").unwrap();
        c.log_failure(FailureRecord {
            op,
            step: 0,
            key: failed,
            tick: 0,
        });
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(grab :obj X)").unwrap();
        let mut d = Directive::new(&mut c, DirKind::Edit, key, None, 0, None, "user");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        let pref = c.lib.op(op).unwrap().pref();
        assert!((pref - 0.3).abs() < 1e-9);
    }

    #[test]
    fn edit_with_remainder_splices() {
        let lib = Library::parse(LIB).unwrap();
        let op = lib.op_by_name("fetch").unwrap();
        let mut c = Context::new(CoreConfig::default(), lib).unwrap();
        let failed = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(grab :obj X)").unwrap();
        c.log_failure(FailureRecord {
            op,
            step: 0,
            key: failed,
            tick: 0,
        });
        let rest = ChainSpec::parse_script(
            c.wmem.pool_mut(),
            Some(Band::Main),
            "GND (reach :obj X)\nGND (grab :obj X)",
        )
        .unwrap();
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(grab :obj X)").unwrap();
        let mut d = Directive::new(&mut c, DirKind::Edit, key, None, 0, None, "user");
        d.remainder = Some(rest);
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);
        let fetch = c.lib.op(op).unwrap();
        assert_eq!(fetch.method().len(), 2);
        assert!(fetch.dirty());
    }

    #[test]
    fn edit_with_empty_log_fails() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let mut d = Directive::new(&mut c, DirKind::Edit, crate::graph::Graphlet::new(), None, 0, None, "user");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Fail);
    }
}
