//! NOTE: take in an observation and react to it at most once.

use tracing::debug;

use super::directive::{Directive, State, var_pairs};
use super::{Context, DirKind, PlanResult, Status};
use crate::graph::{Band, Bindings, NodeId};
use crate::io::Source;
use crate::library::OpId;

#[derive(Debug, Default)]
pub(crate) struct NoteState {
    /// The reactive operator attached to this note, if any.
    pub reaction: Option<OpId>,
}

impl Directive {
    pub(super) fn start_note(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        let rate = ctx.config.plan.pref_step;
        let surprise = ctx.wmem.compare_halo(&self.key, &mut ctx.lib, rate)?;
        ctx.mood.observe_surprise(surprise);

        let mut asserted = Bindings::new();
        ctx.wmem
            .assert(None, &self.key, &mut asserted, 1.0, Band::Main)?;
        self.focus = var_pairs(ctx.wmem.pool(), &asserted);
        // From here on the key names the facts themselves.
        self.substitute(ctx, &asserted)?;

        if self.source == Some(Source::User) {
            let clock = ctx.mention_clock();
            for obj in self.mentioned(ctx) {
                ctx.wmem.mention(obj, clock)?;
            }
        }

        let mut choices = self.delib.choices(ctx, DirKind::Note, &self.key, false)?;
        choices.retain(|c| !ctx.cooling(c.op, &c.signature));
        let budget = Some(ctx.config.plan.note_budget);
        let Some(idx) = self.delib.launch(ctx, &choices, self.depth, budget)? else {
            return Ok(Status::Done);
        };
        let choice = &choices[idx];
        ctx.cool(choice.op, choice.signature.clone());
        debug!(tick = ctx.tick, op = %choice.op, "note reaction attached");
        self.state = State::Note(NoteState {
            reaction: Some(choice.op),
        });
        Ok(Status::Working)
    }

    pub(super) fn poll_note(&mut self, ctx: &mut Context) -> PlanResult<Status> {
        match self.delib.poll(ctx) {
            None => Ok(Status::Working),
            Some(out) if out.status == Status::Punt => Ok(Status::Punt),
            Some(_) => Ok(Status::Done),
        }
    }

    /// Objects the key's clauses talk about.
    fn mentioned(&self, ctx: &Context) -> Vec<NodeId> {
        let pool = ctx.wmem.pool();
        let mut out = Vec::new();
        for item in self.key.iter() {
            let Some(node) = pool.get(item) else {
                continue;
            };
            if node.is_object() {
                out.push(item);
                continue;
            }
            for (_, arg) in node.args() {
                if pool.get(*arg).is_some_and(|n| n.is_object()) && !out.contains(arg) {
                    out.push(*arg);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::graph::text::parse_graphlet;
    use crate::library::Library;
    use crate::memory::MatchOpts;

    const LIB: &str = "\
OP greet
  kind=NOTE
  trig: (hq \"close\" :obj ?x)
  method:
    PUNT
";

    #[test]
    fn note_asserts_and_mentions() {
        let mut c = Context::new(CoreConfig::default(), Library::new()).unwrap();
        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(hq \"close\" :obj X)").unwrap();
        let mut d = Directive::new(&mut c, DirKind::Note, key, None, 0, Some(Source::User), "user");
        assert_eq!(d.start(&mut c, &Bindings::new()), Status::Done);

        let pattern = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), "(hq \"close\" :obj X)").unwrap();
        let lib = Library::new();
        let hit = c
            .wmem
            .find_first(&lib, &pattern, &Bindings::new(), &MatchOpts::default())
            .unwrap();
        assert!(hit.is_some());
        let x = c.wmem.pool().by_nick("X").unwrap();
        assert!(c.wmem.pool().node(x).unwrap().mention() > 0);
    }

    #[test]
    fn reaction_is_cooled_down() {
        let lib = Library::parse(LIB).unwrap();
        let mut c = Context::new(CoreConfig::default(), lib).unwrap();
        let text = "(hq \"close\" :obj X)";

        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), text).unwrap();
        let mut first = Directive::new(&mut c, DirKind::Note, key, None, 0, Some(Source::Sensor), "sensor");
        assert_eq!(first.start(&mut c, &Bindings::new()), Status::Working);
        c.tick += 1;
        // The method is a lone PUNT.
        assert_eq!(first.status(&mut c), Status::Punt);

        let key = parse_graphlet(c.wmem.pool_mut(), Some(Band::Main), text).unwrap();
        let mut second = Directive::new(&mut c, DirKind::Note, key, None, 0, Some(Source::Sensor), "sensor");
        assert_eq!(second.start(&mut c, &Bindings::new()), Status::Done);
    }
}
