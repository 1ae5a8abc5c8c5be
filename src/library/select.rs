//! Operator selection for a directive.
//!
//! Candidates are filtered in order: directive kind, enabled, preference at
//! or above the mood's `pth`, trigger match against the key, condition match
//! against working memory at belief `bth`. Survivors keep only the maximum
//! specificity, then anything already tried with an equivalent binding is
//! dropped. The final pick is a preference-weighted draw tempered by `wild`.

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use tracing::debug;

use super::{Library, OpId};
use crate::error::GraphResult;
use crate::graph::{Band, Bindings, Graphlet, NodeId, NodePool};
use crate::memory::{Flow, MatchOpts, WorkingMemory, matcher};
use crate::mood::Mood;
use crate::plan::DirKind;

/// Exponent of the preference weighting: `w = exp(PREF_GAIN * pref / wild)`.
pub const PREF_GAIN: f64 = 1.73;

/// An operator already tried by a directive, with its effect signature.
pub type Tried = (OpId, Vec<(NodeId, NodeId)>);

/// One applicable operator.
#[derive(Debug, Clone)]
pub struct Choice {
    pub op: OpId,
    /// Library node → working-memory node, trigger and condition together.
    pub bindings: Bindings,
    /// Number of pairs the trigger bound.
    pub specificity: usize,
    /// Key items the trigger did not cover (partial matches only).
    pub residual: Graphlet,
    /// Bindings to working-memory objects; equal signatures are equivalent.
    pub signature: Vec<(NodeId, NodeId)>,
}

/// Pairs whose image is an object: the variables an operator acts on.
pub fn effect_signature(wm: &NodePool, bindings: &Bindings) -> Vec<(NodeId, NodeId)> {
    let mut sig: Vec<(NodeId, NodeId)> = bindings
        .pairs()
        .iter()
        .copied()
        .filter(|(_, img)| wm.get(*img).is_some_and(|n| n.is_object()))
        .collect();
    sig.sort();
    sig.dedup();
    sig
}

impl Library {
    /// Every operator applicable to a directive of `kind` with `key`.
    ///
    /// With `partial`, a trigger only needs to cover the key's main item;
    /// the uncovered items come back as the choice's residual.
    pub fn get_choices(
        &self,
        wmem: &mut WorkingMemory,
        kind: DirKind,
        key: &Graphlet,
        tried: &[Tried],
        mood: &Mood,
        partial: bool,
    ) -> GraphResult<Vec<Choice>> {
        let Some(key_main) = key.main() else {
            return Ok(Vec::new());
        };
        let mut found: Vec<Choice> = Vec::new();
        for op in self.ops().filter(|o| o.kind == kind && !o.disabled) {
            if op.pref < mood.pth {
                continue;
            }
            let Some(trig_main) = op.trigger.main() else {
                continue;
            };
            let mut seed = Bindings::new();
            seed.bind(trig_main, key_main);
            let opts = MatchOpts::default().within(key.items());
            let groundings =
                matcher::all_matches(&self.pool, &op.trigger, wmem.pool(), &seed, &opts, 16);

            for trig in groundings {
                let covered: Vec<NodeId> = op.trigger.iter().filter_map(|p| trig.lookup(p)).collect();
                let residual = key.without(&covered);
                if !partial && !residual.is_empty() {
                    continue;
                }
                let mut bindings = trig.clone();
                if !op.cond.is_empty() {
                    let mut cond_seed = Bindings::new();
                    for (p, img) in trig.pairs() {
                        if wmem.pool().get(*img).is_some_and(|n| n.band().is_some()) {
                            cond_seed.bind(*p, *img);
                        }
                    }
                    let opts = MatchOpts::default().band(Band::Halo).threshold(mood.bth);
                    let mut hit = None;
                    wmem.match_graph(self, Some(&self.pool), &op.cond, &mut cond_seed, &opts, 1, |b| {
                        hit = Some(b.clone());
                        Flow::Stop
                    })?;
                    match hit {
                        Some(b) => bindings.merge(&b),
                        None => continue,
                    }
                }
                let signature = effect_signature(wmem.pool(), &trig);
                found.push(Choice {
                    op: op.id,
                    bindings,
                    specificity: trig.len(),
                    residual,
                    signature,
                });
            }
        }

        let best = found.iter().map(|c| c.specificity).max().unwrap_or(0);
        found.retain(|c| c.specificity == best);
        let before = found.len();
        found.retain(|c| !tried.iter().any(|(op, sig)| *op == c.op && *sig == c.signature));
        debug!(
            kind = kind.name(),
            applicable = before,
            inhibited = before - found.len(),
            specificity = best,
            "operator choices"
        );
        Ok(found)
    }

    /// Preference-weighted draw among `choices`. Lower `wild` sharpens the
    /// preference ratio.
    pub fn choose<R: Rng>(&self, choices: &[Choice], wild: f64, rng: &mut R) -> Option<usize> {
        match choices.len() {
            0 => return None,
            1 => return Some(0),
            _ => {}
        }
        let wild = wild.max(1e-3);
        let prefs: Vec<f64> = choices
            .iter()
            .map(|c| self.op(c.op).map_or(0.0, |o| o.pref))
            .collect();
        let top = prefs.iter().copied().fold(f64::MIN, f64::max);
        let weights: Vec<f64> = prefs
            .iter()
            .map(|p| (PREF_GAIN * (p - top) / wild).exp())
            .collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => Some(dist.sample(rng)),
            Err(_) => Some(rng.gen_range(0..choices.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryConfig, MoodConfig};
    use crate::graph::text::parse_graphlet;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const LIB: &str = "\
OP stack-generic
  kind=ACH pref=0.5
  trig: (on :obj ?x :ref ?y)
  method:
    DO (put :obj ?x :ref ?y)

OP stack-cup
  kind=ACH pref=0.9
  trig: (on :obj ?x :ref ?y)
  cond: (ako \"cup\" :obj ?x)
  method:
    DO (place :obj ?x :ref ?y)

OP see-cup
  kind=FIND pref=0.6
  trig: (ako \"cup\" :obj ?c)
  method:
    FIND (hq \"visible\" :obj ?c)

OP shy
  kind=ACH pref=0.05
  trig: (on :obj ?x :ref ?y)
  method:
    DO (hide :obj ?x)
";

    fn setup() -> (WorkingMemory, Library, Mood) {
        let w = WorkingMemory::new(&MemoryConfig::default()).unwrap();
        let lib = Library::parse(LIB).unwrap();
        let mood = Mood::new(&MoodConfig::default());
        (w, lib, mood)
    }

    #[test]
    fn pth_filters_low_preference() {
        let (mut w, lib, mut mood) = setup();
        let key = parse_graphlet(w.pool_mut(), Some(Band::Main), "(on :obj X :ref Y)").unwrap();
        mood.pth = 0.1;
        let all = lib.get_choices(&mut w, DirKind::Ach, &key, &[], &mood, false).unwrap();
        let names: Vec<&str> = all.iter().map(|c| lib.op(c.op).unwrap().name()).collect();
        assert_eq!(names, vec!["stack-generic"]);
    }

    #[test]
    fn condition_must_hold_in_memory() {
        let (mut w, lib, mut mood) = setup();
        mood.pth = 0.1;
        let key = parse_graphlet(w.pool_mut(), Some(Band::Main), "(on :obj X :ref Y)").unwrap();
        let x = w.pool().by_nick("X").unwrap();
        w.add_prop(x, "obj", "ako", "cup", false, 1.0).unwrap();
        let all = lib.get_choices(&mut w, DirKind::Ach, &key, &[], &mood, false).unwrap();
        let names: Vec<&str> = all.iter().map(|c| lib.op(c.op).unwrap().name()).collect();
        assert!(names.contains(&"stack-cup"));
        assert!(names.contains(&"stack-generic"));
    }

    #[test]
    fn non_return_inhibition() {
        let (mut w, lib, mut mood) = setup();
        mood.pth = 0.1;
        let key = parse_graphlet(w.pool_mut(), Some(Band::Main), "(on :obj X :ref Y)").unwrap();
        let first = lib.get_choices(&mut w, DirKind::Ach, &key, &[], &mood, false).unwrap();
        let tried: Vec<Tried> = first.iter().map(|c| (c.op, c.signature.clone())).collect();
        let again = lib.get_choices(&mut w, DirKind::Ach, &key, &tried, &mood, false).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn partial_trigger_leaves_residual() {
        let (mut w, lib, mood) = setup();
        let key = parse_graphlet(
            w.pool_mut(),
            Some(Band::Main),
            r#"(ako "cup" :obj ?x) (hq "red" :obj ?x)"#,
        )
        .unwrap();
        let none = lib.get_choices(&mut w, DirKind::Find, &key, &[], &mood, false).unwrap();
        assert!(none.is_empty());
        let some = lib.get_choices(&mut w, DirKind::Find, &key, &[], &mood, true).unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some[0].residual.len(), 1);
        assert_eq!(some[0].residual.main(), key.items().get(1).copied());
    }

    #[test]
    fn low_wildness_prefers_high_preference() {
        let (mut w, lib, mut mood) = setup();
        mood.pth = 0.0;
        let key = parse_graphlet(w.pool_mut(), Some(Band::Main), "(on :obj X :ref Y)").unwrap();
        let choices = lib.get_choices(&mut w, DirKind::Ach, &key, &[], &mood, false).unwrap();
        assert_eq!(choices.len(), 2);
        let mut rng = StdRng::seed_from_u64(7);
        let mut generic = 0;
        for _ in 0..200 {
            let i = lib.choose(&choices, 0.05, &mut rng).unwrap();
            if lib.op(choices[i].op).unwrap().name() == "stack-generic" {
                generic += 1;
            }
        }
        assert!(generic > 190, "picked generic {generic} times");
    }
}
