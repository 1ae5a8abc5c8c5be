//! Halo maintenance: rule-inferred facts and surprise.
//!
//! The halo is recomputed lazily. Any main-band change marks it stale; the
//! next match first demotes every halo fact (band cleared, rule tag kept)
//! and then re-runs every enabled rule once over the main band. A demoted
//! fact that a rule produces again is revived in place, so halo identities
//! survive regeneration. Demoted facts nobody revives are dropped by GC
//! unless a directive still refers to them.

use tracing::debug;

use super::{MatchOpts, NegMode, WorkingMemory, matcher};
use crate::error::GraphResult;
use crate::graph::{Band, Bindings, Graphlet, NodeId};
use crate::library::Library;

/// Upper bound on groundings one rule may contribute per regeneration.
const RULE_MATCH_LIMIT: usize = 256;

impl WorkingMemory {
    pub fn halo_stale(&self) -> bool {
        self.halo_stale
    }

    /// Mark the halo for regeneration before the next match.
    pub fn invalidate_halo(&mut self) {
        self.halo_stale = true;
    }

    /// Regenerate the halo if stale. Returns the number of halo facts.
    pub fn ensure_halo(&mut self, lib: &Library) -> GraphResult<usize> {
        if !self.halo_stale {
            return Ok(0);
        }
        self.halo_stale = false;

        let old: Vec<NodeId> = self
            .pool
            .ids()
            .filter(|id| self.pool.get(*id).is_some_and(|n| n.band() == Some(Band::Halo)))
            .collect();
        for id in &old {
            self.pool.set_band(*id, None)?;
        }

        let opts = MatchOpts::default()
            .band(Band::Main)
            .threshold(self.config.halo_threshold);
        let mut produced: Vec<NodeId> = Vec::new();
        for rule in lib.rules().filter(|r| !r.disabled()) {
            let groundings = matcher::all_matches(
                lib.pool(),
                rule.pattern(),
                &self.pool,
                &Bindings::new(),
                &opts,
                RULE_MATCH_LIMIT,
            );
            for mut b in groundings {
                let support = rule
                    .pattern()
                    .iter()
                    .filter_map(|p| b.lookup(p))
                    .filter_map(|img| self.pool.get(img))
                    .map(|n| n.belief())
                    .fold(1.0_f64, f64::min);
                let blf = rule.conf() * support;
                let mark = b.len();
                self.assert_tagged(
                    Some(lib.pool()),
                    rule.result(),
                    &mut b,
                    blf,
                    Band::Halo,
                    Some(rule.id()),
                )?;
                for item in rule.result().iter() {
                    if let Some(img) = b.lookup(item) {
                        if self.pool.get(img).is_some_and(|n| n.band() == Some(Band::Halo)) {
                            produced.push(img);
                        }
                    }
                }
                b.truncate(mark);
            }
        }
        produced.sort();
        produced.dedup();
        debug!(
            demoted = old.len(),
            halo = produced.len(),
            version = self.pool.version(),
            "halo regenerated"
        );
        Ok(produced.len())
    }

    /// Compare a new observation against halo predictions.
    ///
    /// Every halo fact stating one of the key's clauses (either polarity) is
    /// scored: agreement contributes `1 - belief`, disagreement `belief`.
    /// The producing rule's confidence moves toward 1 on agreement and toward
    /// 0 on disagreement by `rate`. Returns the mean surprise, or 0 when no
    /// halo fact predicted anything about the key.
    pub fn compare_halo(&mut self, key: &Graphlet, lib: &mut Library, rate: f64) -> GraphResult<f64> {
        self.ensure_halo(lib)?;
        let opts = MatchOpts::default()
            .band(Band::Halo)
            .neg(NegMode::Indifferent)
            .reveal();
        let groundings = matcher::all_matches(
            &self.pool,
            key,
            &self.pool,
            &Bindings::new(),
            &opts,
            RULE_MATCH_LIMIT,
        );

        let mut seen: Vec<NodeId> = Vec::new();
        let mut surprise = 0.0;
        for b in &groundings {
            for item in key.iter() {
                let Some(img) = b.lookup(item) else {
                    continue;
                };
                if seen.contains(&img) {
                    continue;
                }
                let (Some(pred), Some(obs)) = (self.pool.get(img), self.pool.get(item)) else {
                    continue;
                };
                if pred.band() != Some(Band::Halo) {
                    continue;
                }
                let Some(rule) = pred.rule() else {
                    continue;
                };
                seen.push(img);
                let agree = pred.neg() == obs.neg();
                surprise += if agree {
                    1.0 - pred.belief()
                } else {
                    pred.belief()
                };
                lib.reinforce_rule(rule, if agree { 1.0 } else { 0.0 }, rate);
            }
        }
        if seen.is_empty() {
            return Ok(0.0);
        }
        let mean = surprise / seen.len() as f64;
        debug!(compared = seen.len(), surprise = mean, "halo comparison");
        Ok(mean)
    }
}
