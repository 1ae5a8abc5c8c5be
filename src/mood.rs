//! The mood triple: `wild`, `bth`, `pth`.
//!
//! `pth` reacts immediately to outcomes (up a step on each failure, decaying
//! toward rest on each success). `wild` and `bth` follow slow filters of the
//! win rate and of the surprise reported by halo comparisons: a losing or
//! surprised agent explores more and accepts weaker beliefs.

use serde::{Deserialize, Serialize};

use crate::config::MoodConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mood {
    /// Temperature of the preference-weighted draw, in `[wild_min, 1]`.
    pub wild: f64,
    /// Minimum belief accepted by condition matches.
    pub bth: f64,
    /// Minimum operator preference considered at all.
    pub pth: f64,
    /// Filtered fraction of successful outcomes.
    pub win_rate: f64,
    /// Filtered halo surprise.
    pub surprise: f64,
    #[serde(skip)]
    config: MoodConfig,
}

impl Mood {
    pub fn new(config: &MoodConfig) -> Self {
        Self {
            wild: config.wild_rest.clamp(config.wild_min, 1.0),
            bth: config.bth_rest.clamp(0.0, 1.0),
            pth: config.pth_rest.clamp(0.0, 1.0),
            win_rate: 1.0,
            surprise: 0.0,
            config: config.clone(),
        }
    }

    /// Record one directive outcome.
    pub fn record(&mut self, success: bool) {
        let c = &self.config;
        if success {
            self.pth += c.pth_decay * (c.pth_rest - self.pth);
        } else {
            self.pth += c.pth_step;
        }
        self.pth = self.pth.clamp(0.0, 1.0);
        let hit = if success { 1.0 } else { 0.0 };
        self.win_rate += c.filter * (hit - self.win_rate);
    }

    /// Fold a halo surprise value into the filtered estimate.
    pub fn observe_surprise(&mut self, surprise: f64) {
        self.surprise += self.config.filter * (surprise.clamp(0.0, 1.0) - self.surprise);
    }

    /// Move `wild` and `bth` toward the targets implied by recent stress.
    /// Called once per tick.
    pub fn update(&mut self) {
        let c = &self.config;
        let stress = 0.5 * (1.0 - self.win_rate) + 0.5 * self.surprise;
        let wild_target = c.wild_rest + (1.0 - c.wild_rest) * stress;
        let bth_target = c.bth_rest * (1.0 - 0.5 * stress);
        self.wild += c.filter * (wild_target - self.wild);
        self.bth += c.filter * (bth_target - self.bth);
        self.wild = self.wild.clamp(c.wild_min.clamp(0.0, 1.0), 1.0);
        self.bth = self.bth.clamp(0.0, 1.0);
    }
}
