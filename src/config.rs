//! Core configuration loaded from TOML.
//!
//! Every field has a default so a config file only needs to name the values
//! it overrides:
//!
//! ```toml
//! [plan]
//! max_depth = 12
//!
//! [scheduler]
//! tick_hz = 20.0
//! seed = 7
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Node pool and working-memory limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum number of live nodes in a pool (default: 20,000).
    pub capacity: usize,
    /// Maximum number of arguments per node (default: 8).
    pub max_args: usize,
    /// Belief given to objects imagined by FIND/BIND (default: 0.5).
    pub hyp_belief: f64,
    /// Minimum belief of main-band facts that rules may fire on (default: 0.2).
    pub halo_threshold: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 20_000,
            max_args: 8,
            hyp_belief: 0.5,
            halo_threshold: 0.2,
        }
    }
}

/// Directive and chain limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Maximum subgoal nesting depth (default: 24).
    pub max_depth: usize,
    /// Operators one directive may try before NRI overflows (default: 32).
    pub nri_max: usize,
    /// Iterations a single EACH/ANY step may produce (default: 1000).
    pub max_loop: u32,
    /// Ticks before a NOTE may re-select the same reaction (default: 30).
    pub note_cooldown: u64,
    /// Seconds a NOTE's reactive method may run (default: 10).
    pub note_budget: f64,
    /// Whether FIND may imagine an object when out of candidates (default: true).
    pub find_imagine: bool,
    /// Preference nudge applied on operator failure (default: 0.1).
    pub pref_step: f64,
    /// Preference nudge applied by EDIT (default: 0.2).
    pub edit_step: f64,
    /// How many method failures EDIT can look back over (default: 16).
    pub failure_log: usize,
    /// Ticks without kernel progress before a GND stalls (default: 50).
    pub stall_ticks: u64,
    /// Seconds a GND call may run (default: 30).
    pub gnd_budget: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_depth: 24,
            nri_max: 32,
            max_loop: 1000,
            note_cooldown: 30,
            note_budget: 10.0,
            find_imagine: true,
            pref_step: 0.1,
            edit_step: 0.2,
            failure_log: 16,
            stall_ticks: 50,
            gnd_budget: 30.0,
        }
    }
}

/// Rest values and filter rates for the mood triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    /// Wildness when winning steadily (default: 0.5).
    pub wild_rest: f64,
    /// Lower bound on wildness, keeps the draw temperature positive (default: 0.05).
    pub wild_min: f64,
    /// Belief threshold at rest (default: 0.5).
    pub bth_rest: f64,
    /// Preference threshold at rest (default: 0.0).
    pub pth_rest: f64,
    /// Increment of `pth` on each failure (default: 0.05).
    pub pth_step: f64,
    /// Fraction of the gap to rest recovered by `pth` on success (default: 0.2).
    pub pth_decay: f64,
    /// Slow filter rate for win rate, surprise, `wild` and `bth` (default: 0.05).
    pub filter: f64,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            wild_rest: 0.5,
            wild_min: 0.05,
            bth_rest: 0.5,
            pth_rest: 0.0,
            pth_step: 0.05,
            pth_decay: 0.2,
            filter: 0.05,
        }
    }
}

/// Tick loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ticks per second, used to convert second budgets (default: 10).
    pub tick_hz: f64,
    /// Seed for the operator-selection RNG (default: 42).
    pub seed: u64,
    /// Soft wall-clock budget per tick in milliseconds (default: 50).
    pub cycle_budget_ms: u64,
    /// Maximum concurrently active top-level chains (default: 64).
    pub max_foci: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_hz: 10.0,
            seed: 42,
            cycle_budget_ms: 50,
            max_foci: 64,
        }
    }
}

/// Complete configuration of one interpreter instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub memory: MemoryConfig,
    pub plan: PlanConfig,
    pub mood: MoodConfig,
    pub scheduler: SchedulerConfig,
}

impl CoreConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Convert a budget in seconds into a whole number of ticks (at least one).
    pub fn ticks_for(&self, seconds: f64) -> u64 {
        ((seconds * self.scheduler.tick_hz).ceil() as u64).max(1)
    }

    /// Convert a tick count back into seconds.
    pub fn seconds_for(&self, ticks: u64) -> f64 {
        if self.scheduler.tick_hz <= 0.0 {
            return 0.0;
        }
        ticks as f64 / self.scheduler.tick_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = CoreConfig::from_toml_str(
            r#"
            [plan]
            max_depth = 5

            [scheduler]
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.plan.max_depth, 5);
        assert_eq!(cfg.scheduler.seed, 7);
        assert_eq!(cfg.plan.nri_max, PlanConfig::default().nri_max);
        assert_eq!(cfg.memory.capacity, 20_000);
    }

    #[test]
    fn bad_toml_is_reported() {
        let err = CoreConfig::from_toml_str("[plan\nmax_depth = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("core.toml");
        let mut cfg = CoreConfig::default();
        cfg.mood.pth_step = 0.125;
        cfg.save(&path).unwrap();
        let back = CoreConfig::load(&path).unwrap();
        assert_eq!(back.mood.pth_step, 0.125);
    }

    #[test]
    fn tick_conversion() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.ticks_for(1.0), 10);
        assert_eq!(cfg.ticks_for(0.0), 1);
        assert!((cfg.seconds_for(25) - 2.5).abs() < 1e-9);
    }
}
