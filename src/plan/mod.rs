//! Directives, chains and the per-scheduler context they run in.
//!
//! A directive is one step of a plan. Every kind shares the same
//! `start / status / stop` protocol and reports a [`Status`]. A chain owns
//! its directives and follows their success (`cont`) and alternate (`alt`)
//! links.
//!
//! - [`script`]: chain templates and their text form
//! - [`chain`]: running chains, scope bindings, loop handling, validation
//! - [`directive`]: the directive record and operator attempts
//! - [`context`]: shared state threaded through every call
//! - kind modules: [`note`], [`act`], [`goal`], [`find`], [`learn`]

pub mod act;
pub mod chain;
pub mod context;
pub mod directive;
pub mod error;
pub mod find;
pub mod goal;
pub mod learn;
pub mod note;
pub mod script;

use serde::{Deserialize, Serialize};

pub use chain::Chain;
pub use context::Context;
pub use directive::Directive;
pub use error::{PlanError, PlanResult};
pub use script::{ChainSpec, Link, Payload, StepSpec};

/// Outcome of `start` or `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Still running; poll again next tick.
    Working,
    /// Success; follow `cont`.
    Done,
    /// Alternate success; follow `alt`.
    Alt,
    /// Forcibly stopped.
    Stopped,
    Fail,
    /// Discontinue the enclosing chain.
    Punt,
}

impl Status {
    /// Numeric code: 0 working, 1 done, 2 alt, -1 stopped, -2 fail, -3 punt.
    pub fn code(self) -> i8 {
        match self {
            Status::Working => 0,
            Status::Done => 1,
            Status::Alt => 2,
            Status::Stopped => -1,
            Status::Fail => -2,
            Status::Punt => -3,
        }
    }

    pub fn from_code(code: i8) -> Option<Status> {
        match code {
            0 => Some(Status::Working),
            1 => Some(Status::Done),
            2 => Some(Status::Alt),
            -1 => Some(Status::Stopped),
            -2 => Some(Status::Fail),
            -3 => Some(Status::Punt),
            _ => None,
        }
    }

    pub fn is_final(self) -> bool {
        self != Status::Working
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Done | Status::Alt)
    }
}

/// The sixteen directive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DirKind {
    Note,
    Do,
    Ante,
    Gate,
    Punt,
    Gnd,
    Wait,
    Ach,
    Find,
    Bind,
    Each,
    Any,
    Chk,
    Esc,
    Add,
    Edit,
}

impl DirKind {
    pub const ALL: [DirKind; 16] = [
        DirKind::Note,
        DirKind::Do,
        DirKind::Ante,
        DirKind::Gate,
        DirKind::Punt,
        DirKind::Gnd,
        DirKind::Wait,
        DirKind::Ach,
        DirKind::Find,
        DirKind::Bind,
        DirKind::Each,
        DirKind::Any,
        DirKind::Chk,
        DirKind::Esc,
        DirKind::Add,
        DirKind::Edit,
    ];

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Option<DirKind> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            DirKind::Note => "NOTE",
            DirKind::Do => "DO",
            DirKind::Ante => "ANTE",
            DirKind::Gate => "GATE",
            DirKind::Punt => "PUNT",
            DirKind::Gnd => "GND",
            DirKind::Wait => "WAIT",
            DirKind::Ach => "ACH",
            DirKind::Find => "FIND",
            DirKind::Bind => "BIND",
            DirKind::Each => "EACH",
            DirKind::Any => "ANY",
            DirKind::Chk => "CHK",
            DirKind::Esc => "ESC",
            DirKind::Add => "ADD",
            DirKind::Edit => "EDIT",
        }
    }

    /// Kinds that bind a focus variable and can be resumed for the next
    /// candidate when a chain loops back to them.
    pub fn iterates(self) -> bool {
        matches!(self, DirKind::Find | DirKind::Bind | DirKind::Each | DirKind::Any)
    }
}

impl std::fmt::Display for DirKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for k in DirKind::ALL {
            assert_eq!(DirKind::parse(k.name()), Some(k));
            assert_eq!(DirKind::parse(&k.name().to_lowercase()), Some(k));
        }
        assert_eq!(DirKind::parse("JUMP"), None);
    }

    #[test]
    fn status_codes() {
        for code in -3..=2 {
            assert_eq!(Status::from_code(code).unwrap().code(), code);
        }
        assert!(Status::Alt.is_success());
        assert!(!Status::Working.is_final());
    }
}
