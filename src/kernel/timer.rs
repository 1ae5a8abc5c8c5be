//! A reference kernel whose calls finish after a fixed number of polls.

use std::collections::HashMap;

use super::{Kernel, KernelError, KernelResult, KernelStatus};
use crate::graph::{Graphlet, NodePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Left(u32),
    Stopped,
}

/// Succeeds each call after `polls` status calls; a stopped call fails.
/// Functions listed with [`TimerKernel::failing`] fail when they finish.
#[derive(Debug, Clone)]
pub struct TimerKernel {
    functions: Vec<String>,
    failing: Vec<String>,
    polls: u32,
    next: u64,
    runs: HashMap<u64, (String, Run)>,
    stops: u64,
}

impl TimerKernel {
    pub fn new(functions: &[&str], polls: u32) -> Self {
        Self {
            functions: functions.iter().map(|s| s.to_string()).collect(),
            failing: Vec::new(),
            polls,
            next: 0,
            runs: HashMap::new(),
            stops: 0,
        }
    }

    /// Make `func` fail instead of succeeding.
    pub fn failing(mut self, func: &str) -> Self {
        self.failing.push(func.to_string());
        self
    }

    /// Number of `stop` calls that hit a running call.
    pub fn stops(&self) -> u64 {
        self.stops
    }
}

impl Kernel for TimerKernel {
    fn functions(&self) -> Vec<String> {
        self.functions.clone()
    }

    fn start(&mut self, func: &str, _pool: &NodePool, _key: &Graphlet) -> KernelResult<u64> {
        if !self.functions.iter().any(|f| f == func) {
            return Err(KernelError::StartRefused {
                func: func.to_string(),
                reason: "not provided by this kernel".to_string(),
            });
        }
        self.next += 1;
        self.runs.insert(self.next, (func.to_string(), Run::Left(self.polls)));
        Ok(self.next)
    }

    fn status(&mut self, inst: u64) -> KernelStatus {
        let Some((func, run)) = self.runs.get_mut(&inst) else {
            return KernelStatus::Fail(format!("unknown instance {inst}"));
        };
        match run {
            Run::Stopped => KernelStatus::Fail("stopped".to_string()),
            Run::Left(0) => {
                if self.failing.contains(func) {
                    KernelStatus::Fail(format!("{func} did not work"))
                } else {
                    KernelStatus::Done
                }
            }
            Run::Left(n) => {
                *n -= 1;
                if *n == 0 && !self.failing.contains(func) {
                    return KernelStatus::Done;
                }
                KernelStatus::Working {
                    progress: Some(*n as f64),
                }
            }
        }
    }

    fn stop(&mut self, inst: u64) {
        if let Some((_, run)) = self.runs.get_mut(&inst) {
            if *run != Run::Stopped {
                *run = Run::Stopped;
                self.stops += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishes_after_polls() {
        let mut k = TimerKernel::new(&["walk"], 3);
        let pool = NodePool::new(4, 2);
        let i = k.start("walk", &pool, &Graphlet::new()).unwrap();
        assert!(matches!(k.status(i), KernelStatus::Working { .. }));
        assert!(matches!(k.status(i), KernelStatus::Working { .. }));
        assert_eq!(k.status(i), KernelStatus::Done);
        assert_eq!(k.status(i), KernelStatus::Done);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut k = TimerKernel::new(&["walk"], 5);
        let pool = NodePool::new(4, 2);
        let i = k.start("walk", &pool, &Graphlet::new()).unwrap();
        k.stop(i);
        k.stop(i);
        assert_eq!(k.stops(), 1);
        assert!(matches!(k.status(i), KernelStatus::Fail(_)));
    }

    #[test]
    fn failing_function() {
        let mut k = TimerKernel::new(&["see"], 1).failing("see");
        let pool = NodePool::new(4, 2);
        let i = k.start("see", &pool, &Graphlet::new()).unwrap();
        assert!(matches!(k.status(i), KernelStatus::Working { .. }));
        assert!(matches!(k.status(i), KernelStatus::Fail(_)));
    }
}
