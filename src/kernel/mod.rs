//! Grounding kernels: external providers of named timed functions.
//!
//! A GND directive names a function (the head of its key's main clause).
//! The registry routes it to the kernel that registered the name; the kernel
//! starts an instance and is polled once per tick until done. `stop` must be
//! idempotent. Kernels may also volunteer observations, which the scheduler
//! injects as `sensor` NOTEs.

pub mod timer;

use std::collections::HashMap;

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use crate::graph::{Graphlet, NodePool};

pub use timer::TimerKernel;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum KernelError {
    #[error("no kernel provides function \"{func}\"")]
    #[diagnostic(
        code(delib::kernel::unknown_function),
        help("Register a kernel for this function name before running GND steps that use it.")
    )]
    UnknownFunction { func: String },

    #[error("kernel refused to start \"{func}\": {reason}")]
    #[diagnostic(
        code(delib::kernel::start_refused),
        help("The kernel rejected the call's descriptor. Check the GND key's arguments.")
    )]
    StartRefused { func: String, reason: String },

    #[error("kernel function \"{func}\" failed: {reason}")]
    #[diagnostic(code(delib::kernel::failed), help("The grounding collaborator reported a failure."))]
    Failed { func: String, reason: String },

    #[error("kernel function \"{func}\" stalled for {ticks} ticks")]
    #[diagnostic(
        code(delib::kernel::stalled),
        help("The call reported no progress within `plan.stall_ticks`. Raise the limit or fix the kernel.")
    )]
    Stalled { func: String, ticks: u64 },
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// A running kernel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle {
    kernel: usize,
    inst: u64,
}

impl KernelHandle {
    pub fn new(kernel: usize, inst: u64) -> Self {
        Self { kernel, inst }
    }

    /// Kernel-side instance number.
    pub fn inst(self) -> u64 {
        self.inst
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KernelStatus {
    /// Still running; `progress` is an optional error metric that must keep
    /// changing for the call not to count as stalled.
    Working { progress: Option<f64> },
    Done,
    Fail(String),
}

pub trait Kernel: Send {
    /// Function names this kernel provides.
    fn functions(&self) -> Vec<String>;

    /// Start `func` for a descriptor (the GND key, nodes in `pool`).
    /// Returns a kernel-side instance number.
    fn start(&mut self, func: &str, pool: &NodePool, key: &Graphlet) -> KernelResult<u64>;

    fn status(&mut self, inst: u64) -> KernelStatus;

    fn stop(&mut self, inst: u64);

    /// Observations to inject as `sensor` NOTEs, as graphlet text.
    fn volunteer(&mut self) -> Vec<String> {
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Function name → kernel routing.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: Vec<Box<dyn Kernel>>,
    routes: HashMap<String, usize>,
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.kernels.len())
            .field("functions", &self.routes.len())
            .finish()
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel under every function it provides. Later
    /// registrations take over names already routed.
    pub fn register(&mut self, kernel: Box<dyn Kernel>) {
        let idx = self.kernels.len();
        for func in kernel.functions() {
            debug!(func = %func, kernel = idx, "kernel function registered");
            self.routes.insert(func, idx);
        }
        self.kernels.push(kernel);
    }

    pub fn provides(&self, func: &str) -> bool {
        self.routes.contains_key(func)
    }

    pub fn start(&mut self, func: &str, pool: &NodePool, key: &Graphlet) -> KernelResult<KernelHandle> {
        let idx = *self.routes.get(func).ok_or_else(|| KernelError::UnknownFunction {
            func: func.to_string(),
        })?;
        let inst = self.kernels[idx].start(func, pool, key)?;
        Ok(KernelHandle::new(idx, inst))
    }

    pub fn status(&mut self, handle: KernelHandle) -> KernelStatus {
        match self.kernels.get_mut(handle.kernel) {
            Some(k) => k.status(handle.inst),
            None => KernelStatus::Fail("kernel gone".to_string()),
        }
    }

    pub fn stop(&mut self, handle: KernelHandle) {
        if let Some(k) = self.kernels.get_mut(handle.kernel) {
            k.stop(handle.inst);
        }
    }

    /// Collect volunteered observations from every kernel.
    pub fn volunteers(&mut self) -> Vec<String> {
        self.kernels.iter_mut().flat_map(|k| k.volunteer()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_function_name() {
        let mut reg = KernelRegistry::new();
        reg.register(Box::new(TimerKernel::new(&["walk", "wave"], 2)));
        assert!(reg.provides("walk"));
        assert!(!reg.provides("fly"));

        let pool = NodePool::new(8, 2);
        let h = reg.start("walk", &pool, &Graphlet::new()).unwrap();
        assert!(matches!(reg.status(h), KernelStatus::Working { .. }));
        assert_eq!(reg.status(h), KernelStatus::Done);

        let err = reg.start("fly", &pool, &Graphlet::new()).unwrap_err();
        assert!(matches!(err, KernelError::UnknownFunction { .. }));
    }
}
