// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # deliberator
//!
//! A deliberative action interpreter. Plans are chains of directives over a
//! semantic working memory; operators from a text library expand goals into
//! sub-chains, rules populate a transient halo of inferred facts, and a
//! single-threaded scheduler advances everything one step per tick.
//!
//! ## Architecture
//!
//! - **Semantic graph** (`graph`): arena node pool, graphlets, bindings and
//!   the parenthesized text language
//! - **Working memory** (`memory`): bands, assertion, halo percolation,
//!   pattern matching and garbage collection
//! - **Library** (`library`): operators and rules, selection with
//!   non-return inhibition, the `OP`/`RULE` file format
//! - **Plans** (`plan`): the sixteen directive kinds, chains and scripts
//! - **Scheduler** (`scheduler`): the tick loop, inputs, halts and GC
//! - **Kernels** (`kernel`): grounding functions called by GND
//! - **Mood** (`mood`) and **tracer** (`trace`)
//!
//! ## Library usage
//!
//! ```no_run
//! use deliberator::config::CoreConfig;
//! use deliberator::io::{Input, Source};
//! use deliberator::library::Library;
//! use deliberator::scheduler::Scheduler;
//!
//! let lib = Library::parse("OP greet\n  kind=NOTE\n  trig: (hq \"close\" :obj ?x)\n  method:\n    PUNT\n").unwrap();
//! let mut core = Scheduler::new(CoreConfig::default(), lib).unwrap();
//! core.submit(Input::note(Source::User, "(hq \"close\" :obj X)")).unwrap();
//! core.run_until_idle(100);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod io;
pub mod kernel;
pub mod library;
pub mod memory;
pub mod mood;
pub mod plan;
pub mod scheduler;
pub mod trace;
