//! Rich diagnostic error types for the deliberator core.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::kernel::KernelError;
use crate::library::LibraryError;
use crate::plan::PlanError;

/// Top-level error type for the deliberator core.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum DelibError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node pool overflow: {what} limit of {limit} reached")]
    #[diagnostic(
        code(delib::graph::overflow),
        help(
            "The pool or a node's argument list is full. Raise `memory.capacity` \
             or `memory.max_args`, or let garbage collection reclaim dead nodes first."
        )
    )]
    Overflow { what: &'static str, limit: usize },

    #[error("self-loop rejected: node {node} cannot be its own \"{role}\" argument")]
    #[diagnostic(
        code(delib::graph::self_loop),
        help("A node may not point at itself. Introduce a separate object node instead.")
    )]
    SelfLoop { node: u32, role: String },

    #[error("node not found: {node}")]
    #[diagnostic(
        code(delib::graph::node_not_found),
        help(
            "The node id is stale (collected by GC) or belongs to another pool. \
             Keep referenced nodes in a directive's seed set."
        )
    )]
    NodeNotFound { node: u32 },

    #[error("contradiction: role \"{role}\" has two fillers in one clause of node {node}")]
    #[diagnostic(
        code(delib::graph::contradiction),
        help("A clause may give each role at most one filler. Split the clause in two.")
    )]
    Contradiction { node: u32, role: String },
}

/// Result alias for node pool and working memory operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Schema errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
#[error("schema error at line {line}: {message}")]
#[diagnostic(
    code(delib::schema),
    help(
        "Graphlets are written as `(head \"lex\" :role term ...)`; chain steps as \
         `[@label] KIND graphlet [-> @target] [| @target]`. Check parentheses, quotes \
         and directive kind names."
    )
)]
pub struct SchemaError {
    pub line: usize,
    pub message: String,
}

impl SchemaError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Result alias for text parsing.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config \"{path}\"")]
    #[diagnostic(
        code(delib::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config \"{path}\"")]
    #[diagnostic(
        code(delib::config::write),
        help("Check that the target directory exists and is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config \"{path}\": {message}")]
    #[diagnostic(
        code(delib::config::parse),
        help("The config is TOML with optional [memory], [plan], [mood] and [scheduler] tables.")
    )]
    Parse { path: String, message: String },
}

/// Convenience alias used throughout the crate.
pub type DelibResult<T> = std::result::Result<T, DelibError>;
