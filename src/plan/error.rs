//! Rich diagnostic error types for directives and chains.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::{GraphError, SchemaError};
use crate::kernel::KernelError;
use crate::library::LibraryError;

/// Errors raised while running plans.
///
/// Most of these are recovered locally: the directive that hit them fails
/// and the error is logged with `tracing::warn!`.
#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error("unbound variable {var} at use site in {kind}")]
    #[diagnostic(
        code(delib::plan::binding),
        help(
            "A directive needs this variable bound before it can run. Put a FIND, \
             BIND, EACH or ANY step that binds it earlier in the chain."
        )
    )]
    Binding { var: String, kind: &'static str },

    #[error("scope is missing variable {var}")]
    #[diagnostic(
        code(delib::plan::scope),
        help("An enclosing FIND/BIND/EACH/ANY scope was expected to bind this variable.")
    )]
    Scope { var: String },

    #[error("plan overflow: {what} limit of {limit} reached")]
    #[diagnostic(
        code(delib::plan::overflow),
        help(
            "Raise `plan.max_depth`, `plan.nri_max` or `plan.max_loop`, or check the \
             library for operators that expand into themselves."
        )
    )]
    Overflow { what: &'static str, limit: usize },

    #[error("chain cycle: {detail}")]
    #[diagnostic(
        code(delib::plan::cycle),
        help(
            "Links may only loop back through an EACH, ANY, FIND or BIND step, and \
             each pass must block or change working memory."
        )
    )]
    Cycle { detail: String },

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
    Kernel(#[from] KernelError),
}

/// Result type for plan operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;
