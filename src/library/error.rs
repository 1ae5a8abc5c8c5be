//! Rich diagnostic error types for the operator and rule library.

use miette::Diagnostic;
use thiserror::Error;

use crate::error::{GraphError, SchemaError};

/// Errors from library loading, learning and editing.
#[derive(Debug, Error, Diagnostic)]
pub enum LibraryError {
    #[error("duplicate {what}: an equivalent definition already exists as \"{existing}\"")]
    #[diagnostic(
        code(delib::library::duplicate),
        help(
            "The new definition differs from an existing one only in variable names. \
             Edit the existing definition instead of adding a copy."
        )
    )]
    Duplicate { what: &'static str, existing: String },

    #[error("unknown operator: \"{name}\"")]
    #[diagnostic(
        code(delib::library::unknown_operator),
        help("No operator with this name or id is loaded. Check the library file.")
    )]
    UnknownOperator { name: String },

    #[error("unknown rule: \"{name}\"")]
    #[diagnostic(
        code(delib::library::unknown_rule),
        help("No rule with this name or id is loaded. Check the library file.")
    )]
    UnknownRule { name: String },

    #[error("invalid {section} \"{name}\": {message}")]
    #[diagnostic(
        code(delib::library::invalid_definition),
        help(
            "An OP section needs `kind=`, a `trig:` line and a non-empty `method:`; \
             a RULE section needs `if:` and `then:` lines."
        )
    )]
    Invalid {
        section: &'static str,
        name: String,
        message: String,
    },

    #[error("failed to read library \"{path}\"")]
    #[diagnostic(
        code(delib::library::io),
        help("Check that the library file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Result type for library operations.
pub type LibraryResult<T> = std::result::Result<T, LibraryError>;
