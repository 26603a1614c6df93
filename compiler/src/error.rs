//! Compile-time and execution-time errors.
//!
//! Compile errors abort compilation entirely; no partial code object is
//! produced. Execution errors abort the in-flight run. Neither is retried:
//! both are deterministic in the equation set, backend, and registry.

use thiserror::Error;

use crate::codeobject::Backend;
use crate::units::{Dimension, UnitError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("undefined identifier `{name}`")]
    UndefinedIdentifier { name: String },

    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },

    #[error("`{name}` is not a function")]
    NotCallable { name: String },

    #[error("function `{name}` cannot be used as a value")]
    NotAValue { name: String },

    #[error("`{name}` expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: Dimension,
        found: Dimension,
    },

    #[error("{context}: {source}")]
    Units { context: String, source: UnitError },

    #[error("invalid unit for `{target}`: {source}")]
    InvalidUnit { target: String, source: UnitError },

    #[error("exponent must be a constant when the base has units ({base})")]
    NonConstantExponent { base: Dimension },

    #[error("`{name}` is defined more than once")]
    DuplicateTarget { name: String },

    #[error("backend `{backend}` is not available on this host")]
    BackendUnavailable { backend: Backend },
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{function} not available for backend {backend}")]
    NotImplemented { function: String, backend: Backend },

    #[error("missing value for state variable `{name}`")]
    MissingVariable { name: String },

    #[error("`{name}` has {found} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("native compilation failed: {message}")]
    Toolchain { message: String },

    #[error("native kernel protocol error: {message}")]
    Protocol { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
