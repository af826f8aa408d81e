//! Error types shared across the statement pipeline.
//!
//! Everything here is reported locally: a tokenize or parse failure ends the
//! current statement, a variable error ends the current command, and a stage
//! failure is stored on the stage that produced it.

use thiserror::Error;

/// Errors raised while splitting a raw line into tokens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unterminated {quote} quote starting at offset {index}")]
    UnterminatedQuote { quote: char, index: usize },
}

/// Errors raised while grouping tokens into invocations and chains.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatementError {
    #[error("unexpected operator {op} at offset {index}")]
    UnexpectedOperator { op: String, index: usize },
    #[error("missing target after {op}")]
    MissingRedirectTarget { op: String },
    #[error("statement ends with {op}")]
    DanglingOperator { op: String },
}

/// Errors raised by [`Expression::parse`](crate::parser::Expression::parse).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("cannot set multiple variables")]
    MultipleTargets,
    #[error("missing variable name")]
    MissingOperand,
    #[error("missing operator")]
    MissingOperator,
    #[error("invalid operator {0}")]
    InvalidOperator(String),
}

/// Errors raised when writing to a variable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariableError {
    #[error("{0}: read-only variable")]
    ReadOnly(String),
}

/// Why a pipeline stage did not produce a return code.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("{name}: {error:#}")]
    Command { name: String, error: anyhow::Error },
    #[error("{path}: {error}")]
    Redirect {
        path: String,
        error: std::io::Error,
    },
    #[error("{name}: stage panicked: {message}")]
    Panicked { name: String, message: String },
}

impl StageFailure {
    /// Conventional exit code reported for a stage that failed this way.
    pub fn exit_code(&self) -> crate::command::ExitCode {
        match self {
            StageFailure::NotFound(_) => 127,
            _ => 1,
        }
    }
}
