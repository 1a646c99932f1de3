//! Error types for Lattice CI.

use std::fmt;
use thiserror::Error;

/// Which rule table a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Include,
    Exclude,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Include => write!(f, "include"),
            RuleKind::Exclude => write!(f, "exclude"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Matrix errors
    #[error("Invalid axis '{axis}': {reason}")]
    InvalidAxis { axis: String, reason: String },

    #[error("Invalid {kind} rule #{index} {rule}: field '{field}' {reason}")]
    InvalidRule {
        kind: RuleKind,
        index: usize,
        rule: String,
        field: String,
        reason: String,
    },

    #[error("Invalid {kind} rule #{index}: rule has no fields")]
    EmptyRule { kind: RuleKind, index: usize },

    #[error("Invalid field declaration '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    // Step errors
    #[error("Invalid step #{index} '{step}': {reason}")]
    InvalidStep {
        index: usize,
        step: String,
        reason: String,
    },

    #[error("Invalid expression in step '{step}' ({expression}): {message}")]
    InvalidExpression {
        step: String,
        expression: String,
        message: String,
    },

    #[error("Step '{step}' references unknown job field '{field}'")]
    UnknownField { step: String, field: String },

    #[error("Step '{step}' requires job field '{field}', which is not set on job {job} and has no default")]
    MissingField {
        step: String,
        field: String,
        job: String,
    },

    #[error("Step '{step}' requires host fact '{fact}', which was not supplied")]
    MissingHostFact { step: String, fact: String },

    #[error("Step not found: {0}")]
    UnknownStep(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether this error came from the matrix or step definitions rather than IO.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::Serialization(_))
    }
}
