//! Error types for Conveyor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Variable set {0:?} not found")]
    VariableSetNotFound(String),

    #[error("Integration {0:?} not found")]
    IntegrationNotFound(String),

    #[error("Integration {0:?} is not supported on a job")]
    UnsupportedIntegration(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    // Definition errors
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Unable to parse expression {expression:?}: {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    // Infrastructure errors
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error reports a uniqueness violation on insert.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidWorkflow(err.to_string())
    }
}
