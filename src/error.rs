// Allow module inception for error types - this is a common Rust pattern
#![allow(clippy::module_name_repetitions)]

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid operation spec: {0}")]
    InvalidSpec(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("No operation at path: {0}")]
    UnknownPath(String),

    #[error("Operation '{path}' failed: {message}")]
    Operation { path: String, message: String },
}

impl OpsError {
    /// The bare failure message, without the variant framing.
    ///
    /// This is what gets recorded in a status node's `error` field: for an
    /// operation failure it is the underlying error rendered verbatim, for
    /// everything else the full display form.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Operation { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type OpsResult<T> = Result<T, OpsError>;
