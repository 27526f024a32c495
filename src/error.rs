//! Service-wide error taxonomy.
//!
//! Every user-visible failure is one of the [`ErrorKind`]s below. The HTTP gateway maps the
//! kind onto a status code and renders `{kind, message}` bodies; component-local errors
//! (`container::Error`, `persistence::Error`, ...) convert into [`Error`] at the seams.

use std::fmt;

use serde::Serialize;

use crate::container::{self, ContainerID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "InvalidStateError")]
    InvalidState,
    #[serde(rename = "ConflictError")]
    Conflict,
    #[serde(rename = "PartialFailureError")]
    PartialFailure,
    #[serde(rename = "RuntimeError")]
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::PartialFailure => "PartialFailureError",
            ErrorKind::Runtime => "RuntimeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single step of a multi-step operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    pub step: &'static str,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepStatus {
    pub fn succeeded(step: &'static str) -> Self {
        Self {
            step,
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(step: &'static str, error: impl fmt::Display) -> Self {
        Self {
            step,
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

/// Errors are `Clone` so that a coalesced inventory refresh can hand the same failure
/// to every waiting caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{operation} on container `{container_id}` partially failed; container is left {surviving_state}")]
    PartialFailure {
        container_id: ContainerID,
        operation: &'static str,
        steps: Vec<StepStatus>,
        surviving_state: String,
    },
    #[error("{0}")]
    Runtime(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::PartialFailure { .. } => ErrorKind::PartialFailure,
            Error::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn container_not_found(id: impl fmt::Display) -> Self {
        Error::NotFound(format!("container `{id}` not found"))
    }

    pub fn runtime(context: &str, err: impl fmt::Display) -> Self {
        Error::Runtime(format!("{context}: {err}"))
    }
}

impl From<container::Error> for Error {
    fn from(value: container::Error) -> Self {
        Error::Validation(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait ResultOkLogExt<T, E> {
    fn ok_log(self) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error,
{
    fn ok_log(self) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::error!("{err}");
                None
            }
        }
    }
}
