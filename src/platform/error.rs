//! Crate-wide error type.

use std::fmt;

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Setup-class failures that abort the whole run.
///
/// Verification failures are not errors; they are [`crate::Finding`] records
/// carried in scenario results.
#[derive(Debug)]
pub enum HarnessError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Template(String),
    InvalidArgument(String),
    Setup(String),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Io(err) => write!(f, "io error: {err}"),
            HarnessError::Json(err) => write!(f, "json error: {err}"),
            HarnessError::Template(msg) => write!(f, "template error: {msg}"),
            HarnessError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            HarnessError::Setup(msg) => write!(f, "setup error: {msg}"),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Io(err) => Some(err),
            HarnessError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io(err)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Json(err)
    }
}
