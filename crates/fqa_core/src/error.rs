use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Structured error shared by every layer.
///
/// Only conditions outside the query-failure taxonomy travel as `AppError` to a caller
/// of the pipeline; the five classified failures are turned into terminal
/// [`crate::domain::ResponseRecord`]s instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Record the file a filesystem failure happened on, with the underlying error.
    pub fn at_path(self, path: &Path, err: impl fmt::Display) -> Self {
        self.with_details(format!("path={}; err={err}", path.display()))
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details.as_deref() {
            Some(d) => write!(f, "[{}] {} ({d})", self.code, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}
