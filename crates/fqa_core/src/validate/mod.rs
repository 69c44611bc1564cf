use serde::{Deserialize, Serialize};

use crate::domain::{Method, QueryRequest, MAX_TIMEOUT_MS};

pub const MAX_QUERY_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// A request that passed validation; the only input the dispatcher accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidQuery {
    pub text: String,
    pub method: Method,
    pub timeout_ms: u64,
}

/// Validate a raw request. Every problem is reported, not only the first one.
pub fn validate_query(req: &QueryRequest) -> Result<ValidQuery, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let text = req.text.trim();
    if text.is_empty() {
        issues.push(ValidationIssue::new("QUERY_EMPTY", "Query text must not be empty"));
    }

    let char_count = text.chars().count();
    if char_count > MAX_QUERY_CHARS {
        issues.push(
            ValidationIssue::new("QUERY_TOO_LONG", "Query text is too long")
                .with_details(format!("chars={char_count}; max={MAX_QUERY_CHARS}")),
        );
    }

    if let Some(bad) = text.chars().find(|c| c.is_control() && !c.is_whitespace()) {
        issues.push(
            ValidationIssue::new(
                "QUERY_CONTROL_CHARS",
                "Query text contains control characters",
            )
            .with_details(format!("char=U+{:04X}", bad as u32)),
        );
    }

    let method = match req.method.parse::<Method>() {
        Ok(m) => Some(m),
        Err(_) => {
            let allowed = Method::ALL
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            issues.push(
                ValidationIssue::new("QUERY_METHOD_UNKNOWN", "Unknown prompting method")
                    .with_details(format!("method={}; allowed={allowed}", req.method)),
            );
            None
        }
    };

    if req.timeout_ms == 0 || req.timeout_ms > MAX_TIMEOUT_MS {
        issues.push(
            ValidationIssue::new(
                "QUERY_TIMEOUT_INVALID",
                format!("Timeout must be between 1 and {MAX_TIMEOUT_MS} ms"),
            )
            .with_details(format!("timeout_ms={}", req.timeout_ms)),
        );
    }

    match method {
        Some(method) if issues.is_empty() => Ok(ValidQuery {
            text: text.to_string(),
            method,
            timeout_ms: req.timeout_ms,
        }),
        _ => Err(issues),
    }
}
