use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::domain::{Remediation, Stage, Status};
use crate::validate::ValidationIssue;

/// Closed set of classified failures. Anything else is fatal and never reaches here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    MalformedInput { issues: Vec<ValidationIssue> },
    OutOfScope { scope: String },
    NoChunks,
    RetrievalError { details: String },
    TimedOut { stage: Stage, budget_ms: u64 },
    EmptyAnswer { retrieved: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TerminalOutcome {
    pub status: Status,
    pub message: String,
    pub remediation: Remediation,
}

/// Map a failure signal to its terminal outcome.
///
/// Retrieval failures are not retried: the same query against the same snapshot returns
/// the same ranking. Timeouts are not retried synchronously either.
pub fn terminal_outcome(signal: &FailureSignal) -> TerminalOutcome {
    match signal {
        FailureSignal::MalformedInput { issues } => {
            let reasons = issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            TerminalOutcome {
                status: Status::MalformedInput,
                message: format!(
                    "I couldn't process that question ({reasons}). Please correct it and try again."
                ),
                remediation: Remediation::FixInput,
            }
        }
        FailureSignal::OutOfScope { scope } => TerminalOutcome {
            status: Status::OutOfScope,
            message: format!(
                "I can only answer questions about {scope}. Your question appears to be outside this scope; \
                 please rephrase it to focus on {scope}."
            ),
            remediation: Remediation::NarrowScope,
        },
        FailureSignal::NoChunks => TerminalOutcome {
            status: Status::RetrievalFailure,
            message: "I couldn't find any relevant passages in the documents. \
                      Please try rephrasing your question or asking about a different topic."
                .to_string(),
            remediation: Remediation::Rephrase,
        },
        FailureSignal::RetrievalError { .. } => TerminalOutcome {
            status: Status::RetrievalFailure,
            message: "I encountered an error while searching the documents. \
                      Please try rephrasing your question."
                .to_string(),
            remediation: Remediation::Rephrase,
        },
        FailureSignal::TimedOut { stage, budget_ms } => TerminalOutcome {
            status: Status::Timeout,
            message: format!(
                "The request took too long to process ({stage} exceeded {budget_ms} ms). \
                 Please try a simpler or more specific question."
            ),
            remediation: Remediation::Simplify,
        },
        FailureSignal::EmptyAnswer { retrieved } => TerminalOutcome {
            status: Status::EmptyResponse,
            message: format!(
                "I found {retrieved} relevant passage(s) but couldn't generate a meaningful answer. \
                 Please try rephrasing your question."
            ),
            remediation: Remediation::Rephrase,
        },
    }
}

/// Observer for timeout outcomes; the place to hang a circuit breaker at higher volume.
///
/// Observers never change a classification.
pub trait TimeoutHook: Send + Sync {
    fn on_timeout(&self, stage: Stage);
    fn on_completed(&self);
}

#[derive(Debug, Default)]
pub struct NoopTimeoutHook;

impl TimeoutHook for NoopTimeoutHook {
    fn on_timeout(&self, _stage: Stage) {}
    fn on_completed(&self) {}
}

/// Counts consecutive timeouts across queries handled by one pipeline.
#[derive(Debug, Default)]
pub struct ConsecutiveTimeouts {
    count: AtomicU32,
}

impl ConsecutiveTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl TimeoutHook for ConsecutiveTimeouts {
    fn on_timeout(&self, stage: Stage) {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(%stage, consecutive = n, "external call timed out");
    }

    fn on_completed(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}
