use std::time::Duration;

use fqa_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::llm::BACKEND_TIMEOUT;

/// Per-request transport timeout. The pipeline applies its own, usually shorter, budget.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    request_timeout: Duration,
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to `127.0.0.1`.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let remote = || {
            AppError::new(
                "AI_REMOTE_NOT_ALLOWED",
                "Ollama base URL must be localhost (127.0.0.1)",
            )
            .with_details(format!("base_url={base_url}"))
        };

        // Binding constraint: local-only via 127.0.0.1, optional numeric port, no path.
        if base_url != "http://127.0.0.1" {
            let port = base_url
                .strip_prefix("http://127.0.0.1:")
                .ok_or_else(remote)?;
            let valid_port = !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && port.parse::<u16>().map(|p| p != 0).unwrap_or(false);
            if !valid_port {
                return Err(remote());
            }
        }

        Ok(Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// POST `body` to `path` and decode the JSON reply.
    ///
    /// A transport timeout comes back as [`BACKEND_TIMEOUT`]; anything else as `failure_code`.
    pub(crate) fn post_json<B, R>(&self, path: &str, body: &B, failure_code: &str) -> Result<R, AppError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = ureq::post(&url).timeout(self.request_timeout).send_json(body);

        match resp {
            Ok(r) => r.into_json::<R>().map_err(|e| {
                AppError::new(failure_code, "Failed to decode Ollama response")
                    .with_details(format!("path={path}; err={e}"))
            }),
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                Err(AppError::new(failure_code, "Ollama rejected the request")
                    .with_details(format!("path={path}; status={status}; body={snippet}")))
            }
            Err(e) if is_timeout(&e) => Err(AppError::new(BACKEND_TIMEOUT, "Ollama request timed out")
                .with_details(format!("path={path}; err={e}"))
                .with_retryable(true)),
            Err(e) => Err(AppError::new(failure_code, "Failed to call Ollama")
                .with_details(format!("path={path}; err={e}"))
                .with_retryable(true)),
        }
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url)
            .timeout(Duration::from_millis(800))
            .call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(AppError::new(
                "AI_OLLAMA_UNREACHABLE",
                "Failed to reach Ollama on 127.0.0.1",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

/// True when a transport error was caused by the request timing out.
fn is_timeout(err: &ureq::Error) -> bool {
    let ureq::Error::Transport(t) = err else {
        return false;
    };
    let mut source = std::error::Error::source(t);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            );
        }
        source = e.source();
    }
    false
}
