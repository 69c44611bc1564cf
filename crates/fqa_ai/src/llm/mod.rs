use fqa_core::domain::TokenUsage;
use fqa_core::error::AppError;

/// Error code for a backend call that ran past its transport timeout.
pub const BACKEND_TIMEOUT: &str = "AI_BACKEND_TIMEOUT";
/// Error code for any other backend failure.
pub const BACKEND_FAILED: &str = "AI_BACKEND_FAILED";

/// Answers must be reproducible, so sampling is always greedy.
pub const TEMPERATURE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens,
            temperature: TEMPERATURE,
        }
    }
}

/// Raw backend output. An empty `text` is a valid result; callers classify it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

pub trait Llm: Send + Sync {
    fn generate(&self, req: &GenerationRequest) -> Result<Generation, AppError>;
}

pub mod ollama_llm;
