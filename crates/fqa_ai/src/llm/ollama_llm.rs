use fqa_core::domain::TokenUsage;
use fqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{Generation, GenerationRequest, Llm, BACKEND_FAILED};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl Llm for OllamaLlm {
    fn generate(&self, req: &GenerationRequest) -> Result<Generation, AppError> {
        let body = GenerateRequest {
            model: &req.model,
            prompt: &req.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens,
            },
        };
        let v: GenerateResponse = self
            .client
            .post_json("/api/generate", &body, BACKEND_FAILED)
            .map_err(|e| {
                let details = format!("model={}; {}", req.model, e.details.as_deref().unwrap_or_default());
                e.with_details(details)
            })?;

        Ok(Generation {
            text: v.response,
            usage: TokenUsage {
                prompt_tokens: v.prompt_eval_count.unwrap_or(0),
                completion_tokens: v.eval_count.unwrap_or(0),
            },
        })
    }
}
