use fqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::OllamaClient;

const EMBEDDINGS_FAILED: &str = "AI_EMBEDDINGS_FAILED";

/// Inputs longer than this are cut before they are sent.
const MAX_EMBED_INPUT_BYTES: usize = 12_000;

/// Embeddings via Ollama's `/api/embed`, one input per call.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

fn truncate_at_char_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let req = EmbedRequest {
            model,
            input: truncate_at_char_boundary(input, MAX_EMBED_INPUT_BYTES),
        };
        let resp: EmbedResponse = self.client.post_json("/api/embed", &req, EMBEDDINGS_FAILED)?;

        match resp.embeddings.into_iter().next() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(AppError::new(EMBEDDINGS_FAILED, "Ollama returned no embedding")
                .with_details(format!("model={model}"))),
        }
    }
}
