use fqa_core::error::AppError;

/// External embedding capability. Implementations are shared across worker threads.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod ollama_embed;
