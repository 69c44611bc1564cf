#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fqa_ai::embeddings::Embedder;
use fqa_ai::index::IndexSnapshot;
use fqa_ai::llm::{Generation, GenerationRequest, Llm};
use fqa_ai::pipeline::{PipelineSettings, QueryPipeline};
use fqa_ai::retrieve::{Retriever, SearchIndex};
use fqa_core::domain::{Chunk, OffsetRange, TokenUsage};
use fqa_core::error::AppError;

pub const EMBED_MODEL: &str = "nomic-embed-text";
pub const GEN_MODEL: &str = "llama3.1:8b";

const TERMS: [&str; 4] = ["revenue", "assets", "debt", "margin"];

/// Counts a handful of finance terms; deterministic and dependency-free.
pub struct TermEmbedder;

impl Embedder for TermEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let lower = input.to_lowercase();
        Ok(TERMS.iter().map(|t| lower.matches(t).count() as f32).collect())
    }
}

pub struct SlowEmbedder(pub Duration);

impl Embedder for SlowEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        thread::sleep(self.0);
        TermEmbedder.embed(model, input)
    }
}

pub struct FailingEmbedder(pub AppError);

impl Embedder for FailingEmbedder {
    fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, AppError> {
        Err(self.0.clone())
    }
}

/// Generation backend driven by a closure over the request.
pub struct FnLlm<F>(pub F);

impl<F> Llm for FnLlm<F>
where
    F: Fn(&GenerationRequest) -> Result<Generation, AppError> + Send + Sync,
{
    fn generate(&self, req: &GenerationRequest) -> Result<Generation, AppError> {
        (self.0)(req)
    }
}

pub fn reply(text: &str) -> Result<Generation, AppError> {
    Ok(Generation {
        text: text.to_string(),
        usage: TokenUsage {
            prompt_tokens: 400,
            completion_tokens: 40,
        },
    })
}

pub fn fixed_llm(text: &'static str) -> Arc<dyn Llm> {
    Arc::new(FnLlm(move |_req: &GenerationRequest| reply(text)))
}

pub fn chunk(id: &str, doc: &str, start: u32, text: &str) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        source_document: doc.to_string(),
        offset_range: OffsetRange {
            start,
            end: start + text.len() as u32,
        },
        embedding: TermEmbedder.embed(EMBED_MODEL, text).unwrap_or_default(),
    }
}

pub fn snapshot() -> IndexSnapshot {
    IndexSnapshot::new(
        EMBED_MODEL,
        TERMS.len(),
        vec![
            chunk("doc1#12", "doc1.md", 5120, "Revenue was $4.2M in Q3 2023, up 12% year over year."),
            chunk("doc2#0", "doc2.md", 0, "Total assets were $65M at year end; debt stood at $20M."),
            chunk("doc3#4", "doc3.md", 900, "Gross margin improved to 41% on lower input costs."),
        ],
    )
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        generation_model: GEN_MODEL.to_string(),
        max_tokens: 256,
        top_k: 5,
    }
}

pub fn pipeline_with(embedder: Arc<dyn Embedder>, index: Arc<dyn SearchIndex>, llm: Arc<dyn Llm>) -> QueryPipeline {
    QueryPipeline::new(Retriever::new(embedder, index), llm, settings())
}

pub fn pipeline(llm: Arc<dyn Llm>) -> QueryPipeline {
    pipeline_with(Arc::new(TermEmbedder), Arc::new(snapshot()), llm)
}
