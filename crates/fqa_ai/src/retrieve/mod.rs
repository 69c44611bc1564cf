use std::fmt;
use std::sync::Arc;

use fqa_core::domain::{Chunk, RetrievalResult, ScoredChunk};
use fqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;

pub mod similarity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Similarity search over a fixed set of chunks.
///
/// `search` returns at most `k` hits, descending by score, ties broken by chunk id
/// ascending. Implementations must not mutate themselves while searching.
pub trait SearchIndex: Send + Sync {
    fn embedding_model(&self) -> &str;
    fn dims(&self) -> usize;
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, AppError>;
    fn chunk(&self, chunk_id: &str) -> Option<&Chunk>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// The index produced no usable match for the query.
    NoMatches,
    /// The embedding call failed; the index was never consulted.
    Embedding(AppError),
    /// The index itself is unusable. Never classified; callers treat it as fatal.
    Index(AppError),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::NoMatches => f.write_str("no matching chunks"),
            RetrievalError::Embedding(e) => write!(f, "embedding failed: {e}"),
            RetrievalError::Index(e) => write!(f, "index failed: {e}"),
        }
    }
}

impl std::error::Error for RetrievalError {}

/// Retrieval Index Adapter. Cheap to clone; every clone shares the same snapshot.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SearchIndex>,
}

impl fmt::Debug for Retriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retriever")
            .field("embedding_model", &self.index.embedding_model())
            .field("dims", &self.index.dims())
            .finish()
    }
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn SearchIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedding_model(&self) -> &str {
        self.index.embedding_model()
    }

    /// Embed `query_text` with the index's model and return the top `k` chunks.
    ///
    /// Same snapshot and same query give the same ranked chunk ids.
    pub fn retrieve(&self, query_text: &str, k: usize) -> Result<RetrievalResult, RetrievalError> {
        let model = self.index.embedding_model();
        let qv = self
            .embedder
            .embed(model, query_text)
            .map_err(RetrievalError::Embedding)?;

        let dims = self.index.dims();
        if qv.len() != dims {
            return Err(RetrievalError::Embedding(
                AppError::new(
                    "AI_EMBEDDINGS_FAILED",
                    "Query embedding dims do not match index dims",
                )
                .with_details(format!("model={model}; index_dims={dims}; query_dims={}", qv.len())),
            ));
        }

        let hits = self.index.search(&qv, k).map_err(RetrievalError::Index)?;
        if hits.is_empty() {
            return Err(RetrievalError::NoMatches);
        }

        let mut out = Vec::with_capacity(hits.len());
        for h in hits {
            let chunk = self.index.chunk(&h.chunk_id).ok_or_else(|| {
                RetrievalError::Index(
                    AppError::new("INDEX_CORRUPTED", "Search returned an unknown chunk id")
                        .with_details(format!("chunk_id={}", h.chunk_id)),
                )
            })?;
            out.push(ScoredChunk {
                chunk: chunk.clone(),
                score: h.score,
            });
        }
        tracing::debug!(hits = out.len(), k, "retrieval complete");
        Ok(RetrievalResult { hits: out })
    }
}
