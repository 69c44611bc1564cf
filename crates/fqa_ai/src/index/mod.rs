use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use fqa_core::domain::Chunk;
use fqa_core::error::AppError;
use fqa_core::report::write_atomic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::embeddings::Embedder;
use crate::retrieve::similarity;
use crate::retrieve::{SearchHit, SearchIndex};

pub mod chunking;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Read-only retrieval index: every chunk with its embedding, sorted by chunk id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSnapshot {
    pub version: u32,
    pub embedding_model: String,
    pub dims: usize,
    pub chunks: Vec<Chunk>,
}

fn corrupted(message: &str, details: String) -> AppError {
    AppError::new("INDEX_CORRUPTED", message.to_string()).with_details(details)
}

impl IndexSnapshot {
    pub fn new(embedding_model: impl Into<String>, dims: usize, mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            version: SNAPSHOT_VERSION,
            embedding_model: embedding_model.into(),
            dims,
            chunks,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(corrupted(
                "Unsupported index snapshot version",
                format!("version={}; supported={SNAPSHOT_VERSION}", self.version),
            ));
        }
        if self.dims == 0 {
            return Err(corrupted("Index dims must be non-zero", "dims=0".to_string()));
        }
        let mut prev: Option<&str> = None;
        for c in self.chunks.iter() {
            if c.embedding.len() != self.dims {
                return Err(corrupted(
                    "Index vector dims mismatch",
                    format!("chunk_id={}; expected={}; got={}", c.id, self.dims, c.embedding.len()),
                ));
            }
            if let Some(p) = prev {
                if p >= c.id.as_str() {
                    return Err(corrupted(
                        "Index chunks must be unique and sorted by id",
                        format!("prev={p}; next={}", c.id),
                    ));
                }
            }
            prev = Some(c.id.as_str());
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let bytes = fs::read(path).map_err(|e| {
            AppError::new("INDEX_NOT_FOUND", "Failed to read index snapshot; run setup first")
                .at_path(path, e)
        })?;
        let snap: IndexSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
            corrupted(
                "Failed to decode index snapshot",
                format!("path={}; err={}", path.display(), e),
            )
        })?;
        snap.validate()?;
        Ok(snap)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        self.validate()?;
        let json = serde_json::to_vec(self).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to encode index snapshot")
                .with_details(e.to_string())
        })?;
        write_atomic(path, &json)
    }

    /// sha256 over the canonical JSON encoding; identifies the snapshot in reports.
    pub fn fingerprint(&self) -> Result<String, AppError> {
        let json = serde_json::to_vec(self).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to encode index snapshot")
                .with_details(e.to_string())
        })?;
        Ok(hex::encode(Sha256::digest(&json)))
    }
}

impl SearchIndex for IndexSnapshot {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, AppError> {
        let qnorm = similarity::l2_norm(query);
        if qnorm == 0.0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(String, f32)> = Vec::new();
        for c in self.chunks.iter() {
            if c.embedding.len() != self.dims || query.len() != self.dims {
                return Err(corrupted(
                    "Index vector dims mismatch",
                    format!("chunk_id={}; expected={}; got={}", c.id, self.dims, c.embedding.len()),
                ));
            }
            let vnorm = similarity::l2_norm(&c.embedding);
            if vnorm == 0.0 {
                continue;
            }
            let score = similarity::cosine_similarity(query, &c.embedding, qnorm, vnorm);
            if score.is_finite() {
                hits.push((c.id.clone(), score));
            }
        }

        similarity::rank(&mut hits, k);
        Ok(hits
            .into_iter()
            .map(|(chunk_id, score)| SearchHit { chunk_id, score })
            .collect())
    }

    fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks
            .binary_search_by(|c| c.id.as_str().cmp(chunk_id))
            .ok()
            .and_then(|i| self.chunks.get(i))
    }
}

fn document_paths(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::new("INDEX_BUILD_FAILED", "Failed to read document directory")
            .at_path(dir, e)
    })?;
    let mut out = Vec::new();
    for ent in entries.flatten() {
        let path = ent.path();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase());
        if path.is_file() && matches!(ext.as_deref(), Some("txt") | Some("md")) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Chunk every `.txt`/`.md` file in `dir` (name order) and embed each chunk with `model`.
pub fn build_from_dir(dir: &Path, embedder: &dyn Embedder, model: &str) -> Result<IndexSnapshot, AppError> {
    let paths = document_paths(dir)?;
    if paths.is_empty() {
        return Err(AppError::new("INDEX_BUILD_FAILED", "No .txt or .md documents found")
            .with_details(format!("path={}", dir.display())));
    }

    let mut chunks = Vec::new();
    let mut ids = BTreeSet::new();
    let mut dims: Option<usize> = None;

    for path in paths {
        let raw = fs::read_to_string(&path).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to read document")
                .at_path(&path, e)
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let text = chunking::normalize_text(&raw);
        let spans = chunking::chunk_by_paragraphs(&text, chunking::MAX_CHUNK_CHARS);
        tracing::info!(document = %name, chunks = spans.len(), "chunked document");

        for span in spans {
            let id = format!("{stem}#{}", span.ordinal);
            if !ids.insert(id.clone()) {
                return Err(AppError::new("INDEX_BUILD_FAILED", "Duplicate chunk id")
                    .with_details(format!("chunk_id={id}; document={name}")));
            }
            let embedding = embedder.embed(model, &span.text).map_err(|e| {
                AppError::new("INDEX_BUILD_FAILED", "Failed to embed chunk")
                    .with_details(format!("chunk_id={id}; err={e}"))
            })?;
            let expected = *dims.get_or_insert(embedding.len());
            if embedding.is_empty() || embedding.len() != expected {
                return Err(AppError::new("INDEX_BUILD_FAILED", "Embedding dims are inconsistent")
                    .with_details(format!("chunk_id={id}; expected={expected}; got={}", embedding.len())));
            }
            chunks.push(Chunk {
                id,
                text: span.text,
                source_document: name.clone(),
                offset_range: span.offset_range,
                embedding,
            });
        }
    }

    let dims = dims.ok_or_else(|| {
        AppError::new("INDEX_BUILD_FAILED", "Documents contained no text")
            .with_details(format!("path={}", dir.display()))
    })?;
    let snap = IndexSnapshot::new(model, dims, chunks);
    snap.validate()?;
    Ok(snap)
}
