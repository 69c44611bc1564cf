use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fallback::TerminalOutcome;

/// Default number of chunks returned per retrieval.
pub const DEFAULT_TOP_K: usize = 5;

/// Fixed per-call budget for every external call.
pub const MAX_TIMEOUT_MS: u64 = 30_000;

/// Byte offsets into the normalised text of the source document (`end` exclusive).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OffsetRange {
    pub start: u32,
    pub end: u32,
}

/// Contiguous span of a source document plus its embedding. Owned by the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_document: String,
    pub offset_range: OffsetRange,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked chunks for one query, descending by score. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.hits
            .iter()
            .map(|h| &h.chunk)
            .find(|c| c.id == chunk_id)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.get(chunk_id).is_some()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.chunk.id.clone()).collect()
    }
}

/// Prompting strategy. Selection is a pure lookup on this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ZeroShot,
    #[default]
    FewShot,
    ChainOfThought,
    Structured,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::ZeroShot,
        Method::FewShot,
        Method::ChainOfThought,
        Method::Structured,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::ZeroShot => "zero_shot",
            Method::FewShot => "few_shot",
            Method::ChainOfThought => "chain_of_thought",
            Method::Structured => "structured",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Method::ZeroShot => "direct answer from the retrieved context, no examples",
            Method::FewShot => "answer following worked examples of the citation format",
            Method::ChainOfThought => "step-by-step reasoning before the final answer",
            Method::Structured => "JSON answer with an explicit source list",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero_shot" => Ok(Method::ZeroShot),
            "few_shot" => Ok(Method::FewShot),
            "chain_of_thought" => Ok(Method::ChainOfThought),
            // `structured_output` is the older name of the same strategy.
            "structured" | "structured_output" => Ok(Method::Structured),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Raw query as received from a caller; validated before any dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub text: String,
    pub method: String,
    pub timeout_ms: u64,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            method: method.into(),
            timeout_ms: MAX_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A reference from a generated answer back to a chunk.
///
/// Confirmed citations always carry the chunk's document and offsets; unconfirmed ones
/// only carry what the answer claimed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Citation {
    pub chunk_id: String,
    pub source_document: Option<String>,
    pub offset_range: Option<OffsetRange>,
}

impl Citation {
    pub fn claimed(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            source_document: None,
            offset_range: None,
        }
    }

    pub fn for_chunk(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            source_document: Some(chunk.source_document.clone()),
            offset_range: Some(chunk.offset_range),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationCheck {
    pub confirmed: BTreeSet<Citation>,
    pub unconfirmed: BTreeSet<Citation>,
}

impl CitationCheck {
    pub fn claimed_count(&self) -> usize {
        self.confirmed.len() + self.unconfirmed.len()
    }

    pub fn confirmed_ids(&self) -> BTreeSet<String> {
        self.confirmed.iter().map(|c| c.chunk_id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    RetrievalFailure,
    Timeout,
    OutOfScope,
    MalformedInput,
    EmptyResponse,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::RetrievalFailure => "retrieval_failure",
            Status::Timeout => "timeout",
            Status::OutOfScope => "out_of_scope",
            Status::MalformedInput => "malformed_input",
            Status::EmptyResponse => "empty_response",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    Rephrase,
    Simplify,
    NarrowScope,
    FixInput,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieval,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Retrieval => f.write_str("retrieval"),
            Stage::Generation => f.write_str("generation"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Failed,
    TimedOut,
}

/// Measurement of a single external call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub stage: Stage,
    pub model: String,
    pub latency_ms: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub outcome: CallOutcome,
}

/// Final outcome of one query. Built exactly once through [`ResponseDraft`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseRecord {
    pub answer_text: String,
    pub citations: BTreeSet<Citation>,
    pub unconfirmed_citations: BTreeSet<Citation>,
    pub method: Option<Method>,
    pub status: Status,
    pub message: Option<String>,
    pub remediation: Option<Remediation>,
    pub latency_ms: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub embedding_tokens: u32,
    pub cost_usd: f64,
    pub retrieved_chunk_ids: Vec<String>,
    pub prompt_sha256: Option<String>,
    pub calls: Vec<CallRecord>,
}

impl ResponseRecord {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn citation_check(&self) -> CitationCheck {
        CitationCheck {
            confirmed: self.citations.clone(),
            unconfirmed: self.unconfirmed_citations.clone(),
        }
    }
}

/// In-progress record for one query.
///
/// Both `finish_*` methods consume the draft, so a record cannot be changed once it has
/// been produced.
#[derive(Debug, Clone, Default)]
pub struct ResponseDraft {
    method: Option<Method>,
    retrieved_chunk_ids: Vec<String>,
    prompt_sha256: Option<String>,
}

impl ResponseDraft {
    pub fn new(method: Option<Method>) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn set_retrieved(&mut self, retrieval: &RetrievalResult) {
        self.retrieved_chunk_ids = retrieval.chunk_ids();
    }

    pub fn set_prompt_sha256(&mut self, digest: String) {
        self.prompt_sha256 = Some(digest);
    }

    pub fn finish_ok(
        self,
        answer_text: String,
        check: CitationCheck,
        calls: Vec<CallRecord>,
    ) -> ResponseRecord {
        self.finish(
            answer_text,
            check,
            Status::Ok,
            None,
            None,
            calls,
        )
    }

    pub fn finish_terminal(self, outcome: &TerminalOutcome, calls: Vec<CallRecord>) -> ResponseRecord {
        self.finish(
            outcome.message.clone(),
            CitationCheck::default(),
            outcome.status,
            Some(outcome.message.clone()),
            Some(outcome.remediation),
            calls,
        )
    }

    fn finish(
        self,
        answer_text: String,
        check: CitationCheck,
        status: Status,
        message: Option<String>,
        remediation: Option<Remediation>,
        calls: Vec<CallRecord>,
    ) -> ResponseRecord {
        let mut prompt_tokens = 0u32;
        let mut completion_tokens = 0u32;
        let mut embedding_tokens = 0u32;
        for c in calls.iter() {
            match c.stage {
                Stage::Retrieval => embedding_tokens = embedding_tokens.saturating_add(c.prompt_tokens),
                Stage::Generation => {
                    prompt_tokens = prompt_tokens.saturating_add(c.prompt_tokens);
                    completion_tokens = completion_tokens.saturating_add(c.completion_tokens);
                }
            }
        }
        let latency_ms = calls.iter().map(|c| c.latency_ms).sum();
        let cost_usd = calls.iter().map(|c| c.cost_usd).sum();

        ResponseRecord {
            answer_text,
            citations: check.confirmed,
            unconfirmed_citations: check.unconfirmed,
            method: self.method,
            status,
            message,
            remediation,
            latency_ms,
            prompt_tokens,
            completion_tokens,
            embedding_tokens,
            cost_usd,
            retrieved_chunk_ids: self.retrieved_chunk_ids,
            prompt_sha256: self.prompt_sha256,
            calls,
        }
    }
}
