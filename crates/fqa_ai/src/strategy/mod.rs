use std::collections::BTreeSet;

use fqa_core::domain::{Method, RetrievalResult, TokenUsage};
use fqa_core::error::AppError;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::citations::{extract_cited_chunk_ids, MARKER_PREFIX};
use crate::llm::{GenerationRequest, Llm};

pub mod prompts;

/// What a strategy read out of the raw backend text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interpretation {
    pub answer_text: String,
    pub claimed: BTreeSet<String>,
}

/// One prompting strategy: a pure prompt renderer plus an output interpreter.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub method: Method,
    pub render: fn(&str, &RetrievalResult) -> String,
    pub interpret: fn(&str) -> Interpretation,
}

pub const STRATEGIES: [Strategy; 4] = [
    Strategy {
        method: Method::ZeroShot,
        render: prompts::zero_shot,
        interpret: interpret_plain,
    },
    Strategy {
        method: Method::FewShot,
        render: prompts::few_shot,
        interpret: interpret_plain,
    },
    Strategy {
        method: Method::ChainOfThought,
        render: prompts::chain_of_thought,
        interpret: interpret_chain_of_thought,
    },
    Strategy {
        method: Method::Structured,
        render: prompts::structured,
        interpret: interpret_structured,
    },
];

pub fn strategy_for(method: Method) -> &'static Strategy {
    match method {
        Method::ZeroShot => &STRATEGIES[0],
        Method::FewShot => &STRATEGIES[1],
        Method::ChainOfThought => &STRATEGIES[2],
        Method::Structured => &STRATEGIES[3],
    }
}

pub fn interpret_plain(raw: &str) -> Interpretation {
    Interpretation {
        answer_text: raw.trim().to_string(),
        claimed: extract_cited_chunk_ids(raw),
    }
}

const FINAL_ANSWER: &str = "final answer:";

/// The answer is whatever follows the last "Final answer:" line; without one the whole
/// output is the answer. Citations count from the reasoning too.
pub fn interpret_chain_of_thought(raw: &str) -> Interpretation {
    let lower = raw.to_ascii_lowercase();
    let answer_text = match lower.rfind(FINAL_ANSWER) {
        Some(pos) => raw[pos + FINAL_ANSWER.len()..].trim().to_string(),
        None => raw.trim().to_string(),
    };
    Interpretation {
        answer_text,
        claimed: extract_cited_chunk_ids(raw),
    }
}

#[derive(Debug, Deserialize)]
struct StructuredAnswer {
    answer: String,
    #[serde(default)]
    key_facts: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
}

/// Slice from the first `{` to the last `}`; tolerates code fences and chatter.
fn json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn source_id(s: &str) -> Option<String> {
    let s = s.trim();
    let s = s
        .strip_prefix(MARKER_PREFIX)
        .and_then(|rest| rest.strip_suffix("]]"))
        .unwrap_or(s)
        .trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Parse the JSON answer; on failure fall back to the raw text and its inline markers.
pub fn interpret_structured(raw: &str) -> Interpretation {
    let parsed = json_object_span(raw)
        .and_then(|span| serde_json::from_str::<StructuredAnswer>(span).ok());
    match parsed {
        Some(s) => {
            let mut claimed = extract_cited_chunk_ids(&s.answer);
            for f in s.key_facts.iter() {
                claimed.extend(extract_cited_chunk_ids(f));
            }
            claimed.extend(s.sources.iter().filter_map(|src| source_id(src)));
            Interpretation {
                answer_text: s.answer.trim().to_string(),
                claimed,
            }
        }
        None => {
            tracing::debug!("structured output did not parse; using raw text");
            interpret_plain(raw)
        }
    }
}

/// Result of running one strategy against the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutput {
    pub answer_text: String,
    pub claimed: BTreeSet<String>,
    pub usage: TokenUsage,
    pub prompt_sha256: String,
}

pub fn prompt_digest(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

/// Render the prompt for `method`, call the backend once at temperature 0, interpret.
///
/// An empty answer is returned as-is; backend errors are returned unchanged.
pub fn generate(
    llm: &dyn Llm,
    model: &str,
    max_tokens: u32,
    method: Method,
    query: &str,
    retrieval: &RetrievalResult,
) -> Result<StrategyOutput, AppError> {
    let strategy = strategy_for(method);
    let prompt = (strategy.render)(query, retrieval);
    let prompt_sha256 = prompt_digest(&prompt);

    let generation = llm.generate(&GenerationRequest::new(model, prompt, max_tokens))?;
    let interpretation = (strategy.interpret)(&generation.text);

    Ok(StrategyOutput {
        answer_text: interpretation.answer_text,
        claimed: interpretation.claimed,
        usage: generation.usage,
        prompt_sha256,
    })
}
