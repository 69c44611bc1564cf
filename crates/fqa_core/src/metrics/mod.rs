use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::CitationCheck;
use crate::pricing::estimate_tokens;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectnessScore {
    pub score: f64,
    pub exact_match: bool,
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Score an answer against its expected answer and keyword set.
///
/// Matching is case-insensitive substring on whitespace-normalised text. Keywords are
/// deduplicated after normalisation; blank keywords are ignored.
pub fn correctness(answer: &str, expected_answer: Option<&str>, keywords: &[String]) -> CorrectnessScore {
    let haystack = normalize(answer);

    let mut distinct = BTreeSet::new();
    for k in keywords {
        let k = normalize(k);
        if !k.is_empty() {
            distinct.insert(k);
        }
    }

    let mut found = Vec::new();
    let mut missing = Vec::new();
    for k in distinct.iter() {
        if haystack.contains(k.as_str()) {
            found.push(k.clone());
        } else {
            missing.push(k.clone());
        }
    }

    let exact_match = expected_answer
        .map(normalize)
        .is_some_and(|e| !e.is_empty() && haystack.contains(e.as_str()));

    let score = if exact_match {
        1.0
    } else if distinct.is_empty() {
        0.0
    } else {
        (found.len() as f64 / distinct.len() as f64).clamp(0.0, 1.0)
    };

    CorrectnessScore {
        score,
        exact_match,
        found,
        missing,
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationScores {
    pub precision: f64,
    pub recall: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        (num as f64 / den as f64).clamp(0.0, 1.0)
    }
}

/// precision = |confirmed ∩ expected| / |claimed|, recall = |confirmed ∩ expected| / |expected|.
pub fn citation_scores(check: &CitationCheck, expected: &BTreeSet<String>) -> CitationScores {
    let hits = check
        .confirmed_ids()
        .iter()
        .filter(|id| expected.contains(id.as_str()))
        .count();
    CitationScores {
        precision: ratio(hits, check.claimed_count()),
        recall: ratio(hits, expected.len()),
    }
}

/// Document-level scores for test sets that name source files rather than chunks.
///
/// Confirmed citations count once per distinct source document; every unconfirmed
/// citation counts as a claim that matches nothing.
pub fn source_scores(check: &CitationCheck, expected_sources: &BTreeSet<String>) -> CitationScores {
    let cited: BTreeSet<&str> = check
        .confirmed
        .iter()
        .filter_map(|c| c.source_document.as_deref())
        .collect();
    let hits = cited.iter().filter(|doc| expected_sources.contains(**doc)).count();
    CitationScores {
        precision: ratio(hits, cited.len() + check.unconfirmed.len()),
        recall: ratio(hits, expected_sources.len()),
    }
}

/// Answers shorter than this many characters are not considered complete.
pub const DEFAULT_MIN_ANSWER_CHARS: usize = 50;
const MIN_ANSWER_WORDS: usize = 10;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Completeness {
    pub word_count: usize,
    pub char_count: usize,
    pub token_count: u32,
    pub is_complete: bool,
    pub score: f64,
}

/// Length-based completeness: `score = min(1, chars / min_chars)`; complete means at
/// least `min_chars` characters and ten words.
pub fn completeness(answer: &str, min_chars: usize) -> Completeness {
    let word_count = answer.split_whitespace().count();
    let char_count = answer.chars().count();
    Completeness {
        word_count,
        char_count,
        token_count: estimate_tokens(answer),
        is_complete: char_count >= min_chars && word_count >= MIN_ANSWER_WORDS,
        score: if min_chars == 0 {
            1.0
        } else {
            (char_count as f64 / min_chars as f64).min(1.0)
        },
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LatencyTargets {
    pub p50_ms: f64,
    pub p95_ms: f64,
}

impl Default for LatencyTargets {
    fn default() -> Self {
        Self {
            p50_ms: 2000.0,
            p95_ms: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatencyCheck {
    pub latency_ms: f64,
    pub meets_p50: bool,
    pub meets_p95: bool,
}

pub fn check_latency(latency_ms: f64, targets: &LatencyTargets) -> LatencyCheck {
    LatencyCheck {
        latency_ms,
        meets_p50: latency_ms <= targets.p50_ms,
        meets_p95: latency_ms <= targets.p95_ms,
    }
}

/// Nearest-rank on 0..n-1 over an ascending sample: idx = floor((n-1) * pct / 100).
pub fn percentile(sorted: &[f64], pct: u32) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let pct = pct.min(100) as usize;
    let idx = ((n - 1) * pct) / 100;
    sorted.get(idx).copied()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyPercentiles {
    /// Empty samples yield zeros.
    pub fn from_samples(samples: &[f64]) -> Self {
        let mut sorted: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self {
            p50: percentile(&sorted, 50).unwrap_or(0.0),
            p95: percentile(&sorted, 95).unwrap_or(0.0),
            p99: percentile(&sorted, 99).unwrap_or(0.0),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_is_nearest_rank_on_zero_based_index() {
        let s = [100.0, 200.0, 300.0, 400.0];
        assert_eq!(percentile(&s, 50), Some(200.0));
        assert_eq!(percentile(&s, 95), Some(300.0));
        assert_eq!(percentile(&s, 100), Some(400.0));
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn completeness_counts_words_and_caps_the_score() {
        let short = completeness("Revenue was $4.2M.", DEFAULT_MIN_ANSWER_CHARS);
        assert_eq!(short.word_count, 3);
        assert_eq!(short.char_count, 18);
        assert_eq!(short.token_count, 5);
        assert!(!short.is_complete);
        assert!((short.score - 0.36).abs() < 1e-12);

        let long = completeness(
            "Revenue was $4.2M in Q3 2023, up 12% year over year on higher subscription sales.",
            DEFAULT_MIN_ANSWER_CHARS,
        );
        assert!(long.is_complete);
        assert_eq!(long.score, 1.0);
        assert_eq!(completeness("", 0).score, 1.0);
    }

    #[test]
    fn latency_targets_are_inclusive() {
        let t = LatencyTargets::default();
        let at = check_latency(2000.0, &t);
        assert!(at.meets_p50 && at.meets_p95);
        let slow = check_latency(4000.0, &t);
        assert!(!slow.meets_p50 && slow.meets_p95);
        assert!(!check_latency(5000.5, &t).meets_p95);
    }

    #[test]
    fn single_sample_is_every_percentile() {
        let p = LatencyPercentiles::from_samples(&[800.0]);
        assert_eq!(p.p50, 800.0);
        assert_eq!(p.p99, 800.0);
    }
}
