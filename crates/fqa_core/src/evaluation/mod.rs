use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Method, ResponseRecord, Status};
use crate::error::AppError;
use crate::metrics::{
    check_latency, citation_scores, completeness, correctness, mean, source_scores, Completeness,
    LatencyPercentiles, LatencyTargets, DEFAULT_MIN_ANSWER_CHARS,
};

/// One entry of a fixed evaluation query set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCase {
    pub query: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub expected_keywords: Vec<String>,
    /// Expected chunk ids.
    #[serde(default)]
    pub expected_citations: Vec<String>,
    /// Expected source document names; used when no chunk ids are given.
    #[serde(default)]
    pub expected_sources: Vec<String>,
}

impl TestCase {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            expected_answer: None,
            expected_keywords: Vec::new(),
            expected_citations: Vec::new(),
            expected_sources: Vec::new(),
        }
    }

    pub fn with_expected_answer(mut self, answer: impl Into<String>) -> Self {
        self.expected_answer = Some(answer.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_citations<I, S>(mut self, chunk_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_citations = chunk_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_sources = documents.into_iter().map(Into::into).collect();
        self
    }
}

/// Load a test set stored as a JSON array of cases.
pub fn load_test_set(path: &Path) -> Result<Vec<TestCase>, AppError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::new("EVAL_TEST_SET_READ_FAILED", "Failed to read test set")
            .at_path(path, e)
    })?;
    let cases: Vec<TestCase> = serde_json::from_str(&raw).map_err(|e| {
        AppError::new("EVAL_TEST_SET_INVALID", "Test set is not a valid JSON array of cases")
            .at_path(path, e)
    })?;
    if cases.is_empty() {
        return Err(AppError::new("EVAL_TEST_SET_EMPTY", "Test set contains no cases")
            .with_details(format!("path={}", path.display())));
    }
    Ok(cases)
}

/// Built-in query set used when no test set file is given.
pub fn default_test_set() -> Vec<TestCase> {
    vec![
        TestCase::new("What are the key financial metrics discussed?")
            .with_expected_answer("financial metrics")
            .with_keywords(["revenue", "profit", "assets", "financial"]),
        TestCase::new("What is the revenue growth rate?")
            .with_expected_answer("revenue growth")
            .with_keywords(["revenue", "growth", "rate", "percent"]),
        TestCase::new("What are the main risks mentioned?")
            .with_expected_answer("risks")
            .with_keywords(["risk", "uncertainty", "challenge"]),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub query: String,
    pub method: Method,
    pub expected_answer_keywords: Vec<String>,
    pub expected_citations: BTreeSet<String>,
    #[serde(default)]
    pub expected_sources: BTreeSet<String>,
    pub response: ResponseRecord,
    pub correctness_score: f64,
    pub citation_precision: f64,
    pub citation_recall: f64,
    #[serde(default)]
    pub completeness: Completeness,
}

/// Score one pipeline response against its test case.
///
/// Terminal records score 0 for correctness and completeness; their answer text is a
/// fallback message, not an answer. Citations are scored per chunk when the case lists
/// chunk ids and per source document when it only lists documents.
pub fn score(case: &TestCase, method: Method, response: ResponseRecord) -> EvaluationRecord {
    let expected_citations: BTreeSet<String> = case.expected_citations.iter().cloned().collect();
    let expected_sources: BTreeSet<String> = case.expected_sources.iter().cloned().collect();

    let (correctness_score, answer_completeness) = if response.is_ok() {
        let c = correctness(
            &response.answer_text,
            case.expected_answer.as_deref(),
            &case.expected_keywords,
        );
        (c.score, completeness(&response.answer_text, DEFAULT_MIN_ANSWER_CHARS))
    } else {
        (0.0, Completeness::default())
    };
    let check = response.citation_check();
    let cites = if expected_citations.is_empty() && !expected_sources.is_empty() {
        source_scores(&check, &expected_sources)
    } else {
        citation_scores(&check, &expected_citations)
    };

    EvaluationRecord {
        query: case.query.clone(),
        method,
        expected_answer_keywords: case.expected_keywords.clone(),
        expected_citations,
        expected_sources,
        response,
        correctness_score,
        citation_precision: cites.precision,
        citation_recall: cites.recall,
        completeness: answer_completeness,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodSummary {
    pub method: Method,
    pub total: usize,
    pub ok_count: usize,
    pub success_rate: f64,
    pub status_counts: BTreeMap<Status, usize>,
    pub mean_correctness: f64,
    pub mean_citation_precision: f64,
    pub mean_citation_recall: f64,
    pub mean_latency_ms: f64,
    pub latency: LatencyPercentiles,
    pub mean_cost_usd: f64,
    pub total_cost_usd: f64,
    pub cost_per_1k_queries_usd: f64,
    pub mean_prompt_tokens: f64,
    pub mean_completion_tokens: f64,
    pub mean_completeness: f64,
    pub complete_share: f64,
    pub latency_targets: LatencyTargetSummary,
}

/// How a method's latencies compare with the configured targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatencyTargetSummary {
    pub target_p50_ms: f64,
    pub target_p95_ms: f64,
    /// The method's own P50 is within the P50 target.
    pub meets_p50: bool,
    pub meets_p95: bool,
    /// Share of single responses within each target.
    pub within_p50_share: f64,
    pub within_p95_share: f64,
}

fn share(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn summarize(method: Method, records: &[&EvaluationRecord], targets: &LatencyTargets) -> MethodSummary {
    let total = records.len();
    let mut status_counts = BTreeMap::new();
    for r in records {
        *status_counts.entry(r.response.status).or_insert(0usize) += 1;
    }
    let ok_count = status_counts.get(&Status::Ok).copied().unwrap_or(0);

    let collect = |f: fn(&EvaluationRecord) -> f64| records.iter().map(|r| f(r)).collect::<Vec<f64>>();
    let latencies = collect(|r| r.response.latency_ms);
    let costs = collect(|r| r.response.cost_usd);
    let total_cost_usd: f64 = costs.iter().sum();
    let mean_cost_usd = mean(&costs);
    let latency = LatencyPercentiles::from_samples(&latencies);

    let checks: Vec<_> = latencies.iter().map(|l| check_latency(*l, targets)).collect();
    let latency_targets = LatencyTargetSummary {
        target_p50_ms: targets.p50_ms,
        target_p95_ms: targets.p95_ms,
        meets_p50: total > 0 && latency.p50 <= targets.p50_ms,
        meets_p95: total > 0 && latency.p95 <= targets.p95_ms,
        within_p50_share: share(checks.iter().filter(|c| c.meets_p50).count(), total),
        within_p95_share: share(checks.iter().filter(|c| c.meets_p95).count(), total),
    };
    let complete = records.iter().filter(|r| r.completeness.is_complete).count();

    MethodSummary {
        method,
        total,
        ok_count,
        success_rate: share(ok_count, total),
        status_counts,
        mean_correctness: mean(&collect(|r| r.correctness_score)),
        mean_citation_precision: mean(&collect(|r| r.citation_precision)),
        mean_citation_recall: mean(&collect(|r| r.citation_recall)),
        mean_latency_ms: mean(&latencies),
        latency,
        mean_cost_usd,
        total_cost_usd,
        cost_per_1k_queries_usd: mean_cost_usd * 1000.0,
        mean_prompt_tokens: mean(&collect(|r| f64::from(r.response.prompt_tokens))),
        mean_completion_tokens: mean(&collect(|r| f64::from(r.response.completion_tokens))),
        mean_completeness: mean(&collect(|r| r.completeness.score)),
        complete_share: share(complete, total),
        latency_targets,
    }
}

/// Per-method summaries, one per entry of `methods` and in that order.
///
/// Each summary is computed from that method's records only. Terminal records are
/// included; `success_rate` reports how many of them there were. Latencies are checked
/// against the default targets.
pub fn aggregate(records: &[EvaluationRecord], methods: &[Method]) -> Vec<MethodSummary> {
    aggregate_with_targets(records, methods, &LatencyTargets::default())
}

pub fn aggregate_with_targets(
    records: &[EvaluationRecord],
    methods: &[Method],
    targets: &LatencyTargets,
) -> Vec<MethodSummary> {
    let mut seen = BTreeSet::new();
    methods
        .iter()
        .copied()
        .filter(|m| seen.insert(*m))
        .map(|m| {
            let own: Vec<&EvaluationRecord> = records.iter().filter(|r| r.method == m).collect();
            summarize(m, &own, targets)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostDriver {
    Prompt,
    Completion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostDrivers {
    pub total_queries: usize,
    pub total_cost_usd: f64,
    pub mean_cost_usd: f64,
    pub cost_per_1k_queries_usd: f64,
    pub mean_prompt_tokens: f64,
    pub mean_completion_tokens: f64,
    pub mean_embedding_tokens: f64,
    pub prompt_share_pct: f64,
    pub completion_share_pct: f64,
    pub main_driver: CostDriver,
}

/// Where the tokens (and therefore the money) go across a whole run.
pub fn cost_drivers(records: &[EvaluationRecord]) -> CostDrivers {
    let n = records.len();
    let prompt: u64 = records.iter().map(|r| u64::from(r.response.prompt_tokens)).sum();
    let completion: u64 = records.iter().map(|r| u64::from(r.response.completion_tokens)).sum();
    let embedding: u64 = records.iter().map(|r| u64::from(r.response.embedding_tokens)).sum();
    let total_cost_usd: f64 = records.iter().map(|r| r.response.cost_usd).sum();

    let per_query = |v: f64| if n == 0 { 0.0 } else { v / n as f64 };
    let gen_tokens = prompt + completion;
    let prompt_share_pct = if gen_tokens == 0 {
        0.0
    } else {
        prompt as f64 * 100.0 / gen_tokens as f64
    };
    let completion_share_pct = if gen_tokens == 0 { 0.0 } else { 100.0 - prompt_share_pct };

    CostDrivers {
        total_queries: n,
        total_cost_usd,
        mean_cost_usd: per_query(total_cost_usd),
        cost_per_1k_queries_usd: per_query(total_cost_usd) * 1000.0,
        mean_prompt_tokens: per_query(prompt as f64),
        mean_completion_tokens: per_query(completion as f64),
        mean_embedding_tokens: per_query(embedding as f64),
        prompt_share_pct,
        completion_share_pct,
        main_driver: if prompt_share_pct > completion_share_pct {
            CostDriver::Prompt
        } else {
            CostDriver::Completion
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizationHint {
    pub strategy: String,
    pub description: String,
    /// Rough saving range, e.g. `"30-50%"`.
    pub potential_savings: String,
    pub implementation: String,
}

impl OptimizationHint {
    fn new(strategy: &str, description: impl Into<String>, potential_savings: &str, implementation: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            description: description.into(),
            potential_savings: potential_savings.to_string(),
            implementation: implementation.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub best_method: Option<Method>,
    pub cheapest_method: Option<Method>,
    pub fastest_method: Option<Method>,
    pub rationale: String,
    pub hints: Vec<OptimizationHint>,
}

/// Mean cost per query above which switching to a smaller model is suggested.
const EXPENSIVE_QUERY_USD: f64 = 0.01;

fn by_quality(a: &MethodSummary, b: &MethodSummary) -> Ordering {
    // Higher correctness, then higher precision, then lower cost; ties keep list order.
    b.mean_correctness
        .total_cmp(&a.mean_correctness)
        .then(b.mean_citation_precision.total_cmp(&a.mean_citation_precision))
        .then(a.mean_cost_usd.total_cmp(&b.mean_cost_usd))
}

/// Pick a method to run by default and list cost optimisations worth trying.
pub fn recommend(summaries: &[MethodSummary], drivers: &CostDrivers) -> Recommendation {
    let measured: Vec<&MethodSummary> = summaries.iter().filter(|s| s.total > 0).collect();

    // `min_by` keeps the first of equal elements, so method order breaks remaining ties.
    let best = measured.iter().copied().min_by(|a, b| by_quality(a, b));
    let cheapest = measured
        .iter()
        .copied()
        .min_by(|a, b| a.mean_cost_usd.total_cmp(&b.mean_cost_usd));
    let fastest = measured
        .iter()
        .copied()
        .min_by(|a, b| a.latency.p50.total_cmp(&b.latency.p50));

    let rationale = match best {
        Some(s) => format!(
            "{} has the highest mean correctness ({:.2}) with citation precision {:.2} at ${:.6} per query",
            s.method, s.mean_correctness, s.mean_citation_precision, s.mean_cost_usd
        ),
        None => "No evaluation records were produced".to_string(),
    };

    let mut hints = Vec::new();
    if drivers.prompt_share_pct > 60.0 {
        hints.push(OptimizationHint::new(
            "reduce_prompt_size",
            "Prompt tokens dominate; lower top_k or use smaller chunks",
            "20-40%",
            "Lower [retrieval].top_k and rebuild the index with shorter chunks",
        ));
    }
    if drivers.mean_cost_usd > EXPENSIVE_QUERY_USD {
        hints.push(OptimizationHint::new(
            "use_cheaper_model",
            "Route non-critical queries to a smaller generation model",
            "60-80%",
            "Pick the generation model per query from its complexity or the caller's tier",
        ));
    }
    if let (Some(b), Some(c)) = (best, cheapest) {
        if b.method != c.method && (b.mean_correctness - c.mean_correctness).abs() < 0.05 {
            hints.push(OptimizationHint::new(
                "prefer_cheaper_method",
                format!(
                    "{} is within 0.05 correctness of {} at lower cost",
                    c.method, b.method
                ),
                "varies",
                "Set [query].default_method to the cheaper method",
            ));
        }
    }
    hints.push(OptimizationHint::new(
        "cache_repeated_queries",
        "Cache answers for repeated queries keyed by index fingerprint",
        "30-50% for repeated queries",
        "Key cached responses on (index fingerprint, method, normalised query)",
    ));
    hints.push(OptimizationHint::new(
        "optimize_chunking",
        "Tune chunk size to typical question length",
        "10-20%",
        "Rebuild the index with a smaller chunk limit and compare retrieval scores",
    ));
    hints.push(OptimizationHint::new(
        "batch_embeddings",
        "Embed queries in batches when many arrive together",
        "15-25%",
        "Send several inputs per /api/embed call instead of one request per query",
    ));

    Recommendation {
        best_method: best.map(|s| s.method),
        cheapest_method: cheapest.map(|s| s.method),
        fastest_method: fastest.map(|s| s.method),
        rationale,
        hints,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bottleneck {
    pub component: String,
    pub issue: String,
    pub solution: String,
}

impl Bottleneck {
    fn new(component: &str, issue: &str, solution: &str) -> Self {
        Self {
            component: component.to_string(),
            issue: issue.to_string(),
            solution: solution.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalePriority {
    Cost,
    Throughput,
}

/// Projected daily load and spend at a multiple of today's query volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScaleProjection {
    pub factor: u32,
    pub current_daily_volume: u64,
    pub scaled_daily_volume: u64,
    pub current_cost_per_1k_usd: f64,
    pub scaled_daily_cost_usd: f64,
    pub scaled_monthly_cost_usd: f64,
    pub bottlenecks: Vec<Bottleneck>,
    pub priority: ScalePriority,
}

/// Daily query count above which a single in-memory index snapshot becomes the limit.
const INDEX_THROUGHPUT_LIMIT: u64 = 10_000;
/// Daily spend above which cost, not throughput, is the first problem.
const DAILY_COST_LIMIT_USD: f64 = 1000.0;
const DAYS_PER_MONTH: f64 = 30.0;

/// Project cost and likely bottlenecks at `factor` times `daily_volume` queries a day.
pub fn project_scale(cost_per_1k_usd: f64, daily_volume: u64, factor: u32) -> ScaleProjection {
    let scaled_daily_volume = daily_volume.saturating_mul(u64::from(factor));
    let scaled_daily_cost_usd = cost_per_1k_usd / 1000.0 * scaled_daily_volume as f64;

    let mut bottlenecks = Vec::new();
    if scaled_daily_volume > INDEX_THROUGHPUT_LIMIT {
        bottlenecks.push(Bottleneck::new(
            "retrieval index",
            "Linear scan over one snapshot limits query throughput",
            "Shard the snapshot or move to an approximate nearest-neighbour index",
        ));
    }
    if scaled_daily_cost_usd > DAILY_COST_LIMIT_USD {
        bottlenecks.push(Bottleneck::new(
            "generation backend",
            "Cost becomes prohibitive",
            "Cache answers, route to smaller models, or rate limit",
        ));
    }
    bottlenecks.push(Bottleneck::new(
        "embedding backend",
        "One embedding call per query saturates the local server",
        "Cache query embeddings and batch embedding calls",
    ));

    ScaleProjection {
        factor,
        current_daily_volume: daily_volume,
        scaled_daily_volume,
        current_cost_per_1k_usd: cost_per_1k_usd,
        scaled_daily_cost_usd,
        scaled_monthly_cost_usd: scaled_daily_cost_usd * DAYS_PER_MONTH,
        bottlenecks,
        priority: if scaled_daily_cost_usd > DAILY_COST_LIMIT_USD {
            ScalePriority::Cost
        } else {
            ScalePriority::Throughput
        },
    }
}
