use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fqa_ai::embeddings::ollama_embed::OllamaEmbedder;
use fqa_ai::embeddings::Embedder;
use fqa_ai::harness::{build_report, run as run_evaluation, EvaluationPlan};
use fqa_ai::index::{build_from_dir, IndexSnapshot};
use fqa_ai::llm::ollama_llm::OllamaLlm;
use fqa_ai::llm::Llm;
use fqa_ai::ollama::OllamaClient;
use fqa_ai::pipeline::QueryPipeline;
use fqa_ai::retrieve::Retriever;
use fqa_core::config::FqaConfig;
use fqa_core::domain::{Method, QueryRequest, ResponseRecord, MAX_TIMEOUT_MS};
use fqa_core::error::AppError;
use fqa_core::evaluation::{default_test_set, load_test_set, Recommendation};
use fqa_core::fallback::{ConsecutiveTimeouts, NoopTimeoutHook, TimeoutHook};
use fqa_core::report::{write_outputs, OutputPaths};

#[derive(Debug, serde::Serialize)]
pub struct AiHealthStatus {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SetupSummary {
    pub index_path: PathBuf,
    pub documents: usize,
    pub chunks: usize,
    pub dims: usize,
    pub embedding_model: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluateOptions {
    pub test_set: Option<PathBuf>,
    pub methods: Vec<String>,
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
pub struct EvaluateSummary {
    pub records: usize,
    pub json: PathBuf,
    pub csv: PathBuf,
    pub markdown: PathBuf,
    pub recommendation: Recommendation,
}

/// Ollama client for the configured server. Its transport timeout is the largest budget
/// a request may carry; each request's own budget is enforced per call by the pipeline.
pub fn client(cfg: &FqaConfig) -> Result<OllamaClient, AppError> {
    Ok(OllamaClient::new(&cfg.backend.base_url)?.with_request_timeout(Duration::from_millis(MAX_TIMEOUT_MS)))
}

/// Hook for sequential sessions (`query`, `interactive`): counts timeout streaks.
pub fn session_hook() -> Arc<dyn TimeoutHook> {
    Arc::new(ConsecutiveTimeouts::new())
}

/// Hook for evaluation runs. Parallel workers interleave, so no streak is kept.
pub fn evaluation_hook() -> Arc<dyn TimeoutHook> {
    Arc::new(NoopTimeoutHook)
}

pub fn ai_health_check(cfg: &FqaConfig) -> Result<AiHealthStatus, AppError> {
    let client = client(cfg)?;
    client.health_check()?;
    Ok(AiHealthStatus {
        ok: true,
        message: format!("Ollama reachable at {}", client.base_url()),
    })
}

/// Chunk and embed every document under the data directory and write the index snapshot.
pub fn setup(
    cfg: &FqaConfig,
    data_dir: Option<&Path>,
    index_path: Option<&Path>,
) -> Result<SetupSummary, AppError> {
    let data_dir = data_dir.unwrap_or(cfg.retrieval.data_dir.as_path());
    let index_path = index_path.unwrap_or(cfg.retrieval.index_path.as_path());

    let client = client(cfg)?;
    client.health_check()?;
    let embedder = OllamaEmbedder::new(client);

    let snap = build_from_dir(data_dir, &embedder, &cfg.backend.embedding_model)?;
    snap.save(index_path)?;

    let documents: BTreeSet<&str> = snap.chunks.iter().map(|c| c.source_document.as_str()).collect();
    let summary = SetupSummary {
        index_path: index_path.to_path_buf(),
        documents: documents.len(),
        chunks: snap.len(),
        dims: snap.dims,
        embedding_model: snap.embedding_model.clone(),
        fingerprint: snap.fingerprint()?,
    };
    tracing::info!(
        documents = summary.documents,
        chunks = summary.chunks,
        index = %summary.index_path.display(),
        "index built"
    );
    Ok(summary)
}

/// Load the index snapshot named by the config; it must match the configured embedding model.
pub fn load_index(cfg: &FqaConfig) -> Result<IndexSnapshot, AppError> {
    let snap = IndexSnapshot::load(&cfg.retrieval.index_path)?;
    if snap.embedding_model != cfg.backend.embedding_model {
        return Err(AppError::new(
            "INDEX_MODEL_MISMATCH",
            "Index was built with a different embedding model; run setup again",
        )
        .with_details(format!(
            "index_model={}; configured_model={}",
            snap.embedding_model, cfg.backend.embedding_model
        )));
    }
    Ok(snap)
}

/// Wire the pipeline over an already loaded snapshot and the given backends.
pub fn pipeline_with(
    cfg: &FqaConfig,
    snap: IndexSnapshot,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
    hook: Arc<dyn TimeoutHook>,
) -> QueryPipeline {
    let retriever = Retriever::new(embedder, Arc::new(snap));
    QueryPipeline::from_config(cfg, retriever, llm).with_timeout_hook(hook)
}

/// Pipeline backed by the local Ollama server. Returns the snapshot fingerprint with it.
pub fn open_pipeline(cfg: &FqaConfig, hook: Arc<dyn TimeoutHook>) -> Result<(QueryPipeline, String), AppError> {
    let snap = load_index(cfg)?;
    let fingerprint = snap.fingerprint()?;
    let client = client(cfg)?;
    let pipeline = pipeline_with(
        cfg,
        snap,
        Arc::new(OllamaEmbedder::new(client.clone())),
        Arc::new(OllamaLlm::new(client)),
        hook,
    );
    Ok((pipeline, fingerprint))
}

pub fn request(cfg: &FqaConfig, text: &str, method: Option<&str>, timeout_ms: Option<u64>) -> QueryRequest {
    let method = method
        .map(str::to_string)
        .unwrap_or_else(|| cfg.query.default_method.as_str().to_string());
    QueryRequest::new(text, method).with_timeout_ms(timeout_ms.unwrap_or(cfg.query.timeout_ms))
}

/// Human-readable rendering of one response.
pub fn render_response(r: &ResponseRecord) -> String {
    let mut out = String::new();
    out.push_str(&r.answer_text);
    out.push('\n');
    if !r.citations.is_empty() {
        out.push_str("\nSources:\n");
        for c in r.citations.iter() {
            let doc = c.source_document.as_deref().unwrap_or("?");
            match c.offset_range {
                Some(o) => out.push_str(&format!("  - {} ({doc}, bytes {}..{})\n", c.chunk_id, o.start, o.end)),
                None => out.push_str(&format!("  - {} ({doc})\n", c.chunk_id)),
            }
        }
    }
    if !r.unconfirmed_citations.is_empty() {
        let ids: Vec<&str> = r.unconfirmed_citations.iter().map(|c| c.chunk_id.as_str()).collect();
        out.push_str(&format!("\nUnverified citations: {}\n", ids.join(", ")));
    }
    let method = r.method.map(|m| m.as_str()).unwrap_or("-");
    out.push_str(&format!(
        "\n[{} | {} | {:.0} ms | ${:.6}]\n",
        r.status, method, r.latency_ms, r.cost_usd
    ));
    out
}

fn io_err(e: std::io::Error) -> AppError {
    AppError::new("CLI_IO_FAILED", "Failed to read or write the terminal").with_details(e.to_string())
}

/// Read questions line by line until EOF or `exit`. `:method <name>` switches the strategy,
/// `methods` lists them.
pub fn run_interactive<R: BufRead, W: Write>(
    pipeline: &QueryPipeline,
    cfg: &FqaConfig,
    input: R,
    mut output: W,
) -> Result<usize, AppError> {
    let mut method = cfg.query.default_method.as_str().to_string();
    let mut answered = 0usize;

    writeln!(output, "Ask a question about the indexed documents (`exit` to quit).").map_err(io_err)?;
    for line in input.lines() {
        let line = line.map_err(io_err)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        if line == "methods" {
            let names: Vec<&str> = Method::ALL.iter().map(|m| m.as_str()).collect();
            writeln!(output, "methods: {} (current: {method})", names.join(", ")).map_err(io_err)?;
            continue;
        }
        if let Some(name) = line.strip_prefix(":method") {
            let name = name.trim();
            match name.parse::<Method>() {
                Ok(m) => {
                    method = m.as_str().to_string();
                    writeln!(output, "method: {method}").map_err(io_err)?;
                }
                Err(e) => writeln!(output, "{e}").map_err(io_err)?,
            }
            continue;
        }

        let record = pipeline.handle(&request(cfg, line, Some(&method), None))?;
        write!(output, "{}", render_response(&record)).map_err(io_err)?;
        answered += 1;
    }
    Ok(answered)
}

pub fn parse_methods(raw: &[String]) -> Result<Vec<Method>, AppError> {
    if raw.is_empty() {
        return Ok(Method::ALL.to_vec());
    }
    raw.iter()
        .map(|s| {
            s.parse::<Method>().map_err(|e| {
                AppError::new("CLI_METHOD_UNKNOWN", "Unknown prompting method").with_details(e)
            })
        })
        .collect()
}

/// Run the evaluation harness and write the JSON, CSV and Markdown reports.
pub fn evaluate(cfg: &FqaConfig, opts: &EvaluateOptions) -> Result<EvaluateSummary, AppError> {
    let (pipeline, fingerprint) = open_pipeline(cfg, evaluation_hook())?;
    evaluate_with(cfg, &pipeline, &fingerprint, opts)
}

pub fn evaluate_with(
    cfg: &FqaConfig,
    pipeline: &QueryPipeline,
    fingerprint: &str,
    opts: &EvaluateOptions,
) -> Result<EvaluateSummary, AppError> {
    let cases = match opts.test_set.as_deref() {
        Some(path) => load_test_set(path)?,
        None => default_test_set(),
    };
    let methods = parse_methods(&opts.methods)?;
    let plan = EvaluationPlan::new(cases, methods)
        .with_workers(opts.workers.unwrap_or(cfg.evaluation.workers))
        .with_timeout_ms(cfg.query.timeout_ms)
        .with_latency_targets(cfg.evaluation.latency_targets)
        .with_scale(cfg.evaluation.daily_volume, cfg.evaluation.scale_factor);

    let run = run_evaluation(pipeline, &plan)?;
    let report = build_report(run, pipeline, fingerprint)?;
    let out_dir = opts.output_dir.as_deref().unwrap_or(cfg.evaluation.output_dir.as_path());
    let OutputPaths { json, csv, markdown } = write_outputs(out_dir, &report)?;

    Ok(EvaluateSummary {
        records: report.records.len(),
        json,
        csv,
        markdown,
        recommendation: report.recommendation,
    })
}
