use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::Method;
use crate::error::AppError;
use crate::evaluation::{
    CostDrivers, EvaluationRecord, MethodSummary, Recommendation, ScalePriority, ScaleProjection,
};

pub const RESULTS_JSON: &str = "evaluation_results.json";
pub const RESULTS_CSV: &str = "evaluation_results.csv";
pub const SUMMARY_MD: &str = "evaluation_summary.md";

/// The durable output of an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationReport {
    pub generated_at: String,
    pub index_fingerprint: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub top_k: usize,
    pub methods: Vec<Method>,
    pub records: Vec<EvaluationRecord>,
    pub summaries: Vec<MethodSummary>,
    pub cost_drivers: CostDrivers,
    pub recommendation: Recommendation,
    pub scale: ScaleProjection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
    pub markdown: PathBuf,
}

pub fn now_rfc3339() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::new("REPORT_TIMESTAMP_FAILED", "Failed to format report timestamp")
            .with_details(e.to_string())
    })
}

/// Write `bytes` to `path` through a sibling tmp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::new("REPORT_WRITE_FAILED", "Failed to create output directory")
                    .at_path(parent, e)
            })?;
        }
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes).map_err(|e| {
        AppError::new("REPORT_WRITE_FAILED", "Failed to write output file")
            .at_path(&tmp, e)
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new("REPORT_WRITE_FAILED", "Failed to finalize output file write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })?;
    Ok(())
}

fn citation_ids(record: &EvaluationRecord) -> String {
    record
        .response
        .citations
        .iter()
        .map(|c| c.chunk_id.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One row per record, in report order.
pub fn render_csv(report: &EvaluationReport) -> Result<Vec<u8>, AppError> {
    let encode_err = |e: csv::Error| {
        AppError::new("REPORT_ENCODE_FAILED", "Failed to encode CSV results").with_details(e.to_string())
    };
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record([
        "method",
        "status",
        "query",
        "correctness_score",
        "citation_precision",
        "citation_recall",
        "latency_ms",
        "cost_usd",
        "answer",
        "citations",
        "unconfirmed_citations",
        "completeness",
    ])
    .map_err(encode_err)?;
    for r in report.records.iter() {
        let unconfirmed = r
            .response
            .unconfirmed_citations
            .iter()
            .map(|c| c.chunk_id.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        wtr.write_record([
            r.method.as_str().to_string(),
            r.response.status.as_str().to_string(),
            r.query.clone(),
            format!("{:.4}", r.correctness_score),
            format!("{:.4}", r.citation_precision),
            format!("{:.4}", r.citation_recall),
            format!("{:.1}", r.response.latency_ms),
            format!("{:.8}", r.response.cost_usd),
            r.response.answer_text.clone(),
            citation_ids(r),
            unconfirmed,
            format!("{:.4}", r.completeness.score),
        ])
        .map_err(encode_err)?;
    }
    wtr.into_inner().map_err(|e| {
        AppError::new("REPORT_ENCODE_FAILED", "Failed to flush CSV results").with_details(e.to_string())
    })
}

/// Deterministic Markdown summary. Row order follows `report.summaries`.
pub fn render_markdown(report: &EvaluationReport) -> String {
    let mut out = String::new();
    out.push_str("# Prompt strategy evaluation\n\n");
    out.push_str(&format!("Generated at: {}\n\n", report.generated_at));
    out.push_str(&format!(
        "- Generation model: `{}`\n- Embedding model: `{}`\n- Top-k: {}\n- Index fingerprint: `{}`\n- Records: {}\n\n",
        report.generation_model,
        report.embedding_model,
        report.top_k,
        report.index_fingerprint,
        report.records.len()
    ));

    out.push_str("## Per-method summary\n\n");
    out.push_str("| Method | Queries | Success | Correctness | Cit. precision | Cit. recall | P50 ms | P95 ms | P99 ms | Mean cost $ | Cost / 1k $ |\n");
    out.push_str("|---|---:|---:|---:|---:|---:|---:|---:|---:|---:|---:|\n");
    for s in report.summaries.iter() {
        out.push_str(&format!(
            "| {} | {} | {:.0}% | {:.2} | {:.2} | {:.2} | {:.0} | {:.0} | {:.0} | {:.6} | {:.4} |\n",
            s.method,
            s.total,
            s.success_rate * 100.0,
            s.mean_correctness,
            s.mean_citation_precision,
            s.mean_citation_recall,
            s.latency.p50,
            s.latency.p95,
            s.latency.p99,
            s.mean_cost_usd,
            s.cost_per_1k_queries_usd
        ));
    }
    out.push('\n');

    out.push_str("## Latency targets and completeness\n\n");
    out.push_str("| Method | P50 target | Meets P50 | P95 target | Meets P95 | Within P50 | Within P95 | Completeness | Complete |\n");
    out.push_str("|---|---:|:---:|---:|:---:|---:|---:|---:|---:|\n");
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    for s in report.summaries.iter() {
        let t = &s.latency_targets;
        out.push_str(&format!(
            "| {} | {:.0} | {} | {:.0} | {} | {:.0}% | {:.0}% | {:.2} | {:.0}% |\n",
            s.method,
            t.target_p50_ms,
            yes_no(t.meets_p50),
            t.target_p95_ms,
            yes_no(t.meets_p95),
            t.within_p50_share * 100.0,
            t.within_p95_share * 100.0,
            s.mean_completeness,
            s.complete_share * 100.0
        ));
    }
    out.push('\n');

    out.push_str("## Status breakdown\n\n");
    for s in report.summaries.iter() {
        let parts = s
            .status_counts
            .iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("- {}: {}\n", s.method, if parts.is_empty() { "none".to_string() } else { parts }));
    }
    out.push('\n');

    let d = &report.cost_drivers;
    out.push_str("## Cost drivers\n\n");
    out.push_str(&format!(
        "- Total cost: ${:.6} over {} queries (${:.4} per 1k)\n",
        d.total_cost_usd, d.total_queries, d.cost_per_1k_queries_usd
    ));
    out.push_str(&format!(
        "- Mean tokens: prompt {:.0}, completion {:.0}, embedding {:.0}\n",
        d.mean_prompt_tokens, d.mean_completion_tokens, d.mean_embedding_tokens
    ));
    out.push_str(&format!(
        "- Prompt share {:.1}%, completion share {:.1}%\n\n",
        d.prompt_share_pct, d.completion_share_pct
    ));

    let sc = &report.scale;
    out.push_str(&format!("## At {}x volume\n\n", sc.factor));
    out.push_str(&format!(
        "- Daily queries: {} -> {}\n- Daily cost: ${:.2} (monthly ${:.2})\n- Priority: {}\n",
        sc.current_daily_volume,
        sc.scaled_daily_volume,
        sc.scaled_daily_cost_usd,
        sc.scaled_monthly_cost_usd,
        match sc.priority {
            ScalePriority::Cost => "cost",
            ScalePriority::Throughput => "throughput",
        }
    ));
    for b in sc.bottlenecks.iter() {
        out.push_str(&format!("- {}: {} ({})\n", b.component, b.issue, b.solution));
    }
    out.push('\n');

    let rec = &report.recommendation;
    let name = |m: Option<Method>| m.map(|m| m.as_str()).unwrap_or("n/a");
    out.push_str("## Recommendation\n\n");
    out.push_str(&format!("- Best method: **{}**\n", name(rec.best_method)));
    out.push_str(&format!("- Cheapest method: {}\n", name(rec.cheapest_method)));
    out.push_str(&format!("- Fastest method (P50): {}\n", name(rec.fastest_method)));
    out.push_str(&format!("- {}\n", rec.rationale));
    if !rec.hints.is_empty() {
        out.push_str("\n### Optimisation hints\n\n");
        for h in rec.hints.iter() {
            out.push_str(&format!(
                "- `{}`: {} (saves {}; {})\n",
                h.strategy, h.description, h.potential_savings, h.implementation
            ));
        }
    }
    out
}

/// Persist JSON, CSV and Markdown outputs into `dir`.
pub fn write_outputs(dir: &Path, report: &EvaluationReport) -> Result<OutputPaths, AppError> {
    let paths = OutputPaths {
        json: dir.join(RESULTS_JSON),
        csv: dir.join(RESULTS_CSV),
        markdown: dir.join(SUMMARY_MD),
    };

    let json = serde_json::to_vec_pretty(report).map_err(|e| {
        AppError::new("REPORT_ENCODE_FAILED", "Failed to encode evaluation results")
            .with_details(e.to_string())
    })?;
    write_atomic(&paths.json, &json)?;
    write_atomic(&paths.csv, &render_csv(report)?)?;
    write_atomic(&paths.markdown, render_markdown(report).as_bytes())?;

    tracing::info!(dir = %dir.display(), records = report.records.len(), "evaluation outputs written");
    Ok(paths)
}

pub fn read_report(path: &Path) -> Result<EvaluationReport, AppError> {
    let bytes = fs::read(path).map_err(|e| {
        AppError::new("REPORT_READ_FAILED", "Failed to read evaluation results")
            .at_path(path, e)
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::new("REPORT_READ_FAILED", "Failed to decode evaluation results")
            .at_path(path, e)
    })
}
