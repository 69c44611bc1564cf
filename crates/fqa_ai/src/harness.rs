use fqa_core::domain::{Method, QueryRequest, MAX_TIMEOUT_MS};
use fqa_core::error::AppError;
use fqa_core::evaluation::{
    aggregate_with_targets, cost_drivers, project_scale, recommend, score, EvaluationRecord, MethodSummary,
    TestCase,
};
use fqa_core::metrics::LatencyTargets;
use fqa_core::report::{now_rfc3339, EvaluationReport};
use rayon::prelude::*;

use crate::pipeline::QueryPipeline;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DAILY_VOLUME: u64 = 1000;
pub const DEFAULT_SCALE_FACTOR: u32 = 10;

/// What to evaluate: every case is run once per method.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPlan {
    pub cases: Vec<TestCase>,
    pub methods: Vec<Method>,
    pub workers: usize,
    pub timeout_ms: u64,
    pub latency_targets: LatencyTargets,
    pub daily_volume: u64,
    pub scale_factor: u32,
}

impl EvaluationPlan {
    pub fn new(cases: Vec<TestCase>, methods: Vec<Method>) -> Self {
        Self {
            cases,
            methods,
            workers: DEFAULT_WORKERS,
            timeout_ms: MAX_TIMEOUT_MS,
            latency_targets: LatencyTargets::default(),
            daily_volume: DEFAULT_DAILY_VOLUME,
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_latency_targets(mut self, targets: LatencyTargets) -> Self {
        self.latency_targets = targets;
        self
    }

    /// Base daily volume and multiplier for the scale projection.
    pub fn with_scale(mut self, daily_volume: u64, factor: u32) -> Self {
        self.daily_volume = daily_volume;
        self.scale_factor = factor;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.cases.is_empty() {
            return Err(AppError::new("EVAL_PLAN_INVALID", "Evaluation needs at least one test case"));
        }
        if self.methods.is_empty() {
            return Err(AppError::new("EVAL_PLAN_INVALID", "Evaluation needs at least one method"));
        }
        if self.workers == 0 {
            return Err(AppError::new("EVAL_PLAN_INVALID", "Worker count must be at least 1"));
        }
        if self.scale_factor == 0 {
            return Err(AppError::new("EVAL_PLAN_INVALID", "Scale factor must be at least 1"));
        }
        Ok(())
    }

    /// Methods in plan order with repeats removed.
    fn distinct_methods(&self) -> Vec<Method> {
        let mut out: Vec<Method> = Vec::with_capacity(self.methods.len());
        for m in self.methods.iter() {
            if !out.contains(m) {
                out.push(*m);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRun {
    pub methods: Vec<Method>,
    pub records: Vec<EvaluationRecord>,
    pub summaries: Vec<MethodSummary>,
    pub daily_volume: u64,
    pub scale_factor: u32,
}

/// Run every (method, case) pair through `pipeline` on a bounded worker pool.
///
/// Records come back method-major, cases in input order, whatever order the workers
/// finished in. A fatal error from any pair aborts the whole run.
///
/// Workers share the pipeline's timeout hook, so pairs from different workers reach it
/// interleaved. Give evaluation a pipeline whose hook does not track streaks.
pub fn run(pipeline: &QueryPipeline, plan: &EvaluationPlan) -> Result<EvaluationRun, AppError> {
    plan.validate()?;
    let methods = plan.distinct_methods();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(plan.workers)
        .thread_name(|i| format!("findocqa-eval-{i}"))
        .build()
        .map_err(|e| {
            AppError::new("EVAL_POOL_FAILED", "Failed to start evaluation workers").with_details(e.to_string())
        })?;

    let pairs: Vec<(Method, &TestCase)> = methods
        .iter()
        .flat_map(|m| plan.cases.iter().map(move |c| (*m, c)))
        .collect();

    tracing::info!(
        pairs = pairs.len(),
        methods = methods.len(),
        workers = plan.workers,
        "evaluation started"
    );

    let records = pool.install(|| {
        pairs
            .par_iter()
            .map(|(method, case)| {
                let span = tracing::info_span!("eval_pair", %method);
                let _guard = span.enter();
                let req = QueryRequest::new(case.query.clone(), method.as_str()).with_timeout_ms(plan.timeout_ms);
                let response = pipeline.handle(&req)?;
                Ok(score(case, *method, response))
            })
            .collect::<Result<Vec<_>, AppError>>()
    })?;

    let summaries = aggregate_with_targets(&records, &methods, &plan.latency_targets);
    for s in summaries.iter() {
        tracing::info!(
            method = %s.method,
            success_rate = s.success_rate,
            mean_correctness = s.mean_correctness,
            p50_ms = s.latency.p50,
            "method summary"
        );
    }

    Ok(EvaluationRun {
        methods,
        records,
        summaries,
        daily_volume: plan.daily_volume,
        scale_factor: plan.scale_factor,
    })
}

/// Assemble the persisted report for a finished run.
pub fn build_report(
    run: EvaluationRun,
    pipeline: &QueryPipeline,
    index_fingerprint: impl Into<String>,
) -> Result<EvaluationReport, AppError> {
    let drivers = cost_drivers(&run.records);
    let recommendation = recommend(&run.summaries, &drivers);
    let scale = project_scale(drivers.cost_per_1k_queries_usd, run.daily_volume, run.scale_factor);
    Ok(EvaluationReport {
        generated_at: now_rfc3339()?,
        index_fingerprint: index_fingerprint.into(),
        generation_model: pipeline.settings().generation_model.clone(),
        embedding_model: pipeline.embedding_model().to_string(),
        top_k: pipeline.settings().top_k,
        methods: run.methods,
        records: run.records,
        summaries: run.summaries,
        cost_drivers: drivers,
        recommendation,
        scale,
    })
}
