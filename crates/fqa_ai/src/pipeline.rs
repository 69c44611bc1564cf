use std::sync::Arc;

use fqa_core::config::FqaConfig;
use fqa_core::domain::{
    CallRecord, Method, QueryRequest, ResponseDraft, ResponseRecord, RetrievalResult, Stage,
    TokenUsage,
};
use fqa_core::error::AppError;
use fqa_core::fallback::{terminal_outcome, FailureSignal, NoopTimeoutHook, TimeoutHook};
use fqa_core::pricing::{estimate_tokens, PriceTable};
use fqa_core::scope::ScopeClassifier;
use fqa_core::validate::validate_query;

use crate::citations;
use crate::instrument::{CallError, Meter};
use crate::llm::{Llm, BACKEND_TIMEOUT};
use crate::retrieve::{RetrievalError, Retriever};
use crate::strategy::{self, StrategyOutput};

/// Label used in out-of-scope explanations.
pub const DOCUMENT_DOMAIN: &str = "financial documents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub generation_model: String,
    pub max_tokens: u32,
    pub top_k: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &FqaConfig) -> Self {
        Self {
            generation_model: cfg.backend.generation_model.clone(),
            max_tokens: cfg.backend.max_tokens,
            top_k: cfg.retrieval.top_k,
        }
    }
}

/// Single entry point for answering a query: validate, scope check, retrieve, generate,
/// verify, finalize.
///
/// Shared read-only between evaluation workers; nothing in here changes per query.
pub struct QueryPipeline {
    retriever: Retriever,
    llm: Arc<dyn Llm>,
    settings: PipelineSettings,
    prices: PriceTable,
    scope: ScopeClassifier,
    timeout_hook: Arc<dyn TimeoutHook>,
}

enum Step<T> {
    Continue(T),
    Stop(FailureSignal),
}

impl QueryPipeline {
    pub fn new(retriever: Retriever, llm: Arc<dyn Llm>, settings: PipelineSettings) -> Self {
        Self {
            retriever,
            llm,
            settings,
            prices: PriceTable::default(),
            scope: ScopeClassifier::finance_default(),
            timeout_hook: Arc::new(NoopTimeoutHook),
        }
    }

    pub fn from_config(cfg: &FqaConfig, retriever: Retriever, llm: Arc<dyn Llm>) -> Self {
        Self::new(retriever, llm, PipelineSettings::from_config(cfg))
            .with_prices(cfg.prices.clone())
            .with_scope(ScopeClassifier::finance_default().with_extra_keywords(&cfg.scope.extra_keywords))
    }

    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_scope(mut self, scope: ScopeClassifier) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_timeout_hook(mut self, hook: Arc<dyn TimeoutHook>) -> Self {
        self.timeout_hook = hook;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn embedding_model(&self) -> &str {
        self.retriever.embedding_model()
    }

    /// Answer one query.
    ///
    /// The five classified failures come back as `Ok` terminal records. `Err` means
    /// something outside that taxonomy broke (index, price table, generation backend)
    /// and the result must not be counted as a query outcome.
    pub fn handle(&self, req: &QueryRequest) -> Result<ResponseRecord, AppError> {
        let span = tracing::info_span!("query", method = %req.method);
        let _guard = span.enter();

        let valid = match validate_query(req) {
            Ok(v) => v,
            Err(issues) => {
                let draft = ResponseDraft::new(req.method.parse::<Method>().ok());
                return Ok(self.finish_terminal(draft, FailureSignal::MalformedInput { issues }, Vec::new()));
            }
        };

        let mut draft = ResponseDraft::new(Some(valid.method));
        let mut meter = Meter::new(&self.prices, valid.timeout_ms);

        let decision = self.scope.classify(&valid.text);
        if !decision.in_scope {
            let signal = FailureSignal::OutOfScope {
                scope: DOCUMENT_DOMAIN.to_string(),
            };
            return Ok(self.finish_terminal(draft, signal, meter.into_calls()));
        }
        tracing::debug!(matched = ?decision.matched, "query in scope");

        let retrieval = match self.retrieve(&mut meter, &valid.text)? {
            Step::Continue(r) => r,
            Step::Stop(signal) => return Ok(self.finish_terminal(draft, signal, meter.into_calls())),
        };
        draft.set_retrieved(&retrieval);

        let output = match self.generate(&mut meter, valid.method, &valid.text, &retrieval)? {
            Step::Continue(o) => o,
            Step::Stop(signal) => return Ok(self.finish_terminal(draft, signal, meter.into_calls())),
        };
        draft.set_prompt_sha256(output.prompt_sha256.clone());
        self.timeout_hook.on_completed();

        if output.answer_text.trim().is_empty() {
            let signal = FailureSignal::EmptyAnswer {
                retrieved: retrieval.len(),
            };
            return Ok(self.finish_terminal(draft, signal, meter.into_calls()));
        }

        let check = citations::verify(&output.claimed, &retrieval);
        let record = draft.finish_ok(output.answer_text, check, meter.into_calls());
        tracing::info!(
            status = %record.status,
            latency_ms = record.latency_ms,
            cost_usd = record.cost_usd,
            confirmed = record.citations.len(),
            unconfirmed = record.unconfirmed_citations.len(),
            "query answered"
        );
        Ok(record)
    }

    fn retrieve(&self, meter: &mut Meter<'_>, text: &str) -> Result<Step<RetrievalResult>, AppError> {
        let retriever = self.retriever.clone();
        let query = text.to_string();
        let k = self.settings.top_k;
        let model = self.retriever.embedding_model().to_string();
        let embed_usage = TokenUsage {
            prompt_tokens: estimate_tokens(text),
            completion_tokens: 0,
        };

        match meter.timed(Stage::Retrieval, &model, move || retriever.retrieve(&query, k)) {
            Ok(r) if r.is_empty() => {
                meter.charge(embed_usage)?;
                Ok(Step::Stop(FailureSignal::NoChunks))
            }
            Ok(r) => {
                meter.charge(embed_usage)?;
                Ok(Step::Continue(r))
            }
            Err(CallError::Failed(RetrievalError::NoMatches)) => {
                meter.charge(embed_usage)?;
                Ok(Step::Stop(FailureSignal::NoChunks))
            }
            Err(CallError::Failed(RetrievalError::Embedding(e))) if e.has_code(BACKEND_TIMEOUT) => {
                Ok(Step::Stop(self.timed_out(Stage::Retrieval, meter.budget_ms())))
            }
            Err(CallError::Failed(RetrievalError::Embedding(e))) => {
                tracing::warn!(error = %e, "embedding call failed");
                Ok(Step::Stop(FailureSignal::RetrievalError {
                    details: e.to_string(),
                }))
            }
            Err(CallError::Failed(RetrievalError::Index(e))) => Err(e),
            Err(CallError::TimedOut { budget_ms }) => {
                Ok(Step::Stop(self.timed_out(Stage::Retrieval, budget_ms)))
            }
            Err(CallError::Aborted(e)) => Err(e),
        }
    }

    fn generate(
        &self,
        meter: &mut Meter<'_>,
        method: Method,
        text: &str,
        retrieval: &RetrievalResult,
    ) -> Result<Step<StrategyOutput>, AppError> {
        let llm = Arc::clone(&self.llm);
        let model = self.settings.generation_model.clone();
        let call_model = model.clone();
        let max_tokens = self.settings.max_tokens;
        let query = text.to_string();
        let context = retrieval.clone();

        let call = move || strategy::generate(llm.as_ref(), &call_model, max_tokens, method, &query, &context);
        match meter.timed(Stage::Generation, &model, call) {
            Ok(out) => {
                meter.charge(out.usage)?;
                Ok(Step::Continue(out))
            }
            Err(CallError::Failed(e)) if e.has_code(BACKEND_TIMEOUT) => {
                Ok(Step::Stop(self.timed_out(Stage::Generation, meter.budget_ms())))
            }
            // Backend errors other than timeouts are not a query outcome.
            Err(CallError::Failed(e)) => Err(e),
            Err(CallError::TimedOut { budget_ms }) => {
                Ok(Step::Stop(self.timed_out(Stage::Generation, budget_ms)))
            }
            Err(CallError::Aborted(e)) => Err(e),
        }
    }

    fn timed_out(&self, stage: Stage, budget_ms: u64) -> FailureSignal {
        self.timeout_hook.on_timeout(stage);
        FailureSignal::TimedOut { stage, budget_ms }
    }

    fn finish_terminal(
        &self,
        draft: ResponseDraft,
        signal: FailureSignal,
        calls: Vec<CallRecord>,
    ) -> ResponseRecord {
        let outcome = terminal_outcome(&signal);
        let record = draft.finish_terminal(&outcome, calls);
        tracing::info!(
            status = %record.status,
            latency_ms = record.latency_ms,
            cost_usd = record.cost_usd,
            "query ended without an answer"
        );
        record
    }
}
