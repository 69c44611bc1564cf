use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use fqa_core::domain::{CallOutcome, CallRecord, Stage, TokenUsage};
use fqa_core::error::AppError;
use fqa_core::pricing::PriceTable;

/// How a metered call ended when it did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError<E> {
    /// No result within the budget; the call was abandoned.
    TimedOut { budget_ms: u64 },
    /// The call returned this error, passed through untouched.
    Failed(E),
    /// The call could not be run at all.
    Aborted(AppError),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::TimedOut { budget_ms } => write!(f, "call exceeded {budget_ms} ms"),
            CallError::Failed(e) => write!(f, "{e}"),
            CallError::Aborted(e) => write!(f, "call aborted: {e}"),
        }
    }
}

/// Measures every external call of one query.
///
/// A `Meter` only records; it never changes what a call returned.
#[derive(Debug)]
pub struct Meter<'a> {
    prices: &'a PriceTable,
    budget: Duration,
    calls: Vec<CallRecord>,
}

impl<'a> Meter<'a> {
    pub fn new(prices: &'a PriceTable, budget_ms: u64) -> Self {
        Self {
            prices,
            budget: Duration::from_millis(budget_ms),
            calls: Vec::new(),
        }
    }

    pub fn budget_ms(&self) -> u64 {
        self.budget.as_millis().min(u128::from(u64::MAX)) as u64
    }

    /// Run `call` on its own thread and wait at most the budget for its result.
    ///
    /// On expiry the thread is left to finish on its own; its result is sent into a
    /// channel nobody reads and is dropped.
    pub fn timed<T, E, F>(&mut self, stage: Stage, model: &str, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<Result<T, E>>(1);
        let started = Instant::now();

        let spawned = thread::Builder::new()
            .name(format!("findocqa-{stage}"))
            .spawn(move || {
                let _ = tx.send(call());
            });
        if let Err(e) = spawned {
            return Err(CallError::Aborted(
                AppError::new("AI_CALL_SPAWN_FAILED", "Failed to start external call")
                    .with_details(format!("stage={stage}; err={e}")),
            ));
        }

        let received = rx.recv_timeout(self.budget);
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (outcome, result) = match received {
            Ok(Ok(v)) => (CallOutcome::Ok, Ok(v)),
            Ok(Err(e)) => (CallOutcome::Failed, Err(CallError::Failed(e))),
            Err(RecvTimeoutError::Timeout) => (
                CallOutcome::TimedOut,
                Err(CallError::TimedOut {
                    budget_ms: self.budget_ms(),
                }),
            ),
            Err(RecvTimeoutError::Disconnected) => (
                CallOutcome::Failed,
                Err(CallError::Aborted(
                    AppError::new("AI_CALL_PANICKED", "External call ended without a result")
                        .with_details(format!("stage={stage}; model={model}")),
                )),
            ),
        };

        tracing::debug!(%stage, model, latency_ms, outcome = ?outcome, "external call finished");
        self.calls.push(CallRecord {
            stage,
            model: model.to_string(),
            latency_ms,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
            outcome,
        });
        result
    }

    /// Attach token usage to the most recent call and price it with that call's model.
    pub fn charge(&mut self, usage: TokenUsage) -> Result<(), AppError> {
        let prices = self.prices;
        let last = self.calls.last_mut().ok_or_else(|| {
            AppError::new("AI_METER_NO_CALL", "No call recorded to charge usage against")
        })?;
        last.cost_usd = prices.cost_usd(&last.model, usage)?;
        last.prompt_tokens = usage.prompt_tokens;
        last.completion_tokens = usage.completion_tokens;
        Ok(())
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn total_latency_ms(&self) -> f64 {
        self.calls.iter().map(|c| c.latency_ms).sum()
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.calls.iter().map(|c| c.cost_usd).sum()
    }

    pub fn into_calls(self) -> Vec<CallRecord> {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_call_times_out_and_is_recorded() {
        let prices = PriceTable::default();
        let mut meter = Meter::new(&prices, 20);
        let res: Result<u32, CallError<AppError>> = meter.timed(Stage::Generation, "llama3.1:8b", || {
            thread::sleep(Duration::from_millis(300));
            Ok(1)
        });
        assert_eq!(res, Err(CallError::TimedOut { budget_ms: 20 }));
        assert_eq!(meter.calls().len(), 1);
        assert_eq!(meter.calls()[0].outcome, CallOutcome::TimedOut);
        assert!(meter.total_latency_ms() >= 20.0);
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let prices = PriceTable::default();
        let mut meter = Meter::new(&prices, 1000);
        let err = AppError::new("AI_BACKEND_FAILED", "boom");
        let expected = err.clone();
        let res: Result<u32, _> = meter.timed(Stage::Generation, "llama3.1:8b", move || Err(err));
        assert_eq!(res, Err(CallError::Failed(expected)));
        assert_eq!(meter.calls()[0].outcome, CallOutcome::Failed);
    }

    #[test]
    fn charge_prices_the_last_call_by_its_model() {
        let prices = PriceTable::default();
        let mut meter = Meter::new(&prices, 1000);
        let _: Result<(), CallError<AppError>> = meter.timed(Stage::Generation, "gpt-4o-mini", || Ok(()));
        meter
            .charge(TokenUsage {
                prompt_tokens: 1_000_000,
                completion_tokens: 0,
            })
            .expect("charge");
        assert!((meter.total_cost_usd() - 0.15).abs() < 1e-12);

        let _: Result<(), CallError<AppError>> = meter.timed(Stage::Generation, "unknown", || Ok(()));
        let err = meter.charge(TokenUsage::default()).expect_err("unknown model");
        assert_eq!(err.code, "PRICE_MODEL_UNKNOWN");
    }
}
