use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::TokenUsage;
use crate::error::AppError;

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelPrice {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

impl ModelPrice {
    pub const fn new(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
        }
    }
}

/// Fixed per-model price table, read from configuration and never derived at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PriceTable {
    models: BTreeMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new(models: BTreeMap<String, ModelPrice>) -> Self {
        Self { models }
    }

    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.models.insert(model.into(), price);
        self
    }

    /// Entries from `other` replace same-named entries in `self`.
    pub fn merged_with(mut self, other: &PriceTable) -> Self {
        for (model, price) in other.models.iter() {
            self.models.insert(model.clone(), *price);
        }
        self
    }

    pub fn get(&self, model: &str) -> Option<ModelPrice> {
        self.models.get(model).copied()
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|k| k.as_str())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for (model, p) in self.models.iter() {
            let ok = |v: f64| v.is_finite() && v >= 0.0;
            if !ok(p.prompt_per_million) || !ok(p.completion_per_million) {
                return Err(AppError::new(
                    "PRICE_TABLE_INVALID",
                    "Model prices must be finite and non-negative",
                )
                .with_details(format!(
                    "model={model}; prompt={}; completion={}",
                    p.prompt_per_million, p.completion_per_million
                )));
            }
        }
        Ok(())
    }

    /// `prompt_tokens * price_prompt + completion_tokens * price_completion`.
    ///
    /// A model missing from the table is a configuration fault, not a zero-cost call.
    pub fn cost_usd(&self, model: &str, usage: TokenUsage) -> Result<f64, AppError> {
        let p = self.get(model).ok_or_else(|| {
            AppError::new("PRICE_MODEL_UNKNOWN", "Model is missing from the price table")
                .with_details(format!("model={model}"))
        })?;
        let cost = f64::from(usage.prompt_tokens) * (p.prompt_per_million / 1_000_000.0)
            + f64::from(usage.completion_tokens) * (p.completion_per_million / 1_000_000.0);
        if !cost.is_finite() || cost < 0.0 {
            return Err(AppError::new("PRICE_TABLE_INVALID", "Computed cost is not a valid amount")
                .with_details(format!("model={model}; cost={cost}")));
        }
        Ok(cost)
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        // Hosted rates as published in 2024; local models carry notional rates so that
        // strategies still compare on cost.
        PriceTable::empty()
            .with_model("gpt-4o-mini", ModelPrice::new(0.15, 0.60))
            .with_model("gpt-4o", ModelPrice::new(2.50, 10.00))
            .with_model("gpt-4", ModelPrice::new(30.00, 60.00))
            .with_model("text-embedding-3-small", ModelPrice::new(0.02, 0.0))
            .with_model("llama3.1:8b", ModelPrice::new(0.05, 0.10))
            .with_model("nomic-embed-text", ModelPrice::new(0.01, 0.0))
    }
}

/// Rough token count for calls whose backend reports no usage (embeddings).
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    let est = chars.div_ceil(4);
    est.min(u32::MAX as usize) as u32
}
