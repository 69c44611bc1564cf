use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{Method, DEFAULT_TOP_K, MAX_TIMEOUT_MS};
use crate::error::AppError;
use crate::metrics::LatencyTargets;
use crate::pricing::PriceTable;

pub const DEFAULT_CONFIG_FILE: &str = "findocqa.toml";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_GENERATION_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub generation_model: String,
    pub embedding_model: String,
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            max_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub index_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            index_path: PathBuf::from("index/findocqa_index.json"),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueryConfig {
    pub timeout_ms: u64,
    pub default_method: Method,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: MAX_TIMEOUT_MS,
            default_method: Method::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScopeConfig {
    pub extra_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub workers: usize,
    pub output_dir: PathBuf,
    /// Queries a day today; the base of the scale projection.
    pub daily_volume: u64,
    pub scale_factor: u32,
    pub latency_targets: LatencyTargets,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            output_dir: PathBuf::from("evaluation_results"),
            daily_volume: 1000,
            scale_factor: 10,
            latency_targets: LatencyTargets::default(),
        }
    }
}

/// `findocqa.toml`. Every section may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FqaConfig {
    pub backend: BackendConfig,
    pub retrieval: RetrievalConfig,
    pub query: QueryConfig,
    pub scope: ScopeConfig,
    pub evaluation: EvaluationConfig,
    /// Merged over the built-in table; a listed model replaces the built-in entry.
    pub prices: PriceTable,
}

impl Default for FqaConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            retrieval: RetrievalConfig::default(),
            query: QueryConfig::default(),
            scope: ScopeConfig::default(),
            evaluation: EvaluationConfig::default(),
            prices: PriceTable::default(),
        }
    }
}

fn invalid(field: &str, message: &str) -> AppError {
    AppError::new("CONFIG_INVALID", format!("Invalid configuration: {field} {message}"))
        .with_details(format!("field={field}"))
}

impl FqaConfig {
    pub fn from_toml(raw: &str) -> Result<Self, AppError> {
        let mut cfg: FqaConfig = toml::from_str(raw).map_err(|e| {
            AppError::new("CONFIG_PARSE_FAILED", "Failed to parse configuration")
                .with_details(e.to_string())
        })?;
        cfg.prices = PriceTable::default().merged_with(&cfg.prices);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("CONFIG_READ_FAILED", "Failed to read configuration file")
                .at_path(path, e)
        })?;
        Self::from_toml(&raw).map_err(|e| {
            let details = match e.details.as_deref() {
                Some(d) => format!("path={}; {}", path.display(), d),
                None => format!("path={}", path.display()),
            };
            e.with_details(details)
        })
    }

    /// An explicit path must exist; without one, `findocqa.toml` in the working directory
    /// is used when present and defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    tracing::debug!("no config file; using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.backend.generation_model.trim().is_empty() {
            return Err(invalid("backend.generation_model", "must not be empty"));
        }
        if self.backend.embedding_model.trim().is_empty() {
            return Err(invalid("backend.embedding_model", "must not be empty"));
        }
        if self.backend.max_tokens == 0 {
            return Err(invalid("backend.max_tokens", "must be greater than 0"));
        }
        if self.retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k", "must be greater than 0"));
        }
        if self.query.timeout_ms == 0 || self.query.timeout_ms > MAX_TIMEOUT_MS {
            return Err(invalid("query.timeout_ms", "must be between 1 and 30000"));
        }
        if self.evaluation.workers == 0 {
            return Err(invalid("evaluation.workers", "must be greater than 0"));
        }
        if self.evaluation.scale_factor == 0 {
            return Err(invalid("evaluation.scale_factor", "must be greater than 0"));
        }
        let t = &self.evaluation.latency_targets;
        if !(t.p50_ms.is_finite() && t.p50_ms > 0.0) || !t.p95_ms.is_finite() || t.p95_ms < t.p50_ms {
            return Err(invalid(
                "evaluation.latency_targets",
                "must be positive with p95_ms not below p50_ms",
            ));
        }
        self.prices.validate()?;
        for model in [&self.backend.generation_model, &self.backend.embedding_model] {
            if self.prices.get(model).is_none() {
                return Err(AppError::new(
                    "PRICE_MODEL_UNKNOWN",
                    "Configured model is missing from the price table",
                )
                .with_details(format!("model={model}")));
            }
        }
        Ok(())
    }
}
