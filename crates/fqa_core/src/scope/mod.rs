use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Words that place a question inside the financial-document domain.
///
/// "capital" is not listed: on its own it is usually geographic.
const FINANCE_KEYWORDS: &[&str] = &[
    "account", "accrual", "amortization", "annual", "asset", "audit", "balance", "bond",
    "budget", "capex", "cash", "cost", "credit", "currency", "debt", "depreciation",
    "dividend", "earning", "ebit", "ebitda", "eps", "equity", "expenditure", "expense",
    "finance", "financial", "fiscal", "forecast", "gaap", "growth", "guidance", "income",
    "inventory", "investment", "investor", "ledger", "leverage", "liabilities", "liability", "liquidity",
    "loan", "loss", "margin", "metric", "net", "operating", "outlook", "payable", "profit",
    "profitability", "q1", "q2", "q3", "q4", "quarter", "quarterly", "ratio", "receivable",
    "report", "return", "revenue", "risk", "roe", "roi", "sale", "segment", "share",
    "shareholder", "statement", "tax", "valuation", "yield",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeDecision {
    pub in_scope: bool,
    pub matched: Vec<String>,
}

/// Keyword check run before any retrieval; rejecting here skips every external call.
#[derive(Debug, Clone)]
pub struct ScopeClassifier {
    keywords: BTreeSet<String>,
}

impl ScopeClassifier {
    pub fn finance_default() -> Self {
        Self {
            keywords: FINANCE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_extra_keywords<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for k in extra {
            let k = k.as_ref().trim().to_lowercase();
            if !k.is_empty() {
                self.keywords.insert(k);
            }
        }
        self
    }

    pub fn classify(&self, text: &str) -> ScopeDecision {
        let mut matched = BTreeSet::new();

        for raw in text.split_whitespace() {
            // Amounts and percentages are financial on their own.
            if raw.contains('$') || raw.contains('%') || raw.contains('€') || raw.contains('£') {
                matched.insert(raw.to_string());
                continue;
            }
            let token = raw
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            if let Some(k) = self.lookup(&token) {
                matched.insert(k);
            }
        }

        ScopeDecision {
            in_scope: !matched.is_empty(),
            matched: matched.into_iter().collect(),
        }
    }

    fn lookup(&self, token: &str) -> Option<String> {
        if self.keywords.contains(token) {
            return Some(token.to_string());
        }
        for suffix in ["es", "s"] {
            if let Some(stem) = token.strip_suffix(suffix) {
                if !stem.is_empty() && self.keywords.contains(stem) {
                    return Some(stem.to_string());
                }
            }
        }
        // Possessives and hyphenated compounds, e.g. "company's", "year-over-year".
        token
            .split(|c: char| c == '\'' || c == '-')
            .filter(|part| !part.is_empty() && *part != token)
            .find_map(|part| self.keywords.get(part).cloned())
    }
}

impl Default for ScopeClassifier {
    fn default() -> Self {
        Self::finance_default()
    }
}
