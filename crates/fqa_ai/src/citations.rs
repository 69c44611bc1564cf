use std::collections::BTreeSet;

use fqa_core::domain::{Citation, CitationCheck, RetrievalResult};

pub const MARKER_PREFIX: &str = "[[chunk:";

pub fn marker(chunk_id: &str) -> String {
    format!("{MARKER_PREFIX}{chunk_id}]]")
}

/// Parse `[[chunk:<id>]]` markers. Unterminated or empty markers are skipped.
///
/// Ids may contain brackets (`q3[final]#0`); a marker closes at the first `]]`, extended
/// over any further `]` so ids ending in `]` survive. A marker that reaches the next
/// marker or the end of its line without closing is broken.
pub fn extract_cited_chunk_ids(text: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut rest = text;
    while let Some(pos) = rest.find(MARKER_PREFIX) {
        let body = &rest[pos + MARKER_PREFIX.len()..];
        let next = body.find(MARKER_PREFIX).unwrap_or(body.len());
        let limit = body.find('\n').map_or(next, |nl| nl.min(next));
        match body[..limit].find("]]") {
            Some(mut end) => {
                while body[end + 2..].starts_with(']') {
                    end += 1;
                }
                let id = body[..end].trim();
                if !id.is_empty() {
                    out.insert(id.to_string());
                }
                rest = &body[end + 2..];
            }
            None => rest = body,
        }
    }
    out
}

/// Split claimed chunk ids into those present in `retrieval` and those that are not.
///
/// Confirmed citations carry the retrieved chunk's document and offsets. Unconfirmed ones
/// are kept as claimed; they lower citation precision but never fail the query.
pub fn verify(claimed: &BTreeSet<String>, retrieval: &RetrievalResult) -> CitationCheck {
    let mut check = CitationCheck::default();
    for id in claimed {
        match retrieval.get(id) {
            Some(chunk) => {
                check.confirmed.insert(Citation::for_chunk(chunk));
            }
            None => {
                tracing::debug!(chunk_id = %id, "citation not in retrieval result");
                check.unconfirmed.insert(Citation::claimed(id.clone()));
            }
        }
    }
    check
}
