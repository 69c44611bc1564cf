use fqa_core::domain::RetrievalResult;

use crate::citations::marker;

const ROLE: &str = "You are a financial document analysis assistant.";

const CITATION_RULE: &str = "Cite every fact with the marker of the passage it came from, \
written exactly as [[chunk:<chunk_id>]]. Use ONLY the passages below. If the answer cannot \
be determined from them, say so clearly.";

/// One block per retrieved chunk, in retrieval order.
pub fn context_blocks(retrieval: &RetrievalResult) -> String {
    retrieval
        .hits
        .iter()
        .map(|h| {
            let c = &h.chunk;
            format!(
                "{} source={} offsets={}..{} score={:.4}\n{}",
                marker(&c.id),
                c.source_document,
                c.offset_range.start,
                c.offset_range.end,
                h.score,
                c.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

pub fn zero_shot(query: &str, retrieval: &RetrievalResult) -> String {
    let context = context_blocks(retrieval);
    format!(
        r#"{ROLE}
Answer the question based ONLY on the passages from financial documents below. Be precise.
{CITATION_RULE}

Passages:
{context}

Question: {query}

Answer:"#
    )
}

pub fn few_shot(query: &str, retrieval: &RetrievalResult) -> String {
    let context = context_blocks(retrieval);
    format!(
        r#"{ROLE}
Answer the question based ONLY on the passages from financial documents below.
{CITATION_RULE}

Example 1:
Passages:
[[chunk:annual_report#3]] source=annual_report.md
Revenue of $10M was reported in Q3 2023, representing a 15% increase year-over-year.

Question: What was the revenue in Q3 2023?
Answer: Revenue of $10M was reported in Q3 2023, a 15% increase year-over-year [[chunk:annual_report#3]].

Example 2:
Passages:
[[chunk:financial_statement#1]] source=financial_statement.md
Total assets increased from $50M to $65M between 2022 and 2023.

Question: How did total assets change?
Answer: Total assets increased from $50M to $65M between 2022 and 2023, a $15M increase [[chunk:financial_statement#1]].

Now answer the user's question following the same format.

Passages:
{context}

Question: {query}
Answer:"#
    )
}

pub fn chain_of_thought(query: &str, retrieval: &RetrievalResult) -> String {
    let context = context_blocks(retrieval);
    format!(
        r#"{ROLE}
Answer the question by thinking through the problem step by step.
{CITATION_RULE}

Passages:
{context}

Question: {query}

Work through these steps, numbering each one:
1. What information is needed to answer the question?
2. Which passages contain that information?
3. How does the information combine into an answer?

Then write a line starting with "Final answer:" followed by the answer with its citations."#
    )
}

pub fn structured(query: &str, retrieval: &RetrievalResult) -> String {
    let context = context_blocks(retrieval);
    format!(
        r#"{ROLE}
Answer the question based ONLY on the passages below and respond with a single JSON object:
{{
  "answer": "answer to the question, citing passages as [[chunk:<chunk_id>]]",
  "confidence": "high | medium | low",
  "key_facts": ["fact", "..."],
  "sources": ["<chunk_id>", "..."]
}}
Return the JSON object only.

Passages:
{context}

Question: {query}"#
    )
}
