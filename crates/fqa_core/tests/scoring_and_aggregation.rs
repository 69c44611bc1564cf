use std::collections::BTreeSet;

use fqa_core::domain::{
    CallOutcome, CallRecord, Citation, CitationCheck, Method, ResponseDraft, ResponseRecord,
    Stage, Status,
};
use fqa_core::domain::OffsetRange;
use fqa_core::evaluation::{
    aggregate, aggregate_with_targets, cost_drivers, load_test_set, project_scale, recommend, score, CostDriver,
    ScalePriority, TestCase,
};
use fqa_core::fallback::{terminal_outcome, FailureSignal};
use fqa_core::metrics::{citation_scores, correctness, source_scores, LatencyTargets};
use pretty_assertions::assert_eq;

fn call(stage: Stage, latency_ms: f64, prompt: u32, completion: u32, cost: f64) -> CallRecord {
    CallRecord {
        stage,
        model: "m".to_string(),
        latency_ms,
        prompt_tokens: prompt,
        completion_tokens: completion,
        cost_usd: cost,
        outcome: CallOutcome::Ok,
    }
}

fn ok_response(method: Method, answer: &str, confirmed: &[&str], latency_ms: f64) -> ResponseRecord {
    let check = CitationCheck {
        confirmed: confirmed.iter().map(|id| Citation::claimed(*id)).collect(),
        unconfirmed: BTreeSet::new(),
    };
    ResponseDraft::new(Some(method)).finish_ok(
        answer.to_string(),
        check,
        vec![call(Stage::Generation, latency_ms, 100, 20, 0.001)],
    )
}

#[test]
fn exact_match_short_circuits_keyword_score() {
    let kws = vec!["revenue".to_string(), "percent".to_string()];
    let s = correctness("Revenue   Growth was strong", Some("revenue growth"), &kws);
    assert!(s.exact_match);
    assert_eq!(s.score, 1.0);
    assert_eq!(s.missing, vec!["percent".to_string()]);
}

#[test]
fn keyword_fraction_is_case_insensitive_and_distinct() {
    let kws = vec![
        "Revenue".to_string(),
        "revenue".to_string(),
        "growth".to_string(),
        "rate".to_string(),
        "percent".to_string(),
    ];
    let s = correctness("REVENUE grew at a rate of 12%", Some("revenue growth"), &kws);
    assert!(!s.exact_match);
    assert_eq!(s.found, vec!["rate".to_string(), "revenue".to_string()]);
    assert_eq!(s.score, 0.5);
}

#[test]
fn no_keywords_and_no_match_scores_zero() {
    let s = correctness("anything", Some("something else"), &[]);
    assert_eq!(s.score, 0.0);
    assert_eq!(correctness("anything", None, &[]).score, 0.0);
}

#[test]
fn citation_scores_are_bounded_and_zero_on_empty_denominators() {
    let expected: BTreeSet<String> = ["doc1#12".to_string()].into_iter().collect();

    let empty = citation_scores(&CitationCheck::default(), &expected);
    assert_eq!((empty.precision, empty.recall), (0.0, 0.0));

    let check = CitationCheck {
        confirmed: [Citation::claimed("doc1#12"), Citation::claimed("doc1#13")]
            .into_iter()
            .collect(),
        unconfirmed: [Citation::claimed("doc9#1")].into_iter().collect(),
    };
    let s = citation_scores(&check, &expected);
    assert!((s.precision - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(s.recall, 1.0);

    let none_expected = citation_scores(&check, &BTreeSet::new());
    assert_eq!((none_expected.precision, none_expected.recall), (0.0, 0.0));
}

#[test]
fn terminal_records_score_zero_correctness() {
    let case = TestCase::new("What is the capital of France?").with_keywords(["scope"]);
    let outcome = terminal_outcome(&FailureSignal::OutOfScope {
        scope: "financial documents".to_string(),
    });
    let response = ResponseDraft::new(Some(Method::ZeroShot)).finish_terminal(&outcome, Vec::new());
    assert!(response.answer_text.contains("scope"));
    let rec = score(&case, Method::ZeroShot, response);
    assert_eq!(rec.correctness_score, 0.0);
    assert_eq!(rec.response.status, Status::OutOfScope);
}

#[test]
fn p50_uses_each_methods_own_samples() {
    let case = TestCase::new("What was the revenue in 2023?").with_keywords(["4.2M"]);
    let latencies = [800.0, 1200.0, 2000.0, 1000.0];
    let records: Vec<_> = Method::ALL
        .iter()
        .zip(latencies)
        .map(|(m, l)| score(&case, *m, ok_response(*m, "Revenue was $4.2M", &[], l)))
        .collect();

    let summaries = aggregate(&records, &Method::ALL);
    let p50: Vec<f64> = summaries.iter().map(|s| s.latency.p50).collect();
    assert_eq!(p50, latencies.to_vec());
    for s in summaries.iter() {
        assert_eq!(s.total, 1);
        assert_eq!(s.latency.p50, s.latency.p99);
    }
}

#[test]
fn aggregation_groups_by_method_order_regardless_of_record_order() {
    let case = TestCase::new("Revenue?").with_keywords(["revenue", "growth"]);
    let records = vec![
        score(&case, Method::Structured, ok_response(Method::Structured, "revenue", &[], 300.0)),
        score(&case, Method::ZeroShot, ok_response(Method::ZeroShot, "revenue growth", &[], 100.0)),
        score(&case, Method::Structured, ok_response(Method::Structured, "revenue growth", &[], 500.0)),
        score(&case, Method::ZeroShot, ok_response(Method::ZeroShot, "nothing", &[], 200.0)),
        score(&case, Method::ZeroShot, ok_response(Method::ZeroShot, "growth", &[], 900.0)),
    ];

    let summaries = aggregate(&records, &[Method::ZeroShot, Method::Structured]);
    let order: Vec<Method> = summaries.iter().map(|s| s.method).collect();
    assert_eq!(order, vec![Method::ZeroShot, Method::Structured]);

    let zs = &summaries[0];
    assert_eq!(zs.total, 3);
    assert_eq!(zs.latency.p50, 200.0);
    assert_eq!(zs.latency.p95, 200.0);
    assert!((zs.mean_correctness - 0.5).abs() < 1e-12);
    assert!((zs.mean_latency_ms - 400.0).abs() < 1e-9);

    let st = &summaries[1];
    assert_eq!(st.total, 2);
    assert_eq!(st.latency.p50, 300.0);
    assert!((st.mean_correctness - 0.75).abs() < 1e-12);
}

#[test]
fn failures_count_against_success_rate() {
    let case = TestCase::new("Revenue?").with_keywords(["revenue"]);
    let outcome = terminal_outcome(&FailureSignal::NoChunks);
    let failed = ResponseDraft::new(Some(Method::FewShot)).finish_terminal(
        &outcome,
        vec![call(Stage::Retrieval, 40.0, 3, 0, 0.0)],
    );
    let records = vec![
        score(&case, Method::FewShot, ok_response(Method::FewShot, "revenue", &[], 100.0)),
        score(&case, Method::FewShot, failed),
    ];
    let s = &aggregate(&records, &[Method::FewShot])[0];
    assert_eq!(s.ok_count, 1);
    assert_eq!(s.success_rate, 0.5);
    assert_eq!(s.status_counts.get(&Status::RetrievalFailure), Some(&1));
    assert_eq!(s.latency.p50, 40.0);
}

#[test]
fn recommendation_prefers_correctness_then_precision_then_cost() {
    let case = TestCase::new("Revenue?")
        .with_keywords(["revenue"])
        .with_citations(["doc1#12"]);
    let records = vec![
        score(&case, Method::ZeroShot, ok_response(Method::ZeroShot, "revenue", &[], 100.0)),
        score(&case, Method::FewShot, ok_response(Method::FewShot, "revenue", &["doc1#12"], 200.0)),
        score(&case, Method::ChainOfThought, ok_response(Method::ChainOfThought, "no", &["doc1#12"], 900.0)),
    ];
    let methods = [Method::ZeroShot, Method::FewShot, Method::ChainOfThought];
    let summaries = aggregate(&records, &methods);
    let drivers = cost_drivers(&records);
    let rec = recommend(&summaries, &drivers);

    assert_eq!(rec.best_method, Some(Method::FewShot));
    assert_eq!(rec.fastest_method, Some(Method::ZeroShot));
    assert_eq!(rec.cheapest_method, Some(Method::ZeroShot));
    assert_eq!(drivers.main_driver, CostDriver::Prompt);
    assert!(rec.hints.iter().any(|h| h.strategy == "reduce_prompt_size"));
}

#[test]
fn recommendation_without_records_has_no_best_method() {
    let summaries = aggregate(&[], &Method::ALL);
    assert_eq!(summaries.len(), 4);
    let rec = recommend(&summaries, &cost_drivers(&[]));
    assert_eq!(rec.best_method, None);
}

fn confirmed_in(chunk_id: &str, doc: &str) -> Citation {
    Citation {
        chunk_id: chunk_id.to_string(),
        source_document: Some(doc.to_string()),
        offset_range: Some(OffsetRange { start: 0, end: 10 }),
    }
}

#[test]
fn expected_sources_are_matched_by_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cases.json");
    std::fs::write(
        &path,
        r#"[{"query": "What was the revenue in Q3?", "expected_keywords": ["4.2M"], "expected_sources": ["doc1.md"]}]"#,
    )
    .expect("write");
    let case = load_test_set(&path).expect("load").remove(0);
    assert!(case.expected_citations.is_empty());
    assert_eq!(case.expected_sources, vec!["doc1.md".to_string()]);

    let check = CitationCheck {
        confirmed: [confirmed_in("doc1#12", "doc1.md")].into_iter().collect(),
        unconfirmed: BTreeSet::new(),
    };
    let response = ResponseDraft::new(Some(Method::FewShot)).finish_ok(
        "Revenue was $4.2M [[chunk:doc1#12]]".to_string(),
        check,
        vec![call(Stage::Generation, 100.0, 100, 20, 0.001)],
    );
    let rec = score(&case, Method::FewShot, response);
    assert_eq!(rec.citation_precision, 1.0);
    assert_eq!(rec.citation_recall, 1.0);
    assert_eq!(rec.expected_sources.len(), 1);
}

#[test]
fn source_scores_count_documents_once() {
    let expected: BTreeSet<String> = ["doc1.md".to_string(), "doc2.md".to_string()].into_iter().collect();
    let check = CitationCheck {
        confirmed: [
            confirmed_in("doc1#1", "doc1.md"),
            confirmed_in("doc1#2", "doc1.md"),
            confirmed_in("doc3#0", "doc3.md"),
        ]
        .into_iter()
        .collect(),
        unconfirmed: [Citation::claimed("doc9#9")].into_iter().collect(),
    };
    let s = source_scores(&check, &expected);
    assert!((s.precision - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(s.recall, 0.5);
    let none = source_scores(&CitationCheck::default(), &expected);
    assert_eq!((none.precision, none.recall), (0.0, 0.0));
}

#[test]
fn summaries_check_latency_targets_and_completeness() {
    let case = TestCase::new("Revenue?").with_keywords(["revenue"]);
    let long = "Revenue was $4.2M in Q3 2023, up 12% year over year on higher subscription sales.";
    let records = vec![
        score(&case, Method::FewShot, ok_response(Method::FewShot, long, &[], 900.0)),
        score(&case, Method::FewShot, ok_response(Method::FewShot, "revenue", &[], 1800.0)),
        score(&case, Method::FewShot, ok_response(Method::FewShot, long, &[], 3000.0)),
    ];
    let targets = LatencyTargets {
        p50_ms: 1000.0,
        p95_ms: 2500.0,
    };
    let s = &aggregate_with_targets(&records, &[Method::FewShot], &targets)[0];
    let t = &s.latency_targets;
    assert_eq!(s.latency.p50, 1800.0);
    assert!(!t.meets_p50);
    assert!(t.meets_p95);
    assert!((t.within_p50_share - 1.0 / 3.0).abs() < 1e-12);
    assert!((t.within_p95_share - 2.0 / 3.0).abs() < 1e-12);
    assert!((s.complete_share - 2.0 / 3.0).abs() < 1e-12);
    assert!((s.mean_completeness - (1.0 + 7.0 / 50.0 + 1.0) / 3.0).abs() < 1e-12);

    let default = &aggregate(&records, &[Method::FewShot])[0].latency_targets;
    assert!(default.meets_p50 && default.meets_p95);
    assert_eq!(default.target_p50_ms, 2000.0);
}

#[test]
fn terminal_records_are_not_complete() {
    let case = TestCase::new("Revenue?").with_keywords(["revenue"]);
    let outcome = terminal_outcome(&FailureSignal::NoChunks);
    let failed = ResponseDraft::new(Some(Method::FewShot)).finish_terminal(&outcome, Vec::new());
    let rec = score(&case, Method::FewShot, failed);
    assert_eq!(rec.completeness.score, 0.0);
    assert!(!rec.completeness.is_complete);
}

#[test]
fn scale_projection_flags_cost_and_throughput() {
    let cheap = project_scale(2.0, 1000, 10);
    assert_eq!(cheap.scaled_daily_volume, 10_000);
    assert!((cheap.scaled_daily_cost_usd - 20.0).abs() < 1e-9);
    assert!((cheap.scaled_monthly_cost_usd - 600.0).abs() < 1e-9);
    assert_eq!(cheap.priority, ScalePriority::Throughput);
    let components: Vec<&str> = cheap.bottlenecks.iter().map(|b| b.component.as_str()).collect();
    assert_eq!(components, vec!["embedding backend"]);

    let busy = project_scale(50.0, 5000, 10);
    assert_eq!(busy.scaled_daily_volume, 50_000);
    assert!((busy.scaled_daily_cost_usd - 2500.0).abs() < 1e-9);
    assert_eq!(busy.priority, ScalePriority::Cost);
    let components: Vec<&str> = busy.bottlenecks.iter().map(|b| b.component.as_str()).collect();
    assert_eq!(components, vec!["retrieval index", "generation backend", "embedding backend"]);
}

#[test]
fn hints_carry_savings_and_implementation() {
    let case = TestCase::new("Revenue?").with_keywords(["revenue"]);
    let records = vec![score(&case, Method::ZeroShot, ok_response(Method::ZeroShot, "revenue", &[], 100.0))];
    let summaries = aggregate(&records, &[Method::ZeroShot]);
    let rec = recommend(&summaries, &cost_drivers(&records));
    let strategies: Vec<&str> = rec.hints.iter().map(|h| h.strategy.as_str()).collect();
    assert_eq!(
        strategies,
        vec!["reduce_prompt_size", "cache_repeated_queries", "optimize_chunking", "batch_embeddings"]
    );
    for h in rec.hints.iter() {
        assert!(!h.potential_savings.is_empty(), "{}", h.strategy);
        assert!(!h.implementation.is_empty(), "{}", h.strategy);
    }
}
