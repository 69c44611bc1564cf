use std::fs;
use std::sync::Arc;

use fqa_ai::embeddings::Embedder;
use fqa_ai::index::chunking::normalize_text;
use fqa_ai::index::{build_from_dir, IndexSnapshot};
use fqa_ai::retrieve::{RetrievalError, Retriever, SearchIndex};
use fqa_core::error::AppError;
use pretty_assertions::assert_eq;

struct CountABEmbedder;

impl Embedder for CountABEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let mut a = 0u32;
        let mut b = 0u32;
        for ch in input.chars() {
            if ch == 'a' {
                a += 1;
            } else if ch == 'b' {
                b += 1;
            }
        }
        Ok(vec![a as f32, b as f32])
    }
}

fn ab_snapshot() -> (tempfile::TempDir, IndexSnapshot) {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("beta.txt"), "b".repeat(400)).expect("write");
    fs::write(dir.path().join("alpha.md"), "a".repeat(400)).expect("write");
    fs::write(dir.path().join("ignored.pdf"), "aaaa").expect("write");
    let snap = build_from_dir(dir.path(), &CountABEmbedder, "mock").expect("build");
    (dir, snap)
}

#[test]
fn retrieval_returns_stable_topk_and_tie_breaks_by_chunk_id() {
    let (_dir, snap) = ab_snapshot();
    let retriever = Retriever::new(Arc::new(CountABEmbedder), Arc::new(snap));

    // Query biased toward 'a' should rank the 'a' chunk first.
    let res = retriever.retrieve("aaaa", 2).expect("retrieve");
    assert_eq!(res.chunk_ids(), vec!["alpha#0".to_string(), "beta#0".to_string()]);
    assert!(res.hits[0].score > res.hits[1].score);

    // Equal scores fall back to chunk id ascending.
    let tie = retriever.retrieve("ab", 2).expect("retrieve");
    assert_eq!(tie.hits[0].score, tie.hits[1].score);
    assert_eq!(tie.chunk_ids(), vec!["alpha#0".to_string(), "beta#0".to_string()]);

    let one = retriever.retrieve("bbb", 1).expect("retrieve");
    assert_eq!(one.chunk_ids(), vec!["beta#0".to_string()]);
}

#[test]
fn zero_query_vector_has_no_matches() {
    let (_dir, snap) = ab_snapshot();
    let retriever = Retriever::new(Arc::new(CountABEmbedder), Arc::new(snap));
    assert_eq!(retriever.retrieve("xyz", 3).expect_err("none"), RetrievalError::NoMatches);
}

#[test]
fn query_dims_mismatch_is_an_embedding_error() {
    struct Wide;
    impl Embedder for Wide {
        fn embed(&self, _model: &str, _input: &str) -> Result<Vec<f32>, AppError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }
    let (_dir, snap) = ab_snapshot();
    let retriever = Retriever::new(Arc::new(Wide), Arc::new(snap));
    match retriever.retrieve("a", 2) {
        Err(RetrievalError::Embedding(e)) => assert_eq!(e.code, "AI_EMBEDDINGS_FAILED"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn build_uses_file_stems_and_exact_offsets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let raw = "Revenue was $4.2M.\r\n\r\nAssets were $65M.";
    fs::write(dir.path().join("q3_report.txt"), raw).expect("write");

    let snap = build_from_dir(dir.path(), &CountABEmbedder, "mock").expect("build");
    assert_eq!(snap.embedding_model, "mock");
    assert_eq!(snap.dims, 2);
    assert_eq!(snap.len(), 1);

    let text = normalize_text(raw);
    for c in snap.chunks.iter() {
        assert!(c.id.starts_with("q3_report#"));
        assert_eq!(c.source_document, "q3_report.txt");
        let r = c.offset_range;
        assert_eq!(&text[r.start as usize..r.end as usize], c.text);
    }
    assert!(snap.chunk("q3_report#0").is_some());
    assert!(snap.chunk("q3_report#9").is_none());
}

#[test]
fn build_rejects_an_empty_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = build_from_dir(dir.path(), &CountABEmbedder, "mock").expect_err("empty");
    assert_eq!(err.code, "INDEX_BUILD_FAILED");
}

#[test]
fn snapshot_save_load_keeps_fingerprint() {
    let (dir, snap) = ab_snapshot();
    let path = dir.path().join("index").join("findocqa_index.json");
    snap.save(&path).expect("save");

    let loaded = IndexSnapshot::load(&path).expect("load");
    assert_eq!(loaded, snap);
    assert_eq!(
        loaded.fingerprint().expect("fingerprint"),
        snap.fingerprint().expect("fingerprint")
    );
    assert_eq!(loaded.fingerprint().expect("fingerprint").len(), 64);
}

#[test]
fn load_reports_missing_and_corrupted_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = IndexSnapshot::load(&dir.path().join("nope.json")).expect_err("missing");
    assert_eq!(missing.code, "INDEX_NOT_FOUND");

    let garbage = dir.path().join("garbage.json");
    fs::write(&garbage, b"{not json").expect("write");
    assert_eq!(IndexSnapshot::load(&garbage).expect_err("garbage").code, "INDEX_CORRUPTED");

    let (_d, mut snap) = ab_snapshot();
    snap.chunks.reverse();
    let unsorted = dir.path().join("unsorted.json");
    fs::write(&unsorted, serde_json::to_vec(&snap).expect("encode")).expect("write");
    assert_eq!(IndexSnapshot::load(&unsorted).expect_err("unsorted").code, "INDEX_CORRUPTED");
}
