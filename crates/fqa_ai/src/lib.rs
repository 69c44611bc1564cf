pub mod citations;
pub mod embeddings;
pub mod harness;
pub mod index;
pub mod instrument;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod retrieve;
pub mod strategy;

#[cfg(test)]
mod tests {
    use super::citations::extract_cited_chunk_ids;
    use super::ollama::OllamaClient;

    #[test]
    fn enforces_localhost_only_base_url() {
        assert!(OllamaClient::new("http://127.0.0.1:11434").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1").is_ok());

        assert!(OllamaClient::new("http://localhost:11434").is_err());
        assert!(OllamaClient::new("http://0.0.0.0:11434").is_err());
        assert!(OllamaClient::new("http://[::1]:11434").is_err());
        assert!(OllamaClient::new("https://example.com").is_err());

        // Prefix tricks.
        assert!(OllamaClient::new("http://127.0.0.1.evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1@evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:0").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:99999").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:11434/").is_ok()); // trailing slash is trimmed
        assert!(OllamaClient::new("http://127.0.0.1:11434/api").is_err());
    }

    #[test]
    fn marker_parser_skips_broken_markers() {
        let ids = extract_cited_chunk_ids(
            "a [[chunk:doc1#12]] b [[chunk:]] c [[chunk:doc2#0] d [[chunk: doc3#1 ]] [[chunk:doc1#12]]",
        );
        let got: Vec<&str> = ids.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["doc1#12", "doc3#1"]);
    }

    #[test]
    fn marker_parser_keeps_bracketed_ids() {
        use super::citations::marker;

        let text = format!(
            "Revenue rose {} and {}.\nBroken [[chunk:q4] here\n{}",
            marker("q3_report[final]#0"),
            marker("notes[2]#1"),
            marker("plain#4")
        );
        let ids = extract_cited_chunk_ids(&text);
        let got: Vec<&str> = ids.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["notes[2]#1", "plain#4", "q3_report[final]#0"]);
    }
}
