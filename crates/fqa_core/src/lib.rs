pub mod config;
pub mod domain;
pub mod error;
pub mod evaluation;
pub mod fallback;
pub mod metrics;
pub mod pricing;
pub mod report;
pub mod scope;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("INDEX_CORRUPTED", "index unreadable")
            .with_details("path=index.json")
            .with_retryable(false);
        assert_eq!(err.code, "INDEX_CORRUPTED");
        assert_eq!(err.message, "index unreadable");
        assert!(!err.retryable);
        assert!(err.has_code("INDEX_CORRUPTED"));
        assert_eq!(err.to_string(), "[INDEX_CORRUPTED] index unreadable (path=index.json)");
    }

    #[test]
    fn at_path_records_file_and_cause() {
        let err = AppError::new("REPORT_WRITE_FAILED", "write failed")
            .at_path(std::path::Path::new("out/summary.md"), "disk full");
        assert_eq!(err.details.as_deref(), Some("path=out/summary.md; err=disk full"));
    }
}
