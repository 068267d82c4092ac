//! Typed error hierarchy for the collaborator boundaries.
//!
//! Three top-level enums cover the three external systems:
//! - `SourceError` — transcript cache file access and parsing
//! - `LlmError` — extraction endpoint failures
//! - `TrackerError` — task-tracker API failures
//!
//! Internal plumbing uses `anyhow`; these enums exist where the caller
//! needs to branch on the failure kind (alerting, retry classification).

use thiserror::Error;

/// Errors from the transcript source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read cache file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed cache file: {0}")]
    Malformed(String),
}

/// Errors from the extraction LLM endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("LLM request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("LLM returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("LLM response missing expected content: {0}")]
    BadShape(String),
}

/// Errors from the task-tracker API.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Tracker rejected credentials (401)")]
    InvalidCredentials,

    #[error("Tracker list {list_id} not found (404)")]
    ListNotFound { list_id: String },

    #[error("Tracker request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Tracker returned status {status}: {body}")]
    BadStatus { status: u16, body: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_read_failed_carries_path() {
        let err = SourceError::ReadFailed {
            path: std::path::PathBuf::from("/tmp/cache-v3.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("cache-v3.json"));
    }

    #[test]
    fn llm_error_bad_status_is_matchable() {
        let err = LlmError::BadStatus {
            status: 500,
            body: "internal".to_string(),
        };
        match &err {
            LlmError::BadStatus { status, .. } => assert_eq!(*status, 500),
            _ => panic!("Expected BadStatus"),
        }
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn tracker_error_variants_are_distinct() {
        let auth = TrackerError::InvalidCredentials;
        let list = TrackerError::ListNotFound {
            list_id: "l-1".to_string(),
        };
        assert!(matches!(auth, TrackerError::InvalidCredentials));
        assert!(matches!(list, TrackerError::ListNotFound { .. }));
        assert!(list.to_string().contains("l-1"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&SourceError::Malformed("x".into()));
        assert_std_error(&LlmError::Timeout { seconds: 120 });
        assert_std_error(&TrackerError::InvalidCredentials);
    }
}
