use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of transcript text. Used only to detect content
/// changes between polling cycles, not as a security control.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Where a transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptOrigin {
    Cache,
    Manual,
}

impl TranscriptOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for TranscriptOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid transcript origin: {}", s)),
        }
    }
}

/// Lifecycle state of a transcript under management.
///
/// Progression is `Pending → Ready → Processing → Processed`, with
/// `Failed` reachable from `Processing` when extraction itself fails.
/// Publish failures do not fail the transcript; they go through the
/// retry queue instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptState {
    /// Newly detected; being watched for content stability.
    Pending,
    /// Stable long enough (or timed out) and eligible for extraction.
    Ready,
    /// Extraction + publish pipeline in flight. Never re-entered
    /// concurrently for the same transcript.
    Processing,
    /// Terminal success.
    Processed,
    /// Terminal failure of the extraction call.
    Failed,
}

impl TranscriptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states are immutable except through operator reprocessing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl std::fmt::Display for TranscriptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transcript state: {}", s)),
        }
    }
}

/// A meeting transcript under lifecycle management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    /// Source-assigned id; unique when present, absent for manual uploads.
    pub external_id: Option<String>,
    pub title: String,
    pub text: String,
    /// SHA-256 of `text`, for cheap change detection across cycles.
    pub fingerprint: Option<String>,
    pub origin: TranscriptOrigin,
    pub recorded_at: Option<DateTime<Utc>>,
    pub state: TranscriptState,
    pub error: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// Reset to "now" every time the fingerprint changes.
    pub stable_since: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Delivery status of an extracted action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid action status: {}", s)),
        }
    }
}

/// A commitment extracted from a transcript, each independently published
/// to the task tracker and independently retryable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub transcript_id: String,
    pub title: String,
    pub description: String,
    pub context: String,
    pub assignee: Option<String>,
    pub card_id: Option<String>,
    pub card_url: Option<String>,
    pub status: ActionStatus,
    pub retry_count: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Tag selecting which registered handler processes a retry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    PublishCard,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublishCard => "publish_card",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publish_card" => Ok(Self::PublishCard),
            _ => Err(format!("Invalid operation kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    InProgress,
    Succeeded,
    FailedPermanent,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::FailedPermanent => "failed_permanent",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }
}

impl std::fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed_permanent" => Ok(Self::FailedPermanent),
            _ => Err(format!("Invalid retry status: {}", s)),
        }
    }
}

/// A persisted deferred operation awaiting retry with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryEntry {
    pub id: String,
    pub kind: OperationKind,
    /// Opaque to the scheduler; only the matching handler interprets it.
    pub payload: serde_json::Value,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub status: RetryStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A commitment as returned by the extraction service, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAction {
    pub title: String,
    pub description: String,
    pub assignee: Option<String>,
    pub context: String,
}

/// Remote identifiers returned by a successful card publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedCard {
    pub id: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_changes_with_content() {
        let a = fingerprint("hello world");
        let b = fingerprint("hello world");
        let c = fingerprint("hello world!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_transcript_state_roundtrip() {
        for s in &["pending", "ready", "processing", "processed", "failed"] {
            let parsed: TranscriptState = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<TranscriptState>().is_err());
    }

    #[test]
    fn test_transcript_state_terminality() {
        assert!(TranscriptState::Processed.is_terminal());
        assert!(TranscriptState::Failed.is_terminal());
        assert!(!TranscriptState::Pending.is_terminal());
        assert!(!TranscriptState::Ready.is_terminal());
        assert!(!TranscriptState::Processing.is_terminal());
    }

    #[test]
    fn test_retry_status_roundtrip() {
        for s in &["pending", "in_progress", "succeeded", "failed_permanent"] {
            let parsed: RetryStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<RetryStatus>().is_err());
    }

    #[test]
    fn test_action_status_roundtrip() {
        for s in &["pending", "sent", "failed", "skipped"] {
            let parsed: ActionStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&RetryStatus::FailedPermanent).unwrap(),
            "\"failed_permanent\""
        );
        assert_eq!(
            serde_json::to_string(&TranscriptState::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::to_string(&OperationKind::PublishCard).unwrap(),
            "\"publish_card\""
        );
    }
}
