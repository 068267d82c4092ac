//! Transcript source: the recorder's cache file.
//!
//! The cache file is double-encoded JSON: the outer object holds a `cache`
//! key whose value is itself a JSON *string*, which decodes to
//! `{"state": {"documents": {...}, "transcripts": {...}}}`. Documents are
//! keyed by id; transcripts map a document id to its list of segments.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::errors::SourceError;

/// One meeting as the source currently sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub external_id: String,
    pub title: String,
    pub text: String,
    pub recorded_at: Option<DateTime<Utc>>,
    /// How many times the recorder registered the meeting ending.
    /// Zero means the meeting is still live.
    pub ended_count: i64,
    pub participants: Vec<String>,
}

/// Read access to the transcript source.
#[async_trait]
pub trait TranscriptFeed: Send + Sync {
    /// Every meeting currently present in the source.
    async fn list_all(&self) -> Result<Vec<SourceRecord>, SourceError>;

    /// One meeting by its source-assigned id, if still present.
    async fn get_by_id(&self, external_id: &str) -> Result<Option<SourceRecord>, SourceError>;
}

/// [`TranscriptFeed`] over the recorder's cache file on disk.
pub struct CacheFileFeed {
    path: PathBuf,
}

impl CacheFileFeed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TranscriptFeed for CacheFileFeed {
    async fn list_all(&self) -> Result<Vec<SourceRecord>, SourceError> {
        if !self.path.exists() {
            tracing::warn!(path = %self.path.display(), "cache file not found");
            return Ok(Vec::new());
        }
        let content =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| SourceError::ReadFailed {
                    path: self.path.clone(),
                    source: e,
                })?;
        parse_cache(&content)
    }

    async fn get_by_id(&self, external_id: &str) -> Result<Option<SourceRecord>, SourceError> {
        let all = self.list_all().await?;
        Ok(all.into_iter().find(|r| r.external_id == external_id))
    }
}

/// Parse the full cache file content into source records.
pub fn parse_cache(content: &str) -> Result<Vec<SourceRecord>, SourceError> {
    let outer: Value = serde_json::from_str(content)
        .map_err(|e| SourceError::Malformed(format!("outer JSON: {}", e)))?;

    let state = extract_state(&outer)?;
    let documents = match state.get("documents").and_then(Value::as_object) {
        Some(docs) => docs,
        None => {
            tracing::warn!("cache state has no documents");
            return Ok(Vec::new());
        }
    };
    let transcripts = state.get("transcripts").cloned().unwrap_or(Value::Null);

    let mut records = Vec::new();
    for (doc_id, doc) in documents {
        if let Some(record) = parse_document(doc_id, doc, &transcripts) {
            records.push(record);
        }
    }
    tracing::debug!(count = records.len(), "parsed cache file");
    Ok(records)
}

/// Unwrap the double-encoded structure; tolerate an already-unwrapped file.
fn extract_state(outer: &Value) -> Result<Value, SourceError> {
    if let Some(cache_str) = outer.get("cache").and_then(Value::as_str) {
        let inner: Value = serde_json::from_str(cache_str)
            .map_err(|e| SourceError::Malformed(format!("inner cache JSON: {}", e)))?;
        return Ok(inner.get("state").cloned().unwrap_or(Value::Null));
    }
    if let Some(state) = outer.get("state") {
        return Ok(state.clone());
    }
    Err(SourceError::Malformed(
        "no cache or state key found".to_string(),
    ))
}

fn parse_document(doc_id: &str, doc: &Value, transcripts: &Value) -> Option<SourceRecord> {
    let external_id = doc
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(doc_id)
        .to_string();
    if external_id.is_empty() {
        return None;
    }

    let title = doc
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled Meeting")
        .to_string();

    let text = document_text(&external_id, doc, transcripts)?;
    if text.trim().len() < 20 {
        tracing::debug!(%external_id, "document has no usable transcript, skipping");
        return None;
    }

    Some(SourceRecord {
        external_id,
        title,
        text,
        recorded_at: doc.get("created_at").and_then(parse_flexible_date),
        ended_count: doc
            .get("meeting_end_count")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        participants: extract_participants(doc.get("people")),
    })
}

/// Transcript segments first, then notes, then summary.
fn document_text(external_id: &str, doc: &Value, transcripts: &Value) -> Option<String> {
    if let Some(segments) = transcripts.get(external_id).and_then(Value::as_array)
        && !segments.is_empty()
    {
        let joined = join_segments(segments);
        if !joined.is_empty() {
            return Some(joined);
        }
    }

    for key in ["notes_plain", "notes_markdown", "summary"] {
        if let Some(notes) = doc.get(key).and_then(Value::as_str)
            && !notes.trim().is_empty()
        {
            return Some(notes.to_string());
        }
    }

    None
}

fn join_segments(segments: &[Value]) -> String {
    let mut sorted: Vec<&Value> = segments.iter().collect();
    sorted.sort_by_key(|s| {
        s.get("start_timestamp")
            .and_then(Value::as_str)
            .unwrap_or("")
    });

    let mut texts = Vec::new();
    for segment in sorted {
        match segment {
            Value::String(s) => texts.push(s.clone()),
            Value::Object(_) => {
                let text = segment.get("text").and_then(Value::as_str).unwrap_or("");
                if text.is_empty() {
                    continue;
                }
                // System-audio segments are the remote side of the call.
                if segment.get("source").and_then(Value::as_str) == Some("system_audio") {
                    texts.push(format!("[Remote] {}", text));
                } else {
                    texts.push(text.to_string());
                }
            }
            _ => {}
        }
    }
    texts.join(" ")
}

/// Dates in the cache show up as epoch numbers or assorted ISO strings.
fn parse_flexible_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs as i64, 0)
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in [
                "%Y-%m-%dT%H:%M:%S%.fZ",
                "%Y-%m-%dT%H:%M:%SZ",
                "%Y-%m-%dT%H:%M:%S",
                "%Y-%m-%d %H:%M:%S",
            ] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(naive.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
            }
            None
        }
        _ => None,
    }
}

fn extract_participants(people: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(people)) = people else {
        return Vec::new();
    };

    let mut names = Vec::new();
    for person in people {
        match person {
            Value::String(s) => names.push(s.clone()),
            Value::Object(_) => {
                let name = person
                    .get("name")
                    .and_then(Value::as_str)
                    .or_else(|| person.get("displayName").and_then(Value::as_str))
                    .map(str::to_string)
                    .or_else(|| {
                        person
                            .get("email")
                            .and_then(Value::as_str)
                            .and_then(|e| e.split('@').next())
                            .map(str::to_string)
                    });
                if let Some(name) = name
                    && !name.is_empty()
                {
                    names.push(name);
                }
            }
            _ => {}
        }
    }
    names
}
