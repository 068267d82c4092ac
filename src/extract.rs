//! Commitment extraction from transcript text.
//!
//! Long transcripts are split into overlapping chunks at sentence
//! boundaries, each chunk goes through the LLM separately, and the
//! combined results are deduplicated by title word overlap. LLM output is
//! parsed tolerantly: local models wrap the JSON array in prose or code
//! fences more often than not.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::errors::LlmError;
use crate::llm::LlmClient;
use crate::store::models::ExtractedAction;

const CHUNK_SIZE: usize = 5000;
const CHUNK_OVERLAP: usize = 500;
/// How far back from a chunk end to look for a sentence boundary.
const BOUNDARY_SEARCH: usize = 200;
const MAX_TITLE_LEN: usize = 500;

/// Extraction seam used by the maturation engine.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, title: &str, text: &str) -> Result<Vec<ExtractedAction>, LlmError>;
}

pub struct CommitmentExtractor {
    llm: LlmClient,
}

impl CommitmentExtractor {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    async fn extract_from_chunk(
        &self,
        meeting_title: &str,
        text: &str,
        chunk_num: usize,
        total_chunks: usize,
    ) -> Result<Vec<ExtractedAction>, LlmError> {
        let chunk_note = if total_chunks > 1 {
            format!(" (Part {} of {})", chunk_num, total_chunks)
        } else {
            String::new()
        };

        let prompt = format!(
            r#"You are a helpful assistant. Analyze this meeting transcript and extract action items.

Meeting: {meeting_title}{chunk_note}

TRANSCRIPT:
{text}

Return ONLY a JSON array of action items. Each item should have these fields:
- title: brief task description (required)
- description: details about what needs to be done
- assignee: person responsible (or null if unknown)
- context: relevant quote from the transcript

Only include clear actionable tasks and commitments. Return [] if no action items.

Example format: [{{"title": "Send report", "assignee": "John", "description": "Send weekly report", "context": "John said he would send the report"}}]

JSON array of action items:"#
        );

        let response = self.llm.complete(&prompt, Some(0.1)).await?;
        Ok(parse_response(&response))
    }
}

#[async_trait]
impl Extract for CommitmentExtractor {
    async fn extract(&self, title: &str, text: &str) -> Result<Vec<ExtractedAction>, LlmError> {
        if text.len() <= CHUNK_SIZE {
            return self.extract_from_chunk(title, text, 1, 1).await;
        }

        tracing::info!(chars = text.len(), "long transcript, processing in chunks");
        let chunks = split_into_chunks(text, CHUNK_SIZE, CHUNK_OVERLAP);
        let total = chunks.len();

        let mut all_items = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match self.extract_from_chunk(title, chunk, i + 1, total).await {
                Ok(items) => all_items.extend(items),
                // A failed chunk loses its items but not the whole meeting.
                Err(e) => tracing::warn!(chunk = i + 1, total, error = %e, "chunk extraction failed"),
            }
        }

        let unique = deduplicate(all_items);
        tracing::info!(count = unique.len(), chunks = total, "extracted unique action items");
        Ok(unique)
    }
}

/// Split at sentence boundaries where possible, with overlap between
/// consecutive chunks so a commitment spanning a cut is seen whole at
/// least once.
pub fn split_into_chunks(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = start + chunk_size;
        if end >= text.len() {
            chunks.push(text[start..].to_string());
            break;
        }

        end = floor_char_boundary(text, end);
        let search_start = floor_char_boundary(text, end.saturating_sub(BOUNDARY_SEARCH).max(start));
        let window = &text[search_start..end];
        let last_period = window.rfind(". ").map(|i| search_start + i);
        let last_newline = window.rfind('\n').map(|i| search_start + i);
        if let Some(break_point) = last_period.max(last_newline)
            && break_point > search_start
        {
            end = break_point + 1;
        }

        chunks.push(text[start..end].to_string());
        start = floor_char_boundary(text, end.saturating_sub(overlap));
    }

    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

const STOPWORDS: [&str; 8] = ["the", "a", "an", "to", "for", "with", "and", "or"];

fn title_key(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Drop items whose title shares at least 70% of its significant words
/// with an earlier item.
pub fn deduplicate(items: Vec<ExtractedAction>) -> Vec<ExtractedAction> {
    let mut unique = Vec::new();
    let mut seen_keys: Vec<HashSet<String>> = Vec::new();

    for item in items {
        let key = title_key(&item.title);
        let is_duplicate = seen_keys.iter().any(|seen| {
            let threshold = (key.len().min(seen.len()) as f64) * 0.7;
            key.intersection(seen).count() as f64 >= threshold && !key.is_empty() && !seen.is_empty()
        });
        if !is_duplicate {
            seen_keys.push(key);
            unique.push(item);
        }
    }
    unique
}

/// Parse an LLM response into action items. Unusable responses yield an
/// empty list rather than an error; the model simply found nothing we can
/// use.
pub fn parse_response(response: &str) -> Vec<ExtractedAction> {
    let json_str = extract_json(response);

    let data: Value = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse LLM response as JSON");
            return Vec::new();
        }
    };

    let Value::Array(entries) = data else {
        tracing::error!("LLM response is not a JSON array");
        return Vec::new();
    };

    let mut items = Vec::new();
    for entry in entries {
        let Value::Object(_) = entry else { continue };
        let title = entry
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if title.is_empty() {
            continue;
        }

        items.push(ExtractedAction {
            title: truncate_chars(title, MAX_TITLE_LEN),
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string(),
            assignee: entry
                .get("assignee")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            context: entry
                .get("context")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string(),
        });
    }
    items
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Pull a JSON array out of text that may wrap it in prose or fences.
fn extract_json(text: &str) -> String {
    let text = text.trim();
    if text.starts_with('[') && text.ends_with(']') {
        return text.to_string();
    }

    // Fenced code block, with or without a language tag.
    if let Some(caps) = FENCED_ARRAY.captures(text) {
        return caps[1].to_string();
    }

    // Any embedded array.
    if let Some(m) = EMBEDDED_ARRAY.find(text) {
        return m.as_str().to_string();
    }

    text.to_string()
}

static FENCED_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").unwrap());

static EMBEDDED_ARRAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
