//! Maturation engine: the three-phase processing cycle.
//!
//! Phase 1 (detect) records newly discovered meetings as `pending`.
//! Phase 2 (mature) decides when a pending transcript is final, using
//! content stability plus the source's end-of-meeting counter, with a
//! max-wait timeout as the escape valve. Phase 3 (process) runs matured
//! transcripts through extraction and publishes each commitment.
//!
//! Every operation takes `now` explicitly; the daemon passes `Utc::now()`
//! and tests pass fabricated clocks.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::MaturationSection;
use crate::extract::Extract;
use crate::notify::Notifier;
use crate::source::TranscriptFeed;
use crate::store::models::{
    ExtractedAction, OperationKind, Transcript, TranscriptState, fingerprint,
};
use crate::store::{DbHandle, MaturationUpdate, NewTranscript};
use crate::tracker::{Publish, card_description};

pub struct MaturationEngine {
    db: DbHandle,
    feed: Arc<dyn TranscriptFeed>,
    extractor: Arc<dyn Extract>,
    publisher: Arc<dyn Publish>,
    notifier: Arc<Notifier>,
    policy: MaturationSection,
    retry_max_attempts: i64,
}

impl MaturationEngine {
    pub fn new(
        db: DbHandle,
        feed: Arc<dyn TranscriptFeed>,
        extractor: Arc<dyn Extract>,
        publisher: Arc<dyn Publish>,
        notifier: Arc<Notifier>,
        policy: MaturationSection,
        retry_max_attempts: i64,
    ) -> Self {
        Self {
            db,
            feed,
            extractor,
            publisher,
            notifier,
            policy,
            retry_max_attempts,
        }
    }

    /// One full cycle: detect, mature, process. Each phase contains its
    /// own failures so a bad phase never blocks the next cycle.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        if let Err(e) = self.detect_new(now).await {
            tracing::error!(error = %e, "error detecting new transcripts");
        }
        if let Err(e) = self.check_maturation(now).await {
            tracing::error!(error = %e, "error checking transcript maturation");
        }
        if let Err(e) = self.process_ready(now).await {
            tracing::error!(error = %e, "error processing ready transcripts");
        }
    }

    /// Phase 1: insert `pending` rows for meetings we have never seen.
    pub async fn detect_new(&self, now: DateTime<Utc>) -> Result<usize> {
        let known = self.db.call(|db| db.known_external_ids()).await?;

        let records = match self.feed.list_all().await {
            Ok(records) => records,
            Err(e) => {
                // Source unavailable: skip the phase, commit nothing.
                tracing::error!(error = %e, "failed to read transcript source");
                return Ok(0);
            }
        };

        let batch: Vec<NewTranscript> = records
            .into_iter()
            .filter(|r| !known.contains(&r.external_id))
            .map(|r| NewTranscript {
                external_id: r.external_id,
                title: r.title,
                text: r.text,
                recorded_at: r.recorded_at,
            })
            .collect();

        if batch.is_empty() {
            return Ok(0);
        }
        for rec in &batch {
            tracing::info!(title = %rec.title, "detected new transcript (pending)");
        }
        let inserted = self
            .db
            .call(move |db| db.insert_transcripts(&batch, now))
            .await?;
        Ok(inserted)
    }

    /// Phase 2: promote stable-and-ended pending transcripts to `ready`.
    /// All decisions are collected first and committed in one batch, so a
    /// failure mid-phase leaves every transcript where it was.
    pub async fn check_maturation(&self, now: DateTime<Utc>) -> Result<()> {
        let pending = self
            .db
            .call(|db| db.list_transcripts_in_state(TranscriptState::Pending))
            .await?;

        let mut updates = Vec::new();
        for transcript in &pending {
            // Manual uploads have no source to consult.
            let Some(external_id) = transcript.external_id.as_deref() else {
                continue;
            };

            let current = match self.feed.get_by_id(external_id).await {
                Ok(current) => current,
                Err(e) => {
                    tracing::warn!(%external_id, error = %e, "source unavailable, skipping transcript");
                    continue;
                }
            };

            if let Some(update) = self.maturation_decision(transcript, current.as_ref(), now) {
                updates.push(update);
            }
        }

        if !updates.is_empty() {
            self.db
                .call(move |db| db.apply_maturation_updates(&updates))
                .await?;
        }
        Ok(())
    }

    /// The per-transcript maturation policy. Returns the mutation to
    /// apply, or `None` to leave the transcript untouched this cycle.
    fn maturation_decision(
        &self,
        transcript: &Transcript,
        current: Option<&crate::source::SourceRecord>,
        now: DateTime<Utc>,
    ) -> Option<MaturationUpdate> {
        let Some(current) = current else {
            // Vanished from the source: nothing further will arrive, so
            // proceed with the text we captured.
            tracing::warn!(id = %transcript.id, "transcript no longer in source, marking ready");
            return Some(MaturationUpdate {
                id: transcript.id.clone(),
                state: Some(TranscriptState::Ready),
                ..Default::default()
            });
        };

        // Content changed: adopt it and restart the stability clock.
        let current_fp = fingerprint(&current.text);
        if transcript.fingerprint.as_deref() != Some(current_fp.as_str()) {
            tracing::debug!(title = %transcript.title, "transcript changed, resetting stability timer");
            return Some(MaturationUpdate {
                id: transcript.id.clone(),
                content: Some((current.text.clone(), current_fp)),
                stable_since: Some(now),
                state: None,
            });
        }

        let stable_secs = (now - transcript.stable_since).num_seconds();
        let length = transcript.text.chars().count();

        if stable_secs >= self.policy.stability_window_seconds
            && length >= self.policy.min_transcript_length
        {
            // Stable and long enough, but only final once the source has
            // seen the meeting end at least once. A held transcript still
            // falls through to the timeout check below.
            if current.ended_count > 0 {
                tracing::info!(title = %transcript.title, "transcript matured (ready)");
                return Some(MaturationUpdate {
                    id: transcript.id.clone(),
                    state: Some(TranscriptState::Ready),
                    ..Default::default()
                });
            }
            tracing::debug!(title = %transcript.title, "meeting still in progress, holding");
        }

        // Escape valve: stop waiting after max_wait even if the meeting
        // never reported an end, with one re-fetch attempt for transcripts
        // still under the length floor.
        let waited_minutes = (now - transcript.first_seen_at).num_seconds() as f64 / 60.0;
        if waited_minutes >= self.policy.max_wait_minutes as f64 {
            if length < self.policy.min_transcript_length {
                // Adopt the re-fetched text only when it is longer.
                let adopted = (current.text.chars().count() > length)
                    .then(|| (current.text.clone(), fingerprint(&current.text)));
                let new_len = adopted
                    .as_ref()
                    .map(|(text, _)| text.chars().count())
                    .unwrap_or(length);
                if new_len >= self.policy.min_transcript_length {
                    tracing::info!(title = %transcript.title, "transcript timed out (ready after re-fetch)");
                    return Some(MaturationUpdate {
                        id: transcript.id.clone(),
                        content: adopted,
                        stable_since: None,
                        state: Some(TranscriptState::Ready),
                    });
                }
                tracing::warn!(
                    title = %transcript.title,
                    length = new_len,
                    "transcript still too short after re-fetch, staying pending"
                );
                // Adopt the longer text anyway so the next timeout check
                // starts from it.
                return adopted.map(|content| MaturationUpdate {
                    id: transcript.id.clone(),
                    content: Some(content),
                    ..Default::default()
                });
            }
            tracing::info!(title = %transcript.title, waited_minutes, "transcript timed out (ready)");
            return Some(MaturationUpdate {
                id: transcript.id.clone(),
                state: Some(TranscriptState::Ready),
                ..Default::default()
            });
        }

        None
    }

    /// Phase 3: run every `ready` transcript through extraction and
    /// publishing. Items are processed sequentially and independently.
    pub async fn process_ready(&self, now: DateTime<Utc>) -> Result<()> {
        let ready = self
            .db
            .call(|db| db.list_transcripts_in_state(TranscriptState::Ready))
            .await?;

        for transcript in ready {
            if let Err(e) = self.process_transcript(&transcript, now).await {
                tracing::error!(id = %transcript.id, error = %e, "error processing transcript");
            }
        }
        Ok(())
    }

    async fn process_transcript(&self, transcript: &Transcript, now: DateTime<Utc>) -> Result<()> {
        tracing::info!(title = %transcript.title, "processing transcript");

        // Committed before extraction so a crash mid-flight is visible.
        let id = transcript.id.clone();
        self.db
            .call(move |db| db.set_transcript_state(&id, TranscriptState::Processing))
            .await?;

        let extracted = match self.extractor.extract(&transcript.title, &transcript.text).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "extraction failed");
                let id = transcript.id.clone();
                let message = e.to_string();
                self.db
                    .call(move |db| db.mark_transcript_failed(&id, &message))
                    .await?;
                self.notifier
                    .alert(
                        "LLM Extraction Failed",
                        &format!("Meeting: {}\nError: {}", transcript.title, e),
                        true,
                    )
                    .await;
                return Ok(());
            }
        };

        tracing::info!(count = extracted.len(), "extracted action items");

        for item in &extracted {
            if let Err(e) = self.publish_action(transcript, item, now).await {
                tracing::error!(title = %item.title, error = %e, "error handling action item");
            }
        }

        // Publish failures are handled per item through the retry queue;
        // the transcript itself is done.
        let id = transcript.id.clone();
        self.db
            .call(move |db| db.mark_transcript_processed(&id, now))
            .await?;
        tracing::info!(title = %transcript.title, "transcript processed");
        Ok(())
    }

    async fn publish_action(
        &self,
        transcript: &Transcript,
        item: &ExtractedAction,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let transcript_id = transcript.id.clone();
        let item_owned = item.clone();
        let action = self
            .db
            .call(move |db| db.create_action_item(&transcript_id, &item_owned, now))
            .await?;

        let description = card_description(&action, &transcript.title, transcript.recorded_at);

        match self.publisher.publish(&action.title, &description).await {
            Ok(card) => {
                let action_id = action.id.clone();
                self.db
                    .call(move |db| db.mark_action_sent(&action_id, &card.id, &card.url))
                    .await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to publish card, queueing retry");
                let action_id = action.id.clone();
                let message = e.to_string();
                let payload = json!({
                    "action_item_id": action.id,
                    "transcript_id": transcript.id,
                });
                let max_attempts = self.retry_max_attempts;
                self.db
                    .call(move |db| {
                        db.mark_action_failed(&action_id, &message)?;
                        db.enqueue_retry(OperationKind::PublishCard, &payload, max_attempts, now)
                    })
                    .await?;
            }
        }
        Ok(())
    }
}
