//! Durable retry scheduler with exponential backoff.
//!
//! Failed operations are persisted as [`RetryEntry`] rows and re-driven by
//! a fixed-interval polling loop, so pending work survives restarts. The
//! scheduler knows nothing about operations themselves: each
//! [`OperationKind`] maps to a registered [`RetryHandler`], and the
//! payload is opaque JSON only that handler interprets.
//!
//! Backoff is `base_delay * 2^(attempt_count - 1)`, deterministic, with
//! no jitter and no cap. Once `attempt_count` reaches `max_attempts` the
//! entry goes to `failed_permanent` and only an operator reset revives it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::RetrySection;
use crate::store::models::{OperationKind, RetryEntry, RetryStatus};
use crate::store::{DbHandle, RetryOutcome};

/// A retryable operation. `Ok(true)` means success; `Ok(false)` means a
/// clean failure worth retrying; `Err` means the attempt blew up, which
/// is treated the same as a clean failure.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn run(&self, payload: serde_json::Value) -> Result<bool>;
}

pub struct RetryScheduler {
    db: DbHandle,
    handlers: RwLock<HashMap<OperationKind, Arc<dyn RetryHandler>>>,
    base_delay_seconds: i64,
    poll_interval_seconds: u64,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RetryScheduler {
    pub fn new(db: DbHandle, config: &RetrySection) -> Self {
        Self {
            db,
            handlers: RwLock::new(HashMap::new()),
            base_delay_seconds: config.base_delay_seconds,
            poll_interval_seconds: config.poll_interval_seconds,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Register (or replace) the handler for an operation kind.
    pub async fn register_handler(&self, kind: OperationKind, handler: Arc<dyn RetryHandler>) {
        self.handlers.write().await.insert(kind, handler);
    }

    /// Start the polling loop. Idempotent: a second call while running
    /// does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let scheduler = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(scheduler.poll_interval_seconds));
            loop {
                interval.tick().await;
                if let Err(e) = scheduler.poll_once(Utc::now()).await {
                    tracing::error!(error = %e, "retry scheduler poll failed");
                }
            }
        }));
        tracing::info!("retry scheduler started");
    }

    /// Stop the polling loop. Idempotent.
    pub fn stop(&self) {
        let mut guard = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(task) = guard.take() {
            task.abort();
            tracing::info!("retry scheduler stopped");
        }
    }

    /// Run one poll cycle: dispatch every due entry, then commit all
    /// outcomes as a single batch.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<()> {
        let due = self.db.call(move |db| db.list_due_retry_entries(now)).await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::info!(count = due.len(), "processing due retry entries");

        let mut outcomes = Vec::new();
        for entry in due {
            if let Some(outcome) = self.process_entry(entry, now).await? {
                outcomes.push(outcome);
            }
        }

        if !outcomes.is_empty() {
            self.db
                .call(move |db| db.finish_retry_attempts(&outcomes))
                .await?;
        }
        Ok(())
    }

    /// Dispatch one entry. Returns `None` when no handler is registered
    /// for the kind, leaving the entry untouched for a later poll.
    async fn process_entry(
        &self,
        entry: RetryEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<RetryOutcome>> {
        let handler = self.handlers.read().await.get(&entry.kind).cloned();
        let Some(handler) = handler else {
            tracing::warn!(kind = %entry.kind, "no handler registered for operation kind");
            return Ok(None);
        };

        // The attempt is counted and committed before dispatch: a crash
        // mid-handler must not grant a free attempt.
        let id = entry.id.clone();
        let entry = self.db.call(move |db| db.begin_retry_attempt(&id)).await?;

        let result = handler.run(entry.payload.clone()).await;
        let outcome = match result {
            Ok(true) => {
                tracing::info!(id = %entry.id, "retry succeeded");
                RetryOutcome {
                    id: entry.id,
                    status: RetryStatus::Succeeded,
                    next_attempt_at: None,
                    error: None,
                }
            }
            Ok(false) => self.failure_outcome(&entry, "Handler returned false".to_string(), now),
            Err(e) => self.failure_outcome(&entry, e.to_string(), now),
        };
        Ok(Some(outcome))
    }

    fn failure_outcome(&self, entry: &RetryEntry, error: String, now: DateTime<Utc>) -> RetryOutcome {
        if entry.attempt_count >= entry.max_attempts {
            tracing::error!(
                id = %entry.id,
                attempts = entry.attempt_count,
                %error,
                "retry permanently failed"
            );
            return RetryOutcome {
                id: entry.id.clone(),
                status: RetryStatus::FailedPermanent,
                next_attempt_at: None,
                error: Some(error),
            };
        }

        let delay = backoff_delay(self.base_delay_seconds, entry.attempt_count);
        tracing::warn!(
            id = %entry.id,
            attempt = entry.attempt_count,
            delay_seconds = delay.num_seconds(),
            "retry failed, rescheduling"
        );
        RetryOutcome {
            id: entry.id.clone(),
            status: RetryStatus::Pending,
            next_attempt_at: Some(now + delay),
            error: Some(error),
        }
    }
}

/// Delay before the attempt after `attempt_count` failures:
/// `base * 2^(attempt_count - 1)`.
pub fn backoff_delay(base_seconds: i64, attempt_count: i64) -> Duration {
    let exponent = (attempt_count - 1).max(0).min(62) as u32;
    Duration::seconds(base_seconds.saturating_mul(1_i64 << exponent))
}

/// Retry handler that re-publishes a tracker card for a failed action
/// item. The payload carries the action item and transcript ids.
pub struct PublishCardHandler {
    db: DbHandle,
    publisher: Arc<dyn crate::tracker::Publish>,
}

impl PublishCardHandler {
    pub fn new(db: DbHandle, publisher: Arc<dyn crate::tracker::Publish>) -> Self {
        Self { db, publisher }
    }
}

#[async_trait]
impl RetryHandler for PublishCardHandler {
    async fn run(&self, payload: serde_json::Value) -> Result<bool> {
        let Some(action_id) = payload.get("action_item_id").and_then(|v| v.as_str()) else {
            tracing::error!("publish_card payload missing action_item_id");
            return Ok(false);
        };
        let Some(transcript_id) = payload.get("transcript_id").and_then(|v| v.as_str()) else {
            tracing::error!("publish_card payload missing transcript_id");
            return Ok(false);
        };

        let action_id = action_id.to_string();
        let transcript_id = transcript_id.to_string();
        let (action, transcript) = {
            let action_id = action_id.clone();
            let transcript_id = transcript_id.clone();
            self.db
                .call(move |db| {
                    Ok((
                        db.get_action_item(&action_id)?,
                        db.get_transcript(&transcript_id)?,
                    ))
                })
                .await?
        };
        let (Some(action), Some(transcript)) = (action, transcript) else {
            tracing::error!(%action_id, %transcript_id, "action item or transcript not found for retry");
            return Ok(false);
        };

        let description =
            crate::tracker::card_description(&action, &transcript.title, transcript.recorded_at);
        match self.publisher.publish(&action.title, &description).await {
            Ok(card) => {
                self.db
                    .call(move |db| db.mark_action_sent(&action.id, &card.id, &card.url))
                    .await?;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "retry publish failed");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::errors::TrackerError;
    use crate::store::BridgeDb;
    use crate::store::models::{ActionStatus, ExtractedAction, PublishedCard, TranscriptState};
    use crate::store::NewTranscript;
    use crate::tracker::Publish;

    fn scheduler(db: DbHandle) -> Arc<RetryScheduler> {
        Arc::new(RetryScheduler::new(
            db,
            &RetrySection {
                max_attempts: 5,
                base_delay_seconds: 30,
                poll_interval_seconds: 60,
            },
        ))
    }

    struct CountingHandler {
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl RetryHandler for CountingHandler {
        async fn run(&self, _: serde_json::Value) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.succeed)
        }
    }

    struct PanickyHandler;

    #[async_trait]
    impl RetryHandler for PanickyHandler {
        async fn run(&self, _: serde_json::Value) -> Result<bool> {
            anyhow::bail!("handler exploded")
        }
    }

    struct FakePublisher {
        fail: bool,
    }

    #[async_trait]
    impl Publish for FakePublisher {
        async fn publish(&self, _: &str, _: &str) -> Result<PublishedCard, TrackerError> {
            if self.fail {
                return Err(TrackerError::BadStatus {
                    status: 500,
                    body: "down".to_string(),
                });
            }
            Ok(PublishedCard {
                id: "c-2".to_string(),
                url: "https://cards/c-2".to_string(),
            })
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(30, 1).num_seconds(), 30);
        assert_eq!(backoff_delay(30, 2).num_seconds(), 60);
        assert_eq!(backoff_delay(30, 3).num_seconds(), 120);
        assert_eq!(backoff_delay(30, 4).num_seconds(), 240);
    }

    #[tokio::test]
    async fn test_success_marks_succeeded() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            succeed: true,
        });
        scheduler
            .register_handler(OperationKind::PublishCard, handler.clone())
            .await;

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 5, now))
            .await
            .unwrap();

        scheduler.poll_once(now).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let entry = db
            .call(move |db| db.get_retry_entry(&entry.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, RetryStatus::Succeeded);
        assert_eq!(entry.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_failure_reschedules_with_backoff() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        scheduler
            .register_handler(
                OperationKind::PublishCard,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    succeed: false,
                }),
            )
            .await;

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 5, now))
            .await
            .unwrap();
        let id = entry.id.clone();

        // Attempt 1: failure, next in 30s.
        scheduler.poll_once(now).await.unwrap();
        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::Pending);
        assert_eq!(e.attempt_count, 1);
        assert_eq!((e.next_attempt_at - now).num_seconds(), 30);

        // Not due yet 10 seconds later.
        scheduler.poll_once(now + Duration::seconds(10)).await.unwrap();
        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.attempt_count, 1);

        // Attempt 2 at +30s: failure, next gap is 60s.
        let t1 = now + Duration::seconds(30);
        scheduler.poll_once(t1).await.unwrap();
        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.attempt_count, 2);
        assert_eq!((e.next_attempt_at - t1).num_seconds(), 60);

        // Attempt 3: gap 120s.
        let t2 = t1 + Duration::seconds(60);
        scheduler.poll_once(t2).await.unwrap();
        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.attempt_count, 3);
        assert_eq!((e.next_attempt_at - t2).num_seconds(), 120);
    }

    #[tokio::test]
    async fn test_exhaustion_goes_failed_permanent() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        scheduler
            .register_handler(
                OperationKind::PublishCard,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    succeed: false,
                }),
            )
            .await;

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 2, now))
            .await
            .unwrap();
        let id = entry.id.clone();

        scheduler.poll_once(now).await.unwrap();
        let far = now + Duration::days(1);
        scheduler.poll_once(far).await.unwrap();

        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::FailedPermanent);
        assert_eq!(e.attempt_count, 2);
        assert!(e.error.is_some());

        // Terminal entries are never dispatched again.
        scheduler.poll_once(far + Duration::days(1)).await.unwrap();
        let e = db
            .call(move |db| db.get_retry_entry(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_handler_error_counts_as_failure() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        scheduler
            .register_handler(OperationKind::PublishCard, Arc::new(PanickyHandler))
            .await;

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 5, now))
            .await
            .unwrap();

        scheduler.poll_once(now).await.unwrap();
        let e = db
            .call(move |db| db.get_retry_entry(&entry.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::Pending);
        assert_eq!(e.error.as_deref(), Some("handler exploded"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_left_untouched() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        // No handler registered at all.

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 5, now))
            .await
            .unwrap();

        scheduler.poll_once(now).await.unwrap();
        let e = db
            .call(move |db| db.get_retry_entry(&entry.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::Pending);
        assert_eq!(e.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_reregistering_replaces_handler() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        let first = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            succeed: false,
        });
        let second = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            succeed: true,
        });
        scheduler
            .register_handler(OperationKind::PublishCard, first.clone())
            .await;
        scheduler
            .register_handler(OperationKind::PublishCard, second.clone())
            .await;

        let now = Utc::now();
        db.call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 5, now))
            .await
            .unwrap();
        scheduler.poll_once(now).await.unwrap();

        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operator_reset_grants_one_more_attempt() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db.clone());
        scheduler
            .register_handler(
                OperationKind::PublishCard,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    succeed: false,
                }),
            )
            .await;

        let now = Utc::now();
        let entry = db
            .call(move |db| db.enqueue_retry(OperationKind::PublishCard, &json!({}), 1, now))
            .await
            .unwrap();
        let id = entry.id.clone();

        scheduler.poll_once(now).await.unwrap();
        let e = db
            .call({
                let id = id.clone();
                move |db| db.get_retry_entry(&id)
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::FailedPermanent);

        // Reset re-arms it for exactly one attempt.
        let reset_at = now + Duration::hours(1);
        db.call({
            let id = id.clone();
            move |db| db.reset_retry_entry(&id, reset_at)
        })
        .await
        .unwrap();

        scheduler.poll_once(reset_at).await.unwrap();
        let e = db
            .call(move |db| db.get_retry_entry(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e.status, RetryStatus::FailedPermanent);
        assert_eq!(e.attempt_count, 1);
    }

    async fn seed_failed_action(db: &DbHandle) -> (String, String) {
        let now = Utc::now();
        db.call(move |db| {
            db.insert_transcripts(
                &[NewTranscript {
                    external_id: "g-1".to_string(),
                    title: "Weekly Sync".to_string(),
                    text: "long enough transcript text".to_string(),
                    recorded_at: None,
                }],
                now,
            )
        })
        .await
        .unwrap();
        let transcript = db
            .call(|db| db.list_transcripts_in_state(TranscriptState::Pending))
            .await
            .unwrap()
            .remove(0);
        let tid = transcript.id.clone();
        let action = db
            .call(move |db| {
                db.create_action_item(
                    &tid,
                    &ExtractedAction {
                        title: "Send report".to_string(),
                        description: String::new(),
                        assignee: None,
                        context: String::new(),
                    },
                    now,
                )
            })
            .await
            .unwrap();
        (action.id, transcript.id)
    }

    #[tokio::test]
    async fn test_publish_card_handler_success_path() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let (action_id, transcript_id) = seed_failed_action(&db).await;

        let handler = PublishCardHandler::new(db.clone(), Arc::new(FakePublisher { fail: false }));
        let ok = handler
            .run(json!({"action_item_id": action_id, "transcript_id": transcript_id}))
            .await
            .unwrap();
        assert!(ok);

        let action = db
            .call(move |db| db.get_action_item(&action_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(action.status, ActionStatus::Sent);
        assert_eq!(action.card_id.as_deref(), Some("c-2"));
    }

    #[tokio::test]
    async fn test_publish_card_handler_missing_reference_fails_cleanly() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let handler = PublishCardHandler::new(db, Arc::new(FakePublisher { fail: false }));
        let ok = handler
            .run(json!({"action_item_id": "ghost", "transcript_id": "ghost"}))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_publish_card_handler_tracker_failure_returns_false() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let (action_id, transcript_id) = seed_failed_action(&db).await;

        let handler = PublishCardHandler::new(db, Arc::new(FakePublisher { fail: true }));
        let ok = handler
            .run(json!({"action_item_id": action_id, "transcript_id": transcript_id}))
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let db = DbHandle::new(BridgeDb::new_in_memory().unwrap());
        let scheduler = scheduler(db);
        scheduler.start();
        scheduler.start();
        scheduler.stop();
        scheduler.stop();
    }
}
