//! Transactional record store for transcripts, action items, and retry
//! entries.
//!
//! All SQLite access goes through [`DbHandle`], which runs closures on
//! tokio's blocking thread pool so synchronous I/O never ties up async
//! worker threads. The store is constructed once at startup and passed
//! into the maturation engine and the retry scheduler explicitly.

pub mod models;

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use models::*;

/// Async-safe handle to the bridge database.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BridgeDb>>,
}

impl DbHandle {
    pub fn new(db: BridgeDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BridgeDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// A transcript about to be inserted by the detection phase.
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub external_id: String,
    pub title: String,
    pub text: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// One transcript's outcome of a maturation check, applied atomically with
/// the rest of the phase.
#[derive(Debug, Clone, Default)]
pub struct MaturationUpdate {
    pub id: String,
    /// New text plus its fingerprint, when the source content changed.
    pub content: Option<(String, String)>,
    /// Restart of the stability clock, set together with `content`.
    pub stable_since: Option<DateTime<Utc>>,
    pub state: Option<TranscriptState>,
}

/// Final status of one retry entry after a poll cycle, committed as part
/// of the end-of-poll batch.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub id: String,
    pub status: RetryStatus,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct BridgeDb {
    conn: Connection,
}

impl BridgeDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS transcripts (
                    id TEXT PRIMARY KEY,
                    external_id TEXT,
                    title TEXT NOT NULL,
                    text TEXT NOT NULL,
                    fingerprint TEXT,
                    origin TEXT NOT NULL DEFAULT 'cache',
                    recorded_at TEXT,
                    state TEXT NOT NULL DEFAULT 'pending',
                    error TEXT,
                    first_seen_at TEXT NOT NULL,
                    stable_since TEXT NOT NULL,
                    processed_at TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS action_items (
                    id TEXT PRIMARY KEY,
                    transcript_id TEXT NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    context TEXT NOT NULL DEFAULT '',
                    assignee TEXT,
                    card_id TEXT,
                    card_url TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS retry_entries (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    attempt_count INTEGER NOT NULL DEFAULT 0,
                    max_attempts INTEGER NOT NULL DEFAULT 5,
                    next_attempt_at TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    error TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_transcripts_external_id
                    ON transcripts(external_id) WHERE external_id IS NOT NULL;
                CREATE INDEX IF NOT EXISTS idx_transcripts_state ON transcripts(state);
                CREATE INDEX IF NOT EXISTS idx_action_items_transcript
                    ON action_items(transcript_id);
                CREATE INDEX IF NOT EXISTS idx_retry_entries_due
                    ON retry_entries(status, next_attempt_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Transcripts ───────────────────────────────────────────────────

    /// External ids of every transcript already known to the store.
    pub fn known_external_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT external_id FROM transcripts WHERE external_id IS NOT NULL")
            .context("Failed to prepare known_external_ids")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query known external ids")?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row.context("Failed to read external id row")?);
        }
        Ok(ids)
    }

    /// Insert a detection batch as one transaction. A record whose external
    /// id collides with an existing transcript is skipped with a warning;
    /// the rest of the batch proceeds. Returns the number of rows inserted.
    pub fn insert_transcripts(&self, batch: &[NewTranscript], now: DateTime<Utc>) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin detection transaction")?;
        let mut inserted = 0;
        for rec in batch {
            let result = tx.execute(
                "INSERT INTO transcripts
                 (id, external_id, title, text, fingerprint, origin, recorded_at,
                  state, first_seen_at, stable_since, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    Uuid::new_v4().to_string(),
                    rec.external_id,
                    rec.title,
                    rec.text,
                    fingerprint(&rec.text),
                    TranscriptOrigin::Cache.as_str(),
                    rec.recorded_at.map(|d| d.to_rfc3339()),
                    TranscriptState::Pending.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            );
            match result {
                Ok(_) => inserted += 1,
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    tracing::warn!(external_id = %rec.external_id, "duplicate external id, skipping");
                }
                Err(e) => return Err(e).context("Failed to insert transcript"),
            }
        }
        tx.commit().context("Failed to commit detection batch")?;
        Ok(inserted)
    }

    /// Insert a transcript supplied directly by the operator (no source
    /// id, no maturation; it is processed right away).
    pub fn insert_manual_transcript(
        &self,
        title: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Transcript> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO transcripts
                 (id, external_id, title, text, fingerprint, origin, state,
                  first_seen_at, stable_since, created_at)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    title,
                    text,
                    fingerprint(text),
                    TranscriptOrigin::Manual.as_str(),
                    TranscriptState::Processing.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert manual transcript")?;
        self.get_transcript(&id)?
            .context("Transcript not found after insert")
    }

    pub fn get_transcript(&self, id: &str) -> Result<Option<Transcript>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM transcripts WHERE id = ?1",
                TRANSCRIPT_COLUMNS
            ))
            .context("Failed to prepare get_transcript")?;
        let mut rows = stmt
            .query_map(params![id], map_transcript_row)
            .context("Failed to query transcript")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read transcript row")?.into_transcript()?)),
            None => Ok(None),
        }
    }

    pub fn list_transcripts_in_state(&self, state: TranscriptState) -> Result<Vec<Transcript>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM transcripts WHERE state = ?1 ORDER BY first_seen_at",
                TRANSCRIPT_COLUMNS
            ))
            .context("Failed to prepare list_transcripts_in_state")?;
        let rows = stmt
            .query_map(params![state.as_str()], map_transcript_row)
            .context("Failed to query transcripts")?;
        let mut transcripts = Vec::new();
        for row in rows {
            transcripts.push(row.context("Failed to read transcript row")?.into_transcript()?);
        }
        Ok(transcripts)
    }

    pub fn set_transcript_state(&self, id: &str, state: TranscriptState) -> Result<()> {
        self.conn
            .execute(
                "UPDATE transcripts SET state = ?1 WHERE id = ?2",
                params![state.as_str(), id],
            )
            .context("Failed to update transcript state")?;
        Ok(())
    }

    pub fn mark_transcript_failed(&self, id: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE transcripts SET state = ?1, error = ?2 WHERE id = ?3",
                params![TranscriptState::Failed.as_str(), error, id],
            )
            .context("Failed to mark transcript failed")?;
        Ok(())
    }

    pub fn mark_transcript_processed(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE transcripts SET state = ?1, processed_at = ?2 WHERE id = ?3",
                params![TranscriptState::Processed.as_str(), now.to_rfc3339(), id],
            )
            .context("Failed to mark transcript processed")?;
        Ok(())
    }

    /// Apply all maturation-phase mutations in one transaction, so a
    /// mid-phase error leaves every transcript at its pre-phase state.
    pub fn apply_maturation_updates(&self, updates: &[MaturationUpdate]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin maturation transaction")?;
        for u in updates {
            if let Some((text, fp)) = &u.content {
                tx.execute(
                    "UPDATE transcripts SET text = ?1, fingerprint = ?2 WHERE id = ?3",
                    params![text, fp, u.id],
                )
                .context("Failed to update transcript content")?;
            }
            if let Some(since) = u.stable_since {
                tx.execute(
                    "UPDATE transcripts SET stable_since = ?1 WHERE id = ?2",
                    params![since.to_rfc3339(), u.id],
                )
                .context("Failed to update stable_since")?;
            }
            if let Some(state) = u.state {
                tx.execute(
                    "UPDATE transcripts SET state = ?1 WHERE id = ?2",
                    params![state.as_str(), u.id],
                )
                .context("Failed to update transcript state")?;
            }
        }
        tx.commit().context("Failed to commit maturation batch")?;
        Ok(())
    }

    /// Operator action: push a terminal transcript back to `ready` for
    /// another extraction pass.
    pub fn reprocess_transcript(&self, id: &str) -> Result<Transcript> {
        self.conn
            .execute(
                "UPDATE transcripts SET state = ?1, error = NULL, processed_at = NULL
                 WHERE id = ?2",
                params![TranscriptState::Ready.as_str(), id],
            )
            .context("Failed to reset transcript for reprocessing")?;
        self.get_transcript(id)?
            .context("Transcript not found after reprocess reset")
    }

    // ── Action items ──────────────────────────────────────────────────

    pub fn create_action_item(
        &self,
        transcript_id: &str,
        action: &ExtractedAction,
        now: DateTime<Utc>,
    ) -> Result<ActionItem> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO action_items
                 (id, transcript_id, title, description, context, assignee, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    transcript_id,
                    action.title,
                    action.description,
                    action.context,
                    action.assignee,
                    ActionStatus::Pending.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert action item")?;
        self.get_action_item(&id)?
            .context("Action item not found after insert")
    }

    pub fn get_action_item(&self, id: &str) -> Result<Option<ActionItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM action_items WHERE id = ?1",
                ACTION_COLUMNS
            ))
            .context("Failed to prepare get_action_item")?;
        let mut rows = stmt
            .query_map(params![id], map_action_row)
            .context("Failed to query action item")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read action row")?.into_action()?)),
            None => Ok(None),
        }
    }

    pub fn list_action_items(&self, transcript_id: &str) -> Result<Vec<ActionItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM action_items WHERE transcript_id = ?1 ORDER BY created_at",
                ACTION_COLUMNS
            ))
            .context("Failed to prepare list_action_items")?;
        let rows = stmt
            .query_map(params![transcript_id], map_action_row)
            .context("Failed to query action items")?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row.context("Failed to read action row")?.into_action()?);
        }
        Ok(items)
    }

    pub fn mark_action_sent(&self, id: &str, card_id: &str, card_url: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE action_items
                 SET status = ?1, card_id = ?2, card_url = ?3, error = NULL
                 WHERE id = ?4",
                params![ActionStatus::Sent.as_str(), card_id, card_url, id],
            )
            .context("Failed to mark action item sent")?;
        Ok(())
    }

    pub fn mark_action_failed(&self, id: &str, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE action_items
                 SET status = ?1, error = ?2, retry_count = retry_count + 1
                 WHERE id = ?3",
                params![ActionStatus::Failed.as_str(), error, id],
            )
            .context("Failed to mark action item failed")?;
        Ok(())
    }

    // ── Retry entries ─────────────────────────────────────────────────

    /// Persist a deferred operation, eligible for dispatch immediately.
    pub fn enqueue_retry(
        &self,
        kind: OperationKind,
        payload: &serde_json::Value,
        max_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<RetryEntry> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO retry_entries
                 (id, kind, payload, attempt_count, max_attempts, next_attempt_at, status, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    kind.as_str(),
                    serde_json::to_string(payload).context("Failed to serialize retry payload")?,
                    max_attempts,
                    now.to_rfc3339(),
                    RetryStatus::Pending.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert retry entry")?;
        self.get_retry_entry(&id)?
            .context("Retry entry not found after insert")
    }

    pub fn get_retry_entry(&self, id: &str) -> Result<Option<RetryEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM retry_entries WHERE id = ?1",
                RETRY_COLUMNS
            ))
            .context("Failed to prepare get_retry_entry")?;
        let mut rows = stmt
            .query_map(params![id], map_retry_row)
            .context("Failed to query retry entry")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read retry row")?.into_entry()?)),
            None => Ok(None),
        }
    }

    /// Entries eligible for dispatch: pending with a due next-attempt time.
    pub fn list_due_retry_entries(&self, now: DateTime<Utc>) -> Result<Vec<RetryEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM retry_entries
                 WHERE status = ?1 AND next_attempt_at <= ?2
                 ORDER BY next_attempt_at",
                RETRY_COLUMNS
            ))
            .context("Failed to prepare list_due_retry_entries")?;
        let rows = stmt
            .query_map(
                params![RetryStatus::Pending.as_str(), now.to_rfc3339()],
                map_retry_row,
            )
            .context("Failed to query due retry entries")?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.context("Failed to read retry row")?.into_entry()?);
        }
        Ok(entries)
    }

    /// Mark an entry in-progress and count the attempt, committed before
    /// the handler runs so a crash mid-dispatch leaves it visibly stuck
    /// rather than silently lost.
    pub fn begin_retry_attempt(&self, id: &str) -> Result<RetryEntry> {
        self.conn
            .execute(
                "UPDATE retry_entries
                 SET status = ?1, attempt_count = attempt_count + 1
                 WHERE id = ?2",
                params![RetryStatus::InProgress.as_str(), id],
            )
            .context("Failed to begin retry attempt")?;
        self.get_retry_entry(id)?
            .context("Retry entry not found after attempt begin")
    }

    /// Commit the outcomes of one poll cycle as a single batch.
    pub fn finish_retry_attempts(&self, outcomes: &[RetryOutcome]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin retry outcome transaction")?;
        for o in outcomes {
            tx.execute(
                "UPDATE retry_entries
                 SET status = ?1,
                     next_attempt_at = COALESCE(?2, next_attempt_at),
                     error = ?3
                 WHERE id = ?4",
                params![
                    o.status.as_str(),
                    o.next_attempt_at.map(|d| d.to_rfc3339()),
                    o.error,
                    o.id,
                ],
            )
            .context("Failed to update retry entry outcome")?;
        }
        tx.commit().context("Failed to commit retry outcomes")?;
        Ok(())
    }

    /// Operator action: re-arm a terminal entry for one extra attempt.
    /// Decrements the attempt count by at most one so the usual
    /// `max_attempts` boundary still applies.
    pub fn reset_retry_entry(&self, id: &str, now: DateTime<Utc>) -> Result<RetryEntry> {
        self.conn
            .execute(
                "UPDATE retry_entries
                 SET status = ?1,
                     next_attempt_at = ?2,
                     attempt_count = MAX(0, attempt_count - 1)
                 WHERE id = ?3",
                params![RetryStatus::Pending.as_str(), now.to_rfc3339(), id],
            )
            .context("Failed to reset retry entry")?;
        self.get_retry_entry(id)?
            .context("Retry entry not found after reset")
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

const TRANSCRIPT_COLUMNS: &str = "id, external_id, title, text, fingerprint, origin, \
     recorded_at, state, error, first_seen_at, stable_since, processed_at, created_at";

const ACTION_COLUMNS: &str = "id, transcript_id, title, description, context, assignee, \
     card_id, card_url, status, retry_count, error, created_at";

const RETRY_COLUMNS: &str =
    "id, kind, payload, attempt_count, max_attempts, next_attempt_at, status, error, created_at";

struct TranscriptRow {
    id: String,
    external_id: Option<String>,
    title: String,
    text: String,
    fingerprint: Option<String>,
    origin: String,
    recorded_at: Option<String>,
    state: String,
    error: Option<String>,
    first_seen_at: String,
    stable_since: String,
    processed_at: Option<String>,
    created_at: String,
}

fn map_transcript_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TranscriptRow> {
    Ok(TranscriptRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        text: row.get(3)?,
        fingerprint: row.get(4)?,
        origin: row.get(5)?,
        recorded_at: row.get(6)?,
        state: row.get(7)?,
        error: row.get(8)?,
        first_seen_at: row.get(9)?,
        stable_since: row.get(10)?,
        processed_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl TranscriptRow {
    fn into_transcript(self) -> Result<Transcript> {
        Ok(Transcript {
            id: self.id,
            external_id: self.external_id,
            title: self.title,
            text: self.text,
            fingerprint: self.fingerprint,
            origin: TranscriptOrigin::from_str(&self.origin).map_err(anyhow::Error::msg)?,
            recorded_at: self.recorded_at.as_deref().map(parse_ts).transpose()?,
            state: TranscriptState::from_str(&self.state).map_err(anyhow::Error::msg)?,
            error: self.error,
            first_seen_at: parse_ts(&self.first_seen_at)?,
            stable_since: parse_ts(&self.stable_since)?,
            processed_at: self.processed_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct ActionRow {
    id: String,
    transcript_id: String,
    title: String,
    description: String,
    context: String,
    assignee: Option<String>,
    card_id: Option<String>,
    card_url: Option<String>,
    status: String,
    retry_count: i64,
    error: Option<String>,
    created_at: String,
}

fn map_action_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRow> {
    Ok(ActionRow {
        id: row.get(0)?,
        transcript_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        context: row.get(4)?,
        assignee: row.get(5)?,
        card_id: row.get(6)?,
        card_url: row.get(7)?,
        status: row.get(8)?,
        retry_count: row.get(9)?,
        error: row.get(10)?,
        created_at: row.get(11)?,
    })
}

impl ActionRow {
    fn into_action(self) -> Result<ActionItem> {
        Ok(ActionItem {
            id: self.id,
            transcript_id: self.transcript_id,
            title: self.title,
            description: self.description,
            context: self.context,
            assignee: self.assignee,
            card_id: self.card_id,
            card_url: self.card_url,
            status: ActionStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            retry_count: self.retry_count,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RetryRow {
    id: String,
    kind: String,
    payload: String,
    attempt_count: i64,
    max_attempts: i64,
    next_attempt_at: String,
    status: String,
    error: Option<String>,
    created_at: String,
}

fn map_retry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetryRow> {
    Ok(RetryRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: row.get(2)?,
        attempt_count: row.get(3)?,
        max_attempts: row.get(4)?,
        next_attempt_at: row.get(5)?,
        status: row.get(6)?,
        error: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl RetryRow {
    fn into_entry(self) -> Result<RetryEntry> {
        Ok(RetryEntry {
            id: self.id,
            kind: OperationKind::from_str(&self.kind).map_err(anyhow::Error::msg)?,
            payload: serde_json::from_str(&self.payload)
                .context("Failed to deserialize retry payload")?,
            attempt_count: self.attempt_count,
            max_attempts: self.max_attempts,
            next_attempt_at: parse_ts(&self.next_attempt_at)?,
            status: RetryStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp in store: {}", s))?
        .with_timezone(&Utc))
}
