//! Long-running orchestrator: owns the engine, the retry scheduler, and
//! the file watcher, and drives processing cycles until shutdown.
//!
//! The loop is single-flight by construction: it waits for a change
//! signal (or the idle interval), runs one full cycle to completion, and
//! only then listens again. The retry scheduler runs as an independent
//! loop sharing nothing with the engine but the store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;

use crate::config::{FollowupConfig, Secrets};
use crate::engine::MaturationEngine;
use crate::extract::CommitmentExtractor;
use crate::llm::LlmClient;
use crate::notify::Notifier;
use crate::retry::{PublishCardHandler, RetryScheduler};
use crate::source::CacheFileFeed;
use crate::store::models::OperationKind;
use crate::store::{BridgeDb, DbHandle};
use crate::tracker::TrackerClient;
use crate::watch::CacheWatcher;

pub struct Daemon {
    engine: MaturationEngine,
    scheduler: Arc<RetryScheduler>,
    watcher: CacheWatcher,
    cycle_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle used to request a clean shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Daemon {
    /// Wire up every component from configuration. Fails fast when the
    /// tracker credentials are missing: publishing is the whole point.
    pub async fn new(config: &FollowupConfig, secrets: &Secrets) -> Result<(Self, ShutdownHandle)> {
        if let Some(parent) = config.database.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        let db = DbHandle::new(BridgeDb::new(&config.database.path)?);

        let (key, token, list_id) = secrets
            .tracker_credentials()
            .context("Tracker credentials not configured (FOLLOWUP_TRACKER_KEY / _TOKEN / _LIST_ID)")?;
        let tracker = Arc::new(TrackerClient::new(&config.tracker, key, token, list_id));
        let llm = LlmClient::new(&config.llm);

        // Startup probes are advisory: both services may come up later.
        if !llm.health_check().await {
            tracing::warn!(url = %config.llm.base_url, "LLM endpoint not reachable");
        }
        if !tracker.health_check().await {
            tracing::warn!("tracker API unreachable or credentials rejected");
        }
        let notifier = Arc::new(Notifier::new(
            secrets.slack_webhook_url.clone(),
            secrets.discord_webhook_url.clone(),
        ));
        if !notifier.has_webhooks() {
            tracing::info!("no alert webhooks configured, alerts will only be logged");
        }

        let engine = MaturationEngine::new(
            db.clone(),
            Arc::new(CacheFileFeed::new(config.source.cache_path.clone())),
            Arc::new(CommitmentExtractor::new(llm)),
            tracker.clone(),
            notifier,
            config.maturation.clone(),
            config.retry.max_attempts,
        );

        let scheduler = Arc::new(RetryScheduler::new(db.clone(), &config.retry));
        let watcher = CacheWatcher::new(
            config.source.cache_path.clone(),
            config.source.watch_debounce_ms,
        );

        let (tx, rx) = watch::channel(false);
        let daemon = Self {
            engine,
            scheduler,
            watcher,
            cycle_interval: Duration::from_secs(config.daemon.cycle_interval_seconds),
            shutdown_rx: rx,
        };
        let handle = ShutdownHandle { tx: Arc::new(tx) };

        // Handler registration happens here, not inside the scheduler, so
        // the wiring is visible in one place. Registered before start() so
        // the first poll never sees an unhandled kind.
        daemon
            .scheduler
            .register_handler(
                OperationKind::PublishCard,
                Arc::new(PublishCardHandler::new(db, tracker)),
            )
            .await;

        Ok((daemon, handle))
    }

    /// Run until shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("daemon starting");

        let mut change_rx = self.watcher.start();
        self.scheduler.start();

        // Startup cycle: pick up whatever accumulated while we were down.
        self.engine.run_cycle(Utc::now()).await;

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                signal = tokio::time::timeout(self.cycle_interval, change_rx.recv()) => {
                    match signal {
                        Ok(Some(())) => {
                            tracing::debug!("change signal received");
                            self.engine.run_cycle(Utc::now()).await;
                        }
                        Ok(None) => {
                            // Watcher gone; fall back to pure interval.
                            self.engine.run_cycle(Utc::now()).await;
                        }
                        Err(_) => {
                            tracing::debug!("idle interval elapsed");
                            self.engine.run_cycle(Utc::now()).await;
                        }
                    }
                }
            }
        }

        tracing::info!("daemon stopping");
        self.watcher.stop();
        self.scheduler.stop();
        Ok(())
    }
}
