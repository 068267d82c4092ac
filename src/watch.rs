//! Change detection for the transcript cache file.
//!
//! A small polling task stats the file and pushes a unit signal into a
//! bounded channel whenever the mtime advances. The consumer coalesces
//! signals, so a full queue simply drops the extra notification.

use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SIGNAL_QUEUE_DEPTH: usize = 8;

pub struct CacheWatcher {
    path: PathBuf,
    poll_interval: std::time::Duration,
    task: Option<JoinHandle<()>>,
}

impl CacheWatcher {
    pub fn new(path: PathBuf, debounce_ms: u64) -> Self {
        Self {
            path,
            // The debounce doubles as the poll period: two changes inside
            // one period collapse into one signal.
            poll_interval: std::time::Duration::from_millis(debounce_ms.max(100)),
            task: None,
        }
    }

    /// Start watching. Returns the channel that carries change signals.
    pub fn start(&mut self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_DEPTH);
        let path = self.path.clone();
        let interval = self.poll_interval;

        self.task = Some(tokio::spawn(async move {
            let mut last_mtime: Option<SystemTime> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mtime = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta.modified().ok(),
                    Err(_) => None, // file absent, keep polling
                };
                let changed = match (last_mtime, mtime) {
                    (Some(prev), Some(curr)) => curr > prev,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if let Some(mtime) = mtime {
                    last_mtime = Some(mtime);
                }
                if changed {
                    tracing::debug!(path = %path.display(), "cache file changed");
                    // Dropped signals are fine: one queued signal already
                    // triggers a full cycle.
                    let _ = tx.try_send(());
                }
            }
        }));
        rx
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CacheWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    #[tokio::test]
    async fn test_signal_on_create_and_modify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache-v3.json");

        let mut watcher = CacheWatcher::new(path.clone(), 100);
        let mut rx = watcher.start();

        // No file yet: no signal.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        std::fs::write(&path, "{}").unwrap();
        assert!(timeout(Duration::from_secs(2), rx.recv()).await.is_ok());

        // Quiet period: no signal.
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());

        // mtime granularity can be a full second on some filesystems.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        std::fs::write(&path, "{\"cache\": \"{}\"}").unwrap();
        assert!(timeout(Duration::from_secs(2), rx.recv()).await.is_ok());

        watcher.stop();
    }

    #[tokio::test]
    async fn test_stop_ends_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = CacheWatcher::new(dir.path().join("f"), 100);
        let mut rx = watcher.start();
        watcher.stop();
        // Sender dropped with the task: recv drains to None.
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
    }
}
