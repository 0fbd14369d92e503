//! Background TTL sweep.
//!
//! Ingestion already drops most stale samples; the sweep exists for data
//! that aged out after it was committed, typically while the sender was
//! down for longer than the TTL.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::batch::unix_millis;
use crate::queue::Queue;

/// Name of the sweep thread.
const THREAD_NAME: &str = "rwbuf-sweep";

/// Handle to a running sweep thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns a thread that calls [`Queue::sweep_expired`] every
    /// [`QueueConfig::sweep_interval`] of the queue.
    ///
    /// The first sweep runs one interval after spawning.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to create the thread.
    ///
    /// [`QueueConfig::sweep_interval`]: crate::config::QueueConfig::sweep_interval
    pub fn spawn(queue: Arc<Queue>) -> std::io::Result<Self> {
        let interval = queue.config().sweep_interval;
        Self::with_interval(queue, interval)
    }

    /// Like [`Sweeper::spawn`], with an explicit period instead of the
    /// configured one.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the OS refuses to create the thread.
    pub fn with_interval(queue: Arc<Queue>, interval: Duration) -> std::io::Result<Self> {
        let (stop, ticks) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                tracing::debug!(?interval, "sweeper started");
                loop {
                    match ticks.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => sweep_once(&queue),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("sweeper stopped");
            })?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for an in-flight sweep to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Closing the channel wakes the thread.
        drop(self.stop.take());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("sweep thread panicked");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_once(queue: &Queue) {
    match queue.sweep_expired(unix_millis()) {
        Ok(0) => {}
        Ok(n) => tracing::debug!("swept {n} expired batch(es)"),
        Err(e) => tracing::warn!("sweep error: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::labels::Labels;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::tempdir;

    /// Opens a queue holding one committed batch that is long expired.
    fn queue_with_expired_batch(dir: &Path, sweep_interval: Duration) -> Arc<Queue> {
        let queue = Arc::new(
            Queue::open(
                QueueConfig::new(dir)
                    .with_map_size(16 << 20)
                    .with_ttl(Some(Duration::from_secs(60)))
                    .with_sweep_interval(sweep_interval),
            )
            .unwrap(),
        );
        queue.stage(Labels::from_pairs([("__name__", "old")]), 0, 1.0);
        queue.commit_batch().unwrap();
        assert_eq!(queue.stats().unwrap().pending_batches, 1);
        queue
    }

    fn wait_until_swept(queue: &Queue) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.stats().unwrap().pending_batches > 0 {
            assert!(Instant::now() < deadline, "sweeper never expired the batch");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_configured_interval_drives_sweep() {
        let dir = tempdir().unwrap();
        let queue = queue_with_expired_batch(dir.path(), Duration::from_millis(10));

        let sweeper = Sweeper::spawn(Arc::clone(&queue)).unwrap();
        wait_until_swept(&queue);
        sweeper.stop();
    }

    #[test]
    fn test_long_configured_interval_defers_sweep() {
        let dir = tempdir().unwrap();
        let queue = queue_with_expired_batch(dir.path(), Duration::from_secs(3600));

        let sweeper = Sweeper::spawn(Arc::clone(&queue)).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(queue.stats().unwrap().pending_batches, 1);
        sweeper.stop();
    }

    #[test]
    fn test_explicit_interval_overrides_config() {
        let dir = tempdir().unwrap();
        let queue = queue_with_expired_batch(dir.path(), Duration::from_secs(3600));

        let sweeper = Sweeper::with_interval(Arc::clone(&queue), Duration::from_millis(10)).unwrap();
        wait_until_swept(&queue);
        sweeper.stop();
    }

    #[test]
    fn test_stop_is_prompt() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(
            Queue::open(
                QueueConfig::new(dir.path())
                    .with_map_size(16 << 20)
                    .with_sweep_interval(Duration::from_secs(3600)),
            )
            .unwrap(),
        );

        let sweeper = Sweeper::spawn(queue).unwrap();
        let start = Instant::now();
        drop(sweeper);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
