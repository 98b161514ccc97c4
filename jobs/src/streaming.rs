use hyperrec_core::model::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_STREAM_BATCH_SIZE: usize = 1000;
pub const DEFAULT_STREAM_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Pending updates that trigger an immediate flush, and the most one flush hands over.
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_STREAM_BATCH_SIZE,
            flush_interval: DEFAULT_STREAM_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub update: T,
    pub received_at: i64,
}

/// Receives flushed batches, oldest update first.
#[async_trait::async_trait]
pub trait UpdateSink<T>: Send + Sync {
    async fn apply(&self, batch: &[Stamped<T>]) -> anyhow::Result<()>;
}

struct Inner<T> {
    config: StreamingConfig,
    pending: Mutex<Vec<Stamped<T>>>,
    // serializes flushes so batches reach the sink in arrival order
    flushing: Mutex<()>,
    sink: Arc<dyn UpdateSink<T>>,
    auto_flush: Mutex<Option<JoinHandle<()>>>,
}

/// Buffers updates that arrive between training jobs and hands them to a sink in batches,
/// either once `batch_size` are pending or on every `flush_interval` tick while auto-flush runs.
///
/// Clones share one buffer.
pub struct StreamingUpdateHandler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for StreamingUpdateHandler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> StreamingUpdateHandler<T> {
    pub fn new(config: StreamingConfig, sink: Arc<dyn UpdateSink<T>>) -> Self {
        let config = StreamingConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                config,
                pending: Mutex::new(Vec::new()),
                flushing: Mutex::new(()),
                sink,
                auto_flush: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> StreamingConfig {
        self.inner.config
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Buffers `update`. Returns how many updates a size-triggered flush delivered, if any.
    pub async fn receive(&self, update: T) -> anyhow::Result<usize> {
        let full = {
            let mut pending = self.inner.pending.lock().await;
            pending.push(Stamped {
                update,
                received_at: now_millis(),
            });
            pending.len() >= self.inner.config.batch_size
        };
        if full {
            return self.flush().await;
        }
        Ok(0)
    }

    /// Hands up to `batch_size` pending updates to the sink. A failed batch goes back to the
    /// front of the buffer.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        flush_inner(&self.inner).await
    }

    /// Starts the interval task. Calling it while the task runs does nothing.
    pub async fn start_auto_flush(&self) {
        let mut slot = self.inner.auto_flush.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let period = self.inner.config.flush_interval;
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(auto_flush_loop(weak, period)));
        info!(interval_ms = period.as_millis() as u64, "Streaming auto-flush started");
    }

    pub async fn stop_auto_flush(&self) {
        if let Some(handle) = self.inner.auto_flush.lock().await.take() {
            handle.abort();
            info!("Streaming auto-flush stopped");
        }
    }

    pub async fn is_auto_flushing(&self) -> bool {
        self.inner
            .auto_flush
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn flush_inner<T>(inner: &Inner<T>) -> anyhow::Result<usize> {
    let _guard = inner.flushing.lock().await;
    let batch: Vec<Stamped<T>> = {
        let mut pending = inner.pending.lock().await;
        let n = pending.len().min(inner.config.batch_size);
        pending.drain(..n).collect()
    };
    if batch.is_empty() {
        return Ok(0);
    }

    match inner.sink.apply(&batch).await {
        Ok(()) => {
            debug!(updates = batch.len(), "Streaming batch flushed");
            Ok(batch.len())
        }
        Err(e) => {
            let count = batch.len();
            inner.pending.lock().await.splice(0..0, batch);
            warn!(updates = count, error = %e, "Streaming batch rejected, requeued");
            Err(e)
        }
    }
}

async fn auto_flush_loop<T>(inner: Weak<Inner<T>>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Err(e) = flush_inner(&inner).await {
            warn!(error = %e, "Timed streaming flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<u32>>>,
        reject: AtomicBool,
    }

    #[async_trait::async_trait]
    impl UpdateSink<u32> for Recorder {
        async fn apply(&self, batch: &[Stamped<u32>]) -> anyhow::Result<()> {
            if self.reject.load(Ordering::SeqCst) {
                anyhow::bail!("sink unavailable");
            }
            self.batches
                .lock()
                .await
                .push(batch.iter().map(|s| s.update).collect());
            Ok(())
        }
    }

    fn handler(batch_size: usize, flush_ms: u64) -> (StreamingUpdateHandler<u32>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let config = StreamingConfig {
            batch_size,
            flush_interval: Duration::from_millis(flush_ms),
        };
        (StreamingUpdateHandler::new(config, recorder.clone()), recorder)
    }

    #[test]
    fn defaults_match_streaming_limits() {
        let config = StreamingConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn full_buffer_flushes_immediately() {
        let (handler, recorder) = handler(3, 60_000);
        assert_eq!(handler.receive(1).await.unwrap(), 0);
        assert_eq!(handler.receive(2).await.unwrap(), 0);
        assert!(recorder.batches.lock().await.is_empty());

        assert_eq!(handler.receive(3).await.unwrap(), 3);
        assert_eq!(*recorder.batches.lock().await, vec![vec![1, 2, 3]]);
        assert_eq!(handler.pending_len().await, 0);
        assert_eq!(handler.flush().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_hands_over_at_most_one_batch() {
        let (handler, recorder) = handler(2, 60_000);
        {
            let mut pending = handler.inner.pending.lock().await;
            for update in 0..5 {
                pending.push(Stamped {
                    update,
                    received_at: 0,
                });
            }
        }
        assert_eq!(handler.flush().await.unwrap(), 2);
        assert_eq!(handler.pending_len().await, 3);
        assert_eq!(*recorder.batches.lock().await, vec![vec![0, 1]]);
    }

    #[tokio::test]
    async fn rejected_batches_are_requeued_in_order() {
        let (handler, recorder) = handler(10, 60_000);
        handler.receive(7).await.unwrap();
        handler.receive(8).await.unwrap();

        recorder.reject.store(true, Ordering::SeqCst);
        assert!(handler.flush().await.is_err());
        handler.receive(9).await.unwrap();
        assert_eq!(handler.pending_len().await, 3);

        recorder.reject.store(false, Ordering::SeqCst);
        assert_eq!(handler.flush().await.unwrap(), 3);
        assert_eq!(*recorder.batches.lock().await, vec![vec![7, 8, 9]]);
    }

    #[tokio::test]
    async fn timer_flushes_until_stopped() {
        let (handler, recorder) = handler(100, 20);
        handler.receive(1).await.unwrap();
        handler.receive(2).await.unwrap();

        handler.start_auto_flush().await;
        handler.start_auto_flush().await;
        assert!(handler.is_auto_flushing().await);

        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if !recorder.batches.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*recorder.batches.lock().await, vec![vec![1, 2]]);

        handler.stop_auto_flush().await;
        assert!(!handler.is_auto_flushing().await);
        handler.receive(3).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(handler.pending_len().await, 1);
        assert_eq!(recorder.batches.lock().await.len(), 1);
    }
}
