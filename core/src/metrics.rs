use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct RequestMetrics {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    pub completed_epochs: u64,
    pub last_loss: Option<f32>,
}

#[derive(Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    requests: RequestMetrics,
    training: TrainingMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                requests: RequestMetrics::default(),
                training: TrainingMetrics::default(),
                max_history: max_history.max(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_request(&self, latency_us: u64, failed: bool) {
        let mut state = self.lock();
        state.requests.total_requests += 1;
        if failed {
            state.requests.failed_requests += 1;
        }
        state.requests.latencies.push_back(latency_us);
        if state.requests.latencies.len() > state.max_history {
            state.requests.latencies.pop_front();
        }
    }

    pub fn record_training_epoch(&self, loss: f32) {
        let mut state = self.lock();
        state.training.completed_epochs += 1;
        state.training.last_loss = Some(loss);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let r = &state.requests;

        let mut sorted_latencies: Vec<u64> = r.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let error_rate = if r.total_requests > 0 {
            r.failed_requests as f32 / r.total_requests as f32
        } else {
            0.0
        };

        MetricsSnapshot {
            total_requests: r.total_requests,
            error_rate,
            p50: percentile(&sorted_latencies, 50.0),
            p95: percentile(&sorted_latencies, 95.0),
            p99: percentile(&sorted_latencies, 99.0),
            history_count: r.latencies.len(),
            training_epochs: state.training.completed_epochs,
            last_training_loss: state.training.last_loss,
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub error_rate: f32,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub training_epochs: u64,
    pub last_training_loss: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_follow_recorded_latencies() {
        let metrics = MetricsCollector::new(100);
        for latency in 1..=100 {
            metrics.record_request(latency, latency % 10 == 0);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 100);
        assert_eq!(snap.p50, 50);
        assert_eq!(snap.p95, 95);
        assert_eq!(snap.p99, 99);
        assert!((snap.error_rate - 0.1).abs() < 1e-6);
    }

    #[test]
    fn history_is_bounded() {
        let metrics = MetricsCollector::new(3);
        for latency in [10, 20, 30, 40] {
            metrics.record_request(latency, false);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.history_count, 3);
        assert_eq!(snap.total_requests, 4);
    }

    #[test]
    fn training_epochs_are_counted() {
        let metrics = MetricsCollector::new(10);
        metrics.record_training_epoch(0.4);
        metrics.record_training_epoch(0.3);
        let snap = metrics.snapshot();
        assert_eq!(snap.training_epochs, 2);
        assert_eq!(snap.last_training_loss, Some(0.3));
    }
}
