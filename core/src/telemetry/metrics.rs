use serde::Serialize;
use std::sync::Mutex;

/// Outcome of the most recent upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Idle,
    Delivered,
    BackedUp,
    Failed,
}

/// Shared upload telemetry so an operator can spot offline buffering.
pub struct UploadMetrics {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub last_status: UploadStatus,
    pub delivered_batches: usize,
    pub delivered_events: usize,
    pub backed_up_batches: usize,
    pub backed_up_events: usize,
    pub degraded: bool,
    pub ride_id: Option<i64>,
}

impl UploadMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_delivered(&self, events: usize, ride_id: i64) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.last_status = UploadStatus::Delivered;
            metrics.delivered_batches += 1;
            metrics.delivered_events += events;
            metrics.ride_id = Some(ride_id);
        }
    }

    pub fn record_backed_up(&self, events: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.last_status = UploadStatus::BackedUp;
            metrics.backed_up_batches += 1;
            metrics.backed_up_events += events;
        }
    }

    /// Backup storage failed; the worker stops and events stay in memory.
    pub fn record_degraded(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.last_status = UploadStatus::Failed;
            metrics.degraded = true;
        }
    }

    pub fn ride_id(&self) -> Option<i64> {
        self.inner.lock().ok().and_then(|metrics| metrics.ride_id)
    }

    pub fn is_degraded(&self) -> bool {
        self.inner
            .lock()
            .map(|metrics| metrics.degraded)
            .unwrap_or(true)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            metrics.clone()
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for UploadMetrics {
    fn default() -> Self {
        Self::new()
    }
}
