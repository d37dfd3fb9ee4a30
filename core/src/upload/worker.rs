use crate::config::PipelineConfig;
use crate::prelude::{PipelineError, PipelineResult};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::UploadMetrics;
use crate::upload::backup::BackupStore;
use crate::upload::buffer::{OutboundBuffer, UploadBatch, WakeReason};
use crate::upload::delivery::{DeliveryClient, HttpDelivery, OfflineDelivery};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What happened to one drained batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { events: usize, ride_id: i64 },
    BackedUp { events: usize, path: PathBuf },
}

/// Totals over the worker's lifetime, returned when it is joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub delivered_events: usize,
    pub backed_up_events: usize,
    pub backup_files: Vec<PathBuf>,
    /// Events still in memory after the final flush.
    pub retained_events: usize,
    pub degraded: bool,
}

impl FlushReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered { events, .. } => self.delivered_events += events,
            DispatchOutcome::BackedUp { events, path } => {
                self.backed_up_events += events;
                self.backup_files.push(path);
            }
        }
    }
}

/// Background consumer of the outbound buffer.
pub struct UploadWorker {
    buffer: Arc<OutboundBuffer>,
    client: Box<dyn DeliveryClient>,
    backup: BackupStore,
    metrics: Arc<UploadMetrics>,
    interval: Duration,
    logger: LogManager,
}

impl UploadWorker {
    pub fn new(
        buffer: Arc<OutboundBuffer>,
        client: Box<dyn DeliveryClient>,
        backup: BackupStore,
        metrics: Arc<UploadMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            buffer,
            client,
            backup,
            metrics,
            interval,
            logger: LogManager::new("upload"),
        }
    }

    /// HTTP delivery when an endpoint is configured, backup-only otherwise.
    pub fn from_config(
        config: &PipelineConfig,
        buffer: Arc<OutboundBuffer>,
        metrics: Arc<UploadMetrics>,
    ) -> PipelineResult<Self> {
        let upload = &config.upload;
        let client: Box<dyn DeliveryClient> = match &upload.endpoint {
            Some(endpoint) => Box::new(HttpDelivery::new(
                endpoint.clone(),
                upload.timeout(),
                upload.device_id.clone(),
            )?),
            None => Box::new(OfflineDelivery),
        };
        let backup = BackupStore::new(
            config.storage.backup_dir.clone(),
            config.storage.max_backup_files,
        );
        Ok(Self::new(buffer, client, backup, metrics, upload.upload_interval()))
    }

    /// Drains and dispatches once. `Ok(None)` when nothing was buffered.
    pub fn tick(&mut self) -> PipelineResult<Option<DispatchOutcome>> {
        match self.buffer.drain() {
            Some(batch) => self.dispatch(batch).map(Some),
            None => Ok(None),
        }
    }

    /// One delivery attempt; on failure the batch is written to a backup.
    /// If the backup fails too the batch goes back into the buffer.
    fn dispatch(&mut self, batch: UploadBatch) -> PipelineResult<DispatchOutcome> {
        let events = batch.len();
        match self.client.deliver(&batch, self.metrics.ride_id()) {
            Ok(receipt) => {
                if receipt.count != events {
                    self.logger.warn(&format!(
                        "remote acknowledged {} of {} events",
                        receipt.count, events
                    ));
                }
                self.metrics.record_delivered(events, receipt.ride_id);
                self.logger.record(&format!(
                    "uploaded {} events (ride {})",
                    events, receipt.ride_id
                ));
                Ok(DispatchOutcome::Delivered {
                    events,
                    ride_id: receipt.ride_id,
                })
            }
            Err(err) => {
                let err = PipelineError::from(err);
                self.logger.warn(&format!("{err}; saving {events} events locally"));
                match self.backup.write(&batch) {
                    Ok(path) => {
                        self.metrics.record_backed_up(events);
                        Ok(DispatchOutcome::BackedUp { events, path })
                    }
                    Err(backup_err) => {
                        self.buffer.restore(batch);
                        self.metrics.record_degraded();
                        Err(PipelineError::from(backup_err))
                    }
                }
            }
        }
    }

    /// Worker loop; returns after a stop request and the final flush.
    pub fn run(mut self) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            if self.buffer.wait_for_work(self.interval) == WakeReason::Stop {
                break;
            }
            match self.tick() {
                Ok(Some(outcome)) => report.record(outcome),
                Ok(None) => {}
                Err(err) => {
                    self.logger.error(&format!(
                        "{err}; upload worker halted, {} events held in memory",
                        self.buffer.len()
                    ));
                    report.degraded = true;
                    self.buffer.wait_for_stop();
                    break;
                }
            }
        }

        match self.tick() {
            Ok(Some(outcome)) => report.record(outcome),
            Ok(None) => {}
            Err(err) => {
                self.logger.error(&format!("final flush failed: {err}"));
                report.degraded = true;
            }
        }
        report.retained_events = self.buffer.len();
        report
    }

    pub fn spawn(self) -> PipelineResult<UploadHandle> {
        let buffer = self.buffer.clone();
        let thread = thread::Builder::new()
            .name("upload-worker".into())
            .spawn(move || self.run())
            .map_err(|e| PipelineError::Internal(format!("spawning upload worker: {e}")))?;
        Ok(UploadHandle {
            buffer,
            thread: Some(thread),
        })
    }
}

/// Join handle for a running worker.
pub struct UploadHandle {
    buffer: Arc<OutboundBuffer>,
    thread: Option<JoinHandle<FlushReport>>,
}

impl UploadHandle {
    /// Signals stop and waits for the in-flight attempt and final flush.
    pub fn stop(mut self) -> PipelineResult<FlushReport> {
        self.buffer.request_stop();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| PipelineError::Internal("upload worker already joined".into()))?;
        thread
            .join()
            .map_err(|_| PipelineError::Internal("upload worker panicked".into()))
    }
}

impl Drop for UploadHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.buffer.request_stop();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, DetectionEvent};
    use crate::export::documents::{backup_events, BackupCollection};
    use crate::position::Position;
    use crate::telemetry::metrics::UploadStatus;
    use crate::upload::delivery::{DeliveryError, DeliveryReceipt};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records every delivered batch; fails while `online` is false.
    struct FakeRemote {
        online: Arc<AtomicBool>,
        received: Arc<Mutex<Vec<Vec<DetectionEvent>>>>,
        ride_ids: Arc<Mutex<Vec<Option<i64>>>>,
    }

    impl DeliveryClient for FakeRemote {
        fn deliver(&self, batch: &UploadBatch, ride_id: Option<i64>) -> Result<DeliveryReceipt, DeliveryError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(DeliveryError::Connection("connection refused".into()));
            }
            self.ride_ids.lock().unwrap().push(ride_id);
            self.received.lock().unwrap().push(batch.events().to_vec());
            Ok(DeliveryReceipt {
                ride_id: 99,
                count: batch.len(),
            })
        }
    }

    struct Harness {
        online: Arc<AtomicBool>,
        received: Arc<Mutex<Vec<Vec<DetectionEvent>>>>,
        ride_ids: Arc<Mutex<Vec<Option<i64>>>>,
        buffer: Arc<OutboundBuffer>,
        metrics: Arc<UploadMetrics>,
    }

    impl Harness {
        fn new(online: bool) -> Self {
            Self {
                online: Arc::new(AtomicBool::new(online)),
                received: Arc::default(),
                ride_ids: Arc::default(),
                buffer: Arc::new(OutboundBuffer::new(1000, 5)),
                metrics: Arc::new(UploadMetrics::new()),
            }
        }

        fn worker(&self, backup_dir: &std::path::Path, interval: Duration) -> UploadWorker {
            let remote = FakeRemote {
                online: self.online.clone(),
                received: self.received.clone(),
                ride_ids: self.ride_ids.clone(),
            };
            UploadWorker::new(
                self.buffer.clone(),
                Box::new(remote),
                BackupStore::new(backup_dir, 10),
                self.metrics.clone(),
                interval,
            )
        }
    }

    fn event(i: usize) -> DetectionEvent {
        let position = Position::new(48.0 + i as f64 * 1e-5, 11.0, i as f64).unwrap();
        DetectionEvent::new(position, vec![Detection::new("crack", 0.8, [0.0, 0.0, 4.0, 4.0])])
    }

    fn read_backup(path: &std::path::Path) -> Vec<DetectionEvent> {
        let doc: BackupCollection = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        backup_events(&doc)
    }

    #[test]
    fn failed_batch_lands_verbatim_in_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(false);
        let mut worker = harness.worker(dir.path(), Duration::from_secs(60));
        let events: Vec<_> = (0..4).map(event).collect();
        for e in &events {
            harness.buffer.push(e.clone());
        }

        let outcome = worker.tick().unwrap().unwrap();
        let path = match outcome {
            DispatchOutcome::BackedUp { events: 4, path } => path,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(read_backup(&path), events);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(harness.buffer.is_empty());
        assert_eq!(harness.metrics.snapshot().last_status, UploadStatus::BackedUp);
    }

    #[test]
    fn recovery_does_not_resend_backed_up_data() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(false);
        let mut worker = harness.worker(dir.path(), Duration::from_secs(60));
        harness.buffer.push(event(0));
        harness.buffer.push(event(1));
        worker.tick().unwrap();

        harness.online.store(true, Ordering::SeqCst);
        harness.buffer.push(event(2));
        let outcome = worker.tick().unwrap().unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { events: 1, ride_id: 99 });
        let received = harness.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], vec![event(2)]);
    }

    #[test]
    fn ride_id_is_reused_for_later_batches() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(true);
        let mut worker = harness.worker(dir.path(), Duration::from_secs(60));
        harness.buffer.push(event(0));
        worker.tick().unwrap();
        harness.buffer.push(event(1));
        worker.tick().unwrap();
        assert_eq!(*harness.ride_ids.lock().unwrap(), vec![None, Some(99)]);
        assert_eq!(harness.metrics.ride_id(), Some(99));
    }

    #[test]
    fn backup_failure_keeps_events_and_flags_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        fs::write(&blocker, b"file").unwrap();
        let harness = Harness::new(false);
        let mut worker = harness.worker(&blocker, Duration::from_secs(60));
        harness.buffer.push(event(0));
        harness.buffer.push(event(1));

        let err = worker.tick().unwrap_err();
        assert!(matches!(err, PipelineError::ResourceExhaustion(_)));
        assert_eq!(harness.buffer.len(), 2);
        assert!(harness.metrics.is_degraded());
    }

    #[test]
    fn stop_flushes_remaining_events_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(false);
        let handle = harness.worker(dir.path(), Duration::from_secs(60)).spawn().unwrap();
        for i in 0..3 {
            harness.buffer.push(event(i));
        }
        let report = handle.stop().unwrap();
        assert_eq!(report.backed_up_events, 3);
        assert_eq!(report.backup_files.len(), 1);
        assert_eq!(report.retained_events, 0);
        assert!(harness.buffer.is_empty());
    }

    #[test]
    fn full_batch_triggers_upload_before_timer() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new(true);
        let handle = harness.worker(dir.path(), Duration::from_secs(600)).spawn().unwrap();
        for i in 0..5 {
            harness.buffer.push(event(i));
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while harness.received.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let report = handle.stop().unwrap();
        assert_eq!(report.delivered_events, 5);
        assert_eq!(harness.received.lock().unwrap()[0].len(), 5);
    }
}
