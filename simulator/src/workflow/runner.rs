use crate::generator::profile::RideGenerator;
use crate::workflow::config::WorkflowConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use surfacecore::upload::FlushReport;
use surfacecore::{RideSession, SessionSnapshot};

/// Ticks between progress callbacks.
const PUBLISH_EVERY: usize = 50;

#[derive(Debug, Clone)]
pub struct RunResult {
    pub snapshot: SessionSnapshot,
    pub route_path: PathBuf,
    pub damages_path: PathBuf,
    pub flush: FlushReport,
    pub interrupted: bool,
}

/// Drives one ride session from start to final flush.
#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Runs the capture loop until the ride ends or `stop` is raised, then
    /// flushes the upload buffer and writes the GeoJSON artifacts.
    pub fn execute<F>(&self, stop: &AtomicBool, mut on_progress: F) -> Result<RunResult>
    where
        F: FnMut(&RideSession),
    {
        let mut session = RideSession::new(self.config.pipeline.clone());
        let uploader = session
            .spawn_uploader()
            .context("starting upload worker")?;
        let pace = Duration::from_secs_f64(self.config.ride.tick_secs.max(0.0));
        let generator = RideGenerator::new(&self.config.ride)?;

        let mut interrupted = false;
        for (tick, event) in generator.enumerate() {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested after {tick} ticks");
                interrupted = true;
                break;
            }
            match session.process_tick(event) {
                Ok(outcome) => {
                    if outcome.dropped_oldest {
                        log::warn!("outbound buffer full, oldest event dropped");
                    }
                }
                Err(err) if err.is_recoverable() => log::warn!("tick {tick} skipped: {err}"),
                Err(err) => return Err(err).context("processing capture tick"),
            }
            if tick % PUBLISH_EVERY == 0 {
                on_progress(&session);
            }
            if self.config.realtime {
                thread::sleep(pace);
            }
        }

        let flush = uploader.stop().context("stopping upload worker")?;
        if flush.degraded {
            log::warn!(
                "upload ended degraded, {} events not persisted",
                flush.retained_events
            );
        }
        on_progress(&session);

        let output_dir = self.config.output_dir();
        let (route_path, damages_path) = session
            .write_artifacts(&output_dir)
            .with_context(|| format!("writing artifacts to {}", output_dir.display()))?;

        Ok(RunResult {
            snapshot: session.snapshot(),
            route_path,
            damages_path,
            flush,
            interrupted,
        })
    }
}
