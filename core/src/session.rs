//! Owned coordinator for one ride.
//!
//! The capture loop feeds every tick through [`RideSession::process_tick`];
//! any UI layer reads state through [`RideSession::snapshot`] and the
//! GeoJSON accessors. The outbound buffer is the only state shared with the
//! upload worker.

use crate::config::PipelineConfig;
use crate::damage::{ClusterUpdate, DamageAggregator, DamageCluster};
use crate::detection::{DamageEvent, Detection, DetectionEvent};
use crate::export::documents::{
    damage_collection, route_collection, write_document, DamageCollection, RouteCollection,
};
use crate::position::Position;
use crate::prelude::PipelineResult;
use crate::surface::{RouteSegment, RouteSegmenter, SmoothedSurface, SurfaceSmoother, UNKNOWN_SURFACE};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::{MetricsSnapshot, UploadMetrics};
use crate::upload::buffer::{OutboundBuffer, PushOutcome};
use crate::upload::worker::{UploadHandle, UploadWorker};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-tick result handed back to the capture loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Set when a surface sample was accepted this tick.
    pub surface: Option<SmoothedSurface>,
    pub cluster_updates: Vec<ClusterUpdate>,
    pub rejected_detections: usize,
    pub dropped_oldest: bool,
}

/// Read-only view of the live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub frames: usize,
    pub distance_m: f64,
    pub current_surface: Option<SmoothedSurface>,
    pub route_points: usize,
    pub segments: usize,
    pub clusters: usize,
    pub surface_counts: BTreeMap<String, usize>,
    pub damage_counts: BTreeMap<String, usize>,
    pub invalid_events: usize,
    pub rejected_detections: usize,
    pub backlog: usize,
    pub dropped_events: usize,
    pub upload: MetricsSnapshot,
}

#[derive(Debug, Default)]
struct RideStats {
    frames: usize,
    distance_m: f64,
    last_position: Option<Position>,
    surface_counts: BTreeMap<String, usize>,
    damage_counts: BTreeMap<String, usize>,
    invalid_events: usize,
    rejected_detections: usize,
}

pub struct RideSession {
    config: PipelineConfig,
    smoother: SurfaceSmoother,
    segmenter: RouteSegmenter,
    aggregator: DamageAggregator,
    outbound: Arc<OutboundBuffer>,
    metrics: Arc<UploadMetrics>,
    stats: RideStats,
    logger: LogManager,
}

impl RideSession {
    pub fn new(config: PipelineConfig) -> Self {
        let outbound = Arc::new(OutboundBuffer::new(
            config.upload.buffer_capacity,
            config.upload.batch_size,
        ));
        Self {
            smoother: SurfaceSmoother::new(&config.surface),
            segmenter: RouteSegmenter::new(),
            aggregator: DamageAggregator::new(
                config.damage.cluster_radius_m,
                config.damage.severity.clone(),
            ),
            outbound,
            metrics: Arc::new(UploadMetrics::new()),
            stats: RideStats::default(),
            logger: LogManager::new("session"),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn outbound(&self) -> Arc<OutboundBuffer> {
        self.outbound.clone()
    }

    pub fn metrics(&self) -> Arc<UploadMetrics> {
        self.metrics.clone()
    }

    /// Starts the upload worker on this session's outbound buffer.
    pub fn spawn_uploader(&self) -> PipelineResult<UploadHandle> {
        UploadWorker::from_config(&self.config, self.outbound(), self.metrics())?.spawn()
    }

    /// Runs one capture tick through smoother, segmenter and aggregator,
    /// then queues the event for upload.
    ///
    /// An event with an invalid position is dropped and reported as
    /// `InvalidInput`; malformed detections are removed individually.
    pub fn process_tick(&mut self, mut event: DetectionEvent) -> PipelineResult<TickOutcome> {
        let rejected = match event.sanitize() {
            Ok(rejected) => rejected,
            Err(err) => {
                self.stats.invalid_events += 1;
                self.logger.warn(&format!("dropping event: {err}"));
                return Err(err);
            }
        };
        for err in &rejected {
            self.logger.warn(&format!("dropping detection: {err}"));
        }
        self.stats.rejected_detections += rejected.len();

        let position = event.position;
        let mut outcome = TickOutcome {
            rejected_detections: rejected.len(),
            ..Default::default()
        };

        self.stats.frames += 1;
        if let Some(last) = &self.stats.last_position {
            self.stats.distance_m += last.distance_to(&position);
        }
        self.stats.last_position = Some(position);

        if let Some(raw) = self.strongest_surface(&event.detections) {
            if let Some(resolved) = self.smoother.offer(position, &raw.class_label, raw.confidence) {
                *self
                    .stats
                    .surface_counts
                    .entry(resolved.label.clone())
                    .or_default() += 1;
                outcome.surface = Some(resolved);
            }
        }

        let (label, confidence) = self
            .smoother
            .current()
            .map(|c| (c.label.clone(), c.confidence))
            .unwrap_or_else(|| (UNKNOWN_SURFACE.to_string(), 0.0));
        self.segmenter.push(position, &label, confidence);

        let damages: Vec<DamageEvent> = event
            .detections
            .iter()
            .filter(|d| self.config.classes.is_damage(&d.class_label))
            .map(|d| DamageEvent {
                damage_type: d.class_label.clone(),
                position,
                confidence: d.confidence,
                image: d.image.clone(),
            })
            .collect();
        for damage in damages {
            let damage_type = damage.damage_type.clone();
            match self.aggregator.ingest(damage) {
                Ok(update) => {
                    *self.stats.damage_counts.entry(damage_type).or_default() += 1;
                    outcome.cluster_updates.push(update);
                }
                Err(err) => {
                    self.stats.rejected_detections += 1;
                    self.logger.warn(&format!("dropping damage: {err}"));
                }
            }
        }

        outcome.dropped_oldest = self.outbound.push(event) == PushOutcome::DroppedOldest;
        Ok(outcome)
    }

    fn strongest_surface<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        detections
            .iter()
            .filter(|d| self.config.classes.is_surface(&d.class_label))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    pub fn segments(&self) -> Vec<RouteSegment> {
        self.segmenter.segments()
    }

    pub fn clusters(&self) -> &[DamageCluster] {
        self.aggregator.clusters()
    }

    pub fn route_geojson(&self) -> RouteCollection {
        route_collection(&self.segmenter.segments())
    }

    pub fn damage_geojson(&self) -> DamageCollection {
        damage_collection(self.aggregator.clusters(), self.aggregator.radius_m())
    }

    /// Writes `route.geojson` and `damages.geojson` into `dir`.
    pub fn write_artifacts(&self, dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
        let route = dir.join("route.geojson");
        let damages = dir.join("damages.geojson");
        write_document(&route, &self.route_geojson())?;
        write_document(&damages, &self.damage_geojson())?;
        self.logger.record(&format!(
            "wrote {} segments and {} clusters to {}",
            self.segmenter.segment_count(),
            self.aggregator.len(),
            dir.display()
        ));
        Ok((route, damages))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            frames: self.stats.frames,
            distance_m: self.stats.distance_m,
            current_surface: self.smoother.current().cloned(),
            route_points: self.segmenter.point_count(),
            segments: self.segmenter.segment_count(),
            clusters: self.aggregator.len(),
            surface_counts: self.stats.surface_counts.clone(),
            damage_counts: self.stats.damage_counts.clone(),
            invalid_events: self.stats.invalid_events,
            rejected_detections: self.stats.rejected_detections,
            backlog: self.outbound.len(),
            dropped_events: self.outbound.dropped(),
            upload: self.metrics.snapshot(),
        }
    }

    /// Clears route, clusters and statistics. Already queued events are
    /// still delivered.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.segmenter.reset();
        self.aggregator.reset();
        self.stats = RideStats::default();
        self.logger.record("session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ImageRef;
    use crate::prelude::PipelineError;

    fn config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.surface.segment_length_m = 0.0;
        cfg.surface.smoothing_window = 1;
        cfg
    }

    fn tick(i: usize, detections: Vec<Detection>) -> DetectionEvent {
        let position = Position::new(48.0 + i as f64 * 0.0001, 11.0, i as f64).unwrap();
        DetectionEvent::new(position, detections)
    }

    #[test]
    fn ticks_feed_route_clusters_and_outbound_buffer() {
        let mut session = RideSession::new(config());
        session.process_tick(tick(0, Vec::new())).unwrap();
        session
            .process_tick(tick(1, vec![Detection::new("gravel", 0.8, [0.0; 4])]))
            .unwrap();
        let outcome = session
            .process_tick(tick(
                2,
                vec![
                    Detection::new("gravel", 0.7, [0.0; 4]),
                    Detection::new("pothole", 0.9, [1.0, 1.0, 2.0, 2.0]).with_image(ImageRef {
                        filename: "damage_000001.jpg".into(),
                        url: String::new(),
                    }),
                ],
            ))
            .unwrap();
        assert_eq!(outcome.cluster_updates, vec![ClusterUpdate::Created { id: 1 }]);

        let segments = session.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].surface_label, UNKNOWN_SURFACE);
        assert_eq!(segments[1].surface_label, "gravel");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.frames, 3);
        assert_eq!(snapshot.backlog, 3);
        assert_eq!(snapshot.clusters, 1);
        assert_eq!(snapshot.damage_counts.get("pothole"), Some(&1));
        assert!(snapshot.distance_m > 20.0);

        let damages = session.damage_geojson();
        assert_eq!(damages.features[0].properties.images[0].filename, "damage_000001.jpg");
    }

    #[test]
    fn invalid_position_drops_event_and_continues() {
        let mut session = RideSession::new(config());
        let mut bad = tick(0, Vec::new());
        bad.position.latitude = 95.0;
        assert!(matches!(
            session.process_tick(bad),
            Err(PipelineError::InvalidInput(_))
        ));
        session.process_tick(tick(1, Vec::new())).unwrap();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.invalid_events, 1);
        assert_eq!(snapshot.frames, 1);
        assert_eq!(snapshot.backlog, 1);
    }

    #[test]
    fn malformed_detection_is_removed_from_event() {
        let mut session = RideSession::new(config());
        let outcome = session
            .process_tick(tick(0, vec![Detection::new("pothole", f64::NAN, [0.0; 4])]))
            .unwrap();
        assert_eq!(outcome.rejected_detections, 1);
        assert!(session.clusters().is_empty());
        let batch = session.outbound().drain().unwrap();
        assert!(batch.events()[0].detections.is_empty());
    }

    #[test]
    fn strongest_surface_detection_wins_within_a_frame() {
        let mut session = RideSession::new(config());
        let outcome = session
            .process_tick(tick(
                0,
                vec![
                    Detection::new("gravel", 0.6, [0.0; 4]),
                    Detection::new("concrete", 0.9, [0.0; 4]),
                    Detection::new("pothole", 0.99, [0.0; 4]),
                ],
            ))
            .unwrap();
        assert_eq!(outcome.surface.unwrap().label, "concrete");
    }

    #[test]
    fn reset_clears_route_but_keeps_backlog() {
        let mut session = RideSession::new(config());
        session
            .process_tick(tick(0, vec![Detection::new("crack", 0.8, [0.0; 4])]))
            .unwrap();
        session.reset();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frames, 0);
        assert_eq!(snapshot.clusters, 0);
        assert_eq!(snapshot.segments, 0);
        assert_eq!(snapshot.backlog, 1);
    }

    #[test]
    fn artifacts_are_written_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RideSession::new(config());
        session
            .process_tick(tick(0, vec![Detection::new("asphalt_good", 0.9, [0.0; 4])]))
            .unwrap();
        session.process_tick(tick(1, Vec::new())).unwrap();
        let (route, damages) = session.write_artifacts(dir.path()).unwrap();
        let route: RouteCollection = serde_json::from_slice(&std::fs::read(route).unwrap()).unwrap();
        assert_eq!(route.features[0].properties.color, "#2ecc71");
        assert!(damages.exists());
    }
}
