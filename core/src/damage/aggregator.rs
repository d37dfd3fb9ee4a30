use crate::damage::severity::{Severity, SeverityTable};
use crate::detection::{DamageEvent, ImageRef};
use crate::position::{haversine_m, Position};
use crate::prelude::PipelineResult;
use crate::telemetry::log::LogManager;
use serde::Serialize;
use std::collections::HashMap;

/// One damage observation merged into a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub position: Position,
    pub confidence: f64,
    pub image: Option<ImageRef>,
}

impl ClusterMember {
    pub fn timestamp(&self) -> f64 {
        self.position.timestamp
    }
}

/// Deduplicated damage site with a running centroid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamageCluster {
    /// Creation order, starting at 1.
    pub id: usize,
    pub damage_type: String,
    pub members: Vec<ClusterMember>,
    pub best_confidence: f64,
    pub severity: Severity,
    pub first_seen: f64,
    pub last_seen: f64,
    sum_latitude: f64,
    sum_longitude: f64,
    sum_confidence: f64,
}

impl DamageCluster {
    fn open(id: usize, event: DamageEvent, table: &SeverityTable) -> Self {
        let timestamp = event.timestamp();
        let mut cluster = Self {
            id,
            damage_type: event.damage_type,
            members: Vec::new(),
            best_confidence: event.confidence,
            severity: Severity::Low,
            first_seen: timestamp,
            last_seen: timestamp,
            sum_latitude: 0.0,
            sum_longitude: 0.0,
            sum_confidence: 0.0,
        };
        cluster.absorb(event.position, event.confidence, event.image, table);
        cluster
    }

    fn absorb(
        &mut self,
        position: Position,
        confidence: f64,
        image: Option<ImageRef>,
        table: &SeverityTable,
    ) {
        self.sum_latitude += position.latitude;
        self.sum_longitude += position.longitude;
        self.sum_confidence += confidence;
        self.best_confidence = self.best_confidence.max(confidence);
        self.first_seen = self.first_seen.min(position.timestamp);
        self.last_seen = self.last_seen.max(position.timestamp);
        self.members.push(ClusterMember {
            position,
            confidence,
            image,
        });
        // Membership changed, so the cached severity is stale.
        self.severity = table.classify(&self.damage_type, self.best_confidence, self.members.len());
        debug_assert!(!self.members.is_empty());
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// `(latitude, longitude)` mean of all member positions.
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.members.len().max(1) as f64;
        (self.sum_latitude / n, self.sum_longitude / n)
    }

    pub fn avg_confidence(&self) -> f64 {
        self.sum_confidence / self.members.len().max(1) as f64
    }

    pub fn distance_to(&self, position: &Position) -> f64 {
        let (lat, lon) = self.centroid();
        haversine_m(lat, lon, position.latitude, position.longitude)
    }

    /// Members ordered by capture time.
    pub fn members_by_time(&self) -> Vec<&ClusterMember> {
        let mut members: Vec<&ClusterMember> = self.members.iter().collect();
        members.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
        members
    }
}

/// Result of ingesting a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterUpdate {
    Created { id: usize },
    Merged { id: usize, members: usize },
}

impl ClusterUpdate {
    pub fn cluster_id(&self) -> usize {
        match self {
            ClusterUpdate::Created { id } | ClusterUpdate::Merged { id, .. } => *id,
        }
    }
}

/// Online greedy clustering of damage events by type and proximity.
pub struct DamageAggregator {
    radius_m: f64,
    table: SeverityTable,
    clusters: Vec<DamageCluster>,
    by_type: HashMap<String, Vec<usize>>,
    logger: LogManager,
}

impl DamageAggregator {
    pub fn new(radius_m: f64, table: SeverityTable) -> Self {
        Self {
            radius_m: radius_m.max(0.0),
            table,
            clusters: Vec::new(),
            by_type: HashMap::new(),
            logger: LogManager::new("aggregator"),
        }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Streams one event into the nearest same-type cluster within the
    /// radius, or opens a new cluster.
    pub fn ingest(&mut self, event: DamageEvent) -> PipelineResult<ClusterUpdate> {
        event.validate()?;

        let nearest = self.nearest_cluster(&event.damage_type, &event.position);
        match nearest {
            Some((index, distance)) if distance <= self.radius_m => {
                let cluster = &mut self.clusters[index];
                debug_assert_eq!(cluster.damage_type, event.damage_type);
                cluster.absorb(event.position, event.confidence, event.image, &self.table);
                self.logger.detail(&format!(
                    "{} merged into #{} ({:.2} m, {} members)",
                    cluster.damage_type,
                    cluster.id,
                    distance,
                    cluster.member_count()
                ));
                Ok(ClusterUpdate::Merged {
                    id: cluster.id,
                    members: cluster.member_count(),
                })
            }
            _ => {
                let id = self.clusters.len() + 1;
                let cluster = DamageCluster::open(id, event, &self.table);
                self.logger.record(&format!(
                    "new {} cluster #{} ({})",
                    cluster.damage_type,
                    id,
                    cluster.severity.as_str()
                ));
                self.by_type
                    .entry(cluster.damage_type.clone())
                    .or_default()
                    .push(self.clusters.len());
                self.clusters.push(cluster);
                Ok(ClusterUpdate::Created { id })
            }
        }
    }

    /// Closest cluster of the same type; equal distances keep the older one.
    fn nearest_cluster(&self, damage_type: &str, position: &Position) -> Option<(usize, f64)> {
        let candidates = self.by_type.get(damage_type)?;
        let mut best: Option<(usize, f64)> = None;
        for &index in candidates {
            let distance = self.clusters[index].distance_to(position);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }
        best
    }

    /// Clusters in creation order.
    pub fn clusters(&self) -> &[DamageCluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Full-session reset; the only operation that removes clusters.
    pub fn reset(&mut self) {
        self.clusters.clear();
        self.by_type.clear();
    }

    pub fn into_clusters(self) -> Vec<DamageCluster> {
        self.clusters
    }
}

/// Batch mode: sorts by timestamp (stable, so ties keep input order) and
/// streams the result, matching what live ingestion of that order yields.
/// Invalid events are skipped.
pub fn cluster_batch(
    mut events: Vec<DamageEvent>,
    radius_m: f64,
    table: SeverityTable,
) -> Vec<DamageCluster> {
    events.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
    let mut aggregator = DamageAggregator::new(radius_m, table);
    for event in events {
        if let Err(err) = aggregator.ingest(event) {
            aggregator.logger.warn(&format!("dropping damage event: {err}"));
        }
    }
    aggregator.into_clusters()
}
