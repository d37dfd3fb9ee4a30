use crate::damage::{DamageCluster, Severity};
use crate::detection::{Detection, DetectionEvent};
use crate::export::geojson::{round3, unix_now, Feature, FeatureCollection, Geometry};
use crate::position::Position;
use crate::surface::RouteSegment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Map color for a surface label.
pub fn surface_color(label: &str) -> &'static str {
    match label {
        "asphalt_excellent" => "#27ae60",
        "asphalt_good" => "#2ecc71",
        "asphalt_fair" => "#f39c12",
        "asphalt_poor" => "#e74c3c",
        "concrete" => "#95a5a6",
        "cobblestone" => "#7f8c8d",
        "paving_stones" => "#8e44ad",
        "gravel" => "#d35400",
        "dirt" => "#795548",
        _ => "#3498db",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProperties {
    pub segment_id: usize,
    pub surface_type: String,
    pub confidence: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMetadata {
    pub generated: f64,
    pub segments: usize,
}

pub type RouteCollection = FeatureCollection<RouteProperties, RouteMetadata>;

/// One LineString per segment, in route order.
pub fn route_collection(segments: &[RouteSegment]) -> RouteCollection {
    let features: Vec<_> = segments
        .iter()
        .enumerate()
        .map(|(segment_id, segment)| {
            let coordinates = segment.coordinates.iter().map(Position::lon_lat).collect();
            Feature::new(
                Geometry::LineString(coordinates),
                RouteProperties {
                    segment_id,
                    surface_type: segment.surface_label.clone(),
                    confidence: round3(segment.confidence),
                    color: surface_color(&segment.surface_label).to_string(),
                },
            )
        })
        .collect();
    let metadata = RouteMetadata {
        generated: unix_now(),
        segments: features.len(),
    };
    FeatureCollection::new(features, metadata)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub filename: String,
    pub url: String,
    pub timestamp: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageProperties {
    pub id: usize,
    pub damage_type: String,
    pub severity: Severity,
    pub image_count: usize,
    pub images: Vec<ImageEntry>,
    pub avg_confidence: f64,
    pub best_confidence: f64,
    pub first_seen: f64,
    pub last_seen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageMetadata {
    pub generated: f64,
    pub total_groups: usize,
    pub total_images: usize,
    pub grouping_distance_m: f64,
}

pub type DamageCollection = FeatureCollection<DamageProperties, DamageMetadata>;

/// One Point per cluster at its centroid, in creation order.
pub fn damage_collection(clusters: &[DamageCluster], radius_m: f64) -> DamageCollection {
    let features: Vec<_> = clusters
        .iter()
        .map(|cluster| {
            let images = cluster
                .members_by_time()
                .into_iter()
                .map(|member| {
                    let (filename, url) = member
                        .image
                        .as_ref()
                        .map(|image| (image.filename.clone(), image.url.clone()))
                        .unwrap_or_default();
                    ImageEntry {
                        filename,
                        url,
                        timestamp: member.timestamp(),
                        confidence: round3(member.confidence),
                    }
                })
                .collect();
            let (lat, lon) = cluster.centroid();
            Feature::new(
                Geometry::Point([lon, lat]),
                DamageProperties {
                    id: cluster.id,
                    damage_type: cluster.damage_type.clone(),
                    severity: cluster.severity,
                    image_count: cluster.member_count(),
                    images,
                    avg_confidence: round3(cluster.avg_confidence()),
                    best_confidence: round3(cluster.best_confidence),
                    first_seen: cluster.first_seen,
                    last_seen: cluster.last_seen,
                },
            )
        })
        .collect();
    let metadata = DamageMetadata {
        generated: unix_now(),
        total_groups: clusters.len(),
        total_images: clusters.iter().map(DamageCluster::member_count).sum(),
        grouping_distance_m: radius_m,
    };
    FeatureCollection::new(features, metadata)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupProperties {
    pub timestamp: f64,
    pub detections: Vec<Detection>,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub generated: f64,
    pub total_features: usize,
}

pub type BackupCollection = FeatureCollection<BackupProperties, BackupMetadata>;

/// One Point per detection event of a failed batch.
pub fn backup_collection(events: &[DetectionEvent]) -> BackupCollection {
    let features: Vec<_> = events
        .iter()
        .map(|event| {
            Feature::new(
                Geometry::Point(event.position.lon_lat()),
                BackupProperties {
                    timestamp: event.position.timestamp,
                    detections: event.detections.clone(),
                    altitude: event.position.altitude,
                    speed: event.speed,
                },
            )
        })
        .collect();
    let metadata = BackupMetadata {
        generated: unix_now(),
        total_features: features.len(),
    };
    FeatureCollection::new(features, metadata)
}

/// Rebuilds the detection events stored in a backup document.
pub fn backup_events(collection: &BackupCollection) -> Vec<DetectionEvent> {
    collection
        .features
        .iter()
        .filter_map(|feature| match feature.geometry {
            Geometry::Point([longitude, latitude]) => Some(DetectionEvent {
                position: Position {
                    latitude,
                    longitude,
                    altitude: feature.properties.altitude,
                    timestamp: feature.properties.timestamp,
                },
                speed: feature.properties.speed,
                detections: feature.properties.detections.clone(),
            }),
            Geometry::LineString(_) => None,
        })
        .collect()
}

/// Pretty-prints a document to `path`, creating parent directories.
pub fn write_document<T: Serialize>(path: &Path, document: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(document)?;
    fs::write(path, body)
}
