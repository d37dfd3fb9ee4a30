//! Runtime configuration shared by every pipeline component.
//!
//! All sections are defaulted so a partial YAML/JSON document only needs to
//! name the values it overrides.

use crate::damage::severity::SeverityTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub surface: SurfaceConfig,
    pub damage: DamageConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
    pub classes: ClassConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Minimum travelled distance between two surface samples.
    pub segment_length_m: f64,
    pub smoothing_window: usize,
    /// When disabled every sample is taken verbatim.
    pub smoothing: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            segment_length_m: 5.0,
            smoothing_window: 3,
            smoothing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageConfig {
    pub cluster_radius_m: f64,
    pub severity: SeverityTable,
}

impl Default for DamageConfig {
    fn default() -> Self {
        Self {
            cluster_radius_m: 1.0,
            severity: SeverityTable::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Remote `/upload` endpoint. Without one every batch is backed up.
    pub endpoint: Option<String>,
    pub device_id: Option<String>,
    pub upload_interval_secs: f64,
    pub batch_size: usize,
    pub timeout_secs: f64,
    /// Events held in memory before drop-oldest kicks in.
    pub buffer_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            device_id: None,
            upload_interval_secs: 30.0,
            batch_size: 10,
            timeout_secs: 10.0,
            buffer_capacity: 10_000,
        }
    }
}

impl UploadConfig {
    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs_f64(self.upload_interval_secs.max(0.01))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.01))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backup_dir: PathBuf,
    pub max_backup_files: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            max_backup_files: 100,
        }
    }
}

/// Routes oracle class labels to the smoother or the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    pub surface_classes: Vec<String>,
    pub damage_classes: Vec<String>,
}

impl Default for ClassConfig {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            surface_classes: owned(&[
                "asphalt_excellent",
                "asphalt_good",
                "asphalt_fair",
                "asphalt_poor",
                "concrete",
                "cobblestone",
                "paving_stones",
                "gravel",
                "dirt",
            ]),
            damage_classes: owned(&["pothole", "crack", "patch", "bump", "debris"]),
        }
    }
}

impl ClassConfig {
    pub fn is_surface(&self, label: &str) -> bool {
        self.surface_classes.iter().any(|c| c == label)
    }

    pub fn is_damage(&self, label: &str) -> bool {
        self.damage_classes.iter().any(|c| c == label)
    }
}
