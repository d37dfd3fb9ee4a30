use crate::generator::profile::RideConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use surfacecore::PipelineConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub pipeline: PipelineConfig,
    pub ride: RideConfig,
    /// Where `route.geojson` and `damages.geojson` land at session end.
    pub output_dir: Option<PathBuf>,
    /// Pace the capture loop at the ride's tick interval.
    pub realtime: bool,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(ticks: usize, seed: u64) -> Self {
        Self {
            ride: RideConfig {
                ticks,
                seed,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("tools/data"))
    }
}
