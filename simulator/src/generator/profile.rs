use anyhow::ensure;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use surfacecore::{Detection, DetectionEvent, ImageRef, Position};

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Configuration for generating a synthetic ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RideConfig {
    pub seed: u64,
    pub ticks: usize,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub heading_deg: f64,
    pub speed_mps: f64,
    pub tick_secs: f64,
    pub start_timestamp: f64,
    /// Distance covered by each surface before the next one starts.
    pub surface_run_m: f64,
    pub surfaces: Vec<String>,
    /// Probability that a frame reports a wrong surface label.
    pub label_noise: f64,
    pub damage_sites: usize,
    pub damage_types: Vec<String>,
    /// Along-track distance over which a damage site stays in view.
    pub damage_visibility_m: f64,
    pub false_positive_rate: f64,
}

impl Default for RideConfig {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            seed: 0,
            ticks: 3000,
            start_latitude: 48.2904,
            start_longitude: 11.0434,
            heading_deg: 45.0,
            speed_mps: 5.0,
            tick_secs: 0.1,
            start_timestamp: 1_700_000_000.0,
            surface_run_m: 120.0,
            surfaces: owned(&["asphalt_good", "paving_stones", "gravel", "asphalt_fair"]),
            label_noise: 0.15,
            damage_sites: 12,
            damage_types: owned(&["pothole", "crack", "bump"]),
            damage_visibility_m: 1.2,
            false_positive_rate: 0.002,
        }
    }
}

#[derive(Debug, Clone)]
struct DamageSite {
    along_m: f64,
    damage_type: String,
    base_confidence: f64,
}

/// Deterministic capture-tick source standing in for GPS, camera and the
/// inference oracle.
pub struct RideGenerator {
    config: RideConfig,
    rng: StdRng,
    sites: Vec<DamageSite>,
    tick: usize,
}

impl RideGenerator {
    pub fn new(config: &RideConfig) -> anyhow::Result<Self> {
        ensure!(!config.surfaces.is_empty(), "ride needs at least one surface");
        ensure!(config.speed_mps > 0.0, "speed must be positive");
        ensure!(config.tick_secs > 0.0, "tick interval must be positive");

        let mut rng = StdRng::seed_from_u64(config.seed);
        let route_m = config.ticks as f64 * config.speed_mps * config.tick_secs;
        let mut sites: Vec<DamageSite> = if config.damage_types.is_empty() {
            Vec::new()
        } else {
            (0..config.damage_sites)
                .map(|_| DamageSite {
                    along_m: rng.gen_range(0.0..route_m.max(1.0)),
                    damage_type: config.damage_types[rng.gen_range(0..config.damage_types.len())]
                        .clone(),
                    base_confidence: rng.gen_range(0.6..0.95),
                })
                .collect()
        };
        sites.sort_by(|a, b| a.along_m.total_cmp(&b.along_m));

        Ok(Self {
            config: config.clone(),
            rng,
            sites,
            tick: 0,
        })
    }

    fn position_at(&self, along_m: f64, timestamp: f64) -> Position {
        let heading = self.config.heading_deg.to_radians();
        let latitude = self.config.start_latitude + along_m * heading.cos() / METERS_PER_DEGREE;
        let longitude = self.config.start_longitude
            + along_m * heading.sin()
                / (METERS_PER_DEGREE * self.config.start_latitude.to_radians().cos());
        Position {
            latitude,
            longitude,
            altitude: Some(520.0),
            timestamp,
        }
    }

    fn surface_detection(&mut self, along_m: f64) -> Detection {
        let surfaces = &self.config.surfaces;
        let run = (along_m / self.config.surface_run_m.max(1.0)) as usize;
        let mut label = surfaces[run % surfaces.len()].clone();
        if surfaces.len() > 1 && self.rng.gen_bool(self.config.label_noise.clamp(0.0, 1.0)) {
            label = surfaces[self.rng.gen_range(0..surfaces.len())].clone();
        }
        let confidence = self.rng.gen_range(0.6..0.95);
        Detection::new(label, confidence, [0.0, 0.0, 640.0, 640.0])
    }

    fn damage_detections(&mut self, along_m: f64) -> Vec<Detection> {
        let half_window = self.config.damage_visibility_m / 2.0;
        let frame = self.tick;
        let mut detections = Vec::new();
        for site in &self.sites {
            if (site.along_m - along_m).abs() <= half_window {
                let confidence = (site.base_confidence + self.rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0);
                detections.push(
                    Detection::new(site.damage_type.clone(), confidence, [100.0, 100.0, 300.0, 300.0])
                        .with_image(damage_image(frame)),
                );
            }
        }
        if !self.config.damage_types.is_empty()
            && self.rng.gen_bool(self.config.false_positive_rate.clamp(0.0, 1.0))
        {
            detections.push(
                Detection::new("debris", self.rng.gen_range(0.5..0.8), [50.0, 50.0, 90.0, 90.0])
                    .with_image(damage_image(frame)),
            );
        }
        detections
    }
}

fn damage_image(frame: usize) -> ImageRef {
    ImageRef {
        filename: format!("damage_{frame:06}.jpg"),
        url: String::new(),
    }
}

impl Iterator for RideGenerator {
    type Item = DetectionEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tick >= self.config.ticks {
            return None;
        }
        let elapsed = self.tick as f64 * self.config.tick_secs;
        let along_m = elapsed * self.config.speed_mps;
        let position = self.position_at(along_m, self.config.start_timestamp + elapsed);

        let mut detections = vec![self.surface_detection(along_m)];
        detections.extend(self.damage_detections(along_m));
        self.tick += 1;

        Some(DetectionEvent {
            position,
            speed: Some(self.config.speed_mps * 3.6),
            detections,
        })
    }
}
