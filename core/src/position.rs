use crate::prelude::{PipelineError, PipelineResult};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

/// A single geotagged fix. Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: f64,
}

impl Position {
    /// Builds a validated position.
    pub fn new(latitude: f64, longitude: f64, timestamp: f64) -> PipelineResult<Self> {
        let position = Self {
            latitude,
            longitude,
            altitude: None,
            timestamp,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(PipelineError::invalid(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(PipelineError::invalid(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        if !self.timestamp.is_finite() {
            return Err(PipelineError::invalid("timestamp is not finite"));
        }
        Ok(())
    }

    /// GeoJSON coordinate order.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        haversine_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance in meters.
pub fn haversine_m(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let a = Point::new(lon_a, lat_a);
    let b = Point::new(lon_b, lat_b);
    a.haversine_distance(&b)
}
