//! Spatial aggregation and resilient delivery core for ride surface mapping.
//!
//! Per-frame surface and damage detections from a moving platform are
//! smoothed into route segments, clustered into deduplicated damage sites,
//! and queued for upload with a local GeoJSON backup when the network is
//! unavailable.

pub mod config;
pub mod damage;
pub mod detection;
pub mod export;
pub mod position;
pub mod prelude;
pub mod session;
pub mod surface;
pub mod telemetry;
pub mod upload;

pub use config::PipelineConfig;
pub use detection::{DamageEvent, Detection, DetectionEvent, ImageRef};
pub use position::Position;
pub use prelude::{PipelineError, PipelineResult};
pub use session::{RideSession, SessionSnapshot, TickOutcome};
