use crate::position::Position;
use crate::prelude::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};

/// Reference to a stored frame backing a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub url: String,
}

/// One `(class, confidence, bbox)` tuple returned by the inference oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_label: String,
    pub confidence: f64,
    /// `[x1, y1, x2, y2]` in pixels.
    pub bbox: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.class_label.trim().is_empty() {
            return Err(PipelineError::invalid("detection without class label"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::invalid(format!(
                "confidence {} outside [0, 1] for {}",
                self.confidence, self.class_label
            )));
        }
        if self.bbox.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::invalid(format!(
                "non-finite bbox for {}",
                self.class_label
            )));
        }
        Ok(())
    }
}

/// Everything observed during one capture tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub position: Position,
    /// Ground speed in km/h when the receiver reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub detections: Vec<Detection>,
}

impl DetectionEvent {
    pub fn new(position: Position, detections: Vec<Detection>) -> Self {
        Self {
            position,
            speed: None,
            detections,
        }
    }

    /// Validates the position and strips malformed detections.
    ///
    /// A bad position rejects the whole event; a bad detection only
    /// removes that entry. Returns the rejected detections' errors.
    pub fn sanitize(&mut self) -> PipelineResult<Vec<PipelineError>> {
        self.position.validate()?;
        let mut rejected = Vec::new();
        self.detections.retain(|detection| match detection.validate() {
            Ok(()) => true,
            Err(err) => {
                rejected.push(err);
                false
            }
        });
        Ok(rejected)
    }
}

/// A damage observation fed to the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    pub damage_type: String,
    pub position: Position,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
}

impl DamageEvent {
    pub fn new(damage_type: impl Into<String>, position: Position, confidence: f64) -> Self {
        Self {
            damage_type: damage_type.into(),
            position,
            confidence,
            image: None,
        }
    }

    pub fn timestamp(&self) -> f64 {
        self.position.timestamp
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.position.validate()?;
        if self.damage_type.trim().is_empty() {
            return Err(PipelineError::invalid("damage event without type"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::invalid(format!(
                "damage confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}
