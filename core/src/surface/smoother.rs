use crate::config::SurfaceConfig;
use crate::position::Position;
use crate::telemetry::log::LogManager;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Raw surface classification taken at a rate-limited position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSample {
    pub position: Position,
    pub label: String,
    pub confidence: f64,
}

/// Stable label produced by the vote over the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothedSurface {
    pub label: String,
    pub confidence: f64,
}

/// Majority vote over a bounded window of the most recent samples.
pub struct SurfaceSmoother {
    window: VecDeque<SurfaceSample>,
    capacity: usize,
    segment_length_m: f64,
    smoothing: bool,
    last_sample: Option<Position>,
    current: Option<SmoothedSurface>,
    logger: LogManager,
}

impl SurfaceSmoother {
    pub fn new(config: &SurfaceConfig) -> Self {
        let capacity = config.smoothing_window.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            segment_length_m: config.segment_length_m.max(0.0),
            smoothing: config.smoothing,
            last_sample: None,
            current: None,
            logger: LogManager::new("smoother"),
        }
    }

    /// Offers a raw sample taken at `position`.
    ///
    /// Samples closer than `segment_length_m` to the previous accepted one
    /// are ignored and `None` is returned; otherwise the new resolved surface.
    pub fn offer(
        &mut self,
        position: Position,
        label: &str,
        confidence: f64,
    ) -> Option<SmoothedSurface> {
        if let Some(last) = &self.last_sample {
            if last.distance_to(&position) < self.segment_length_m {
                return None;
            }
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(SurfaceSample {
            position,
            label: label.to_string(),
            confidence,
        });
        self.last_sample = Some(position);

        let resolved = if self.smoothing {
            self.vote()
        } else {
            Some(SmoothedSurface {
                label: label.to_string(),
                confidence,
            })
        }?;

        if self.current.as_ref().map(|c| c.label.as_str()) != Some(resolved.label.as_str()) {
            self.logger.record(&format!(
                "surface {} ({:.2})",
                resolved.label, resolved.confidence
            ));
        }
        self.current = Some(resolved.clone());
        Some(resolved)
    }

    /// Vote over the current window; `None` while the window is empty.
    pub fn vote(&self) -> Option<SmoothedSurface> {
        majority_vote(self.window.iter())
    }

    pub fn current(&self) -> Option<&SmoothedSurface> {
        self.current.as_ref()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_sample = None;
        self.current = None;
    }
}

/// Picks the most frequent label; ties go to the label that appears first.
/// The confidence is the mean over the winning label's samples.
pub fn majority_vote<'a, I>(samples: I) -> Option<SmoothedSurface>
where
    I: IntoIterator<Item = &'a SurfaceSample>,
{
    // (label, count, confidence sum) in order of first appearance.
    let mut tally: Vec<(&str, usize, f64)> = Vec::new();
    for sample in samples {
        match tally.iter_mut().find(|(label, _, _)| *label == sample.label) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += sample.confidence;
            }
            None => tally.push((sample.label.as_str(), 1, sample.confidence)),
        }
    }

    let mut winner: Option<&(&str, usize, f64)> = None;
    for entry in &tally {
        if winner.map_or(true, |best| entry.1 > best.1) {
            winner = Some(entry);
        }
    }

    winner.map(|(label, count, sum)| SmoothedSurface {
        label: label.to_string(),
        confidence: sum / *count as f64,
    })
}
