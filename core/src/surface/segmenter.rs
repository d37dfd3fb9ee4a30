use crate::position::Position;
use serde::{Deserialize, Serialize};

/// Label used for route points captured before the first surface sample.
pub const UNKNOWN_SURFACE: &str = "unknown";

/// Maximal run of consecutive route points sharing one surface label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub coordinates: Vec<Position>,
    pub surface_label: String,
    /// Confidence of the sample that opened the segment.
    pub confidence: f64,
}

impl RouteSegment {
    pub fn length_m(&self) -> f64 {
        self.coordinates
            .windows(2)
            .map(|pair| pair[0].distance_to(&pair[1]))
            .sum()
    }
}

/// Splits the ordered route into segments at every label change.
///
/// Adjacent segments share their boundary point: the last point of a
/// closed segment is repeated as the first point of the next one.
#[derive(Debug, Default)]
pub struct RouteSegmenter {
    closed: Vec<RouteSegment>,
    open: Option<RouteSegment>,
    points: usize,
}

impl RouteSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Position, label: &str, confidence: f64) {
        self.points += 1;
        match self.open.take() {
            Some(mut segment) if segment.surface_label == label => {
                segment.coordinates.push(position);
                self.open = Some(segment);
            }
            Some(segment) => {
                let boundary = segment.coordinates.last().copied();
                debug_assert!(boundary.is_some(), "open segment without coordinates");
                self.closed.push(segment);
                let mut coordinates = Vec::with_capacity(2);
                coordinates.extend(boundary);
                coordinates.push(position);
                self.open = Some(RouteSegment {
                    coordinates,
                    surface_label: label.to_string(),
                    confidence,
                });
            }
            None => {
                self.open = Some(RouteSegment {
                    coordinates: vec![position],
                    surface_label: label.to_string(),
                    confidence,
                });
            }
        }
    }

    /// Closed segments in route order.
    pub fn closed(&self) -> &[RouteSegment] {
        &self.closed
    }

    /// Every segment including the one still open.
    pub fn segments(&self) -> Vec<RouteSegment> {
        let mut segments = self.closed.clone();
        segments.extend(self.open.iter().cloned());
        segments
    }

    pub fn segment_count(&self) -> usize {
        self.closed.len() + usize::from(self.open.is_some())
    }

    pub fn point_count(&self) -> usize {
        self.points
    }

    pub fn reset(&mut self) {
        self.closed.clear();
        self.open = None;
        self.points = 0;
    }
}

/// Rebuilds the original route by dropping each shared boundary point.
pub fn reconstruct_route(segments: &[RouteSegment]) -> Vec<Position> {
    let mut route = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        let skip = usize::from(index > 0);
        route.extend(segment.coordinates.iter().skip(skip).copied());
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(i: usize) -> Position {
        Position::new(48.0 + i as f64 * 0.00005, 11.0 + i as f64 * 0.00002, i as f64).unwrap()
    }

    fn build(labels: &[&str]) -> (Vec<Position>, RouteSegmenter) {
        let mut segmenter = RouteSegmenter::new();
        let mut route = Vec::new();
        for (i, label) in labels.iter().enumerate() {
            let p = pos(i);
            route.push(p);
            segmenter.push(p, label, 0.5);
        }
        (route, segmenter)
    }

    #[test]
    fn label_change_opens_new_segment_with_shared_boundary() {
        let (route, segmenter) = build(&["gravel", "gravel", "dirt", "dirt", "gravel"]);
        let segments = segmenter.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].coordinates, vec![route[0], route[1]]);
        assert_eq!(segments[1].coordinates, vec![route[1], route[2], route[3]]);
        assert_eq!(segments[2].coordinates, vec![route[3], route[4]]);
        assert_eq!(segmenter.closed().len(), 2);
    }

    #[test]
    fn segments_round_trip_to_original_route() {
        let sequences: [&[&str]; 5] = [
            &["a"],
            &["a", "a", "a"],
            &["a", "b", "a", "b"],
            &["a", "b", "b", "c", "c", "c", "a"],
            &[UNKNOWN_SURFACE, UNKNOWN_SURFACE, "gravel", "gravel", "dirt"],
        ];
        for labels in sequences {
            let (route, segmenter) = build(labels);
            assert_eq!(reconstruct_route(&segmenter.segments()), route, "{labels:?}");
            assert_eq!(segmenter.point_count(), labels.len());
        }
    }

    #[test]
    fn adjacent_segments_never_share_a_label() {
        let (_, segmenter) = build(&["a", "b", "b", "a", "a", "c"]);
        let segments = segmenter.segments();
        for pair in segments.windows(2) {
            assert_ne!(pair[0].surface_label, pair[1].surface_label);
        }
    }

    #[test]
    fn segment_keeps_opening_confidence() {
        let mut segmenter = RouteSegmenter::new();
        segmenter.push(pos(0), "gravel", 0.7);
        segmenter.push(pos(1), "gravel", 0.9);
        segmenter.push(pos(2), "dirt", 0.6);
        let segments = segmenter.segments();
        assert_eq!(segments[0].confidence, 0.7);
        assert_eq!(segments[1].confidence, 0.6);
    }

    #[test]
    fn empty_segmenter_has_no_segments() {
        let segmenter = RouteSegmenter::new();
        assert!(segmenter.segments().is_empty());
        assert_eq!(segmenter.segment_count(), 0);
        assert!(reconstruct_route(&[]).is_empty());
    }
}
