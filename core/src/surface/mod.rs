pub mod segmenter;
pub mod smoother;

pub use segmenter::{reconstruct_route, RouteSegment, RouteSegmenter, UNKNOWN_SURFACE};
pub use smoother::{majority_vote, SmoothedSurface, SurfaceSample, SurfaceSmoother};
