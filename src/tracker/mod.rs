pub mod gaussian;
pub mod one_euro;
pub mod segment;

pub use gaussian::PostSmoother;
pub use one_euro::KeypointSmoother;
pub use segment::{impute, min_segment_length, segment_track, split_runs, Segment};
