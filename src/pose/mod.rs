pub mod crop;
pub mod detection;
pub mod estimate;
pub mod hint;
pub mod keypoint;

pub use crop::{BBox, CornerBox, CropRegion};
pub use detection::{select_main_track, Track};
pub use estimate::{PoseEstimate, RegressorOutput};
pub use hint::{attention_hint, AttentionHint};
pub use keypoint::{Keypoint, KeypointIndex, Keypoints2D};
