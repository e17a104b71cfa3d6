pub mod joint_map;
pub mod layout;
pub mod model;
pub mod skeleton;

pub use joint_map::JointMap;
pub use layout::{BodyPose, Shape, JOINT_COUNT, SHAPE_COUNT};
pub use model::{BodyModel, BodyOutput, BodyParams};
pub use skeleton::SkeletonModel;
