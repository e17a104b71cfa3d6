pub mod intrinsics;

pub use intrinsics::{focal_from_fov, CameraModel};
