pub mod solver;
pub mod temporal;

use nalgebra::Vector3;

use crate::body::layout::{BodyPose, Shape};
use crate::body::BodyParams;

pub use temporal::TemporalFitter;

/// セグメント内のフレームごとの最適化結果
#[derive(Debug, Clone, PartialEq)]
pub struct FittedTrajectory {
    pub poses: Vec<BodyPose>,
    pub shapes: Vec<Shape>,
    pub transl: Vec<Vector3<f64>>,
}

impl FittedTrajectory {
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn params(&self, t: usize) -> BodyParams {
        BodyParams {
            pose: self.poses[t].clone(),
            shape: self.shapes[t],
            transl: self.transl[t],
        }
    }
}
