use nalgebra::Vector3;

use super::layout::{BodyPose, Shape};
use crate::camera::CameraModel;

/// Parameters of one body instance in camera space.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyParams {
    pub pose: BodyPose,
    pub shape: Shape,
    pub transl: Vector3<f64>,
}

/// Result of evaluating the body model for one frame.
#[derive(Debug, Clone)]
pub struct BodyOutput {
    pub vertices: Vec<Vector3<f64>>,
    pub joints: Vec<Vector3<f64>>,
    /// 骨盤関節を基準にした並進
    pub transl_pelvis: Vector3<f64>,
    /// 外部向けの関節順に並べ替えた姿勢
    pub standard_pose: BodyPose,
}

/// Parametric body-mesh evaluator.
///
/// The fitter only needs `joints`; `evaluate` is called once per frame after
/// smoothing to obtain the mesh and the pelvis-anchored translation.
pub trait BodyModel {
    /// 運動学ツリーの親関節
    fn parents(&self) -> &[Option<usize>];

    /// カメラ座標の関節位置
    fn joints(&self, params: &BodyParams) -> Vec<Vector3<f64>>;

    fn evaluate(&self, params: &BodyParams, camera: &CameraModel) -> BodyOutput;
}
