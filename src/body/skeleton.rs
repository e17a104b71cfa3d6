use nalgebra::{Rotation3, Vector3};

use super::layout::{Shape, JOINT_COUNT, PARENTS, PELVIS};
use super::model::{BodyModel, BodyOutput, BodyParams};
use crate::camera::CameraModel;

/// 骨盤の基準位置（体座標、メートル、y上向き・x被写体の左・z前方）
const REST_PELVIS: [f64; 3] = [0.0, -0.35, 0.01];

/// 親関節からのオフセット（メートル）
const REST_OFFSETS: [[f64; 3]; JOINT_COUNT] = [
    [0.0, 0.0, 0.0],
    [0.06, -0.09, 0.0],
    [-0.06, -0.09, 0.0],
    [0.0, 0.11, -0.02],
    [0.04, -0.38, 0.01],
    [-0.04, -0.38, 0.01],
    [0.0, 0.13, 0.0],
    [-0.01, -0.40, -0.04],
    [0.01, -0.40, -0.04],
    [0.0, 0.05, 0.02],
    [0.02, -0.06, 0.12],
    [-0.02, -0.06, 0.12],
    [0.0, 0.21, -0.03],
    [0.07, 0.11, -0.01],
    [-0.07, 0.11, -0.01],
    [0.0, 0.09, 0.05],
    [0.11, 0.04, -0.01],
    [-0.11, 0.04, -0.01],
    [0.26, -0.01, -0.02],
    [-0.26, -0.01, -0.02],
    [0.25, 0.01, 0.0],
    [-0.25, 0.01, 0.0],
    [0.0, -0.02, 0.05],
    [0.03, 0.06, 0.09],
    [-0.03, 0.06, 0.09],
    // 左手
    [0.09, 0.0, 0.025], [0.035, 0.0, 0.0], [0.025, 0.0, 0.0],
    [0.095, 0.0, 0.0], [0.035, 0.0, 0.0], [0.025, 0.0, 0.0],
    [0.08, 0.0, -0.04], [0.025, 0.0, 0.0], [0.02, 0.0, 0.0],
    [0.09, 0.0, -0.02], [0.03, 0.0, 0.0], [0.025, 0.0, 0.0],
    [0.03, -0.01, 0.03], [0.03, 0.0, 0.015], [0.025, 0.0, 0.01],
    // 右手
    [-0.09, 0.0, 0.025], [-0.035, 0.0, 0.0], [-0.025, 0.0, 0.0],
    [-0.095, 0.0, 0.0], [-0.035, 0.0, 0.0], [-0.025, 0.0, 0.0],
    [-0.08, 0.0, -0.04], [-0.025, 0.0, 0.0], [-0.02, 0.0, 0.0],
    [-0.09, 0.0, -0.02], [-0.03, 0.0, 0.0], [-0.025, 0.0, 0.0],
    [-0.03, -0.01, 0.03], [-0.03, 0.0, 0.015], [-0.025, 0.0, 0.01],
];

/// Bone group driven by one shape coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoneGroup {
    Torso,
    Head,
    Arms,
    Legs,
    Hands,
}

impl BoneGroup {
    fn of(joint: usize) -> Self {
        match joint {
            15 | 22..=24 => Self::Head,
            16..=21 => Self::Arms,
            1 | 2 | 4 | 5 | 7 | 8 | 10 | 11 => Self::Legs,
            25..=54 => Self::Hands,
            _ => Self::Torso,
        }
    }

    /// 対応する体型係数のインデックス
    fn coefficient(self) -> usize {
        match self {
            Self::Torso => 1,
            Self::Head => 2,
            Self::Arms => 3,
            Self::Legs => 4,
            Self::Hands => 5,
        }
    }
}

/// Kinematic stick-figure body model.
///
/// Vertices are the joint positions themselves. Shape coefficient 0 scales
/// the whole skeleton, 1..=5 scale the torso, head, arm, leg and hand bone
/// groups; the remaining coefficients have no effect.
#[derive(Debug, Clone)]
pub struct SkeletonModel {
    parents: Vec<Option<usize>>,
    offsets: Vec<Vector3<f64>>,
    groups: Vec<BoneGroup>,
    rest_pelvis: Vector3<f64>,
}

impl SkeletonModel {
    pub fn new() -> Self {
        Self {
            parents: PARENTS.to_vec(),
            offsets: REST_OFFSETS
                .iter()
                .map(|o| Vector3::new(o[0], o[1], o[2]))
                .collect(),
            groups: (0..JOINT_COUNT).map(BoneGroup::of).collect(),
            rest_pelvis: Vector3::new(REST_PELVIS[0], REST_PELVIS[1], REST_PELVIS[2]),
        }
    }

    fn bone_scale(&self, shape: &Shape, joint: usize) -> f64 {
        1.0 + 0.05 * shape[0] + 0.03 * shape[self.groups[joint].coefficient()]
    }

    /// 骨盤の基準位置（並進ゼロ、体型込み）
    pub fn rest_pelvis(&self, shape: &Shape) -> Vector3<f64> {
        self.rest_pelvis * self.bone_scale(shape, PELVIS)
    }
}

impl Default for SkeletonModel {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyModel for SkeletonModel {
    fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    fn joints(&self, params: &BodyParams) -> Vec<Vector3<f64>> {
        let mut positions = vec![Vector3::zeros(); JOINT_COUNT];
        let mut global = vec![Rotation3::identity(); JOINT_COUNT];

        positions[PELVIS] = self.rest_pelvis(&params.shape) + params.transl;
        global[PELVIS] = params.pose.rotation(PELVIS);

        for j in 1..JOINT_COUNT {
            let Some(p) = self.parents[j] else { continue };
            let offset = self.offsets[j] * self.bone_scale(&params.shape, j);
            positions[j] = positions[p] + global[p] * offset;
            global[j] = global[p] * params.pose.rotation(j);
        }
        positions
    }

    fn evaluate(&self, params: &BodyParams, _camera: &CameraModel) -> BodyOutput {
        let joints = self.joints(params);
        BodyOutput {
            vertices: joints.clone(),
            transl_pelvis: joints[PELVIS],
            joints,
            standard_pose: params.pose.clone(),
        }
    }
}
