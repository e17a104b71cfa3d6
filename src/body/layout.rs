//! Joint layout shared by the fitter, the body model and the record writer.
//!
//! 55 joints: root, 21 body, jaw, two eyes, 15 per hand. Rotations are
//! axis-angle vectors relative to the parent joint.

use std::ops::Range;

use nalgebra::{Rotation3, Vector3};

pub const JOINT_COUNT: usize = 55;
pub const SHAPE_COUNT: usize = 10;

pub const ROOT: usize = 0;
pub const BODY: Range<usize> = 1..22;
pub const JAW: usize = 22;
pub const LEFT_EYE: usize = 23;
pub const RIGHT_EYE: usize = 24;
pub const LEFT_HAND: Range<usize> = 25..40;
pub const RIGHT_HAND: Range<usize> = 40..55;

pub const PELVIS: usize = 0;
pub const HEAD: usize = 15;

/// 体型係数
pub type Shape = [f64; SHAPE_COUNT];

/// 運動学ツリーの親関節（ルートは None）
pub const PARENTS: [Option<usize>; JOINT_COUNT] = [
    None,
    // 1..=21 体幹・四肢
    Some(0), Some(0), Some(0), Some(1), Some(2), Some(3), Some(4), Some(5), Some(6),
    Some(7), Some(8), Some(9), Some(9), Some(9), Some(12), Some(13), Some(14),
    Some(16), Some(17), Some(18), Some(19),
    // 22..=24 顎・目
    Some(15), Some(15), Some(15),
    // 25..=39 左手（人差し指・中指・小指・薬指・親指）
    Some(20), Some(25), Some(26), Some(20), Some(28), Some(29), Some(20), Some(31), Some(32),
    Some(20), Some(34), Some(35), Some(20), Some(37), Some(38),
    // 40..=54 右手
    Some(21), Some(40), Some(41), Some(21), Some(43), Some(44), Some(21), Some(46), Some(47),
    Some(21), Some(49), Some(50), Some(21), Some(52), Some(53),
];

/// 全関節の回転ベクトル
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPose {
    pub rotations: Vec<Vector3<f64>>,
}

impl BodyPose {
    pub fn zeros() -> Self {
        Self {
            rotations: vec![Vector3::zeros(); JOINT_COUNT],
        }
    }

    pub fn from_arrays(rotvecs: &[[f64; 3]]) -> Self {
        Self {
            rotations: rotvecs.iter().map(|r| Vector3::new(r[0], r[1], r[2])).collect(),
        }
    }

    pub fn to_arrays(&self) -> Vec<[f64; 3]> {
        self.rotations.iter().map(|r| [r.x, r.y, r.z]).collect()
    }

    pub fn rotation(&self, joint: usize) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(self.rotations[joint])
    }
}

impl Default for BodyPose {
    fn default() -> Self {
        Self::zeros()
    }
}

/// 回転ベクトル列を連続にそろえる
///
/// 各フレームの v を、同じ回転を表す v + 2πk·v/|v| のうち前フレームに
/// 最も近いものに置き換える。π 付近で軸が反転する列を成分ごとに平均しても
/// 回転が潰れない。
pub fn unwrap_rotvecs(series: &mut [Vector3<f64>]) {
    for t in 1..series.len() {
        let prev = series[t - 1];
        let v = series[t];
        let angle = v.norm();
        if angle < 1e-12 {
            continue;
        }
        // 2π の倍数だけずらした候補のうち最も近いもの
        let axis = v / angle;
        let k = ((prev.dot(&axis) - angle) / (2.0 * std::f64::consts::PI)).round();
        let candidate = v + axis * (2.0 * std::f64::consts::PI * k);
        if (candidate - prev).norm() < (v - prev).norm() {
            series[t] = candidate;
        }
    }
}

/// 姿勢列の全関節に [`unwrap_rotvecs`] をかける
pub fn unwrap_poses(poses: &mut [BodyPose]) {
    let joints = poses.first().map_or(0, |p| p.rotations.len());
    for j in 0..joints {
        let mut series: Vec<Vector3<f64>> = poses.iter().map(|p| p.rotations[j]).collect();
        unwrap_rotvecs(&mut series);
        for (pose, r) in poses.iter_mut().zip(series) {
            pose.rotations[j] = r;
        }
    }
}
