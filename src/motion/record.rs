use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assemble::MotionArrays;
use crate::body::layout::{
    BodyPose, Shape, BODY, JAW, JOINT_COUNT, LEFT_EYE, LEFT_HAND, RIGHT_EYE, RIGHT_HAND, ROOT,
    SHAPE_COUNT,
};
use crate::camera::CameraModel;
use crate::error::MotionError;

/// 1フレーム分の出力パラメータ（JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRecord {
    pub betas: Vec<f64>,
    pub root_pose: [f64; 3],
    pub body_pose: Vec<[f64; 3]>,
    pub jaw_pose: [f64; 3],
    pub leye_pose: [f64; 3],
    pub reye_pose: [f64; 3],
    pub lhand_pose: Vec<[f64; 3]>,
    pub rhand_pose: Vec<[f64; 3]>,
    pub trans: [f64; 3],
    pub focal: [f64; 2],
    pub princpt: [f64; 2],
    pub img_size_wh: [u32; 2],
    pub pad_ratio: f64,
}

fn to_array(v: &Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

impl MotionRecord {
    /// 全長配列の1フレームから作る。目の回転は常にゼロ
    pub fn from_arrays(arrays: &MotionArrays, frame: usize, camera: &CameraModel, pad_ratio: f64) -> Self {
        let pose = arrays.pose(frame);
        let group = |range: std::ops::Range<usize>| -> Vec<[f64; 3]> {
            pose.rotations[range].iter().map(to_array).collect()
        };
        Self {
            betas: arrays.shape(frame).to_vec(),
            root_pose: to_array(&pose.rotations[ROOT]),
            body_pose: group(BODY),
            jaw_pose: to_array(&pose.rotations[JAW]),
            leye_pose: [0.0; 3],
            reye_pose: [0.0; 3],
            lhand_pose: group(LEFT_HAND),
            rhand_pose: group(RIGHT_HAND),
            trans: to_array(&arrays.translation(frame)),
            focal: camera.focal(),
            princpt: camera.principal_point(),
            img_size_wh: [camera.width, camera.height],
            pad_ratio,
        }
    }

    /// 配列長の検査
    pub fn validate(&self) -> Result<(), MotionError> {
        let checks = [
            ("betas", SHAPE_COUNT, self.betas.len()),
            ("body_pose", BODY.len(), self.body_pose.len()),
            ("lhand_pose", LEFT_HAND.len(), self.lhand_pose.len()),
            ("rhand_pose", RIGHT_HAND.len(), self.rhand_pose.len()),
        ];
        for (what, expected, actual) in checks {
            if expected != actual {
                return Err(MotionError::ShapeMismatch { what, expected, actual });
            }
        }
        Ok(())
    }

    /// 55関節の姿勢に戻す
    pub fn pose(&self) -> BodyPose {
        let mut pose = BodyPose::zeros();
        let set = |pose: &mut BodyPose, start: usize, values: &[[f64; 3]]| {
            for (i, v) in values.iter().enumerate() {
                if let Some(r) = pose.rotations.get_mut(start + i) {
                    *r = Vector3::new(v[0], v[1], v[2]);
                }
            }
        };
        set(&mut pose, ROOT, &[self.root_pose]);
        set(&mut pose, BODY.start, &self.body_pose);
        set(&mut pose, JAW, &[self.jaw_pose]);
        set(&mut pose, LEFT_EYE, &[self.leye_pose]);
        set(&mut pose, RIGHT_EYE, &[self.reye_pose]);
        set(&mut pose, LEFT_HAND.start, &self.lhand_pose);
        set(&mut pose, RIGHT_HAND.start, &self.rhand_pose);
        debug_assert_eq!(pose.rotations.len(), JOINT_COUNT);
        pose
    }

    pub fn shape(&self) -> Shape {
        let mut shape = [0.0; SHAPE_COUNT];
        for (dst, src) in shape.iter_mut().zip(&self.betas) {
            *dst = *src;
        }
        shape
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.trans[0], self.trans[1], self.trans[2])
    }
}

/// フレーム番号（0始まり）→ ファイル名（1始まり、5桁ゼロ埋め）
pub fn record_file_name(frame: usize) -> String {
    format!("{:05}.json", frame + 1)
}

/// ファイル名 → フレーム番号（0始まり）
pub fn frame_from_file_name(name: &str) -> Option<usize> {
    let stem = name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse::<usize>().ok()?.checked_sub(1)
}

/// 再構成のあるフレームだけ書き出す。書いたファイル数を返す
pub fn write_records(
    dir: &Path,
    arrays: &MotionArrays,
    camera: &CameraModel,
    pad_ratio: f64,
) -> Result<usize> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut written = 0;
    for frame in arrays.covered_frames() {
        let record = MotionRecord::from_arrays(arrays, frame, camera, pad_ratio);
        let path = dir.join(record_file_name(frame));
        let json = serde_json::to_string(&record)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    info!("Wrote {} motion records to {}", written, dir.display());
    Ok(written)
}

pub fn read_record(path: &Path) -> Result<MotionRecord> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read motion record {}", path.display()))?;
    let record: MotionRecord =
        serde_json::from_str(&content).map_err(|e| MotionError::InvalidRecord {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    record.validate().map_err(|e| MotionError::InvalidRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(record)
}
