use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use tracing::debug;

use crate::body::layout::{BodyPose, JOINT_COUNT, SHAPE_COUNT};
use crate::body::BodyModel;
use crate::camera::CameraModel;
use crate::error::MotionError;
use crate::fit::FittedTrajectory;

/// Full-video-length result arrays.
///
/// Frames outside every retained segment stay at zero (pose, shape,
/// translation) and `None` (vertices); `covered` marks the frames that hold
/// a reconstruction.
#[derive(Debug, Clone)]
pub struct MotionArrays {
    /// [N, 55, 3] 回転ベクトル
    pub poses: Array3<f64>,
    /// [N, 10]
    pub shapes: Array2<f64>,
    /// [N, 3] 骨盤基準の並進
    pub transl: Array2<f64>,
    pub vertices: Vec<Option<Vec<Vector3<f64>>>>,
    pub covered: Vec<bool>,
}

impl MotionArrays {
    pub fn zeros(frames: usize) -> Self {
        Self {
            poses: Array3::zeros((frames, JOINT_COUNT, 3)),
            shapes: Array2::zeros((frames, SHAPE_COUNT)),
            transl: Array2::zeros((frames, 3)),
            vertices: vec![None; frames],
            covered: vec![false; frames],
        }
    }

    pub fn len(&self) -> usize {
        self.covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    /// 再構成のあるフレーム番号（0始まり、昇順）
    pub fn covered_frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.covered
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| c.then_some(i))
    }

    pub fn pose(&self, frame: usize) -> BodyPose {
        BodyPose {
            rotations: (0..JOINT_COUNT)
                .map(|j| {
                    Vector3::new(
                        self.poses[[frame, j, 0]],
                        self.poses[[frame, j, 1]],
                        self.poses[[frame, j, 2]],
                    )
                })
                .collect(),
        }
    }

    pub fn shape(&self, frame: usize) -> [f64; SHAPE_COUNT] {
        std::array::from_fn(|c| self.shapes[[frame, c]])
    }

    pub fn translation(&self, frame: usize) -> Vector3<f64> {
        Vector3::new(
            self.transl[[frame, 0]],
            self.transl[[frame, 1]],
            self.transl[[frame, 2]],
        )
    }
}

/// 平滑化済み軌跡をメッシュ評価し、全長配列へ書き込む
pub struct ResultAssembler<'a, M: ?Sized> {
    model: &'a M,
    camera: CameraModel,
}

impl<'a, M: BodyModel + ?Sized> ResultAssembler<'a, M> {
    pub fn new(model: &'a M, camera: CameraModel) -> Self {
        Self { model, camera }
    }

    /// セグメント1つ分を書き込む
    ///
    /// 並進はモデル出力の骨盤位置に置き換える。姿勢はモデルが返す外部向けの関節順。
    pub fn scatter(
        &self,
        arrays: &mut MotionArrays,
        frame_ids: &[usize],
        trajectory: &FittedTrajectory,
    ) -> Result<(), MotionError> {
        if frame_ids.len() != trajectory.len() {
            return Err(MotionError::ShapeMismatch {
                what: "fitted trajectory frames",
                expected: frame_ids.len(),
                actual: trajectory.len(),
            });
        }

        // 書き込む前に全フレームを検証する（途中で失敗しても配列は変わらない）
        if let Some(&frame) = frame_ids.iter().find(|&&f| f >= arrays.len()) {
            return Err(MotionError::ShapeMismatch {
                what: "frame index within video",
                expected: arrays.len(),
                actual: frame,
            });
        }
        let mut outputs = Vec::with_capacity(frame_ids.len());
        for t in 0..frame_ids.len() {
            let output = self.model.evaluate(&trajectory.params(t), &self.camera);
            if output.standard_pose.rotations.len() != JOINT_COUNT {
                return Err(MotionError::ShapeMismatch {
                    what: "body model pose joints",
                    expected: JOINT_COUNT,
                    actual: output.standard_pose.rotations.len(),
                });
            }
            outputs.push(output);
        }

        for (t, (&frame, output)) in frame_ids.iter().zip(outputs).enumerate() {
            for (j, r) in output.standard_pose.rotations.iter().enumerate() {
                for c in 0..3 {
                    arrays.poses[[frame, j, c]] = r[c];
                }
            }
            for (c, v) in trajectory.shapes[t].iter().enumerate() {
                arrays.shapes[[frame, c]] = *v;
            }
            for c in 0..3 {
                arrays.transl[[frame, c]] = output.transl_pelvis[c];
            }
            arrays.vertices[frame] = Some(output.vertices);
            arrays.covered[frame] = true;
        }

        debug!(
            "Assembled frames {:?}..={:?}",
            frame_ids.first(),
            frame_ids.last()
        );
        Ok(())
    }
}
