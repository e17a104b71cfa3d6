use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::crop::CropRegion;
use crate::body::layout::{BodyPose, Shape, JOINT_COUNT, SHAPE_COUNT};
use crate::error::MotionError;

/// Raw single-person output of the per-frame pose regressor.
///
/// Coordinates are in the regressor's square input image. Field lengths are
/// not trusted until [`PoseEstimate::from_regressor`] has validated them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorOutput {
    pub rotvec: Vec<[f64; 3]>,
    pub shape: Vec<f64>,
    /// カメラからの距離
    pub dist: f64,
    /// 基準関節の2D位置
    pub loc: [f64; 2],
}

/// Validated per-frame estimate in original-image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub pose: BodyPose,
    pub shape: Shape,
    pub dist: f64,
    pub loc: Vector2<f64>,
}

impl PoseEstimate {
    /// 回帰器出力を検証し、クロップ座標から元画像座標へ戻す
    pub fn from_regressor(output: &RegressorOutput, crop: &CropRegion) -> Result<Self, MotionError> {
        if output.rotvec.len() != JOINT_COUNT {
            return Err(MotionError::ShapeMismatch {
                what: "regressor rotation vectors",
                expected: JOINT_COUNT,
                actual: output.rotvec.len(),
            });
        }
        if output.shape.len() != SHAPE_COUNT {
            return Err(MotionError::ShapeMismatch {
                what: "regressor shape coefficients",
                expected: SHAPE_COUNT,
                actual: output.shape.len(),
            });
        }

        let mut shape = [0.0; SHAPE_COUNT];
        shape.copy_from_slice(&output.shape);
        let (x, y) = crop.to_original(output.loc[0], output.loc[1]);

        Ok(Self {
            pose: BodyPose::from_arrays(&output.rotvec),
            shape,
            dist: crop.distance_to_original(output.dist),
            loc: Vector2::new(x, y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop() -> CropRegion {
        CropRegion {
            left: 100.0,
            top: 50.0,
            width: 160.0,
            height: 160.0,
            pad_left: 10.0,
            pad_top: 0.0,
            scale: 2.0,
            crop_size: 320.0,
            raw_size: 640.0,
        }
    }

    fn output() -> RegressorOutput {
        RegressorOutput {
            rotvec: vec![[0.0; 3]; JOINT_COUNT],
            shape: vec![0.5; SHAPE_COUNT],
            dist: 2.0,
            loc: [210.0, 100.0],
        }
    }

    #[test]
    fn test_from_regressor_maps_to_original() {
        let est = PoseEstimate::from_regressor(&output(), &crop()).unwrap();
        assert_eq!(est.loc, Vector2::new(200.0, 100.0));
        // 2.0 / (320 / 640)
        assert!((est.dist - 4.0).abs() < 1e-12);
        assert_eq!(est.shape, [0.5; SHAPE_COUNT]);
    }

    #[test]
    fn test_from_regressor_rejects_wrong_joint_count() {
        let mut out = output();
        out.rotvec.pop();
        let err = PoseEstimate::from_regressor(&out, &crop()).unwrap_err();
        assert!(matches!(err, MotionError::ShapeMismatch { expected: 55, actual: 54, .. }));
    }

    #[test]
    fn test_from_regressor_rejects_wrong_shape_count() {
        let mut out = output();
        out.shape.push(0.0);
        assert!(PoseEstimate::from_regressor(&out, &crop()).is_err());
    }
}
