use nalgebra::{Matrix2x3, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// 投影時の最小奥行き（カメラ背面の点で発散しないように）
const MIN_DEPTH: f64 = 1e-3;

/// 画角から焦点距離を求める
///
/// f = size / (2 * tan(fov / 2))
pub fn focal_from_fov(img_size: f64, fov_deg: f64) -> f64 {
    img_size / (2.0 * (fov_deg.to_radians() / 2.0).tan())
}

/// ピンホールカメラの内部パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraModel {
    /// 画像サイズと画角から構築
    ///
    /// 焦点距離は長辺基準、主点は画像中心。正方ピクセルを仮定。
    pub fn from_fov(width: u32, height: u32, fov_deg: f64) -> Self {
        let focal = focal_from_fov(width.max(height) as f64, fov_deg);
        Self {
            fx: focal,
            fy: focal,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
            width,
            height,
        }
    }

    /// 正方形入力（姿勢回帰器のクロップ画像）用
    pub fn square(size: u32, fov_deg: f64) -> Self {
        let focal = focal_from_fov(size as f64, fov_deg);
        let center = (size / 2) as f64;
        Self {
            fx: focal,
            fy: focal,
            cx: center,
            cy: center,
            width: size,
            height: size,
        }
    }

    /// 内部パラメータ行列 K
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    pub fn focal(&self) -> [f64; 2] {
        [self.fx, self.fy]
    }

    pub fn principal_point(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// カメラ座標の3D点をピクセル座標へ投影
    pub fn project(&self, p: &Vector3<f64>) -> Vector2<f64> {
        let z = p.z.max(MIN_DEPTH);
        Vector2::new(self.fx * p.x / z + self.cx, self.fy * p.y / z + self.cy)
    }

    /// 投影の3D点に関するヤコビアン（2×3）
    pub fn project_jacobian(&self, p: &Vector3<f64>) -> Matrix2x3<f64> {
        if p.z < MIN_DEPTH {
            let z = MIN_DEPTH;
            return Matrix2x3::new(
                self.fx / z, 0.0, 0.0,
                0.0, self.fy / z, 0.0,
            );
        }
        let z = p.z;
        Matrix2x3::new(
            self.fx / z, 0.0, -self.fx * p.x / (z * z),
            0.0, self.fy / z, -self.fy * p.y / (z * z),
        )
    }

    /// ピクセル座標と奥行きからカメラ座標の3D点を復元
    pub fn backproject(&self, u: f64, v: f64, depth: f64) -> Vector3<f64> {
        Vector3::new(
            (u - self.cx) / self.fx * depth,
            (v - self.cy) / self.fy * depth,
            depth,
        )
    }
}
