use nalgebra::Vector3;

use crate::body::layout::{unwrap_poses, BodyPose};
use crate::config::PostSmoothConfig;
use crate::fit::FittedTrajectory;

/// Zero-phase gaussian smoother for fitted trajectories.
///
/// 各チャンネルを時間方向に独立に畳み込む。境界は反射
/// (d c b a | a b c d | d c b a)。
#[derive(Debug, Clone)]
pub struct PostSmoother {
    kernel: Vec<f64>,
}

impl PostSmoother {
    /// sigma はフレーム単位。0以下なら恒等写像
    pub fn new(sigma: f64, truncate: f64) -> Self {
        Self {
            kernel: gaussian_kernel(sigma, truncate),
        }
    }

    /// 基準フレームレートでの sigma を動画のフレームレートに合わせて換算
    pub fn from_config(config: &PostSmoothConfig, fps: f64) -> Self {
        let sigma = if fps > 0.0 {
            config.sigma * config.reference_fps / fps
        } else {
            config.sigma
        };
        Self::new(sigma, config.truncate)
    }

    pub fn radius(&self) -> usize {
        self.kernel.len() / 2
    }

    /// 1チャンネルを平滑化
    pub fn smooth(&self, signal: &[f64]) -> Vec<f64> {
        let n = signal.len();
        if n == 0 {
            return Vec::new();
        }
        let r = self.radius() as isize;
        (0..n as isize)
            .map(|i| {
                self.kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * signal[reflect_index(i + k as isize - r, n)])
                    .sum()
            })
            .collect()
    }

    fn smooth_vectors(&self, series: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let channels: [Vec<f64>; 3] =
            std::array::from_fn(|c| self.smooth(&series.iter().map(|v| v[c]).collect::<Vec<_>>()));
        (0..series.len())
            .map(|t| Vector3::new(channels[0][t], channels[1][t], channels[2][t]))
            .collect()
    }

    /// 姿勢・体型・並進をまとめて平滑化
    pub fn apply(&self, trajectory: &FittedTrajectory) -> FittedTrajectory {
        let frames = trajectory.len();
        let joints = trajectory.poses.first().map_or(0, |p| p.rotations.len());

        // π 付近の軸反転を畳み込む前にそろえる
        let mut unwrapped = trajectory.poses.clone();
        unwrap_poses(&mut unwrapped);

        let mut poses = vec![BodyPose { rotations: Vec::with_capacity(joints) }; frames];
        for j in 0..joints {
            let series: Vec<Vector3<f64>> = unwrapped.iter().map(|p| p.rotations[j]).collect();
            for (pose, r) in poses.iter_mut().zip(self.smooth_vectors(&series)) {
                pose.rotations.push(r);
            }
        }

        let mut shapes = trajectory.shapes.clone();
        if let Some(first) = trajectory.shapes.first() {
            for c in 0..first.len() {
                let series: Vec<f64> = trajectory.shapes.iter().map(|s| s[c]).collect();
                for (shape, v) in shapes.iter_mut().zip(self.smooth(&series)) {
                    shape[c] = v;
                }
            }
        }

        FittedTrajectory {
            poses,
            shapes,
            transl: self.smooth_vectors(&trajectory.transl),
        }
    }
}

/// 正規化済みガウスカーネル（長さ 2r+1、r = round(truncate * sigma)）
fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (truncate * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f64 / sigma).powi(2)).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// 反射境界（端の値を含めて折り返す、周期 2n）
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_kernel_normalized() {
        let k = gaussian_kernel(3.0, 4.0);
        assert_eq!(k.len(), 25);
        assert!(approx_eq(k.iter().sum::<f64>(), 1.0, 1e-12));
        assert!(k[12] > k[11] && approx_eq(k[11], k[13], 1e-15));
    }

    #[test]
    fn test_reflect_index() {
        let idx: Vec<usize> = (-4..8).map(|i| reflect_index(i, 4)).collect();
        assert_eq!(idx, vec![3, 2, 1, 0, 0, 1, 2, 3, 3, 2, 1, 0]);
        // 信号より長いカーネルでも範囲内
        assert_eq!(reflect_index(-9, 2), 1);
    }

    #[test]
    fn test_constant_signal_unchanged() {
        let smoother = PostSmoother::new(3.0, 4.0);
        let out = smoother.smooth(&[2.5; 7]);
        for v in out {
            assert!(approx_eq(v, 2.5, 1e-12));
        }
    }

    #[test]
    fn test_constant_trajectory_unchanged() {
        let mut pose = BodyPose::zeros();
        pose.rotations[0] = Vector3::new(3.0, 0.1, -0.2);
        pose.rotations[18] = Vector3::new(0.0, 0.0, 0.7);
        let mut shape = [0.0; 10];
        shape[0] = 1.5;
        let traj = FittedTrajectory {
            poses: vec![pose.clone(); 40],
            shapes: vec![shape; 40],
            transl: vec![Vector3::new(0.1, 0.2, 4.0); 40],
        };

        let out = PostSmoother::from_config(&PostSmoothConfig::default(), 30.0).apply(&traj);
        assert_eq!(out.len(), 40);
        for t in 0..40 {
            for j in 0..pose.rotations.len() {
                assert!((out.poses[t].rotations[j] - pose.rotations[j]).norm() < 1e-12);
            }
            assert!(approx_eq(out.shapes[t][0], 1.5, 1e-12));
            assert!((out.transl[t] - Vector3::new(0.1, 0.2, 4.0)).norm() < 1e-12);
        }
    }

    #[test]
    fn test_sigma_scales_with_fps() {
        let config = PostSmoothConfig::default();
        assert_eq!(PostSmoother::from_config(&config, 30.0).radius(), 12);
        assert_eq!(PostSmoother::from_config(&config, 60.0).radius(), 6);
    }

    #[test]
    fn test_equivalent_root_near_pi_not_collapsed() {
        // 同じ回転を表す2通りの回転ベクトルが交互に現れる
        let forms = [Vector3::new(3.13, 0.0, 0.0), Vector3::new(-3.153, 0.0, 0.0)];
        let poses: Vec<BodyPose> = (0..20)
            .map(|t| {
                let mut pose = BodyPose::zeros();
                pose.rotations[0] = forms[t % 2];
                pose
            })
            .collect();
        let traj = FittedTrajectory {
            poses,
            shapes: vec![[0.0; 10]; 20],
            transl: vec![Vector3::new(0.0, 0.0, 4.0); 20],
        };

        let out = PostSmoother::from_config(&PostSmoothConfig::default(), 30.0).apply(&traj);
        let expected = Rotation3::from_scaled_axis(forms[0]);
        for t in 0..20 {
            let root = Rotation3::from_scaled_axis(out.poses[t].rotations[0]);
            assert!(root.rotation_to(&expected).angle() < 0.05, "frame {}: {:?}", t, out.poses[t].rotations[0]);
        }
        for t in 1..20 {
            let step = (out.poses[t].rotations[0] - out.poses[t - 1].rotations[0]).norm();
            assert!(step < 0.05, "frame {}: step {}", t, step);
        }
    }

    #[test]
    fn test_smooths_spike() {
        let mut signal = vec![0.0; 21];
        signal[10] = 1.0;
        let out = PostSmoother::new(2.0, 4.0).smooth(&signal);
        assert!(out[10] < 0.5);
        assert!(out[9] > 0.0);
        assert!(approx_eq(out.iter().sum::<f64>(), 1.0, 1e-9));
    }
}
