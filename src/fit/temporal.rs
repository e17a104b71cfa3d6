use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use tracing::debug;

use super::solver::{BlockSystem, Step};
use super::FittedTrajectory;
use crate::body::layout::{unwrap_poses, BodyPose, Shape, ROOT, SHAPE_COUNT};
use crate::body::{BodyModel, BodyParams, JointMap};
use crate::camera::CameraModel;
use crate::config::FittingConfig;
use crate::error::MotionError;
use crate::pose::Keypoints2D;
use crate::tracker::Segment;

/// 数値微分の刻み
const JACOBIAN_STEP: f64 = 1e-6;
const DAMPING_FACTOR: f64 = 10.0;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e8;
/// 受理したステップの相対減少がこれ以下なら収束とみなす
const CONVERGED_DECREASE: f64 = 1e-12;

/// 再投影誤差の1観測
struct Observation {
    joint: usize,
    target: Vector2<f64>,
    /// sqrt(信頼度) / BBox長辺
    weight: f64,
}

#[derive(Debug, Clone)]
struct State {
    poses: Vec<BodyPose>,
    transl: Vec<Vector3<f64>>,
    shape: Shape,
}

impl State {
    fn params(&self, t: usize) -> BodyParams {
        BodyParams {
            pose: self.poses[t].clone(),
            shape: self.shape,
            transl: self.transl[t],
        }
    }
}

/// 最適化段階。フレームごとの変数は `joints` の回転（先頭はルート）と並進
struct Stage {
    name: &'static str,
    joints: Vec<usize>,
    shape: bool,
}

impl Stage {
    fn dim(&self) -> usize {
        3 * self.joints.len() + 3
    }

    fn shared_dim(&self) -> usize {
        if self.shape {
            SHAPE_COUNT
        } else {
            0
        }
    }
}

/// Segment-wide two-stage body fitting.
///
/// Minimises confidence-weighted keypoint reprojection error together with
/// frame-to-frame smoothness of rotations and translation, and priors that
/// keep non-root rotations and the shared body shape near the regressor's
/// output. All frames of a segment are solved jointly with damped
/// Gauss-Newton (Levenberg-Marquardt) steps.
///
/// 粗段階: ルート回転と並進のみ。精段階: 対応キーポイントの祖先関節と体型も動かす。
/// 並進は全関節を平行移動させる（`BodyModel` の前提）。
pub struct TemporalFitter {
    config: FittingConfig,
    joint_map: JointMap,
}

impl TemporalFitter {
    pub fn new(config: FittingConfig, joint_map: JointMap) -> Self {
        Self { config, joint_map }
    }

    pub fn from_config(config: &FittingConfig) -> Self {
        Self::new(config.clone(), JointMap::coco_body())
    }

    pub fn config(&self) -> &FittingConfig {
        &self.config
    }

    /// セグメントを最適化する
    ///
    /// `keypoints` は平滑化済みのもの（セグメントと同じ長さ）。収束しなくてもエラーにはしない。
    pub fn fit<M: BodyModel + ?Sized>(
        &self,
        model: &M,
        camera: &CameraModel,
        segment: &Segment,
        keypoints: &[Keypoints2D],
    ) -> Result<FittedTrajectory, MotionError> {
        if keypoints.len() != segment.len() {
            return Err(MotionError::ShapeMismatch {
                what: "smoothed keypoint frames",
                expected: segment.len(),
                actual: keypoints.len(),
            });
        }
        if segment.is_empty() {
            return Ok(FittedTrajectory {
                poses: Vec::new(),
                shapes: Vec::new(),
                transl: Vec::new(),
            });
        }

        let problem = Problem::new(self, model, camera, segment, keypoints);
        let mut state = problem.initial_state(segment);

        let coarse = Stage {
            name: "coarse",
            joints: vec![ROOT],
            shape: false,
        };
        let fine = Stage {
            name: "fine",
            joints: ancestor_joints(model.parents(), self.joint_map.joints()),
            shape: true,
        };

        state = problem.run_stage(&coarse, state, self.config.steps[0]);
        state = problem.run_stage(&fine, state, self.config.steps[1]);

        let frames = segment.len();
        Ok(FittedTrajectory {
            poses: state.poses,
            shapes: vec![state.shape; frames],
            transl: state.transl,
        })
    }

    /// 信頼度が閾値以上の対応キーポイントの平均再投影誤差（ピクセル）
    pub fn reprojection_error<M: BodyModel + ?Sized>(
        &self,
        model: &M,
        camera: &CameraModel,
        trajectory: &FittedTrajectory,
        keypoints: &[Keypoints2D],
    ) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for (t, frame) in keypoints.iter().enumerate().take(trajectory.len()) {
            let joints = model.joints(&trajectory.params(t));
            for &(k, j) in self.joint_map.pairs() {
                let Some(kp) = frame.points.get(k) else { continue };
                if (kp.confidence as f64) < self.config.confidence_threshold {
                    continue;
                }
                let uv = camera.project(&joints[j]);
                total += (uv - Vector2::new(kp.x as f64, kp.y as f64)).norm();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }
}

/// ルートと、対応関節の祖先（対応関節自身は末端なら動かしても位置が変わらない）
fn ancestor_joints(parents: &[Option<usize>], joints: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut set = BTreeSet::new();
    set.insert(ROOT);
    for j in joints {
        let mut current = parents.get(j).copied().flatten();
        while let Some(p) = current {
            set.insert(p);
            current = parents[p];
        }
    }
    // ROOT = 0 が先頭
    set.into_iter().collect()
}

struct Problem<'a, M: ?Sized> {
    model: &'a M,
    camera: &'a CameraModel,
    config: &'a FittingConfig,
    observations: Vec<Vec<Observation>>,
    init_poses: Vec<BodyPose>,
    init_shape: Shape,
}

impl<'a, M: BodyModel + ?Sized> Problem<'a, M> {
    fn new(
        fitter: &'a TemporalFitter,
        model: &'a M,
        camera: &'a CameraModel,
        segment: &Segment,
        keypoints: &[Keypoints2D],
    ) -> Self {
        let config = &fitter.config;
        let observations = keypoints
            .iter()
            .zip(&segment.bboxes)
            .map(|(frame, bbox)| {
                let scale = if bbox.scale() > 0.0 { bbox.scale() } else { 1.0 };
                fitter
                    .joint_map
                    .pairs()
                    .iter()
                    .filter_map(|&(k, j)| {
                        let kp = frame.points.get(k)?;
                        let confidence = kp.confidence as f64;
                        if confidence < config.confidence_threshold
                            || !kp.x.is_finite()
                            || !kp.y.is_finite()
                        {
                            return None;
                        }
                        Some(Observation {
                            joint: j,
                            target: Vector2::new(kp.x as f64, kp.y as f64),
                            weight: confidence.sqrt() / scale,
                        })
                    })
                    .collect()
            })
            .collect();

        let mut init_shape = [0.0; SHAPE_COUNT];
        for est in &segment.estimates {
            for (acc, v) in init_shape.iter_mut().zip(est.shape.iter()) {
                *acc += v;
            }
        }
        for v in &mut init_shape {
            *v /= segment.len() as f64;
        }

        // 平滑化項は隣接フレームの差をとるので、等価な回転ベクトルの表現をそろえておく
        let mut init_poses: Vec<BodyPose> = segment.estimates.iter().map(|e| e.pose.clone()).collect();
        unwrap_poses(&mut init_poses);

        Self {
            model,
            camera,
            config,
            observations,
            init_poses,
            init_shape,
        }
    }

    fn frames(&self) -> usize {
        self.init_poses.len()
    }

    /// 回帰器の2D位置と距離から基準関節の3D位置を復元し、並進を逆算
    fn initial_state(&self, segment: &Segment) -> State {
        let transl = segment
            .estimates
            .iter()
            .map(|est| {
                let params = BodyParams {
                    pose: est.pose.clone(),
                    shape: self.init_shape,
                    transl: Vector3::zeros(),
                };
                let joints = self.model.joints(&params);
                let anchor = joints
                    .get(self.config.anchor_joint)
                    .copied()
                    .unwrap_or_else(Vector3::zeros);
                self.camera.backproject(est.loc.x, est.loc.y, est.dist) - anchor
            })
            .collect();

        State {
            poses: self.init_poses.clone(),
            transl,
            shape: self.init_shape,
        }
    }

    fn residuals(&self, t: usize, joints: &[Vector3<f64>]) -> DVector<f64> {
        let obs = &self.observations[t];
        let mut r = DVector::<f64>::zeros(2 * obs.len());
        for (i, o) in obs.iter().enumerate() {
            let d = (self.camera.project(&joints[o.joint]) - o.target) * o.weight;
            r[2 * i] = d.x;
            r[2 * i + 1] = d.y;
        }
        r
    }

    fn numeric_column(
        &self,
        t: usize,
        params: &BodyParams,
        perturb: impl Fn(&mut BodyParams, f64),
    ) -> DVector<f64> {
        let mut plus = params.clone();
        perturb(&mut plus, JACOBIAN_STEP);
        let mut minus = params.clone();
        perturb(&mut minus, -JACOBIAN_STEP);
        let rp = self.residuals(t, &self.model.joints(&plus));
        let rm = self.residuals(t, &self.model.joints(&minus));
        (rp - rm) / (2.0 * JACOBIAN_STEP)
    }

    fn frame_vector(&self, stage: &Stage, state: &State, t: usize) -> DVector<f64> {
        let d = stage.dim();
        let mut v = DVector::<f64>::zeros(d);
        for (slot, &j) in stage.joints.iter().enumerate() {
            for c in 0..3 {
                v[3 * slot + c] = state.poses[t].rotations[j][c];
            }
        }
        for c in 0..3 {
            v[d - 3 + c] = state.transl[t][c];
        }
        v
    }

    fn data_loss(&self, state: &State) -> f64 {
        (0..self.frames())
            .filter(|&t| !self.observations[t].is_empty())
            .map(|t| {
                let joints = self.model.joints(&state.params(t));
                self.residuals(t, &joints).norm_squared()
            })
            .sum()
    }

    /// 平滑化項と事前項。`system` があれば正規方程式にも加算する
    fn regularize(&self, stage: &Stage, state: &State, mut system: Option<&mut BlockSystem>) -> f64 {
        let frames = self.frames();
        let d = stage.dim();
        let mut loss = 0.0;

        let vectors: Vec<DVector<f64>> =
            (0..frames).map(|t| self.frame_vector(stage, state, t)).collect();
        for t in 0..frames.saturating_sub(1) {
            for k in 0..d {
                let w = if k < d - 3 {
                    self.config.pose_smooth_weight
                } else {
                    self.config.transl_smooth_weight
                };
                if w <= 0.0 {
                    continue;
                }
                let sw = w.sqrt();
                let r = sw * (vectors[t + 1][k] - vectors[t][k]);
                loss += r * r;
                if let Some(sys) = system.as_deref_mut() {
                    sys.diag[t][(k, k)] += w;
                    sys.diag[t + 1][(k, k)] += w;
                    sys.upper[t][(k, k)] -= w;
                    sys.grad[t][k] -= sw * r;
                    sys.grad[t + 1][k] += sw * r;
                }
            }
        }

        let w = self.config.pose_prior_weight;
        if w > 0.0 {
            let sw = w.sqrt();
            for t in 0..frames {
                for (slot, &j) in stage.joints.iter().enumerate() {
                    if j == ROOT {
                        continue;
                    }
                    for c in 0..3 {
                        let k = 3 * slot + c;
                        let r = sw
                            * (state.poses[t].rotations[j][c] - self.init_poses[t].rotations[j][c]);
                        loss += r * r;
                        if let Some(sys) = system.as_deref_mut() {
                            sys.diag[t][(k, k)] += w;
                            sys.grad[t][k] += sw * r;
                        }
                    }
                }
            }
        }

        let w = self.config.shape_prior_weight;
        if stage.shape && w > 0.0 {
            let sw = w.sqrt();
            for c in 0..SHAPE_COUNT {
                let r = sw * (state.shape[c] - self.init_shape[c]);
                loss += r * r;
                if let Some(sys) = system.as_deref_mut() {
                    sys.shared[(c, c)] += w;
                    sys.grad_shared[c] += sw * r;
                }
            }
        }

        loss
    }

    fn loss(&self, stage: &Stage, state: &State) -> f64 {
        self.data_loss(state) + self.regularize(stage, state, None)
    }

    /// 現在の状態で線形化し (JᵀJ, Jᵀr, 損失) を返す
    fn linearize(&self, stage: &Stage, state: &State) -> (BlockSystem, f64) {
        let d = stage.dim();
        let m = stage.shared_dim();
        let mut system = BlockSystem::new(self.frames(), d, m);
        let mut loss = 0.0;

        for t in 0..self.frames() {
            let obs = &self.observations[t];
            if obs.is_empty() {
                continue;
            }
            let params = state.params(t);
            let joints = self.model.joints(&params);
            let r0 = self.residuals(t, &joints);
            loss += r0.norm_squared();

            let mut jx = DMatrix::<f64>::zeros(r0.len(), d);
            for (slot, &j) in stage.joints.iter().enumerate() {
                for c in 0..3 {
                    let col = self.numeric_column(t, &params, |p, h| p.pose.rotations[j][c] += h);
                    jx.set_column(3 * slot + c, &col);
                }
            }
            // 並進は解析微分
            for (i, o) in obs.iter().enumerate() {
                let block = self.camera.project_jacobian(&joints[o.joint]) * o.weight;
                jx.view_mut((2 * i, d - 3), (2, 3)).copy_from(&block);
            }

            let jxt = jx.transpose();
            system.diag[t] += &jxt * &jx;
            system.grad[t] += &jxt * &r0;

            if m > 0 {
                let mut jb = DMatrix::<f64>::zeros(r0.len(), m);
                for c in 0..m {
                    let col = self.numeric_column(t, &params, |p, h| p.shape[c] += h);
                    jb.set_column(c, &col);
                }
                let jbt = jb.transpose();
                system.cross[t] += &jxt * &jb;
                system.shared += &jbt * &jb;
                system.grad_shared += &jbt * &r0;
            }
        }

        loss += self.regularize(stage, state, Some(&mut system));
        (system, loss)
    }

    fn apply(&self, stage: &Stage, state: &State, step: &Step) -> State {
        let d = stage.dim();
        let mut next = state.clone();
        for (t, dx) in step.frames.iter().enumerate() {
            for (slot, &j) in stage.joints.iter().enumerate() {
                for c in 0..3 {
                    next.poses[t].rotations[j][c] += dx[3 * slot + c];
                }
            }
            for c in 0..3 {
                next.transl[t][c] += dx[d - 3 + c];
            }
        }
        for (c, v) in step.shared.iter().enumerate() {
            next.shape[c] += v;
        }
        next
    }

    fn run_stage(&self, stage: &Stage, mut state: State, steps: usize) -> State {
        if steps == 0 {
            return state;
        }
        let mut damping = self.config.initial_damping.max(MIN_DAMPING);
        let (mut system, mut loss) = self.linearize(stage, &state);
        let initial = loss;
        let mut accepted = 0;

        for _ in 0..steps {
            if loss <= 0.0 {
                break;
            }
            let Some(step) = system.solve(damping) else {
                damping = (damping * DAMPING_FACTOR).min(MAX_DAMPING);
                continue;
            };
            let candidate = self.apply(stage, &state, &step);
            let candidate_loss = self.loss(stage, &candidate);
            if candidate_loss < loss {
                let decrease = loss - candidate_loss;
                state = candidate;
                accepted += 1;
                damping = (damping / DAMPING_FACTOR).max(MIN_DAMPING);
                if decrease <= CONVERGED_DECREASE * loss {
                    loss = candidate_loss;
                    break;
                }
                (system, loss) = self.linearize(stage, &state);
            } else {
                damping = (damping * DAMPING_FACTOR).min(MAX_DAMPING);
            }
        }

        debug!(
            "{} stage: loss {:.6e} -> {:.6e} ({} accepted steps, {} frames)",
            stage.name,
            initial,
            loss,
            accepted,
            self.frames()
        );
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::layout::PARENTS;
    use crate::body::SkeletonModel;
    use nalgebra::Rotation3;
    use crate::pose::{BBox, Keypoint, KeypointIndex, PoseEstimate};

    fn ground_truth() -> BodyParams {
        let mut pose = BodyPose::zeros();
        pose.rotations[ROOT] = Vector3::new(3.0, 0.05, -0.1);
        pose.rotations[16] = Vector3::new(0.0, 0.0, -0.6);
        pose.rotations[18] = Vector3::new(0.0, 0.4, 0.0);
        pose.rotations[4] = Vector3::new(0.3, 0.0, 0.0);
        let mut shape = [0.0; SHAPE_COUNT];
        shape[0] = 0.5;
        shape[3] = -0.4;
        BodyParams {
            pose,
            shape,
            transl: Vector3::new(0.1, 0.2, 3.5),
        }
    }

    fn project_keypoints(model: &SkeletonModel, camera: &CameraModel, params: &BodyParams) -> Keypoints2D {
        let joints = model.joints(params);
        let mut points = vec![Keypoint::default(); KeypointIndex::COUNT];
        for &(k, j) in JointMap::coco_body().pairs() {
            let uv = camera.project(&joints[j]);
            points[k] = Keypoint::new(uv.x as f32, uv.y as f32, 1.0);
        }
        Keypoints2D::new(points)
    }

    fn segment(frames: usize, estimate: PoseEstimate, keypoints: &Keypoints2D) -> Segment {
        Segment {
            frame_ids: (0..frames).collect(),
            estimates: vec![estimate; frames],
            keypoints: vec![keypoints.clone(); frames],
            bboxes: vec![
                BBox {
                    cx: 320.0,
                    cy: 240.0,
                    width: 200.0,
                    height: 300.0,
                };
                frames
            ],
        }
    }

    #[test]
    fn test_ancestor_joints() {
        let joints = ancestor_joints(&PARENTS, JointMap::coco_body().joints());
        assert_eq!(joints, vec![0, 1, 2, 3, 4, 5, 6, 9, 13, 14, 16, 17, 18, 19]);
    }

    #[test]
    fn test_converges_to_ground_truth() {
        let model = SkeletonModel::new();
        let camera = CameraModel::from_fov(640, 480, 60.0);
        let gt = ground_truth();
        let keypoints = project_keypoints(&model, &camera, &gt);

        // 初期値: ルート回転と並進をずらす
        let head = model.joints(&gt)[15];
        let mut init_pose = gt.pose.clone();
        init_pose.rotations[ROOT] += Vector3::new(0.1, -0.05, 0.05);
        let loc = camera.project(&head) + Vector2::new(5.0, -3.0);
        let estimate = PoseEstimate {
            pose: init_pose,
            shape: gt.shape,
            dist: head.z + 0.1,
            loc,
        };
        let seg = segment(5, estimate, &keypoints);
        let smoothed = seg.keypoints.clone();

        let fitter = TemporalFitter::from_config(&FittingConfig::default());
        let fitted = fitter.fit(&model, &camera, &seg, &smoothed).unwrap();
        assert_eq!(fitted.len(), 5);

        let error = fitter.reprojection_error(&model, &camera, &fitted, &smoothed);
        assert!(error < 1e-2, "reprojection error {}", error);
        for t in 0..5 {
            for j in 0..gt.pose.rotations.len() {
                let diff = (fitted.poses[t].rotations[j] - gt.pose.rotations[j]).norm();
                assert!(diff < 1e-3, "frame {} joint {} off by {}", t, j, diff);
            }
            assert!((fitted.transl[t] - gt.transl).norm() < 1e-3);
            for c in 0..SHAPE_COUNT {
                assert!((fitted.shapes[t][c] - gt.shape[c]).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_alternating_root_near_pi_converges() {
        let model = SkeletonModel::new();
        let camera = CameraModel::from_fov(640, 480, 60.0);
        let mut gt = ground_truth();
        gt.pose.rotations[ROOT] = Vector3::new(3.13, 0.0, 0.0);
        let keypoints = project_keypoints(&model, &camera, &gt);
        let head = model.joints(&gt)[15];

        // 回帰器が同じルート回転を2通りの回転ベクトルで交互に返す
        let forms = [Vector3::new(3.13, 0.0, 0.0), Vector3::new(-3.153, 0.0, 0.0)];
        let mut seg = segment(6, PoseEstimate {
            pose: gt.pose.clone(),
            shape: gt.shape,
            dist: head.z,
            loc: camera.project(&head),
        }, &keypoints);
        for (t, est) in seg.estimates.iter_mut().enumerate() {
            est.pose.rotations[ROOT] = forms[t % 2];
        }

        let fitter = TemporalFitter::from_config(&FittingConfig::default());
        let fitted = fitter.fit(&model, &camera, &seg, &seg.keypoints).unwrap();

        let error = fitter.reprojection_error(&model, &camera, &fitted, &seg.keypoints);
        assert!(error < 1e-2, "reprojection error {}", error);
        let expected = Rotation3::from_scaled_axis(gt.pose.rotations[ROOT]);
        for t in 0..6 {
            let root = Rotation3::from_scaled_axis(fitted.poses[t].rotations[ROOT]);
            assert!(root.rotation_to(&expected).angle() < 1e-3, "frame {}", t);
        }
        for t in 1..6 {
            let step = (fitted.poses[t].rotations[ROOT] - fitted.poses[t - 1].rotations[ROOT]).norm();
            assert!(step < 1e-3, "frame {}: step {}", t, step);
        }
    }

    #[test]
    fn test_without_observations_keeps_initialization() {
        let model = SkeletonModel::new();
        let camera = CameraModel::from_fov(640, 480, 60.0);
        let gt = ground_truth();
        let head = model.joints(&gt)[15];
        let estimate = PoseEstimate {
            pose: gt.pose.clone(),
            shape: gt.shape,
            dist: head.z,
            loc: camera.project(&head),
        };
        let empty = Keypoints2D::new(vec![Keypoint::default(); KeypointIndex::COUNT]);
        let seg = segment(3, estimate, &empty);

        let fitter = TemporalFitter::from_config(&FittingConfig::default());
        let fitted = fitter.fit(&model, &camera, &seg, &seg.keypoints).unwrap();
        for t in 0..3 {
            assert!((fitted.transl[t] - gt.transl).norm() < 1e-9);
            assert_eq!(fitted.poses[t], gt.pose);
        }
    }

    #[test]
    fn test_keypoint_length_mismatch() {
        let model = SkeletonModel::new();
        let camera = CameraModel::from_fov(640, 480, 60.0);
        let gt = ground_truth();
        let estimate = PoseEstimate {
            pose: gt.pose.clone(),
            shape: gt.shape,
            dist: 3.0,
            loc: Vector2::new(320.0, 240.0),
        };
        let seg = segment(4, estimate, &Keypoints2D::default());
        let fitter = TemporalFitter::from_config(&FittingConfig::default());
        let err = fitter.fit(&model, &camera, &seg, &seg.keypoints[..2]).unwrap_err();
        assert!(matches!(err, MotionError::ShapeMismatch { expected: 4, actual: 2, .. }));
    }
}
