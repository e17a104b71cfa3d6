//! Whole-video orchestration.
//!
//! Decoding, tracking, keypoint detection, per-frame regression and mesh
//! evaluation are collaborators behind traits; this module only sequences
//! them around the segment / smooth / fit / smooth / assemble core.

pub mod replay;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::assemble::{MotionArrays, ResultAssembler};
use crate::body::BodyModel;
use crate::camera::CameraModel;
use crate::config::Config;
use crate::error::MotionError;
use crate::fit::TemporalFitter;
use crate::motion::write_records;
use crate::pose::{
    attention_hint, select_main_track, AttentionHint, BBox, CornerBox, CropRegion, Keypoints2D,
    PoseEstimate, RegressorOutput, Track,
};
use crate::render::{write_overlays, OVERLAY_SUBDIR};
use crate::tracker::{min_segment_length, segment_track, KeypointSmoother, PostSmoother, Segment};
use crate::video::{DecodedVideo, Frame, VideoDecoder};

pub use replay::{ObservationBundle, ReplayDecoder, ReplayDetector, ReplayRegressor, ReplayTracker};

/// 被写体検出・追跡
pub trait SubjectTracker {
    /// 1フレームを追跡器に入力
    fn track(&mut self, frame: &Frame) -> Result<()>;

    /// 全フレーム入力後にトラックを確定（track id → フレーム番号とBBox）
    fn process(&mut self, fps: f64) -> Result<BTreeMap<u64, Track>>;
}

/// 2Dキーポイント検出
pub trait KeypointDetector {
    /// 主トラックのBBoxとフレームから (精緻化BBox, キーポイント) を返す。どちらもフレームと同じ長さ
    fn batch_detection(
        &mut self,
        boxes: &[CornerBox],
        frames: &[&Frame],
    ) -> Result<(Vec<CornerBox>, Vec<Keypoints2D>)>;
}

/// 1フレーム分の回帰器入力
pub struct RegressorInput<'a> {
    pub frame_index: usize,
    /// 正方形に切り出した画像。画素の無いフレームでは None
    pub image: Option<RgbImage>,
    pub crop: &'a CropRegion,
    /// 回帰器入力画像に対する内部パラメータ
    pub camera: &'a CameraModel,
    pub hint: Option<AttentionHint>,
}

/// 単一フレームの姿勢回帰
pub trait PoseRegressor {
    /// 入力画像の1辺
    fn input_size(&self) -> u32;

    fn patch_size(&self) -> u32;

    /// 最も確からしい1人分の推定。見つからなければ None
    fn forward(&mut self, input: &RegressorInput<'_>) -> Result<Option<RegressorOutput>>;
}

/// Full-length reconstruction of one video, before anything is written.
pub struct MotionResult {
    pub video: DecodedVideo,
    /// パディング後の画像に対するカメラ
    pub camera: CameraModel,
    pub arrays: MotionArrays,
    pub segments: usize,
    /// 主トラックのフレームのキーポイント（それ以外は None）
    pub keypoints: Vec<Option<Keypoints2D>>,
}

pub struct Video2Motion {
    config: Config,
    file_only: bool,
    decoder: Box<dyn VideoDecoder>,
    tracker: Box<dyn SubjectTracker>,
    detector: Box<dyn KeypointDetector>,
    regressor: Box<dyn PoseRegressor>,
    model: Box<dyn BodyModel>,
}

impl Video2Motion {
    pub fn new(
        config: Config,
        decoder: Box<dyn VideoDecoder>,
        tracker: Box<dyn SubjectTracker>,
        detector: Box<dyn KeypointDetector>,
        regressor: Box<dyn PoseRegressor>,
        model: Box<dyn BodyModel>,
    ) -> Self {
        Self {
            config,
            file_only: false,
            decoder,
            tracker,
            detector,
            regressor,
            model,
        }
    }

    /// 動画ごとのサブフォルダを作らず output 直下に書く
    pub fn file_only(mut self, file_only: bool) -> Self {
        self.file_only = file_only;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 動画1本を処理し、フレームごとのパラメータを書いたディレクトリを返す
    ///
    /// 計算がすべて成功するまで出力ディレクトリは作らない。書き出しに失敗した
    /// 場合は、この呼び出しで作ったディレクトリを消してからエラーを返す。
    pub fn run(&mut self, video_path: &Path, output_path: &Path) -> Result<PathBuf> {
        let start = Instant::now();
        let result = self.process(video_path)?;

        let output_dir = if self.file_only {
            output_path.to_path_buf()
        } else {
            output_path.join(video_stem(video_path))
        };
        let params_dir = output_dir.join(&self.config.pipeline.output_subdir);
        let overlay_dir = output_dir.join(OVERLAY_SUBDIR);

        let mut fresh: Vec<&Path> = Vec::new();
        if !self.file_only {
            fresh.push(output_dir.as_path());
        }
        fresh.push(params_dir.as_path());
        if self.config.pipeline.visualize {
            fresh.push(overlay_dir.as_path());
        }
        fresh.retain(|dir| !dir.exists());

        if let Err(e) = self.write_outputs(&result, &params_dir, &overlay_dir) {
            discard_dirs(&fresh);
            return Err(e);
        }

        info!(
            "{} processing completed, duration: {:.2}s",
            video_path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(params_dir)
    }

    /// パラメータを先に書き、重畳画像はその後
    fn write_outputs(&self, result: &MotionResult, params_dir: &Path, overlay_dir: &Path) -> Result<()> {
        write_records(
            params_dir,
            &result.arrays,
            &result.camera,
            self.config.pipeline.pad_ratio,
        )?;

        if self.config.pipeline.visualize {
            write_overlays(
                overlay_dir,
                &result.video,
                &result.keypoints,
                &result.arrays,
                self.model.parents(),
                &result.camera,
                self.config.pipeline.keypoint_threshold,
            )?;
        }
        Ok(())
    }

    /// 出力を書かずに全フレームの再構成を計算
    pub fn process(&mut self, video_path: &Path) -> Result<MotionResult> {
        let pipeline = &self.config.pipeline;
        let video = self
            .decoder
            .decode(video_path, pipeline.max_resolution, pipeline.pad_ratio)
            .with_context(|| format!("Failed to load video {}", video_path.display()))?;
        if video.is_empty() {
            return Err(MotionError::EmptyVideo(video_path.to_path_buf()).into());
        }
        let fps = video.info.fps;
        let camera = video.info.camera(pipeline.fov_deg);
        info!(
            "Video: {} frames at {:.2} fps, camera f={:.1} c=({:.1}, {:.1})",
            video.len(),
            fps,
            camera.fx,
            camera.cx,
            camera.cy
        );

        // 追跡 → 主被写体
        for frame in &video.frames {
            self.tracker.track(frame)?;
        }
        let track = select_main_track(self.tracker.process(fps)?)?;
        let frames = track
            .frame_ids
            .iter()
            .map(|&i| {
                video.frames.get(i).ok_or(MotionError::ShapeMismatch {
                    what: "tracked frame within video",
                    expected: video.len(),
                    actual: i,
                })
            })
            .collect::<Result<Vec<&Frame>, MotionError>>()?;

        // 2Dキーポイント
        let (refined, keypoints) = self.detector.batch_detection(&track.boxes, &frames)?;
        for (what, actual) in [("refined boxes", refined.len()), ("keypoint frames", keypoints.len())] {
            if actual != frames.len() {
                return Err(MotionError::ShapeMismatch {
                    what,
                    expected: frames.len(),
                    actual,
                }
                .into());
            }
        }
        let bboxes: Vec<BBox> = refined
            .iter()
            .map(|b| b.to_center(pipeline.bbox_scale))
            .collect();

        // フレームごとの初期推定
        let estimates = self.estimate_poses(&video, &frames, &keypoints, &bboxes)?;

        let min_len = min_segment_length(fps);
        let segments = segment_track(&track.frame_ids, &estimates, &keypoints, &bboxes, min_len)?;

        let arrays = self.fit_segments(&segments, &camera, fps, video.len())?;

        let mut all_keypoints = vec![None; video.len()];
        for (&f, kps) in track.frame_ids.iter().zip(keypoints) {
            all_keypoints[f] = Some(kps);
        }

        Ok(MotionResult {
            video,
            camera,
            arrays,
            segments: segments.len(),
            keypoints: all_keypoints,
        })
    }

    fn estimate_poses(
        &mut self,
        video: &DecodedVideo,
        frames: &[&Frame],
        keypoints: &[Keypoints2D],
        bboxes: &[BBox],
    ) -> Result<Vec<Option<PoseEstimate>>> {
        let pipeline = &self.config.pipeline;
        let input_size = self.regressor.input_size();
        let patch_size = self.regressor.patch_size();
        let n_patch = if patch_size > 0 { input_size / patch_size } else { 0 };
        let regressor_camera = CameraModel::square(input_size, pipeline.fov_deg);
        let (width, height) = (video.info.plan.width, video.info.plan.height);

        let mut estimates = Vec::with_capacity(frames.len());
        let mut missing = 0;
        for ((frame, kps), bbox) in frames.iter().zip(keypoints).zip(bboxes) {
            let crop = CropRegion::from_bbox(bbox, width, height, input_size);
            let hint = attention_hint(
                kps,
                Some(&crop),
                patch_size,
                n_patch,
                pipeline.keypoint_threshold,
            );
            let input = RegressorInput {
                frame_index: frame.index,
                image: frame.pixels.as_ref().map(|p| crop.extract(p, input_size)),
                crop: &crop,
                camera: &regressor_camera,
                hint,
            };
            let estimate = match self.regressor.forward(&input)? {
                Some(output) => Some(PoseEstimate::from_regressor(&output, &crop)?),
                None => {
                    missing += 1;
                    None
                }
            };
            estimates.push(estimate);
        }
        info!("Pose estimates: {} frames, {} without a subject", frames.len(), missing);
        Ok(estimates)
    }

    fn fit_segments(
        &self,
        segments: &[Segment],
        camera: &CameraModel,
        fps: f64,
        video_len: usize,
    ) -> Result<MotionArrays> {
        let model = self.model.as_ref();
        let fitter = TemporalFitter::from_config(&self.config.fitting);
        let post = PostSmoother::from_config(&self.config.post_smooth, fps);
        let assembler = ResultAssembler::new(model, *camera);
        let mut arrays = MotionArrays::zeros(video_len);

        for segment in segments {
            // 平滑化の状態はセグメントごとに初期化
            let mut smoother = KeypointSmoother::from_config(&self.config.keypoint_filter, fps);
            let keypoints = smoother.smooth_segment(&segment.keypoints);

            let fitted = fitter.fit(model, camera, segment, &keypoints)?;
            debug!(
                "Segment at frame {} ({} frames): reprojection error {:.2}px",
                segment.start(),
                segment.len(),
                fitter.reprojection_error(model, camera, &fitted, &keypoints)
            );

            let smoothed = post.apply(&fitted);
            assembler.scatter(&mut arrays, &segment.frame_ids, &smoothed)?;
        }
        info!(
            "Reconstructed {} of {} frames in {} segments",
            arrays.covered_frames().count(),
            video_len,
            segments.len()
        );
        Ok(arrays)
    }
}

/// 書きかけの出力を消す（失敗はログのみ）
fn discard_dirs(dirs: &[&Path]) {
    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        match std::fs::remove_dir_all(dir) {
            Ok(()) => debug!("Removed partial output {}", dir.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", dir.display(), e),
        }
    }
}

/// 出力サブフォルダ名（ファイル名の最初の '.' より前）
fn video_stem(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("video")
        .to_string()
}
