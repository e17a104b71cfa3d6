//! Collaborators that replay precomputed observations.
//!
//! An observation bundle is a JSON file written by external detectors: the
//! video geometry, the tracks, per-frame keypoints and boxes, and per-frame
//! regressor outputs (in the regressor's square input coordinates). All
//! coordinates refer to the padded frame.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{KeypointDetector, PoseRegressor, RegressorInput, SubjectTracker};
use crate::pose::{CornerBox, Keypoints2D, RegressorOutput, Track};
use crate::video::{DecodePlan, DecodedVideo, Frame, VideoDecoder, VideoInfo};

fn default_input_size() -> u32 { 896 }
fn default_patch_size() -> u32 { 14 }

/// 1フレーム分のキーポイント検出結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: CornerBox,
    pub keypoints: Keypoints2D,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBundle {
    pub fps: f64,
    /// 元動画のサイズ（パディング前）
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_patch_size")]
    pub patch_size: u32,
    pub tracks: BTreeMap<u64, Track>,
    /// フレーム番号 → 検出
    #[serde(default)]
    pub detections: BTreeMap<usize, Detection>,
    /// フレーム番号 → 回帰器出力（無いフレームは未検出）
    #[serde(default)]
    pub estimates: BTreeMap<usize, RegressorOutput>,
}

impl ObservationBundle {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read observations {}", path.display()))?;
        let bundle: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse observations {}", path.display()))?;
        info!(
            "Loaded observations: {} frames, {} tracks, {} estimates",
            bundle.frame_count,
            bundle.tracks.len(),
            bundle.estimates.len()
        );
        Ok(bundle)
    }

    /// 4つの collaborator に分ける
    pub fn into_collaborators(self) -> (ReplayDecoder, ReplayTracker, ReplayDetector, ReplayRegressor) {
        let bundle = Arc::new(self);
        (
            ReplayDecoder(Arc::clone(&bundle)),
            ReplayTracker(Arc::clone(&bundle)),
            ReplayDetector(Arc::clone(&bundle)),
            ReplayRegressor(bundle),
        )
    }
}

/// 画素を持たないフレーム列
pub struct ReplayDecoder(Arc<ObservationBundle>);

impl VideoDecoder for ReplayDecoder {
    fn decode(&mut self, _path: &Path, max_resolution: u64, pad_ratio: f64) -> Result<DecodedVideo> {
        let b = &self.0;
        let plan = DecodePlan::new(b.width, b.height, max_resolution, pad_ratio);
        Ok(DecodedVideo {
            info: VideoInfo {
                fps: b.fps,
                frame_count: b.frame_count,
                plan,
            },
            frames: (0..b.frame_count)
                .map(|index| Frame { index, pixels: None })
                .collect(),
        })
    }
}

pub struct ReplayTracker(Arc<ObservationBundle>);

impl SubjectTracker for ReplayTracker {
    fn track(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, _fps: f64) -> Result<BTreeMap<u64, Track>> {
        Ok(self.0.tracks.clone())
    }
}

pub struct ReplayDetector(Arc<ObservationBundle>);

impl KeypointDetector for ReplayDetector {
    /// 記録の無いフレームはトラックのBBoxと空のキーポイントを返す
    fn batch_detection(
        &mut self,
        boxes: &[CornerBox],
        frames: &[&Frame],
    ) -> Result<(Vec<CornerBox>, Vec<Keypoints2D>)> {
        let mut refined = Vec::with_capacity(frames.len());
        let mut keypoints = Vec::with_capacity(frames.len());
        let mut missing = 0;
        for (frame, bbox) in frames.iter().zip(boxes) {
            match self.0.detections.get(&frame.index) {
                Some(d) => {
                    refined.push(d.bbox);
                    keypoints.push(d.keypoints.clone());
                }
                None => {
                    missing += 1;
                    refined.push(*bbox);
                    keypoints.push(Keypoints2D::default());
                }
            }
        }
        if missing > 0 {
            warn!("{} tracked frames have no recorded keypoints", missing);
        }
        Ok((refined, keypoints))
    }
}

pub struct ReplayRegressor(Arc<ObservationBundle>);

impl PoseRegressor for ReplayRegressor {
    fn input_size(&self) -> u32 {
        self.0.input_size
    }

    fn patch_size(&self) -> u32 {
        self.0.patch_size
    }

    fn forward(&mut self, input: &RegressorInput<'_>) -> Result<Option<RegressorOutput>> {
        Ok(self.0.estimates.get(&input.frame_index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraModel;
    use crate::pose::{CropRegion, Keypoint};

    const BUNDLE: &str = r#"{
        "fps": 25.0,
        "width": 640,
        "height": 480,
        "frame_count": 4,
        "tracks": {
            "3": { "frame_ids": [1, 2], "boxes": [
                { "x1": 10.0, "y1": 20.0, "x2": 110.0, "y2": 220.0 },
                { "x1": 12.0, "y1": 20.0, "x2": 112.0, "y2": 220.0 }
            ] }
        },
        "detections": {
            "1": {
                "box": { "x1": 11.0, "y1": 21.0, "x2": 109.0, "y2": 219.0 },
                "keypoints": { "points": [ { "x": 50.0, "y": 40.0, "confidence": 0.8 } ] }
            }
        },
        "estimates": {
            "2": { "rotvec": [[0.0, 0.0, 0.0]], "shape": [0.0], "dist": 3.0, "loc": [100.0, 120.0] }
        }
    }"#;

    fn bundle() -> ObservationBundle {
        serde_json::from_str(BUNDLE).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let b = bundle();
        assert_eq!(b.input_size, 896);
        assert_eq!(b.patch_size, 14);
        assert_eq!(b.tracks[&3].len(), 2);
    }

    #[test]
    fn test_replay_collaborators() {
        let (mut decoder, mut tracker, mut detector, mut regressor) = bundle().into_collaborators();

        let video = decoder.decode(Path::new("unused"), 1280 * 720, 0.2).unwrap();
        assert_eq!(video.len(), 4);
        assert_eq!((video.info.plan.width, video.info.plan.height), (768, 576));
        assert!(video.frames.iter().all(|f| f.pixels.is_none()));

        let tracks = tracker.process(video.info.fps).unwrap();
        let track = &tracks[&3];
        let frames: Vec<&Frame> = track.frame_ids.iter().map(|&i| &video.frames[i]).collect();
        let (boxes, keypoints) = detector.batch_detection(&track.boxes, &frames).unwrap();
        assert_eq!(boxes[0], CornerBox::new(11.0, 21.0, 109.0, 219.0));
        assert_eq!(boxes[1], track.boxes[1]);
        assert_eq!(keypoints[0].points[0], Keypoint::new(50.0, 40.0, 0.8));
        assert!(keypoints[1].is_empty());

        let crop = CropRegion::from_bbox(&boxes[0].to_center(1.5), 768, 576, 896);
        let camera = CameraModel::square(896, 60.0);
        let input = |frame_index| RegressorInput {
            frame_index,
            image: None,
            crop: &crop,
            camera: &camera,
            hint: None,
        };
        assert!(regressor.forward(&input(1)).unwrap().is_none());
        assert_eq!(regressor.forward(&input(2)).unwrap().unwrap().dist, 3.0);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ObservationBundle::load("/nonexistent/observations.json").is_err());
    }
}
