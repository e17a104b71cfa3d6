use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use tracing::info;

use crate::camera::CameraModel;
use crate::error::MotionError;

/// フレームの縮小とパディングの幾何
///
/// 画素数が上限を超えると sqrt(上限 / 画素数) 倍に縮小（各辺は切り捨て）、
/// その後 pad_ratio だけ中央にパディングする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodePlan {
    pub source_width: u32,
    pub source_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    /// パディング後のサイズ
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl DecodePlan {
    pub fn new(source_width: u32, source_height: u32, max_resolution: u64, pad_ratio: f64) -> Self {
        let pixels = source_width as u64 * source_height as u64;
        let (resized_width, resized_height) = if pixels > max_resolution && pixels > 0 {
            let factor = (max_resolution as f64 / pixels as f64).sqrt();
            (
                ((source_width as f64 * factor) as u32).max(1),
                ((source_height as f64 * factor) as u32).max(1),
            )
        } else {
            (source_width, source_height)
        };

        let (width, height) = if pad_ratio > 0.0 {
            (
                ((1.0 + pad_ratio) * resized_width as f64).round() as u32,
                ((1.0 + pad_ratio) * resized_height as f64).round() as u32,
            )
        } else {
            (resized_width, resized_height)
        };

        Self {
            source_width,
            source_height,
            resized_width,
            resized_height,
            width,
            height,
            offset_x: (width - resized_width) / 2,
            offset_y: (height - resized_height) / 2,
        }
    }

    pub fn is_resized(&self) -> bool {
        (self.resized_width, self.resized_height) != (self.source_width, self.source_height)
    }

    pub fn is_padded(&self) -> bool {
        (self.width, self.height) != (self.resized_width, self.resized_height)
    }

    /// 1フレームに縮小とパディングを適用
    pub fn apply(&self, frame: &RgbImage) -> RgbImage {
        let resized = if frame.dimensions() != (self.resized_width, self.resized_height) {
            imageops::resize(
                frame,
                self.resized_width,
                self.resized_height,
                imageops::FilterType::Triangle,
            )
        } else {
            frame.clone()
        };
        if !self.is_padded() {
            return resized;
        }
        let mut padded = RgbImage::new(self.width, self.height);
        imageops::replace(&mut padded, &resized, self.offset_x as i64, self.offset_y as i64);
        padded
    }
}

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: usize,
    pub plan: DecodePlan,
}

impl VideoInfo {
    /// パディング後の画像に対する仮想カメラ
    pub fn camera(&self, fov_deg: f64) -> CameraModel {
        CameraModel::from_fov(self.plan.width, self.plan.height, fov_deg)
    }
}

/// 読み込み済みフレーム。画素を持たない（観測のみの）入力もある
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub pixels: Option<Arc<RgbImage>>,
}

#[derive(Debug, Clone)]
pub struct DecodedVideo {
    pub info: VideoInfo,
    pub frames: Vec<Frame>,
}

impl DecodedVideo {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// 動画の読み込み（縮小・パディング込み）
pub trait VideoDecoder {
    fn decode(&mut self, path: &Path, max_resolution: u64, pad_ratio: f64) -> Result<DecodedVideo>;
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 連番画像ディレクトリを動画として読む
///
/// ファイル名順に並べる。フレームレートは外部から与える。
pub struct ImageSequenceDecoder {
    fps: f64,
}

impl ImageSequenceDecoder {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }

    fn list_images(dir: &Path) -> Result<Vec<PathBuf>, MotionError> {
        let entries = fs::read_dir(dir).map_err(|e| MotionError::VideoOpen {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl VideoDecoder for ImageSequenceDecoder {
    fn decode(&mut self, path: &Path, max_resolution: u64, pad_ratio: f64) -> Result<DecodedVideo> {
        let paths = Self::list_images(path)?;
        if paths.is_empty() {
            return Err(MotionError::EmptyVideo(path.to_path_buf()).into());
        }

        let mut plan: Option<DecodePlan> = None;
        let mut frames = Vec::with_capacity(paths.len());
        for (index, p) in paths.iter().enumerate() {
            let image = image::open(p)
                .with_context(|| format!("Failed to decode frame {}", p.display()))?
                .to_rgb8();
            let plan = *plan.get_or_insert_with(|| {
                DecodePlan::new(image.width(), image.height(), max_resolution, pad_ratio)
            });
            frames.push(Frame {
                index,
                pixels: Some(Arc::new(plan.apply(&image))),
            });
        }

        let Some(plan) = plan else {
            return Err(MotionError::EmptyVideo(path.to_path_buf()).into());
        };
        info!(
            "Decoded {} frames {}x{} -> {}x{} (padded) at {:.2} fps",
            frames.len(),
            plan.source_width,
            plan.source_height,
            plan.width,
            plan.height,
            self.fps
        );
        Ok(DecodedVideo {
            info: VideoInfo {
                fps: self.fps,
                frame_count: frames.len(),
                plan,
            },
            frames,
        })
    }
}
