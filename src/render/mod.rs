pub mod canvas;
pub mod skeleton;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::assemble::MotionArrays;
use crate::camera::CameraModel;
use crate::pose::Keypoints2D;
use crate::video::DecodedVideo;

pub use canvas::OverlayCanvas;
pub use skeleton::SKELETON_CONNECTIONS;

/// 重畳画像の書き出し先ディレクトリ名
pub const OVERLAY_SUBDIR: &str = "pose_visualized";

/// 全フレームの重畳画像を `NNNNN.png` で書き出す
///
/// キーポイントは検出できたフレームのみ、体は再構成のあるフレームのみ描画する。
/// 画素を持たないフレームは黒背景。
pub fn write_overlays(
    dir: &Path,
    video: &DecodedVideo,
    keypoints: &[Option<Keypoints2D>],
    arrays: &MotionArrays,
    parents: &[Option<usize>],
    camera: &CameraModel,
    confidence_threshold: f32,
) -> Result<usize> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create overlay directory {}", dir.display()))?;

    let (width, height) = (video.info.plan.width, video.info.plan.height);
    let mut written = 0;
    for frame in &video.frames {
        let mut canvas = match &frame.pixels {
            Some(pixels) => OverlayCanvas::new(pixels.as_ref().clone()),
            None => OverlayCanvas::blank(width, height),
        };
        if let Some(Some(kps)) = keypoints.get(frame.index) {
            canvas.draw_keypoints(kps, confidence_threshold);
        }
        if let Some(Some(vertices)) = arrays.vertices.get(frame.index) {
            // 頂点が関節そのもののモデルだけ骨を結ぶ
            let bones: &[Option<usize>] = if vertices.len() == parents.len() { parents } else { &[] };
            canvas.draw_body(vertices, bones, camera);
        }
        canvas.save(&dir.join(format!("{:05}.png", frame.index + 1)))?;
        written += 1;
    }
    info!("Wrote {} overlay frames to {}", written, dir.display());
    Ok(written)
}
