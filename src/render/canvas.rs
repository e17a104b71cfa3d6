use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use nalgebra::Vector3;

use super::skeleton::{
    BODY_COLOR, KEYPOINT_COLOR, LOW_CONFIDENCE_COLOR, SKELETON_COLOR, SKELETON_CONNECTIONS,
};
use crate::camera::CameraModel;
use crate::pose::Keypoints2D;

/// フレーム画像への重畳描画
pub struct OverlayCanvas {
    image: RgbImage,
}

impl OverlayCanvas {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// 画素の無いフレーム用の黒背景
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbImage::new(width, height))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// 2Dキーポイントと骨格線を描画
    pub fn draw_keypoints(&mut self, keypoints: &Keypoints2D, confidence_threshold: f32) {
        for (start_idx, end_idx) in SKELETON_CONNECTIONS.iter() {
            let (Some(start), Some(end)) = (keypoints.get(*start_idx), keypoints.get(*end_idx)) else {
                continue;
            };
            if start.is_valid(confidence_threshold) && end.is_valid(confidence_threshold) {
                self.draw_line(
                    start.x as i32,
                    start.y as i32,
                    end.x as i32,
                    end.y as i32,
                    SKELETON_COLOR,
                );
            }
        }

        for kp in keypoints.points.iter() {
            let color = if kp.is_valid(confidence_threshold) {
                KEYPOINT_COLOR
            } else {
                LOW_CONFIDENCE_COLOR
            };
            self.draw_circle(kp.x as i32, kp.y as i32, 3, color);
        }
    }

    /// 再構成した体を投影して描画（関節を親と結ぶ）
    pub fn draw_body(
        &mut self,
        joints: &[Vector3<f64>],
        parents: &[Option<usize>],
        camera: &CameraModel,
    ) {
        let projected: Vec<(i32, i32)> = joints
            .iter()
            .map(|p| {
                let uv = camera.project(p);
                (uv.x.round() as i32, uv.y.round() as i32)
            })
            .collect();

        for (j, parent) in parents.iter().enumerate().take(projected.len()) {
            if let Some(p) = parent.filter(|&p| p < projected.len()) {
                let (x0, y0) = projected[p];
                let (x1, y1) = projected[j];
                self.draw_line(x0, y0, x1, y1, BODY_COLOR);
            }
        }
        for &(x, y) in &projected {
            self.draw_circle(x, y, 2, BODY_COLOR);
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("Failed to save overlay {}", path.display()))
    }

    /// Bresenhamのアルゴリズムで線を描画
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgb<u8>) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            self.set_pixel(x, y, color);

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// 円を描画（塗りつぶし）
    fn draw_circle(&mut self, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// ピクセルをセット（境界チェック付き）
    fn set_pixel(&mut self, x: i32, y: i32, color: Rgb<u8>) {
        if x >= 0 && (x as u32) < self.image.width() && y >= 0 && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Keypoint, KeypointIndex};

    #[test]
    fn test_draw_line_endpoints() {
        let mut canvas = OverlayCanvas::blank(20, 20);
        canvas.draw_line(2, 3, 15, 9, SKELETON_COLOR);
        assert_eq!(canvas.image().get_pixel(2, 3), &SKELETON_COLOR);
        assert_eq!(canvas.image().get_pixel(15, 9), &SKELETON_COLOR);
        assert_eq!(canvas.image().get_pixel(19, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let mut canvas = OverlayCanvas::blank(10, 10);
        canvas.draw_circle(-5, 12, 3, KEYPOINT_COLOR);
        canvas.draw_line(-20, -20, 30, 30, KEYPOINT_COLOR);
        assert_eq!(canvas.image().get_pixel(5, 5), &KEYPOINT_COLOR);
    }

    #[test]
    fn test_low_confidence_color() {
        let mut points = vec![Keypoint::new(50.0, 50.0, 0.9); KeypointIndex::COUNT];
        points[0] = Keypoint::new(10.0, 10.0, 0.1);
        let mut canvas = OverlayCanvas::blank(100, 100);
        canvas.draw_keypoints(&Keypoints2D::new(points), 0.3);
        assert_eq!(canvas.image().get_pixel(10, 10), &LOW_CONFIDENCE_COLOR);
        assert_eq!(canvas.image().get_pixel(50, 50), &KEYPOINT_COLOR);
    }
}
