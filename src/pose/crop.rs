use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

/// コーナー形式のBBox（ピクセル座標、トラッカー出力）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CornerBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl CornerBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// 幅か高さがゼロ
    pub fn is_degenerate(&self) -> bool {
        self.width() == 0.0 || self.height() == 0.0
    }

    /// 中心形式へ変換し、中心を保ったまま scale 倍に拡大
    pub fn to_center(&self, scale: f64) -> BBox {
        BBox {
            cx: (self.x1 + self.x2) / 2.0,
            cy: (self.y1 + self.y2) / 2.0,
            width: self.width() * scale,
            height: self.height() * scale,
        }
    }
}

/// 中心形式のBBox（ピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    /// 長辺（再投影誤差の正規化に使う）
    pub fn scale(&self) -> f64 {
        self.width.max(self.height)
    }
}

/// 元画像から回帰器入力（S×S 正方形）への写像
///
/// クロップ → 等倍率縮小 → 中央ゼロパディング の順で適用される。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRegion {
    pub left: f64,
    pub top: f64,
    /// クロップ窓の幅と高さ（元画像ピクセル）
    pub width: f64,
    pub height: f64,
    pub pad_left: f64,
    pub pad_top: f64,
    pub scale: f64,
    /// クロップ1辺が元画像で占める長さ（S / scale）
    pub crop_size: f64,
    /// 元画像の長辺
    pub raw_size: f64,
}

impl CropRegion {
    /// BBoxからクロップ領域を計算
    ///
    /// - 中心から半幅（整数除算）だけ広げ、画像境界にクリップ
    /// - 縦横比を保ったまま target_size に収まるよう縮小
    /// - 余りを左右上下に均等パディング
    pub fn from_bbox(bbox: &BBox, image_width: u32, image_height: u32, target_size: u32) -> Self {
        let half_w = (bbox.width / 2.0).floor();
        let half_h = (bbox.height / 2.0).floor();
        let left = (bbox.cx - half_w).trunc().max(0.0);
        let right = (bbox.cx + half_w).trunc().min(image_width as f64 - 1.0);
        let top = (bbox.cy - half_h).trunc().max(0.0);
        let bottom = (bbox.cy + half_h).trunc().min(image_height as f64 - 1.0);

        let w = (right - left).max(1.0);
        let h = (bottom - top).max(1.0);
        let target = target_size as f64;
        let scale = (target / w).min(target / h);

        let resized_w = (w * scale).floor();
        let resized_h = (h * scale).floor();
        let pad_left = ((target - resized_w) / 2.0).floor();
        let pad_top = ((target - resized_h) / 2.0).floor();

        Self {
            left,
            top,
            width: w,
            height: h,
            pad_left,
            pad_top,
            scale,
            crop_size: target / scale,
            raw_size: image_width.max(image_height) as f64,
        }
    }

    /// 元画像座標 → 回帰器入力座標
    pub fn to_crop(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.left) * self.scale + self.pad_left,
            (y - self.top) * self.scale + self.pad_top,
        )
    }

    /// 回帰器入力座標 → 元画像座標
    pub fn to_original(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_left) / self.scale + self.left,
            (y - self.pad_top) / self.scale + self.top,
        )
    }

    /// 回帰器入力画像（target_size × target_size、余白は黒）を切り出す
    pub fn extract(&self, image: &RgbImage, target_size: u32) -> RgbImage {
        let cropped = imageops::crop_imm(
            image,
            self.left as u32,
            self.top as u32,
            self.width as u32,
            self.height as u32,
        )
        .to_image();
        let resized_w = ((self.width * self.scale).floor() as u32).clamp(1, target_size);
        let resized_h = ((self.height * self.scale).floor() as u32).clamp(1, target_size);
        let resized = imageops::resize(&cropped, resized_w, resized_h, imageops::FilterType::Triangle);

        let mut canvas = RgbImage::new(target_size, target_size);
        imageops::replace(&mut canvas, &resized, self.pad_left as i64, self.pad_top as i64);
        canvas
    }

    /// クロップ内で推定されたカメラ距離を元画像の距離へ換算
    pub fn distance_to_original(&self, dist: f64) -> f64 {
        dist / (self.crop_size / self.raw_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corner_to_center_scaled() {
        let b = CornerBox::new(100.0, 50.0, 200.0, 250.0).to_center(1.5);
        assert_eq!(b.cx, 150.0);
        assert_eq!(b.cy, 150.0);
        assert_eq!(b.width, 150.0);
        assert_eq!(b.height, 300.0);
        assert_eq!(b.scale(), 300.0);
    }

    #[test]
    fn test_corner_degenerate() {
        assert!(CornerBox::new(0.0, 0.0, 0.0, 10.0).is_degenerate());
        assert!(!CornerBox::new(0.0, 0.0, 5.0, 10.0).is_degenerate());
    }

    #[test]
    fn test_crop_region_tall_box() {
        let bbox = BBox { cx: 320.0, cy: 240.0, width: 100.0, height: 200.0 };
        let crop = CropRegion::from_bbox(&bbox, 640, 480, 400);
        assert_eq!(crop.left, 270.0);
        assert_eq!(crop.top, 140.0);
        // 高さ基準で2倍
        assert!((crop.scale - 2.0).abs() < 1e-12);
        assert_eq!(crop.pad_left, 100.0);
        assert_eq!(crop.pad_top, 0.0);
        assert!((crop.crop_size - 200.0).abs() < 1e-12);
        assert_eq!(crop.raw_size, 640.0);
    }

    #[test]
    fn test_crop_region_clipped_at_border() {
        let bbox = BBox { cx: 10.0, cy: 10.0, width: 100.0, height: 100.0 };
        let crop = CropRegion::from_bbox(&bbox, 640, 480, 100);
        assert_eq!(crop.left, 0.0);
        assert_eq!(crop.top, 0.0);
    }

    #[test]
    fn test_crop_roundtrip_point() {
        let bbox = BBox { cx: 300.0, cy: 200.0, width: 180.0, height: 260.0 };
        let crop = CropRegion::from_bbox(&bbox, 640, 480, 448);
        let (u, v) = crop.to_crop(310.0, 180.0);
        let (x, y) = crop.to_original(u, v);
        assert!((x - 310.0).abs() < 1e-9);
        assert!((y - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_square_input() {
        let mut frame = RgbImage::new(640, 480);
        for y in 140..340 {
            for x in 270..370 {
                frame.put_pixel(x, y, image::Rgb([255, 255, 255]));
            }
        }
        let bbox = BBox { cx: 320.0, cy: 240.0, width: 100.0, height: 200.0 };
        let crop = CropRegion::from_bbox(&bbox, 640, 480, 400);
        let input = crop.extract(&frame, 400);
        assert_eq!(input.dimensions(), (400, 400));
        // 左右の余白は黒、中央は白
        assert_eq!(input.get_pixel(50, 200), &image::Rgb([0, 0, 0]));
        assert_eq!(input.get_pixel(200, 200), &image::Rgb([255, 255, 255]));
    }

    #[test]
    fn test_distance_to_original() {
        let bbox = BBox { cx: 320.0, cy: 240.0, width: 100.0, height: 200.0 };
        let crop = CropRegion::from_bbox(&bbox, 640, 480, 400);
        // crop_size 200, raw 640 → 距離は 200/640 で割られる
        assert!((crop.distance_to_original(1.0) - 3.2).abs() < 1e-12);
    }
}
