use super::crop::CropRegion;
use super::keypoint::{KeypointIndex, Keypoints2D};

/// 頭部探索の基準に使うキーポイント（両耳・両肩）
const HEAD_ANCHORS: [KeypointIndex; 4] = [
    KeypointIndex::LeftEar,
    KeypointIndex::RightEar,
    KeypointIndex::LeftShoulder,
    KeypointIndex::RightShoulder,
];

/// 探索半径がこれ未満のパッチ数なら半径は渡さない
const MIN_SEARCH_RADIUS: u32 = 2;

/// Coarse head-location prior handed to the per-frame regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionHint {
    /// パッチグリッドの行（y）
    pub row: u32,
    /// パッチグリッドの列（x）
    pub col: u32,
    /// 探索半径（パッチ数）
    pub max_dist: Option<u32>,
}

/// キーポイントから回帰器用のアテンションヒントを計算
///
/// 信頼度が閾値以上のアンカーが2点未満ならヒントなし。
pub fn attention_hint(
    keypoints: &Keypoints2D,
    crop: Option<&CropRegion>,
    patch_size: u32,
    n_patch: u32,
    threshold: f32,
) -> Option<AttentionHint> {
    let anchors: Vec<(f64, f64)> = HEAD_ANCHORS
        .iter()
        .filter_map(|&idx| keypoints.get(idx))
        .filter(|kp| kp.is_valid(threshold))
        .map(|kp| (kp.x as f64, kp.y as f64))
        .collect();

    if anchors.len() < 2 || patch_size == 0 || n_patch == 0 {
        return None;
    }

    let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
    let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    for &(x, y) in &anchors {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
        sum_x += x;
        sum_y += y;
    }
    let n = anchors.len() as f64;
    let mut radius = ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt() / 2.0;
    let mut center = (sum_x / n, sum_y / n);

    if let Some(crop) = crop {
        center = crop.to_crop(center.0, center.1);
        radius *= crop.scale;
    }

    let patch = patch_size as f64;
    let last = (n_patch - 1) as f64;
    let col = (center.0 / patch).floor().clamp(0.0, last) as u32;
    let row = (center.1 / patch).floor().clamp(0.0, last) as u32;

    let dist = (radius / patch).floor() as u32;
    let max_dist = (dist >= MIN_SEARCH_RADIUS).then_some(dist);

    Some(AttentionHint { row, col, max_dist })
}
