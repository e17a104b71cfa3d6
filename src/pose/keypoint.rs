use serde::{Deserialize, Serialize};

/// COCO-WholeBody の先頭17点（体幹部）のインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum KeypointIndex {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl KeypointIndex {
    pub const COUNT: usize = 17;
}

/// 単一キーポイント（元画像のピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// 1フレーム分のキーポイント列
///
/// 点数は検出器次第（体のみ17点、全身133点など）。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keypoints2D {
    pub points: Vec<Keypoint>,
}

impl Keypoints2D {
    pub fn new(points: Vec<Keypoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// 体幹インデックスで取得（検出器が17点未満なら None）
    pub fn get(&self, index: KeypointIndex) -> Option<&Keypoint> {
        self.points.get(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_is_valid() {
        let kp = Keypoint::new(10.0, 20.0, 0.7);
        assert!(kp.is_valid(0.5));
        assert!(!kp.is_valid(0.8));
    }

    #[test]
    fn test_get_out_of_range() {
        let frame = Keypoints2D::new(vec![Keypoint::new(1.0, 2.0, 0.9); 5]);
        assert!(frame.get(KeypointIndex::LeftEar).is_some());
        assert!(frame.get(KeypointIndex::LeftShoulder).is_none());
    }
}
