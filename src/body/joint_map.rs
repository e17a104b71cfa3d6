use crate::pose::KeypointIndex;

/// 2Dキーポイントと体モデル関節の対応
#[derive(Debug, Clone, PartialEq)]
pub struct JointMap {
    pairs: Vec<(usize, usize)>,
}

impl JointMap {
    pub fn new(pairs: Vec<(usize, usize)>) -> Self {
        Self { pairs }
    }

    /// COCO体幹キーポイント → 関節
    ///
    /// 顔の点（鼻・目・耳）は関節に対応しないため使わない。
    pub fn coco_body() -> Self {
        use KeypointIndex::*;
        let pairs = [
            (LeftShoulder, 16),
            (RightShoulder, 17),
            (LeftElbow, 18),
            (RightElbow, 19),
            (LeftWrist, 20),
            (RightWrist, 21),
            (LeftHip, 1),
            (RightHip, 2),
            (LeftKnee, 4),
            (RightKnee, 5),
            (LeftAnkle, 7),
            (RightAnkle, 8),
        ];
        Self::new(pairs.iter().map(|&(k, j)| (k as usize, j)).collect())
    }

    /// (キーポイント, 関節) の組
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn joints(&self) -> impl Iterator<Item = usize> + '_ {
        self.pairs.iter().map(|&(_, j)| j)
    }
}

impl Default for JointMap {
    fn default() -> Self {
        Self::coco_body()
    }
}
