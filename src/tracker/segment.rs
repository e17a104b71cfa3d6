use std::ops::Range;

use tracing::{debug, info};

use crate::error::MotionError;
use crate::pose::{BBox, Keypoints2D, PoseEstimate};

/// 最短セグメント長 L = floor(fps / 10)、最低1フレーム
pub fn min_segment_length(fps: f64) -> usize {
    ((fps / 10.0).floor() as usize).max(1)
}

/// 連続したフレーム番号の区間
///
/// 戻り値は入力配列上の位置の範囲。番号の差が1でない所で区切る。
pub fn split_runs(frame_ids: &[usize]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    if frame_ids.is_empty() {
        return runs;
    }
    let mut start = 0;
    for i in 1..frame_ids.len() {
        if frame_ids[i] != frame_ids[i - 1] + 1 {
            runs.push(start..i);
            start = i;
        }
    }
    runs.push(start..frame_ids.len());
    runs
}

/// 欠損値を補完する
///
/// 前方の直近有効値で埋めた後、残った先頭側を後方の直近有効値で埋める。
/// 有効値が1つも無ければ None。
pub fn impute<T: Clone>(values: &[Option<T>]) -> Option<Vec<T>> {
    let mut filled: Vec<Option<T>> = values.to_vec();

    let mut last: Option<T> = None;
    for slot in filled.iter_mut() {
        match slot {
            Some(v) => last = Some(v.clone()),
            None => *slot = last.clone(),
        }
    }

    let mut next: Option<T> = None;
    for slot in filled.iter_mut().rev() {
        match slot {
            Some(v) => next = Some(v.clone()),
            None => *slot = next.clone(),
        }
    }

    filled.into_iter().collect()
}

/// 連続フレーム区間（チャンク）
///
/// 全配列は同じ長さで、フレーム番号は厳密に連番。推定値は補完済み。
#[derive(Debug, Clone)]
pub struct Segment {
    pub frame_ids: Vec<usize>,
    pub estimates: Vec<PoseEstimate>,
    pub keypoints: Vec<Keypoints2D>,
    pub bboxes: Vec<BBox>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.frame_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ids.is_empty()
    }

    pub fn start(&self) -> usize {
        self.frame_ids[0]
    }
}

/// 主トラックをセグメントに分割する
///
/// 各区間で欠損推定値を補完し、有効値が無い区間と `min_len` 未満の区間は捨てる。
/// 全区間が捨てられた場合は空の Vec（エラーではない）。
pub fn segment_track(
    frame_ids: &[usize],
    estimates: &[Option<PoseEstimate>],
    keypoints: &[Keypoints2D],
    bboxes: &[BBox],
    min_len: usize,
) -> Result<Vec<Segment>, MotionError> {
    let n = frame_ids.len();
    for (what, actual) in [
        ("pose estimates", estimates.len()),
        ("keypoint frames", keypoints.len()),
        ("bounding boxes", bboxes.len()),
    ] {
        if actual != n {
            return Err(MotionError::ShapeMismatch { what, expected: n, actual });
        }
    }

    let runs = split_runs(frame_ids);
    let mut segments = Vec::new();
    let mut empty_runs = 0;
    let mut short_runs = 0;

    for run in runs.iter().cloned() {
        let Some(filled) = impute(&estimates[run.clone()]) else {
            debug!("Dropping run at frame {}: no valid estimate", frame_ids[run.start]);
            empty_runs += 1;
            continue;
        };
        if run.len() < min_len {
            debug!("Dropping run at frame {}: {} < {} frames", frame_ids[run.start], run.len(), min_len);
            short_runs += 1;
            continue;
        }
        segments.push(Segment {
            frame_ids: frame_ids[run.clone()].to_vec(),
            estimates: filled,
            keypoints: keypoints[run.clone()].to_vec(),
            bboxes: bboxes[run].to_vec(),
        });
    }

    info!(
        "{} segments from {} runs ({} without estimates, {} too short)",
        segments.len(),
        runs.len(),
        empty_runs,
        short_runs
    );
    Ok(segments)
}
