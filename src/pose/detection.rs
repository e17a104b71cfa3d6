use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::crop::CornerBox;
use crate::error::MotionError;

/// 1被写体のトラック（フレーム番号とBBoxが対応）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    pub frame_ids: Vec<usize>,
    pub boxes: Vec<CornerBox>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.frame_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_ids.is_empty()
    }
}

/// 最もフレーム数の多いトラックを主被写体として選ぶ
///
/// 同数の場合は track id が小さい方。先頭BBoxが縮退していれば致命的エラー。
pub fn select_main_track(tracks: BTreeMap<u64, Track>) -> Result<Track, MotionError> {
    let total = tracks.len();
    let mut best: Option<(u64, Track)> = None;
    for (id, track) in tracks {
        if track.frame_ids.len() != track.boxes.len() {
            return Err(MotionError::ShapeMismatch {
                what: "track boxes",
                expected: track.frame_ids.len(),
                actual: track.boxes.len(),
            });
        }
        if track.is_empty() {
            continue;
        }
        match &best {
            Some((_, b)) if b.len() >= track.len() => {}
            _ => best = Some((id, track)),
        }
    }

    let (id, track) = best.ok_or(MotionError::NoSubject)?;
    let first = track.boxes[0];
    if first.is_degenerate() {
        return Err(MotionError::DegenerateBox {
            frame: track.frame_ids[0],
            width: first.width(),
            height: first.height(),
        });
    }

    info!("Main track {} ({} frames, {} tracks total)", id, track.len(), total);
    debug!("Main track frames {:?}..{:?}", track.frame_ids.first(), track.frame_ids.last());
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(frames: std::ops::Range<usize>, bbox: CornerBox) -> Track {
        Track {
            frame_ids: frames.clone().collect(),
            boxes: frames.map(|_| bbox).collect(),
        }
    }

    #[test]
    fn test_select_longest_track() {
        let b = CornerBox::new(0.0, 0.0, 10.0, 20.0);
        let mut tracks = BTreeMap::new();
        tracks.insert(1, track(0..5, b));
        tracks.insert(2, track(3..20, b));
        tracks.insert(3, track(0..10, b));
        let main = select_main_track(tracks).unwrap();
        assert_eq!(main.len(), 17);
        assert_eq!(main.frame_ids[0], 3);
    }

    #[test]
    fn test_select_no_tracks() {
        let err = select_main_track(BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MotionError::NoSubject));
    }

    #[test]
    fn test_select_degenerate_first_box() {
        let mut tracks = BTreeMap::new();
        tracks.insert(0, track(4..8, CornerBox::new(5.0, 5.0, 5.0, 30.0)));
        let err = select_main_track(tracks).unwrap_err();
        assert!(matches!(err, MotionError::DegenerateBox { frame: 4, .. }));
    }
}
