use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::record::{frame_from_file_name, read_record, MotionRecord};

/// 書き出し済みパラメータディレクトリの内容
#[derive(Debug, Clone)]
pub struct MotionSequence {
    pub name: String,
    /// (フレーム番号 0始まり, レコード)、昇順
    pub frames: Vec<(usize, MotionRecord)>,
}

impl MotionSequence {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read motion directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(frame) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(frame_from_file_name)
            else {
                continue;
            };
            frames.push((frame, read_record(&path)?));
        }
        frames.sort_by_key(|(frame, _)| *frame);

        let name = motion_name(dir);
        debug!("Loaded motion {} ({} frames)", name, frames.len());
        Ok(Self { name, frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 欠落しているフレーム区間 [start, end)
    pub fn gaps(&self) -> Vec<(usize, usize)> {
        self.frames
            .windows(2)
            .filter(|w| w[1].0 > w[0].0 + 1)
            .map(|w| (w[0].0 + 1, w[1].0))
            .collect()
    }
}

/// モーション名 = パラメータディレクトリの親フォルダ名
pub fn motion_name(dir: &Path) -> String {
    dir.parent()
        .and_then(|p| p.file_name())
        .or_else(|| dir.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
