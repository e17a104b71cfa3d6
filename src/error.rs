//! Fatal errors of the motion pipeline.
//!
//! Recoverable cases (null estimates, short runs) never surface here: those
//! frames are left out of the output and the run continues.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("failed to open video {path}: {reason}")]
    VideoOpen { path: PathBuf, reason: String },

    #[error("video {0} contains no frames")]
    EmptyVideo(PathBuf),

    #[error("no subject was tracked in the video")]
    NoSubject,

    #[error("degenerate bounding box for frame {frame}: {width}x{height}")]
    DegenerateBox { frame: usize, width: f64, height: f64 },

    #[error("{what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid motion record {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
}
