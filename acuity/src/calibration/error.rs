//! Error types for frame calibration.

use std::path::PathBuf;

use thiserror::Error;

use super::FrameType;

/// Errors that can occur while building masters or reducing frames.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No {frame_type} frames to combine")]
    NoFrames { frame_type: FrameType },

    #[error(
        "Dimension mismatch for {frame_type} frame '{frame}': expected {expected:?}, got {actual:?}"
    )]
    DimensionMismatch {
        frame_type: FrameType,
        frame: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid image section '{section}': {reason}")]
    InvalidSection { section: String, reason: String },

    #[error("Header keyword {keyword} is missing from '{name}'")]
    MissingHeader { name: String, keyword: &'static str },

    #[error("FITS error for '{path}': {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
