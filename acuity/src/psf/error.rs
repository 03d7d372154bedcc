//! Error types for PSF fitting and parameter derivation.

use std::path::PathBuf;

use thiserror::Error;

use super::lm_optimizer::Stop;
use super::moffat::FitType;

/// Errors that can occur while fitting or summarizing Moffat profiles.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown fit type '{0}', expected 'circ' or 'ellip'")]
    InvalidFitType(String),

    #[error("Unknown parameter type '{0}', expected 'fwhm', 'fwhm residuals', 'phi' or 'ecc'")]
    InvalidParamType(String),

    #[error("Frame indices are required for '{0}'")]
    MissingFrameIndices(String),

    #[error("Shape {shape:?} does not hold {len} values")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("{fit_type} Moffat fit did not converge: {reason}")]
    NotConverged { fit_type: FitType, reason: Stop },

    #[error("{fit_type} parameters need {expected} values, got {actual}")]
    ParameterCount {
        fit_type: FitType,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed source catalog at line {line}: {message}")]
    MalformedCatalog { line: usize, message: String },

    #[error("Stamp {index} is missing from {extension}")]
    MissingStamp { extension: String, index: usize },

    #[error("Frame {frame} has no qualifying sources")]
    NoQualifyingSources { frame: usize },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
