//! Numeric building blocks shared by PSF fitting and frame calibration.

pub(crate) mod linear_solver;
pub(crate) mod statistics;

pub use statistics::{SigmaClip, median_f32_mut};
