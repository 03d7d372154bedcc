//! CCD calibration: master bias and flat creation with sigma-clipped
//! stacking, overscan correction, cosmic-ray masking and science frame
//! reduction.

pub mod cosmic_ray;
pub mod error;
pub mod fits;
pub mod frame;
pub mod masters;
pub mod reduction;
pub mod stacker;

use strum_macros::Display;

pub use cosmic_ray::{LaCosmicResult, detect_cosmic_rays};
pub use error::{Error, Result};
pub use frame::{CcdFrame, FrameHeader, Section};
pub use masters::{MasterFrame, master_bias, master_flats, preferred_flat_role};
pub use reduction::{
    ReduceOptions, Reduction, prepare_frame, reduce, reduce_all, save_results, science_frames,
};
pub use stacker::stack_frames;

/// Type of calibration frame being stacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FrameType {
    /// Bias frames - readout offset calibration
    Bias,
    /// Flat frames - vignetting and dust correction
    Flat,
}
