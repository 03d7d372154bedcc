//! Acuity - CCD reduction and PSF characterization for direct imaging.
//!
//! This library provides:
//! - Master bias/flat creation with iterative sigma-clipped stacking
//! - Overscan, bias and flat correction with cosmic-ray masking
//! - Circular and elliptical Moffat PSF fitting on source stamps
//! - FWHM, eccentricity and rotation angle summaries
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use acuity::{Config, PsfConfig, SourceCatalog, StampSet, fit_psf_single};
//!
//! let config = Config::load("acuity.yaml".as_ref())?;
//! let catalog = SourceCatalog::from_path("sources.cat".as_ref())?;
//! let stamps = StampSet::from_fits("stamps.fits".as_ref(), 2)?;
//!
//! let fits = fit_psf_single(&stamps, &catalog, &config.psf)?;
//! println!("{} sources fitted", fits.len());
//! ```

pub mod calibration;
pub mod config;
pub(crate) mod math;
pub mod psf;

#[cfg(test)]
pub(crate) mod testing;

pub mod prelude;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    Config, CosmicRayConfig, DetectorConfig, FrameLabels, FrameRole, PsfConfig, StackingConfig,
};

// ============================================================================
// Calibration
// ============================================================================

pub use calibration::{
    CcdFrame, FrameType, MasterFrame, ReduceOptions, Reduction, reduce, reduce_all, stack_frames,
};

// ============================================================================
// PSF fitting
// ============================================================================

pub use psf::{
    FitResult, FitType, LmConfig, MoffatFitter, MoffatParams, ParamList, ParamType,
    PsfStackArtifact, SourceCatalog, SourceFit, SourceFits, StackFit, StackSummary, StampSet,
    fit_psf_single, fit_psf_stack, param_list, summarize_stack_fit, to_fwhm,
};
