//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use acuity::prelude::*;
//! ```

// Configuration
pub use crate::{Config, FrameLabels, PsfConfig};

// Calibration
pub use crate::{CcdFrame, MasterFrame, ReduceOptions, reduce_all};

// PSF fitting
pub use crate::{
    FitType, MoffatParams, ParamType, SourceCatalog, StampSet, fit_psf_single, fit_psf_stack,
    param_list, summarize_stack_fit,
};
