//! Moffat PSF characterization: model evaluation, fitting, batch
//! orchestration over a source catalog and derived shape quantities.

pub mod batch;
pub mod catalog;
pub mod error;
pub mod fitter;
pub(crate) mod lm_optimizer;
pub mod moffat;
pub mod params;
pub mod stamps;

pub use batch::{SourceFit, SourceFits, StackFit, fit_psf_single, fit_psf_stack};
pub use catalog::{SelectedSource, SourceCatalog, SourceRecord};
pub use error::{Error, Result};
pub use fitter::{FitResult, MoffatFitter};
pub use lm_optimizer::{LmConfig, Stop};
pub use moffat::{
    FitType, MoffatParams, gamma_from_fwhm, make_ellipse, nice_phi, oriented_axes, to_fwhm,
};
pub use params::{ParamList, ParamType, StackSummary, param_list, summarize_stack_fit};
pub use stamps::{PsfStackArtifact, StampSet};
