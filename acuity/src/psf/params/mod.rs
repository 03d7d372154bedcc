//! Physical quantities derived from Moffat fit parameters.


use std::collections::HashMap;

use strum_macros::{Display, EnumString};

use super::error::{Error, Result};
use super::moffat::{MoffatParams, nice_phi};

/// Quantity selectable for contour maps and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ParamType {
    #[strum(serialize = "fwhm")]
    Fwhm,
    #[strum(serialize = "fwhm residuals")]
    FwhmResiduals,
    #[strum(serialize = "phi")]
    Phi,
    #[strum(serialize = "ecc")]
    Eccentricity,
}

impl ParamType {
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::InvalidParamType(name.to_string()))
    }

    /// Fixed colour-map range for plots.
    pub fn display_range(self) -> [f64; 2] {
        match self {
            ParamType::Fwhm => [1.5, 2.7],
            ParamType::FwhmResiduals => [0.0, 0.36],
            ParamType::Phi => [-45.0, 45.0],
            ParamType::Eccentricity => [0.29, 0.65],
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ParamType::Fwhm => "FWHM (arcsec)",
            ParamType::FwhmResiduals => "FWHM Residuals (arcsec)",
            ParamType::Phi => "Phi Rotation Angle (deg)",
            ParamType::Eccentricity => "Eccentricity",
        }
    }
}

/// Values of one quantity reshaped for plotting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamList {
    pub values: Vec<f64>,
    pub shape: Vec<usize>,
    pub range: [f64; 2],
    pub title: &'static str,
}

/// Mean of the two axis FWHMs in pixels.
pub fn mean_fwhm(params: &MoffatParams) -> f64 {
    let (f1, f2) = params.fwhms();
    (f1 + f2) / 2.0
}

/// FWHM eccentricity `sqrt(|f1² − f2²|) / max(f1, f2)`.
pub fn eccentricity(params: &MoffatParams) -> f64 {
    let (f1, f2) = params.fwhms();
    (f1 * f1 - f2 * f2).abs().sqrt() / f1.max(f2)
}

/// Derive `kind` for every fit and reshape it to `shape` (row-major).
///
/// `frame_indices` assigns each fit to a frame and is required for
/// [`ParamType::FwhmResiduals`]. Lengths are in pixels until scaled by
/// `plate_scale` (arcsec per pixel).
pub fn param_list(
    kind: ParamType,
    params: &[MoffatParams],
    shape: &[usize],
    frame_indices: Option<&[usize]>,
    plate_scale: f64,
) -> Result<ParamList> {
    if shape.iter().product::<usize>() != params.len() {
        return Err(Error::ShapeMismatch {
            shape: shape.to_vec(),
            len: params.len(),
        });
    }

    let values = match kind {
        ParamType::Fwhm => params.iter().map(|p| mean_fwhm(p) * plate_scale).collect(),
        ParamType::FwhmResiduals => {
            let Some(frames) = frame_indices else {
                return Err(Error::MissingFrameIndices(kind.to_string()));
            };
            if frames.len() != params.len() {
                return Err(Error::ShapeMismatch {
                    shape: vec![frames.len()],
                    len: params.len(),
                });
            }
            fwhm_residuals(params, frames)
                .into_iter()
                .map(|r| r * plate_scale)
                .collect()
        }
        ParamType::Phi => params.iter().map(nice_phi).collect(),
        ParamType::Eccentricity => params.iter().map(eccentricity).collect(),
    };

    Ok(ParamList {
        values,
        shape: shape.to_vec(),
        range: kind.display_range(),
        title: kind.title(),
    })
}

/// [`param_list`] selected by name (`"fwhm"`, `"fwhm residuals"`, `"phi"`,
/// `"ecc"`).
pub fn param_list_by_name(
    name: &str,
    params: &[MoffatParams],
    shape: &[usize],
    frame_indices: Option<&[usize]>,
    plate_scale: f64,
) -> Result<ParamList> {
    param_list(
        ParamType::parse(name)?,
        params,
        shape,
        frame_indices,
        plate_scale,
    )
}

/// Mean FWHM of each fit minus the smallest mean FWHM in the same frame.
fn fwhm_residuals(params: &[MoffatParams], frames: &[usize]) -> Vec<f64> {
    let fwhm: Vec<f64> = params.iter().map(mean_fwhm).collect();

    let mut minimum: HashMap<usize, f64> = HashMap::new();
    for (&frame, &f) in frames.iter().zip(&fwhm) {
        minimum
            .entry(frame)
            .and_modify(|m| *m = m.min(f))
            .or_insert(f);
    }

    fwhm.iter()
        .zip(frames)
        .map(|(f, frame)| f - minimum[frame])
        .collect()
}

/// Shape summary of one stack fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackSummary {
    /// Mean FWHM in arcsec.
    pub fwhm: f64,
    pub eccentricity: f64,
    /// Rotation angle in degrees, in (-45, 45].
    pub phi: f64,
}

pub fn summarize_stack_fit(params: &MoffatParams, plate_scale: f64) -> StackSummary {
    StackSummary {
        fwhm: mean_fwhm(params) * plate_scale,
        eccentricity: eccentricity(params),
        phi: nice_phi(params),
    }
}
