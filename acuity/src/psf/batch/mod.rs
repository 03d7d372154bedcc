//! Stack-mode and single-mode PSF fitting over a catalog of sources.

#[cfg(test)]
mod tests;

use common::buffer2::Buffer2;
use glam::DVec2;
use rayon::prelude::*;

use super::catalog::{SelectedSource, SourceCatalog};
use super::error::{Error, Result};
use super::fitter::{FitResult, MoffatFitter};
use super::moffat::{FitType, MoffatParams, to_fwhm};
use super::stamps::{PsfStackArtifact, StampSet};
use crate::config::PsfConfig;

/// Result of [`fit_psf_stack`].
#[derive(Debug, Clone)]
pub struct StackFit {
    /// Fit of the last frame's stack.
    pub last: FitResult,
    pub artifact: PsfStackArtifact,
}

/// One successfully fitted source.
#[derive(Debug, Clone)]
pub struct SourceFit {
    /// Catalog centroid in frame coordinates.
    pub centroid: DVec2,
    pub fit: FitResult,
    /// 0-based frame index.
    pub frame_index: usize,
}

/// Single-mode fits in catalog order.
#[derive(Debug, Clone, Default)]
pub struct SourceFits {
    fits: Vec<SourceFit>,
}

impl SourceFits {
    pub fn new(fits: Vec<SourceFit>) -> Self {
        Self { fits }
    }

    pub fn len(&self) -> usize {
        self.fits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceFit> {
        self.fits.iter()
    }

    pub fn centroids(&self) -> Vec<DVec2> {
        self.fits.iter().map(|f| f.centroid).collect()
    }

    pub fn fit_results(&self) -> Vec<&FitResult> {
        self.fits.iter().map(|f| &f.fit).collect()
    }

    pub fn params(&self) -> Vec<MoffatParams> {
        self.fits.iter().map(|f| f.fit.params).collect()
    }

    pub fn frame_indices(&self) -> Vec<usize> {
        self.fits.iter().map(|f| f.frame_index).collect()
    }

    /// Keep the fits whose entry in `rejected` is false.
    fn retain_unrejected(&mut self, rejected: &[bool]) {
        debug_assert_eq!(rejected.len(), self.fits.len());
        let mut flags = rejected.iter();
        self.fits.retain(|_| !flags.next().copied().unwrap_or(false));
    }

    pub fn into_vec(self) -> Vec<SourceFit> {
        self.fits
    }
}

impl<'a> IntoIterator for &'a SourceFits {
    type Item = &'a SourceFit;
    type IntoIter = std::slice::Iter<'a, SourceFit>;

    fn into_iter(self) -> Self::IntoIter {
        self.fits.iter()
    }
}

fn initial_guess(stamp: &Buffer2<f64>, config: &PsfConfig) -> MoffatParams {
    let peak = stamp
        .pixels()
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    config
        .fit_type
        .initial_guess(stamp.width(), peak, config.default_fwhm, config.default_beta)
}

/// Flux-weighted stack of a frame's qualifying stamps: Σ stamps / Σ flux.
pub fn weighted_stack(
    stamps: &StampSet,
    frame_index: usize,
    sources: &[SelectedSource],
) -> Result<Buffer2<f64>> {
    let Some(first) = sources.first() else {
        return Err(Error::NoQualifyingSources { frame: frame_index });
    };
    let width = stamps.stamp(frame_index, first.stamp_index)?.width();

    let mut stack = Buffer2::new_filled(width, width, 0.0f64);
    let mut flux = 0.0;
    for source in sources {
        let stamp = stamps.stamp(frame_index, source.stamp_index)?;
        for (s, v) in stack.pixels_mut().iter_mut().zip(stamp.pixels()) {
            *s += v;
        }
        flux += source.record.flux;
    }
    for s in stack.pixels_mut() {
        *s /= flux;
    }
    Ok(stack)
}

/// Fit one Moffat profile per frame to the flux-weighted stack of its
/// qualifying sources.
///
/// A frame without qualifying sources or whose fit does not converge fails
/// the whole run.
pub fn fit_psf_stack(
    stamps: &StampSet,
    catalog: &SourceCatalog,
    config: &PsfConfig,
) -> Result<StackFit> {
    let mut artifact = PsfStackArtifact::default();
    let mut last = None;

    for frame_index in 0..stamps.frame_count() {
        let sources = catalog.select(frame_index, config.min_log_flux);
        let stack = weighted_stack(stamps, frame_index, &sources)?;

        let fit = MoffatFitter::new(&stack, config.fit_type)
            .with_config(config.solver)
            .fit(&initial_guess(&stack, config))?;

        let (fwhm1, fwhm2) = fit.params.fwhms();
        tracing::info!(
            frame = frame_index,
            sources = sources.len(),
            fwhm1,
            fwhm2,
            beta = fit.params.beta(),
            "Fitted stacked PSF"
        );

        artifact.stacks.push(stack);
        artifact.models.push(fit.model());
        artifact.params.push(fit.params);
        last = Some(fit);
    }

    let last = last.ok_or(Error::NoQualifyingSources { frame: 0 })?;
    Ok(StackFit { last, artifact })
}

/// Fit every qualifying source independently.
///
/// Fits run in parallel; the output keeps catalog order. Sources whose fit
/// fails are logged and skipped. With `config.sigma_clip`, fits with an
/// outlying FWHM are removed afterwards (see [`clip_by_fwhm`]).
pub fn fit_psf_single(
    stamps: &StampSet,
    catalog: &SourceCatalog,
    config: &PsfConfig,
) -> Result<SourceFits> {
    let mut tasks = Vec::new();
    for frame_index in 0..stamps.frame_count() {
        for source in catalog.select(frame_index, config.min_log_flux) {
            let stamp = stamps.stamp(frame_index, source.stamp_index)?;
            tasks.push((frame_index, source, stamp));
        }
    }

    let results: Vec<Option<SourceFit>> = tasks
        .par_iter()
        .map(|&(frame_index, source, stamp)| {
            let fitter = MoffatFitter::new(stamp, config.fit_type).with_config(config.solver);
            match fitter.fit(&initial_guess(stamp, config)) {
                Ok(fit) => Some(SourceFit {
                    centroid: DVec2::new(source.record.x, source.record.y),
                    fit,
                    frame_index,
                }),
                Err(e) => {
                    tracing::debug!(
                        frame = frame_index,
                        stamp = source.stamp_index,
                        error = %e,
                        "Skipping source"
                    );
                    None
                }
            }
        })
        .collect();

    let attempted = results.len();
    let mut fits = SourceFits::new(results.into_iter().flatten().collect());
    if fits.len() < attempted {
        tracing::warn!(
            failed = attempted - fits.len(),
            attempted,
            "Some source fits did not converge"
        );
    }

    if config.sigma_clip {
        clip_by_fwhm(&mut fits, config);
    }
    Ok(fits)
}

/// Remove fits with an outlying FWHM.
///
/// Clips on the FWHM of the first axis; elliptical fits get a second pass
/// over the survivors on the FWHM of the second axis.
pub fn clip_by_fwhm(fits: &mut SourceFits, config: &PsfConfig) {
    let clipper = config.clipper();
    let before = fits.len();

    let fwhm1: Vec<f64> = fits
        .iter()
        .map(|f| {
            let (g1, _) = f.fit.params.gammas();
            to_fwhm(g1, f.fit.params.beta())
        })
        .collect();
    let outcome = clipper.clip(&fwhm1);
    fits.retain_unrejected(&outcome.rejected);

    if config.fit_type == FitType::Elliptical {
        let fwhm2: Vec<f64> = fits
            .iter()
            .map(|f| {
                let (_, g2) = f.fit.params.gammas();
                to_fwhm(g2, f.fit.params.beta())
            })
            .collect();
        let outcome = clipper.clip(&fwhm2);
        fits.retain_unrejected(&outcome.rejected);
    }

    tracing::info!(
        removed = before - fits.len(),
        remaining = fits.len(),
        "Sigma-clipped source fits by FWHM"
    );
}
