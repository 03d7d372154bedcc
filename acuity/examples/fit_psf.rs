//! Example: Fit Moffat PSFs to extracted source stamps.
//!
//! Reads a stamp container (`STAMPS_01`, `STAMPS_02`, ... extensions) and the
//! matching source table, then fits either one PSF per frame on the
//! flux-weighted stack or every qualifying source individually.
//!
//! # Usage
//!
//! ```bash
//! ACUITY_STAMPS=stamps.fits ACUITY_CATALOG=sources.cat ACUITY_FRAMES=4 \
//!     ACUITY_MODE=stack cargo run --release --example fit_psf
//! ```
//!
//! `ACUITY_MODE` is `stack` (default) or `single`. Stack mode writes the PSF
//! artifact to `test_output/fit_psf/psf.fits`.

use std::env;
use std::path::PathBuf;

use acuity::psf::{ParamType, param_list};
use acuity::{Config, SourceCatalog, StampSet, fit_psf_single, fit_psf_stack, summarize_stack_fit};
use anyhow::Context;
use common::log_setup::setup_logging;

fn main() -> anyhow::Result<()> {
    let out_dir = PathBuf::from("test_output/fit_psf");
    setup_logging("fit_psf", "info", &out_dir.join("logs"))?;

    let stamps_path = env::var("ACUITY_STAMPS")
        .map(PathBuf::from)
        .context("ACUITY_STAMPS environment variable must be set")?;
    let catalog_path = env::var("ACUITY_CATALOG")
        .map(PathBuf::from)
        .context("ACUITY_CATALOG environment variable must be set")?;
    let frames: usize = env::var("ACUITY_FRAMES")
        .context("ACUITY_FRAMES environment variable must be set")?
        .parse()
        .context("ACUITY_FRAMES must be an integer")?;
    let mode = env::var("ACUITY_MODE").unwrap_or_else(|_| "stack".to_string());

    let config = match env::var("ACUITY_CONFIG") {
        Ok(path) => Config::load(path.as_ref())?,
        Err(_) => Config::default(),
    };
    let plate_scale = config.detector.plate_scale;

    let stamps = StampSet::from_fits(&stamps_path, frames)?;
    let catalog = SourceCatalog::from_path(&catalog_path)?;
    tracing::info!(
        frames = stamps.frame_count(),
        sources = catalog.len(),
        fit_type = %config.psf.fit_type,
        "Loaded stamps and catalog"
    );

    match mode.as_str() {
        "stack" => {
            let result = fit_psf_stack(&stamps, &catalog, &config.psf)?;
            for (frame, params) in result.artifact.params.iter().enumerate() {
                let summary = summarize_stack_fit(params, plate_scale);
                tracing::info!(
                    frame = frame + 1,
                    fwhm_arcsec = summary.fwhm,
                    eccentricity = summary.eccentricity,
                    phi_deg = summary.phi,
                    "Stack PSF"
                );
            }
            std::fs::create_dir_all(&out_dir)?;
            let path = out_dir.join("psf.fits");
            result.artifact.write_fits(&path)?;
            tracing::info!(path = %path.display(), "Wrote PSF artifact");
        }
        "single" => {
            let fits = fit_psf_single(&stamps, &catalog, &config.psf)?;
            let params = fits.params();
            let frame_indices = fits.frame_indices();
            let shape = [params.len()];

            for kind in [ParamType::Fwhm, ParamType::FwhmResiduals, ParamType::Eccentricity] {
                let list = param_list(kind, &params, &shape, Some(&frame_indices), plate_scale)?;
                let mean = list.values.iter().sum::<f64>() / list.values.len().max(1) as f64;
                tracing::info!(quantity = list.title, mean, count = list.values.len());
            }
        }
        other => anyhow::bail!("Unknown ACUITY_MODE '{other}', expected 'stack' or 'single'"),
    }

    Ok(())
}
