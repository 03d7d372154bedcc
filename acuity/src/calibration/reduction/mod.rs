//! Science frame reduction: masking, overscan, bias and flat correction.


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::buffer2::Buffer2;
use common::normalize_string::NormalizeString;
use rayon::prelude::*;

use super::cosmic_ray::detect_cosmic_rays;
use super::error::{Error, Result};
use super::fits;
use super::frame::CcdFrame;
use super::masters::{MasterFrame, master_bias, master_flats, short_name};
use crate::config::{Config, FrameLabels, FrameRole};

/// Directory under the output root for masters and intermediates.
pub const PROCESSING_DIR: &str = "processing";
/// Directory under the output root for fully reduced frames.
pub const REDUCED_DIR: &str = "reduced";

#[derive(Debug, Clone, Default)]
pub struct ReduceOptions {
    /// Also write masters and the `_over` / `_unbias` intermediates.
    pub save_intermediates: bool,
    /// Static field-of-view mask in raw frame coordinates.
    pub fov_mask: Option<PathBuf>,
}

/// Everything produced by [`reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    pub master_bias: MasterFrame,
    pub master_flats: BTreeMap<String, MasterFrame>,
    /// Science frames after overscan subtraction and trimming.
    pub overscan: Vec<CcdFrame>,
    /// Science frames after bias subtraction.
    pub unbiased: Vec<CcdFrame>,
    /// Flat-corrected frames, only for filters with a master flat.
    pub reduced: Vec<CcdFrame>,
}

/// Mask and convert a raw frame to electrons.
///
/// The static mask and pixels above the saturation level are masked first.
/// Cosmic rays are then searched inside DATASEC, skipping pixels already
/// masked, and replaced by the local median. Finally the data is multiplied
/// by the gain.
pub fn prepare_frame(
    mut frame: CcdFrame,
    static_mask: Option<&Buffer2<bool>>,
    config: &Config,
) -> Result<CcdFrame> {
    if let Some(mask) = static_mask {
        frame.add_mask(mask)?;
    }
    frame.mask_saturated(config.detector.saturation);

    if config.cosmic_ray.enabled {
        let section = frame.header.datasec;
        let data = section.crop(&frame.data)?;
        let inmask = section.crop(&frame.mask)?;
        let result =
            detect_cosmic_rays(&data, Some(&inmask), &config.detector, &config.cosmic_ray);
        tracing::debug!(
            frame = %frame.header.name,
            count = result.count,
            iterations = result.iterations,
            "Removed cosmic rays"
        );

        let (x0, y0) = (section.x1 - 1, section.y1 - 1);
        for y in 0..data.height() {
            for x in 0..data.width() {
                if result.mask[(x, y)] {
                    frame.mask[(x0 + x, y0 + y)] = true;
                    frame.data[(x0 + x, y0 + y)] = result.cleaned[(x, y)];
                }
            }
        }
    }

    frame.apply_gain(config.detector.gain);
    Ok(frame)
}

/// Frames whose OBJECT is not one of the calibration labels.
pub fn science_frames<'a>(frames: &'a [CcdFrame], labels: &FrameLabels) -> Vec<&'a CcdFrame> {
    frames
        .iter()
        .filter(|f| labels.role(&f.header.object) == FrameRole::Science)
        .collect()
}

/// Output directory name for a science target: `<object>_<filter>` with
/// the object normalized.
pub fn target_dir_name(frame: &CcdFrame) -> String {
    format!(
        "{}_{}",
        frame.header.object.normalize_label(),
        frame.header.filter
    )
}

/// Build masters and reduce every science frame among prepared `frames`.
pub fn reduce(frames: &[CcdFrame], config: &Config) -> Result<Reduction> {
    let master_bias = master_bias(frames, &config.labels, &config.stacking)?;
    let master_flats = master_flats(frames, &config.labels, &config.stacking)?;

    let science = science_frames(frames, &config.labels);
    tracing::info!(
        count = science.len(),
        "Performing overscan subtraction & trimming on science frames"
    );
    let overscan = science
        .into_par_iter()
        .map(CcdFrame::trim_overscan)
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(count = overscan.len(), "Performing bias subtraction");
    let unbiased = overscan
        .par_iter()
        .map(|f| f.subtract_bias(&master_bias.data))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!("Performing flat division");
    let mut reduced = Vec::with_capacity(unbiased.len());
    let mut skipped: BTreeMap<&str, usize> = BTreeMap::new();
    for frame in &unbiased {
        match master_flats.get(&frame.header.filter) {
            Some(flat) => reduced.push(frame.divide_flat(&flat.data)?),
            None => *skipped.entry(frame.header.filter.as_str()).or_default() += 1,
        }
    }
    for (filter, count) in &skipped {
        tracing::warn!(filter, count, "No master flat for filter, frames not reduced");
    }

    Ok(Reduction {
        master_bias,
        master_flats,
        overscan,
        unbiased,
        reduced,
    })
}

/// Write `frames` into `dir` as `<short name>_<suffix>.fits`.
pub fn save_results(frames: &[CcdFrame], suffix: &str, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    tracing::info!(
        count = frames.len(),
        dir = %dir.display(),
        "Saving _{suffix} images"
    );

    frames
        .iter()
        .map(|frame| {
            let path = dir.join(format!("{}_{suffix}.fits", short_name(frame)));
            fits::save_frame(frame, &path)?;
            Ok(path)
        })
        .collect()
}

/// Load, prepare and reduce raw FITS files, writing results under `out_dir`.
///
/// Reduced frames go to `reduced/<object>_<filter>/<name>_red.fits`. With
/// [`ReduceOptions::save_intermediates`], masters and the `_over` and
/// `_unbias` frames go to `processing/`. Returns the reduced paths.
pub fn reduce_all(
    raw_paths: &[PathBuf],
    out_dir: &Path,
    config: &Config,
    options: &ReduceOptions,
) -> Result<Vec<PathBuf>> {
    tracing::info!(
        count = raw_paths.len(),
        out_dir = %out_dir.display(),
        "Reducing raw frames"
    );

    let static_mask = options.fov_mask.as_deref().map(fits::load_mask).transpose()?;

    tracing::info!("Loading frames & removing cosmic rays");
    let frames = raw_paths
        .par_iter()
        .map(|path| prepare_frame(fits::load_frame(path)?, static_mask.as_ref(), config))
        .collect::<Result<Vec<_>>>()?;

    let reduction = reduce(&frames, config)?;

    let processing = out_dir.join(PROCESSING_DIR);
    if options.save_intermediates {
        reduction.master_bias.save(&processing)?;
        for flat in reduction.master_flats.values() {
            flat.save(&processing)?;
        }
        save_results(&reduction.overscan, "over", &processing.join("overscan"))?;
        save_results(&reduction.unbiased, "unbias", &processing.join("unbias"))?;
    }

    let mut by_target: BTreeMap<String, Vec<CcdFrame>> = BTreeMap::new();
    for frame in reduction.reduced {
        by_target.entry(target_dir_name(&frame)).or_default().push(frame);
    }

    let reduced_dir = out_dir.join(REDUCED_DIR);
    let mut paths = Vec::new();
    for (target, frames) in &by_target {
        paths.extend(save_results(frames, "red", &reduced_dir.join(target))?);
    }

    tracing::info!(
        count = paths.len(),
        dir = %reduced_dir.display(),
        "Fully reduced images saved"
    );
    Ok(paths)
}
