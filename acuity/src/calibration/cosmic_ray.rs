//! Cosmic ray detection using the L.A.Cosmic algorithm.
//!
//! Implementation based on van Dokkum 2001, PASP 113, 1420:
//! "Cosmic-Ray Rejection by Laplacian Edge Detection"
//!
//! Cosmic rays have sharp edges while astronomical sources are smoothed by
//! the PSF. Each pass:
//! 1. Laplacian of the image, normalized by the expected noise (S)
//! 2. Large-scale structure removed with a 5x5 median (S')
//! 3. Fine-structure image F = med3 − med7(med3) separates stars from hits
//! 4. Flag S' > sigma_clip and S'/F > obj_lim, grow into neighbours with
//!    S' > sigma_clip · sigma_frac
//! 5. Replace flagged pixels by the local median and repeat

use common::buffer2::Buffer2;
use rayon::prelude::*;

use crate::config::{CosmicRayConfig, DetectorConfig};
use crate::math::median_f32_mut;

/// Noise of the 4-neighbour Laplacian relative to pixel noise (sqrt(1+1+1+1+16)).
const LAPLACIAN_NOISE: f32 = 4.472_136;

/// Lower bound on noise-normalized fine structure.
const MIN_FINE_STRUCTURE: f32 = 0.01;

#[derive(Debug)]
pub struct LaCosmicResult {
    /// `true` = cosmic ray pixel.
    pub mask: Buffer2<bool>,
    pub count: usize,
    /// Input with flagged pixels replaced by the local median.
    pub cleaned: Buffer2<f32>,
    /// Passes actually run.
    pub iterations: u32,
}

/// Compute the Laplacian of an image using a 3x3 kernel.
///
/// ```text
///  0  1  0
///  1 -4  1
///  0  1  0
/// ```
///
/// Edge pixels are handled by clamping to image bounds.
fn compute_laplacian(image: &Buffer2<f32>) -> Buffer2<f32> {
    let (width, height) = (image.width(), image.height());
    Buffer2::from_fn(width, height, |x, y| {
        let center = image[(x, y)];
        let left = if x > 0 { image[(x - 1, y)] } else { center };
        let right = if x + 1 < width { image[(x + 1, y)] } else { center };
        let up = if y > 0 { image[(x, y - 1)] } else { center };
        let down = if y + 1 < height { image[(x, y + 1)] } else { center };
        left + right + up + down - 4.0 * center
    })
}

/// Median over a `(2r+1)²` window truncated at the image edges.
fn median_filter(image: &Buffer2<f32>, radius: usize) -> Buffer2<f32> {
    let (width, height) = (image.width(), image.height());
    let mut out = Buffer2::new_filled(width, height, 0.0f32);

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let mut window = Vec::with_capacity((2 * radius + 1).pow(2));
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius + 1).min(height);
            for (x, out) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(radius);
                let x1 = (x + radius + 1).min(width);
                window.clear();
                for ny in y0..y1 {
                    window.extend_from_slice(&image.row(ny)[x0..x1]);
                }
                *out = median_f32_mut(&mut window);
            }
        });

    out
}

/// Per-pixel noise in ADU from a background model in ADU.
fn noise_model(background: &Buffer2<f32>, detector: &DetectorConfig) -> Buffer2<f32> {
    let gain = detector.gain;
    let read_noise_sq = detector.read_noise * detector.read_noise;
    background.map(|&b| ((b.max(0.0) * gain + read_noise_sq).sqrt() / gain).max(1e-6))
}

/// Detect cosmic rays in a raw frame in ADU.
///
/// Pixels set in `inmask` (static defects, saturation) are never flagged
/// and never grown into. The returned mask holds cosmic rays only.
pub fn detect_cosmic_rays(
    image: &Buffer2<f32>,
    inmask: Option<&Buffer2<bool>>,
    detector: &DetectorConfig,
    config: &CosmicRayConfig,
) -> LaCosmicResult {
    let (width, height) = (image.width(), image.height());
    debug_assert!(inmask.is_none_or(|m| m.same_shape(image)));
    let excluded = match inmask {
        Some(m) => m.clone(),
        None => Buffer2::new_filled(width, height, false),
    };
    let mut mask = Buffer2::new_filled(width, height, false);
    let mut work = image.clone();
    let mut iterations = 0;

    for _ in 0..config.iterations {
        iterations += 1;
        let found = detection_pass(&mut work, &mut mask, &excluded, detector, config);
        tracing::trace!(pass = iterations, found, "L.A.Cosmic pass");
        if found == 0 {
            break;
        }
    }

    let count = mask.iter().filter(|&&m| m).count();
    LaCosmicResult {
        mask,
        count,
        cleaned: work,
        iterations,
    }
}

/// One detection pass. Newly flagged pixels are added to `mask` and replaced
/// in `work` by the 5x5 median. Returns the number of new pixels.
fn detection_pass(
    work: &mut Buffer2<f32>,
    mask: &mut Buffer2<bool>,
    excluded: &Buffer2<bool>,
    detector: &DetectorConfig,
    config: &CosmicRayConfig,
) -> usize {
    let (width, height) = (work.width(), work.height());

    let med5 = median_filter(work, 2);
    let noise = noise_model(&med5, detector);

    // Only positive edges (peaks) are cosmic-ray candidates.
    let laplacian = compute_laplacian(work);
    let snr = Buffer2::from_fn(width, height, |x, y| {
        (-laplacian[(x, y)]).max(0.0) / (LAPLACIAN_NOISE * noise[(x, y)])
    });
    let snr_smooth = median_filter(&snr, 2);
    let significance = Buffer2::from_fn(width, height, |x, y| {
        snr[(x, y)] - snr_smooth[(x, y)]
    });

    let med3 = median_filter(work, 1);
    let med37 = median_filter(&med3, 3);
    let fine = Buffer2::from_fn(width, height, |x, y| {
        ((med3[(x, y)] - med37[(x, y)]) / noise[(x, y)]).max(MIN_FINE_STRUCTURE)
    });

    let candidates = Buffer2::from_fn(width, height, |x, y| {
        let s = significance[(x, y)];
        !excluded[(x, y)]
            && s > config.sigma_clip && s / fine[(x, y)] > config.obj_lim
    });

    let grow_limit = config.sigma_clip * config.sigma_frac;
    let grown = grow_mask(&candidates, &significance, excluded, grow_limit);

    let mut found = 0;
    let flagged = grown.iter().zip(med5.iter());
    for ((masked, value), (&hit, &replacement)) in mask.iter_mut().zip(work.iter_mut()).zip(flagged)
    {
        if hit && !*masked {
            *masked = true;
            *value = replacement;
            found += 1;
        }
    }
    found
}

/// Grow candidates into 8-connected, non-excluded neighbours above `limit`.
fn grow_mask(
    mask: &Buffer2<bool>,
    significance: &Buffer2<f32>,
    excluded: &Buffer2<bool>,
    limit: f32,
) -> Buffer2<bool> {
    let (width, height) = (mask.width(), mask.height());
    let mut grown = mask.clone();

    for y in 0..height {
        for x in 0..width {
            if !mask[(x, y)] {
                continue;
            }
            for ny in y.saturating_sub(1)..(y + 2).min(height) {
                for nx in x.saturating_sub(1)..(x + 2).min(width) {
                    if !excluded[(nx, ny)] && significance[(nx, ny)] > limit {
                        grown[(nx, ny)] = true;
                    }
                }
            }
        }
    }

    grown
}
