//! Sigma-clipped mean combination of calibration frames.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use common::buffer2::Buffer2;
use rayon::prelude::*;

use super::FrameType;
use super::error::{Error, Result};
use super::frame::CcdFrame;
use crate::config::StackingConfig;

/// Statistics for sigma clipping across the whole stack.
#[derive(Debug, Default)]
struct ClipStats {
    /// Values masked before clipping started.
    premasked: AtomicU64,
    /// Values rejected by clipping.
    clipped: AtomicU64,
    /// Pixels with no surviving value.
    empty_pixels: AtomicU64,
}

impl ClipStats {
    fn log_summary(&self, frame_type: FrameType, frame_count: usize, pixel_count: usize) {
        let total = (frame_count * pixel_count) as u64;
        let premasked = self.premasked.load(Ordering::Relaxed);
        let clipped = self.clipped.load(Ordering::Relaxed);
        let empty = self.empty_pixels.load(Ordering::Relaxed);

        tracing::debug!(
            %frame_type,
            frame_count,
            premasked,
            clipped,
            "Sigma clipping rejected {:.3}% of values",
            100.0 * clipped as f64 / total.max(1) as f64
        );
        if empty > 0 {
            tracing::warn!(
                %frame_type,
                pixels = empty,
                "Pixels masked in every frame fall back to the unclipped mean"
            );
        }
    }
}

/// Overscan-correct, trim and combine `frames` into one master image.
///
/// Per pixel, values more than `sigma` standard deviations from the mean
/// of the surviving values are rejected until nothing more is rejected.
/// Flats are scaled by the inverse mean of each frame's surviving pixels
/// so the master has unit mean.
pub fn stack_frames(
    frames: &[CcdFrame],
    frame_type: FrameType,
    config: &StackingConfig,
) -> Result<Buffer2<f32>> {
    if frames.is_empty() {
        return Err(Error::NoFrames { frame_type });
    }

    let trimmed = frames
        .iter()
        .map(CcdFrame::trim_overscan)
        .collect::<Result<Vec<_>>>()?;

    let expected = trimmed[0].dimensions();
    for frame in &trimmed {
        if frame.dimensions() != expected {
            return Err(Error::DimensionMismatch {
                frame_type,
                frame: frame.header.name.clone(),
                expected,
                actual: frame.dimensions(),
            });
        }
    }

    let (width, height) = expected;
    let frame_count = trimmed.len();
    let stats = ClipStats::default();

    // keep[(y * width + x) * frame_count + f]
    let mut keep = vec![false; width * height * frame_count];
    keep.par_chunks_mut(width * frame_count)
        .enumerate()
        .for_each(|(y, row_keep)| {
            let mut values = Vec::with_capacity(frame_count);
            for (x, pixel_keep) in row_keep.chunks_exact_mut(frame_count).enumerate() {
                values.clear();
                values.extend(trimmed.iter().map(|f| f.data[(x, y)]));
                for (k, frame) in pixel_keep.iter_mut().zip(&trimmed) {
                    *k = !frame.mask[(x, y)];
                }
                let premasked = pixel_keep.iter().filter(|&&k| !k).count();
                let clipped = clip_pixel(&values, pixel_keep, config);

                stats.premasked.fetch_add(premasked as u64, Ordering::Relaxed);
                stats.clipped.fetch_add(clipped as u64, Ordering::Relaxed);
            }
        });

    let scales: Vec<f32> = match frame_type {
        FrameType::Flat => (0..frame_count)
            .map(|f| flat_scale(&trimmed[f], &keep, f, frame_count))
            .collect(),
        FrameType::Bias => vec![1.0; frame_count],
    };

    let mut master = Buffer2::new_filled(width, height, 0.0f32);
    master
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let start = (y * width + x) * frame_count;
                let pixel_keep = &keep[start..start + frame_count];
                let scaled = trimmed.iter().zip(&scales).map(|(f, &s)| f.data[(x, y)] * s);

                let (sum, count) = scaled
                    .clone()
                    .zip(pixel_keep)
                    .filter(|&(_, &k)| k)
                    .fold((0.0f64, 0usize), |(sum, n), (v, _)| (sum + v as f64, n + 1));

                *out = if count > 0 {
                    (sum / count as f64) as f32
                } else {
                    stats.empty_pixels.fetch_add(1, Ordering::Relaxed);
                    let sum: f64 = scaled.map(|v| v as f64).sum();
                    (sum / frame_count as f64) as f32
                };
            }
        });

    stats.log_summary(frame_type, frame_count, width * height);
    Ok(master)
}

/// Iteratively reject values outside `mean ± sigma·std` of the kept set.
///
/// Returns the number of values rejected.
fn clip_pixel(values: &[f32], keep: &mut [bool], config: &StackingConfig) -> usize {
    let mut rejected = 0;

    for _ in 0..config.max_iterations {
        let (sum, count) = values
            .iter()
            .zip(keep.iter())
            .filter(|&(_, &k)| k)
            .fold((0.0f64, 0usize), |(sum, n), (&v, _)| (sum + v as f64, n + 1));
        if count == 0 {
            break;
        }
        let mean = sum / count as f64;
        let variance = values
            .iter()
            .zip(keep.iter())
            .filter(|&(_, &k)| k)
            .map(|(&v, _)| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        if variance <= f64::EPSILON * mean * mean {
            break;
        }
        let threshold = config.sigma as f64 * variance.sqrt();

        let mut newly = 0;
        for (&v, k) in values.iter().zip(keep.iter_mut()) {
            if *k && (v as f64 - mean).abs() > threshold {
                *k = false;
                newly += 1;
            }
        }
        if newly == 0 {
            break;
        }
        rejected += newly;
    }

    rejected
}

/// Inverse mean of the frame's kept pixels.
fn flat_scale(frame: &CcdFrame, keep: &[bool], index: usize, frame_count: usize) -> f32 {
    let (sum, count) = frame
        .data
        .iter()
        .zip(keep.iter().skip(index).step_by(frame_count))
        .filter(|&(_, &k)| k)
        .fold((0.0f64, 0usize), |(sum, n), (&v, _)| (sum + v as f64, n + 1));

    let mean = sum / count.max(1) as f64;
    if count == 0 || mean == 0.0 || !mean.is_finite() {
        tracing::warn!(
            frame = %frame.header.name,
            mean,
            "Flat frame has no usable pixels, leaving it unscaled"
        );
        return 1.0;
    }
    (1.0 / mean) as f32
}
