//! Testing utilities for acuity.

#![allow(dead_code)]

use common::buffer2::Buffer2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::psf::{MoffatParams, SourceRecord};

/// Seeded generator for reproducible synthetic data.
#[derive(Debug, Clone)]
pub struct TestRng {
    rng: StdRng,
    spare: Option<f64>,
}

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spare: None,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.random()
    }

    /// Uniform in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Standard normal via Box-Muller.
    pub fn next_gaussian(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        let u1 = self.next_f64().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        self.spare = Some(r * theta.sin());
        r * theta.cos()
    }
}

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Render a square Moffat stamp.
pub fn moffat_stamp(params: &MoffatParams, width: usize) -> Buffer2<f64> {
    params.render(width, width)
}

/// Render a square Moffat stamp with additive Gaussian noise.
pub fn noisy_moffat_stamp(
    params: &MoffatParams,
    width: usize,
    sigma: f64,
    seed: u64,
) -> Buffer2<f64> {
    let mut stamp = params.render(width, width);
    add_gaussian_noise(stamp.pixels_mut(), sigma, seed);
    stamp
}

pub fn add_gaussian_noise(pixels: &mut [f64], sigma: f64, seed: u64) {
    let mut rng = TestRng::new(seed);
    for p in pixels.iter_mut() {
        *p += rng.next_gaussian() * sigma;
    }
}

/// Flat frame of `value` with deterministic Gaussian noise.
pub fn noisy_frame(width: usize, height: usize, value: f32, sigma: f32, seed: u64) -> Buffer2<f32> {
    let mut rng = TestRng::new(seed);
    Buffer2::from_fn(width, height, |_, _| {
        value + (rng.next_gaussian() as f32) * sigma
    })
}

/// Catalog row for a source with a fixed centroid.
pub fn source(frame: u32, stamp: usize, flux: f64, quality: i32) -> SourceRecord {
    SourceRecord {
        frame,
        stamp,
        x: 100.0 + stamp as f64,
        y: 200.0 + stamp as f64,
        flux,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_is_deterministic() {
        let mut a = TestRng::new(7);
        let mut b = TestRng::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = TestRng::new(42);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "var {var}");
    }

    #[test]
    fn test_uniform_range() {
        let mut rng = TestRng::new(3);
        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
