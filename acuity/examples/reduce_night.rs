//! Example: Reduce one night of raw frames.
//!
//! Reads every `*.fits` file in `ACUITY_RAW_DIR`, builds the master bias and
//! per-filter master flats, and writes flat-fielded science frames.
//!
//! Output structure:
//! ```text
//! $ACUITY_OUT_DIR/
//!   processing/            (masters and _over/_unbias intermediates)
//!   reduced/<object>_<filter>/<frame>_red.fits
//! ```
//!
//! # Usage
//!
//! ```bash
//! ACUITY_RAW_DIR=/data/night1/raw ACUITY_OUT_DIR=/data/night1 \
//!     cargo run --release --example reduce_night
//! ```
//!
//! Optional: `ACUITY_CONFIG` (YAML or JSON config), `ACUITY_FOV_MASK` (static
//! mask FITS).

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use acuity::{Config, ReduceOptions, reduce_all};
use anyhow::Context;
use common::log_setup::setup_logging;

fn main() -> anyhow::Result<()> {
    let raw_dir = env::var("ACUITY_RAW_DIR")
        .map(PathBuf::from)
        .context("ACUITY_RAW_DIR environment variable must be set")?;
    let out_dir = env::var("ACUITY_OUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("test_output/reduce_night"));

    setup_logging("reduce_night", "info", &out_dir.join("logs"))?;

    let config = match env::var("ACUITY_CONFIG") {
        Ok(path) => Config::load(path.as_ref())?,
        Err(_) => Config::default(),
    };
    let options = ReduceOptions {
        save_intermediates: true,
        fov_mask: env::var("ACUITY_FOV_MASK").ok().map(PathBuf::from),
    };

    let mut raw_paths: Vec<PathBuf> = std::fs::read_dir(&raw_dir)
        .with_context(|| format!("Failed to read {}", raw_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("fits"))
        })
        .collect();
    raw_paths.sort();
    tracing::info!(path = %raw_dir.display(), count = raw_paths.len(), "Raw frames");

    let start = Instant::now();
    let reduced = reduce_all(&raw_paths, &out_dir, &config, &options)?;

    tracing::info!(
        count = reduced.len(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "Reduction complete"
    );
    Ok(())
}
