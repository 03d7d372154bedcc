//! Pipeline configuration.
//!
//! Every field has a default matching the Nickel 1-m direct imaging camera,
//! so a config file only needs the values it changes. Files are YAML or JSON,
//! chosen by extension.

use std::path::Path;

use anyhow::Context;
use common::FileFormat;
use common::normalize_string::NormalizeString;
use serde::{Deserialize, Serialize};

use crate::math::SigmaClip;
use crate::psf::{FitType, LmConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detector: DetectorConfig,
    pub labels: FrameLabels,
    pub psf: PsfConfig,
    pub stacking: StackingConfig,
    pub cosmic_ray: CosmicRayConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let format = FileFormat::from_file_name(&path.to_string_lossy())?;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = common::deserialize(&text, format)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.labels = config.labels.normalized();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let format = FileFormat::from_file_name(&path.to_string_lossy())?;
        let text = common::serialize(self, format)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }
}

/// Camera characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Electrons per ADU.
    pub gain: f32,
    /// Read noise in electrons.
    pub read_noise: f32,
    /// Raw counts above this are masked as saturated.
    pub saturation: f32,
    /// Arcseconds per pixel.
    pub plate_scale: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            gain: 1.8,
            read_noise: 10.7,
            saturation: 62000.0,
            plate_scale: 0.37,
        }
    }
}

/// OBJECT header values that mark calibration frames.
///
/// Values are stored normalized (lowercase, without whitespace, `_` or `-`)
/// and header values are normalized the same way before comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLabels {
    pub bias: String,
    pub dome_flat: String,
    pub sky_flat: String,
    pub alt_sky_flat: String,
    pub dark: String,
    pub focus: String,
}

impl Default for FrameLabels {
    fn default() -> Self {
        Self::new("Bias", "Dome flat", "Flat", "Sky flat", "dark", "focus")
    }
}

/// Role of a raw frame, derived from its OBJECT header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum FrameRole {
    Bias,
    DomeFlat,
    SkyFlat,
    AltSkyFlat,
    Dark,
    Focus,
    Science,
}

impl FrameRole {
    /// Flat roles in order of preference.
    pub const FLAT_PREFERENCE: [FrameRole; 3] =
        [FrameRole::SkyFlat, FrameRole::AltSkyFlat, FrameRole::DomeFlat];
}

impl FrameLabels {
    pub fn new(
        bias: &str,
        dome_flat: &str,
        sky_flat: &str,
        alt_sky_flat: &str,
        dark: &str,
        focus: &str,
    ) -> Self {
        Self {
            bias: bias.normalize_label(),
            dome_flat: dome_flat.normalize_label(),
            sky_flat: sky_flat.normalize_label(),
            alt_sky_flat: alt_sky_flat.normalize_label(),
            dark: dark.normalize_label(),
            focus: focus.normalize_label(),
        }
    }

    /// Normalize labels loaded verbatim from a config file.
    pub fn normalized(&self) -> Self {
        Self::new(
            &self.bias,
            &self.dome_flat,
            &self.sky_flat,
            &self.alt_sky_flat,
            &self.dark,
            &self.focus,
        )
    }

    pub fn role(&self, object: &str) -> FrameRole {
        let object = object.normalize_label();
        [
            (&self.bias, FrameRole::Bias),
            (&self.dome_flat, FrameRole::DomeFlat),
            (&self.sky_flat, FrameRole::SkyFlat),
            (&self.alt_sky_flat, FrameRole::AltSkyFlat),
            (&self.dark, FrameRole::Dark),
            (&self.focus, FrameRole::Focus),
        ]
        .into_iter()
        .find(|(label, _)| **label == object)
        .map_or(FrameRole::Science, |(_, role)| role)
    }
}

/// PSF fitting settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsfConfig {
    pub fit_type: FitType,
    /// FWHM of the initial guess in pixels.
    pub default_fwhm: f64,
    /// Beta of the initial guess.
    pub default_beta: f64,
    /// Sources need `log10(flux)` above this.
    pub min_log_flux: f64,
    /// Reject single-mode fits with outlying FWHM.
    pub sigma_clip: bool,
    pub clip_sigma: f64,
    pub clip_max_iterations: u32,
    pub solver: LmConfig,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self {
            fit_type: FitType::Elliptical,
            default_fwhm: 8.0,
            default_beta: 3.5,
            min_log_flux: 2.0,
            sigma_clip: true,
            clip_sigma: 4.0,
            clip_max_iterations: 5,
            solver: LmConfig::default(),
        }
    }
}

impl PsfConfig {
    pub fn clipper(&self) -> SigmaClip {
        SigmaClip::new(self.clip_sigma, self.clip_max_iterations)
    }
}

/// Master frame combination settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    /// Symmetric rejection threshold in standard deviations.
    pub sigma: f32,
    /// Safety cap on clipping passes.
    pub max_iterations: u32,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iterations: 100,
        }
    }
}

/// Laplacian cosmic-ray detection settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmicRayConfig {
    pub enabled: bool,
    /// Laplacian signal-to-noise threshold.
    pub sigma_clip: f32,
    /// Fraction of `sigma_clip` used when growing into neighbours.
    pub sigma_frac: f32,
    /// Minimum fine-structure contrast separating cosmic rays from stars.
    pub obj_lim: f32,
    /// Detection passes.
    pub iterations: u32,
}

impl Default for CosmicRayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sigma_clip: 4.5,
            sigma_frac: 0.3,
            obj_lim: 5.0,
            iterations: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detector.gain, 1.8);
        assert_eq!(config.detector.read_noise, 10.7);
        assert_eq!(config.detector.saturation, 62000.0);
        assert_eq!(config.detector.plate_scale, 0.37);
        assert_eq!(config.psf.fit_type, FitType::Elliptical);
        assert_eq!(config.labels.dome_flat, "domeflat");
        assert_eq!(config.labels.alt_sky_flat, "skyflat");
    }

    #[test]
    fn test_role_normalizes_header_values() {
        let labels = FrameLabels::default();
        assert_eq!(labels.role("BIAS"), FrameRole::Bias);
        assert_eq!(labels.role("Dome_Flat"), FrameRole::DomeFlat);
        assert_eq!(labels.role("flat"), FrameRole::SkyFlat);
        assert_eq!(labels.role("Sky-Flat"), FrameRole::AltSkyFlat);
        assert_eq!(labels.role(" Dark "), FrameRole::Dark);
        assert_eq!(labels.role("Focus"), FrameRole::Focus);
        assert_eq!(labels.role("NGC 6819"), FrameRole::Science);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "detector:\n  gain: 2.5\npsf:\n  fit_type: circ\n";
        let config: Config = common::deserialize(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(config.detector.gain, 2.5);
        assert_eq!(config.detector.read_noise, 10.7);
        assert_eq!(config.psf.fit_type, FitType::Circular);
        assert_eq!(config.psf.default_beta, 3.5);
    }

    #[test]
    fn test_config_file_round_trip() {
        let mut config = Config::default();
        config.stacking.sigma = 2.5;
        config.cosmic_ray.enabled = false;

        for name in ["acuity_config.yaml", "acuity_config.json"] {
            let path = test_output_path(name);
            config.save(&path).unwrap();
            assert_eq!(Config::load(&path).unwrap(), config);
        }
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        assert!(Config::load(Path::new("settings.toml")).is_err());
    }
}
