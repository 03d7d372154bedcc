//! Stamp cubes and the stack-mode PSF artifact, with their FITS layouts.
//!
//! Stamp container: one image extension per frame named `STAMPS_NN`
//! (1-based, two digits), each a cube of shape `[n_stamps, w, w]`.
//!
//! PSF artifact: empty primary HDU followed by `STACK` `[frames, w, w]`,
//! `MOFFAT` `[frames, w, w]` and `PAR` `[frames, n_params]`.

use std::path::Path;

use anyhow::{Context, bail};
use common::buffer2::Buffer2;
use fitsio::FitsFile;
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};

use super::error::{Error, Result};
use super::moffat::{FitType, MoffatParams};

/// Extension name holding the stamps of 0-based frame `frame_index`.
pub fn stamp_extension(frame_index: usize) -> String {
    format!("STAMPS_{:02}", frame_index + 1)
}

/// Square stamps for every frame, indexed `[frame][stamp]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StampSet {
    frames: Vec<Vec<Buffer2<f64>>>,
}

impl StampSet {
    pub fn new(frames: Vec<Vec<Buffer2<f64>>>) -> Self {
        debug_assert!(
            frames
                .iter()
                .flatten()
                .all(|s| s.width() == s.height()),
            "Stamps must be square"
        );
        Self { frames }
    }

    /// Read `frame_count` stamp extensions from a stamp container.
    pub fn from_fits(path: &Path, frame_count: usize) -> Result<Self> {
        read_stamp_cubes(path, frame_count).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Width of the stamps in the first frame that has any.
    pub fn stamp_width(&self) -> Option<usize> {
        self.frames.iter().flatten().next().map(|s| s.width())
    }

    pub fn frame(&self, frame_index: usize) -> &[Buffer2<f64>] {
        self.frames.get(frame_index).map_or(&[], Vec::as_slice)
    }

    pub fn stamp(&self, frame_index: usize, stamp_index: usize) -> Result<&Buffer2<f64>> {
        self.frame(frame_index)
            .get(stamp_index)
            .ok_or_else(|| Error::MissingStamp {
                extension: stamp_extension(frame_index),
                index: stamp_index,
            })
    }

    /// Write the set as a stamp container, overwriting `path`.
    pub fn write_fits(&self, path: &Path) -> anyhow::Result<()> {
        let mut fptr = create_fits(path)?;
        for (frame_index, stamps) in self.frames.iter().enumerate() {
            let Some(width) = stamps.first().map(|s| s.width()) else {
                continue;
            };
            let pixels: Vec<f64> = stamps.iter().flat_map(|s| s.pixels()).copied().collect();
            write_cube(
                &mut fptr,
                &stamp_extension(frame_index),
                &[stamps.len(), width, width],
                &pixels,
            )?;
        }
        Ok(())
    }
}

/// Per-frame results of a stack-mode fit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsfStackArtifact {
    pub stacks: Vec<Buffer2<f64>>,
    pub models: Vec<Buffer2<f64>>,
    pub params: Vec<MoffatParams>,
}

impl PsfStackArtifact {
    pub fn frame_count(&self) -> usize {
        self.params.len()
    }

    /// Write `STACK`, `MOFFAT` and `PAR` extensions, overwriting `path`.
    pub fn write_fits(&self, path: &Path) -> anyhow::Result<()> {
        let Some(first) = self.stacks.first() else {
            bail!("PSF artifact has no frames");
        };
        let width = first.width();
        let frames = self.frame_count();
        let n_params = self.params[0].as_slice().len();

        let mut fptr = create_fits(path)?;
        let stack: Vec<f64> = self.stacks.iter().flat_map(|s| s.pixels()).copied().collect();
        write_cube(&mut fptr, "STACK", &[frames, width, width], &stack)?;
        let model: Vec<f64> = self.models.iter().flat_map(|s| s.pixels()).copied().collect();
        write_cube(&mut fptr, "MOFFAT", &[frames, width, width], &model)?;
        let params: Vec<f64> = self
            .params
            .iter()
            .flat_map(|p| p.as_slice())
            .copied()
            .collect();
        write_cube(&mut fptr, "PAR", &[frames, n_params], &params)?;

        tracing::debug!(path = %path.display(), frames, "Wrote PSF artifact");
        Ok(())
    }

    /// Read an artifact written by [`PsfStackArtifact::write_fits`].
    pub fn read_fits(path: &Path) -> anyhow::Result<Self> {
        let mut fptr = FitsFile::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

        let (stack_shape, stack) = read_cube(&mut fptr, "STACK")?;
        let (_, model) = read_cube(&mut fptr, "MOFFAT")?;
        let (par_shape, params) = read_cube(&mut fptr, "PAR")?;

        let [frames, height, width] = stack_shape[..] else {
            bail!("STACK must be 3-dimensional, got {stack_shape:?}");
        };
        let [_, n_params] = par_shape[..] else {
            bail!("PAR must be 2-dimensional, got {par_shape:?}");
        };
        let fit_type = match n_params {
            6 => FitType::Circular,
            8 => FitType::Elliptical,
            n => bail!("PAR rows have {n} values, expected 6 or 8"),
        };

        let plane = width * height;
        let split = |pixels: &[f64]| -> Vec<Buffer2<f64>> {
            pixels
                .chunks_exact(plane)
                .map(|c| Buffer2::new(width, height, c.to_vec()))
                .collect()
        };
        let params = params
            .chunks_exact(n_params)
            .map(|row| MoffatParams::from_slice(fit_type, row))
            .collect::<Result<Vec<_>>>()?;
        debug_assert_eq!(params.len(), frames);

        Ok(Self {
            stacks: split(&stack),
            models: split(&model),
            params,
        })
    }
}

fn read_stamp_cubes(path: &Path, frame_count: usize) -> anyhow::Result<StampSet> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;

    let mut frames = Vec::with_capacity(frame_count);
    for frame_index in 0..frame_count {
        let extension = stamp_extension(frame_index);
        let (shape, pixels) = read_cube(&mut fptr, &extension)?;
        let stamps = match shape[..] {
            [_, h, w] => pixels
                .chunks_exact(w * h)
                .map(|c| Buffer2::new(w, h, c.to_vec()))
                .collect(),
            // A frame with a single detection may be stored as a plain image.
            [h, w] => vec![Buffer2::new(w, h, pixels)],
            _ => bail!("{extension} has unsupported shape {shape:?}"),
        };
        frames.push(stamps);
    }
    Ok(StampSet::new(frames))
}

fn read_cube(fptr: &mut FitsFile, extension: &str) -> anyhow::Result<(Vec<usize>, Vec<f64>)> {
    let hdu = fptr
        .hdu(extension)
        .with_context(|| format!("Missing extension {extension}"))?;
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => bail!("Extension {extension} is not an image"),
    };
    let pixels: Vec<f64> = hdu
        .read_image(fptr)
        .with_context(|| format!("Failed to read {extension}"))?;
    Ok((shape, pixels))
}

/// Create a FITS file with an empty primary HDU, replacing any existing file.
pub(crate) fn create_fits(path: &Path) -> anyhow::Result<FitsFile> {
    // fitsio won't overwrite
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    FitsFile::create(path)
        .open()
        .with_context(|| format!("Failed to create FITS file: {}", path.display()))
}

fn write_cube(
    fptr: &mut FitsFile,
    extension: &str,
    dimensions: &[usize],
    pixels: &[f64],
) -> anyhow::Result<()> {
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions,
    };
    let hdu = fptr
        .create_image(extension, &description)
        .with_context(|| format!("Failed to create extension {extension}"))?;
    hdu.write_image(fptr, pixels)
        .with_context(|| format!("Failed to write {extension}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::test_output_path;

    fn ramp(width: usize, offset: f64) -> Buffer2<f64> {
        Buffer2::from_fn(width, width, |x, y| offset + (y * width + x) as f64)
    }

    #[test]
    fn test_stamp_extension_names() {
        assert_eq!(stamp_extension(0), "STAMPS_01");
        assert_eq!(stamp_extension(11), "STAMPS_12");
    }

    #[test]
    fn test_missing_stamp_is_an_error() {
        let set = StampSet::new(vec![vec![ramp(3, 0.0)]]);
        assert!(set.stamp(0, 0).is_ok());
        assert!(matches!(
            set.stamp(0, 1),
            Err(Error::MissingStamp { index: 1, .. })
        ));
        assert!(set.stamp(4, 0).is_err());
        assert_eq!(set.stamp_width(), Some(3));
    }

    #[test]
    fn test_stamp_set_fits_round_trip() {
        let set = StampSet::new(vec![
            vec![ramp(5, 0.0), ramp(5, 100.0)],
            vec![ramp(5, 200.0)],
        ]);
        let path = test_output_path("acuity_stamps.fits");
        set.write_fits(&path).unwrap();

        let read = StampSet::from_fits(&path, 2).unwrap();
        assert_eq!(read.frame_count(), 2);
        assert_eq!(read.frame(0).len(), 2);
        assert_eq!(read.stamp(0, 1).unwrap(), &ramp(5, 100.0));
        assert_eq!(read.stamp(1, 0).unwrap(), &ramp(5, 200.0));
    }

    #[test]
    fn test_psf_artifact_fits_round_trip() {
        let params = MoffatParams::Elliptical([2.0, 2.0, 1.0, 1.5, 1.2, 0.1, 3.0, 0.0]);
        let artifact = PsfStackArtifact {
            stacks: vec![ramp(5, 0.0)],
            models: vec![params.render(5, 5)],
            params: vec![params],
        };
        let path = test_output_path("acuity_psf_artifact.fits");
        artifact.write_fits(&path).unwrap();

        let read = PsfStackArtifact::read_fits(&path).unwrap();
        assert_eq!(read, artifact);
    }
}
