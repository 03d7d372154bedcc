//! FITS adapters for raw, intermediate and master frames.

use std::path::Path;

use anyhow::{Context, bail};
use common::buffer2::Buffer2;
use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};

use super::error::{Error, Result};
use super::frame::{CcdFrame, FrameHeader, Section};

/// Extension holding the bad-pixel mask (non-zero = masked).
pub const MASK_EXTENSION: &str = "MASK";

/// Header values as found in the file, before validation.
struct RawHeader {
    object: Option<String>,
    filter: Option<String>,
    cover: Option<i64>,
    datasec: Option<String>,
}

/// File stem used to name outputs.
pub fn frame_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Load a frame with its OBJECT, filter, COVER and DATASEC keywords.
///
/// The filter is read from FILTNAM, falling back to FILTER. A `MASK`
/// extension, when present, becomes the frame's mask.
pub fn load_frame(path: &Path) -> Result<CcdFrame> {
    let (data, mask, raw) = read_frame(path).map_err(|source| Error::Fits {
        path: path.to_path_buf(),
        source,
    })?;

    let name = frame_name(path);
    let missing = |keyword| Error::MissingHeader {
        name: name.clone(),
        keyword,
    };
    let object = raw.object.ok_or_else(|| missing("OBJECT"))?;
    let filter = raw.filter.ok_or_else(|| missing("FILTNAM"))?;
    let cover = raw
        .cover
        .and_then(|c| usize::try_from(c).ok())
        .ok_or_else(|| missing("COVER"))?;
    let datasec = raw
        .datasec
        .ok_or_else(|| missing("DATASEC"))?
        .parse::<Section>()?;

    let header = FrameHeader {
        name,
        object: object.trim().to_string(),
        filter: filter.trim().to_string(),
        cover,
        datasec,
    };
    let mut frame = CcdFrame::new(data, header);
    if let Some(mask) = mask {
        frame.add_mask(&mask)?;
    }
    Ok(frame)
}

fn read_frame(
    path: &Path,
) -> anyhow::Result<(Buffer2<f32>, Option<Buffer2<bool>>, RawHeader)> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
    let hdu = fptr.primary_hdu().context("Failed to access primary HDU")?;

    let data = read_plane::<f32>(&hdu, &mut fptr)?;
    let raw = RawHeader {
        object: read_key_optional(&hdu, &mut fptr, "OBJECT"),
        filter: read_key_optional::<String>(&hdu, &mut fptr, "FILTNAM")
            .or_else(|| read_key_optional(&hdu, &mut fptr, "FILTER")),
        cover: read_key_optional(&hdu, &mut fptr, "COVER"),
        datasec: read_key_optional(&hdu, &mut fptr, "DATASEC"),
    };

    let mask = match fptr.hdu(MASK_EXTENSION) {
        Ok(mask_hdu) => Some(read_plane::<u8>(&mask_hdu, &mut fptr)?.map(|&v| v != 0)),
        Err(_) => None,
    };

    Ok((data, mask, raw))
}

/// Load a static bad-pixel mask stored as a FITS image (non-zero = masked).
pub fn load_mask(path: &Path) -> Result<Buffer2<bool>> {
    let read = || -> anyhow::Result<Buffer2<bool>> {
        let mut fptr = FitsFile::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
        let hdu = fptr.primary_hdu().context("Failed to access primary HDU")?;
        let values = read_plane::<f32>(&hdu, &mut fptr)?;
        Ok(values.map(|&v| v != 0.0))
    };
    read().map_err(|source| Error::Fits {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a frame as the primary image plus a `MASK` extension,
/// overwriting `path`.
pub fn save_frame(frame: &CcdFrame, path: &Path) -> Result<()> {
    let write = || -> anyhow::Result<()> {
        let mut fptr = write_primary(path, &frame.data)?;
        let hdu = fptr.primary_hdu()?;
        hdu.write_key(&mut fptr, "OBJECT", frame.header.object.as_str())?;
        hdu.write_key(&mut fptr, "FILTNAM", frame.header.filter.as_str())?;

        let mask: Vec<u8> = frame.mask.iter().map(|&m| u8::from(m)).collect();
        let description = ImageDescription {
            data_type: ImageType::UnsignedByte,
            dimensions: &[frame.height(), frame.width()],
        };
        let mask_hdu = fptr
            .create_image(MASK_EXTENSION, &description)
            .context("Failed to create MASK extension")?;
        mask_hdu
            .write_image(&mut fptr, &mask)
            .context("Failed to write MASK extension")?;
        Ok(())
    };
    write().map_err(|source| Error::Fits {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a master frame with its OBJECT label, overwriting `path`.
pub fn save_image(data: &Buffer2<f32>, object: &str, path: &Path) -> Result<()> {
    let write = || -> anyhow::Result<()> {
        let mut fptr = write_primary(path, data)?;
        let hdu = fptr.primary_hdu()?;
        hdu.write_key(&mut fptr, "OBJECT", object)?;
        Ok(())
    };
    write().map_err(|source| Error::Fits {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the primary image of a master frame.
pub fn load_image(path: &Path) -> Result<(Buffer2<f32>, Option<String>)> {
    let read = || -> anyhow::Result<(Buffer2<f32>, Option<String>)> {
        let mut fptr = FitsFile::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
        let hdu = fptr.primary_hdu().context("Failed to access primary HDU")?;
        let data = read_plane::<f32>(&hdu, &mut fptr)?;
        let object = read_key_optional(&hdu, &mut fptr, "OBJECT");
        Ok((data, object))
    };
    read().map_err(|source| Error::Fits {
        path: path.to_path_buf(),
        source,
    })
}

fn write_primary(path: &Path, data: &Buffer2<f32>) -> anyhow::Result<FitsFile> {
    // fitsio won't overwrite
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &[data.height(), data.width()],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .with_context(|| format!("Failed to create FITS file: {}", path.display()))?;
    let hdu = fptr.primary_hdu()?;
    hdu.write_image(&mut fptr, data.pixels())
        .context("Failed to write image data")?;
    Ok(fptr)
}

fn read_plane<T>(hdu: &FitsHdu, fptr: &mut FitsFile) -> anyhow::Result<Buffer2<T>>
where
    Vec<T>: fitsio::images::ReadImage,
{
    let (height, width) = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => match shape[..] {
            [height, width] => (height, width),
            _ => bail!("Expected a 2-dimensional image, got shape {shape:?}"),
        },
        _ => bail!("HDU is not an image"),
    };
    let pixels: Vec<T> = hdu
        .read_image(fptr)
        .context("Failed to read image data")?;
    if pixels.len() != width * height {
        bail!(
            "Pixel count mismatch: {} for {width}x{height}",
            pixels.len()
        );
    }
    Ok(Buffer2::new(width, height, pixels))
}

/// Helper to read an optional key from FITS header.
fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}
