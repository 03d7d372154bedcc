//! CCD frames, FITS image sections and overscan correction.

use std::fmt;
use std::str::FromStr;

use common::buffer2::Buffer2;

use super::FrameType;
use super::error::{Error, Result};

/// A FITS image section `[x1:x2,y1:y2]`, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub x1: usize,
    pub x2: usize,
    pub y1: usize,
    pub y2: usize,
}

impl Section {
    pub fn width(&self) -> usize {
        self.x2 + 1 - self.x1
    }

    pub fn height(&self) -> usize {
        self.y2 + 1 - self.y1
    }

    /// The whole of a `width × height` image.
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x1: 1,
            x2: width,
            y1: 1,
            y2: height,
        }
    }

    fn check_within(&self, width: usize, height: usize) -> Result<()> {
        if self.x2 > width || self.y2 > height {
            return Err(Error::InvalidSection {
                section: self.to_string(),
                reason: format!("outside {width}x{height} image"),
            });
        }
        Ok(())
    }

    /// Copy the section out of `image`.
    pub fn crop<T: Copy + Default>(&self, image: &Buffer2<T>) -> Result<Buffer2<T>> {
        self.check_within(image.width(), image.height())?;
        Ok(image.crop(self.x1 - 1, self.y1 - 1, self.width(), self.height()))
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{},{}:{}]", self.x1, self.x2, self.y1, self.y2)
    }
}

impl FromStr for Section {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSection {
            section: s.to_string(),
            reason: reason.to_string(),
        };

        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| invalid("expected [x1:x2,y1:y2]"))?;
        let (xs, ys) = inner
            .split_once(',')
            .ok_or_else(|| invalid("expected two ranges"))?;

        let range = |r: &str| -> Result<(usize, usize)> {
            let (a, b) = r.split_once(':').ok_or_else(|| invalid("expected a:b"))?;
            let a = a.trim().parse().map_err(|_| invalid("bound is not an integer"))?;
            let b = b.trim().parse().map_err(|_| invalid("bound is not an integer"))?;
            Ok((a, b))
        };
        let (x1, x2) = range(xs)?;
        let (y1, y2) = range(ys)?;

        if x1 == 0 || y1 == 0 || x2 < x1 || y2 < y1 {
            return Err(invalid("bounds must be 1-based and ascending"));
        }
        Ok(Self { x1, x2, y1, y2 })
    }
}

/// Header values the pipeline relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    /// File stem the frame was loaded from.
    pub name: String,
    /// OBJECT keyword as written by the telescope.
    pub object: String,
    pub filter: String,
    /// COVER: number of overscan columns on the right edge.
    pub cover: usize,
    /// DATASEC: the illuminated region.
    pub datasec: Section,
}

/// Pixel data plus a bad-pixel mask (`true` = masked).
#[derive(Debug, Clone, PartialEq)]
pub struct CcdFrame {
    pub data: Buffer2<f32>,
    pub mask: Buffer2<bool>,
    pub header: FrameHeader,
}

impl CcdFrame {
    pub fn new(data: Buffer2<f32>, header: FrameHeader) -> Self {
        let mask = Buffer2::new_filled(data.width(), data.height(), false);
        Self { data, mask, header }
    }

    pub fn width(&self) -> usize {
        self.data.width()
    }

    pub fn height(&self) -> usize {
        self.data.height()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width(), self.height())
    }

    pub fn masked_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Overscan columns `[NAXIS1−COVER+1 : NAXIS1]` over all rows.
    pub fn overscan_section(&self) -> Result<Section> {
        let (width, height) = self.dimensions();
        let cover = self.header.cover;
        if cover == 0 || cover >= width {
            return Err(Error::InvalidSection {
                section: format!("COVER={cover}"),
                reason: format!("overscan must be narrower than the {width} px frame"),
            });
        }
        Ok(Section {
            x1: width - cover + 1,
            x2: width,
            y1: 1,
            y2: height,
        })
    }

    /// Subtract the mean of each row's overscan pixels from that row.
    pub fn subtract_overscan(&self) -> Result<CcdFrame> {
        let section = self.overscan_section()?;
        let mut out = self.clone();
        let (x0, x1) = (section.x1 - 1, section.x2);
        for row in out.data.rows_mut() {
            let overscan = &row[x0..x1];
            let level = overscan.iter().map(|&v| v as f64).sum::<f64>() / overscan.len() as f64;
            let level = level as f32;
            for v in row.iter_mut() {
                *v -= level;
            }
        }
        Ok(out)
    }

    /// Crop data and mask to DATASEC.
    pub fn trim(&self) -> Result<CcdFrame> {
        let section = self.header.datasec;
        Ok(CcdFrame {
            data: section.crop(&self.data)?,
            mask: section.crop(&self.mask)?,
            header: FrameHeader {
                datasec: Section::full(section.width(), section.height()),
                cover: 0,
                ..self.header.clone()
            },
        })
    }

    /// Overscan subtraction followed by trimming to DATASEC.
    pub fn trim_overscan(&self) -> Result<CcdFrame> {
        self.subtract_overscan()?.trim()
    }

    /// Mask pixels above `level`.
    pub fn mask_saturated(&mut self, level: f32) {
        for (m, &v) in self.mask.iter_mut().zip(self.data.iter()) {
            if v > level {
                *m = true;
            }
        }
    }

    /// OR `mask` into the frame's mask.
    pub fn add_mask(&mut self, mask: &Buffer2<bool>) -> Result<()> {
        if !self.mask.same_shape(mask) {
            return Err(Error::InvalidSection {
                section: Section::full(mask.width(), mask.height()).to_string(),
                reason: format!(
                    "mask does not match the {}x{} frame",
                    self.width(),
                    self.height()
                ),
            });
        }
        for (m, &extra) in self.mask.iter_mut().zip(mask.iter()) {
            *m |= extra;
        }
        Ok(())
    }

    pub fn apply_gain(&mut self, gain: f32) {
        for v in self.data.iter_mut() {
            *v *= gain;
        }
    }

    fn check_master(&self, frame_type: FrameType, master: &Buffer2<f32>) -> Result<()> {
        let actual = (master.width(), master.height());
        if actual != self.dimensions() {
            return Err(Error::DimensionMismatch {
                frame_type,
                frame: self.header.name.clone(),
                expected: self.dimensions(),
                actual,
            });
        }
        Ok(())
    }

    /// Subtract a master bias of the same (trimmed) shape.
    pub fn subtract_bias(&self, bias: &Buffer2<f32>) -> Result<CcdFrame> {
        self.check_master(FrameType::Bias, bias)?;
        let mut out = self.clone();
        for (v, &b) in out.data.iter_mut().zip(bias.iter()) {
            *v -= b;
        }
        Ok(out)
    }

    /// Divide by `flat` normalized to unit mean.
    ///
    /// Pixels that become non-finite are masked.
    pub fn divide_flat(&self, flat: &Buffer2<f32>) -> Result<CcdFrame> {
        self.check_master(FrameType::Flat, flat)?;
        let mean = flat.iter().map(|&v| v as f64).sum::<f64>() / flat.len().max(1) as f64;
        let mut out = self.clone();
        for ((v, m), &f) in out.data.iter_mut().zip(out.mask.iter_mut()).zip(flat.iter()) {
            *v = (*v as f64 * mean / f as f64) as f32;
            if !v.is_finite() {
                *m = true;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cover: usize, datasec: &str) -> FrameHeader {
        FrameHeader {
            name: "d1001".to_string(),
            object: "NGC 6819".to_string(),
            filter: "V".to_string(),
            cover,
            datasec: datasec.parse().unwrap(),
        }
    }

    #[test]
    fn test_parse_section() {
        let section: Section = "[1:1024,1:1056]".parse().unwrap();
        assert_eq!(
            section,
            Section {
                x1: 1,
                x2: 1024,
                y1: 1,
                y2: 1056
            }
        );
        assert_eq!(section.width(), 1024);
        assert_eq!(section.height(), 1056);
        assert_eq!(section.to_string(), "[1:1024,1:1056]");
        assert_eq!(" [ 3:4 , 5:9 ] ".parse::<Section>().unwrap().height(), 5);
    }

    #[test]
    fn test_parse_section_rejects_malformed() {
        for bad in ["1:4,1:4", "[1:4]", "[0:4,1:4]", "[4:1,1:4]", "[a:4,1:4]", "[1-4,1:4]"] {
            assert!(
                matches!(bad.parse::<Section>(), Err(Error::InvalidSection { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_crop_section_is_one_based_inclusive() {
        let image = Buffer2::from_fn(5, 4, |x, y| (y * 10 + x) as f32);
        let cropped: Section = "[2:3,2:4]".parse().unwrap();
        let out = cropped.crop(&image).unwrap();
        assert_eq!(out.width(), 2);
        assert_eq!(out.height(), 3);
        assert_eq!(out[(0, 0)], 11.0);
        assert_eq!(out[(1, 2)], 32.0);

        let outside: Section = "[1:6,1:4]".parse().unwrap();
        assert!(outside.crop(&image).is_err());
    }

    #[test]
    fn test_overscan_section_from_cover() {
        let frame = CcdFrame::new(Buffer2::new_filled(10, 4, 0.0), header(3, "[1:7,1:4]"));
        let section = frame.overscan_section().unwrap();
        assert_eq!(section.to_string(), "[8:10,1:4]");

        let bad = CcdFrame::new(Buffer2::new_filled(10, 4, 0.0), header(0, "[1:7,1:4]"));
        assert!(bad.overscan_section().is_err());
    }

    #[test]
    fn test_subtract_overscan_uses_row_mean() {
        // Science columns at 100 + row, overscan at row * 2 and row * 4.
        let data = Buffer2::from_fn(6, 3, |x, y| match x {
            4 => (y * 2) as f32,
            5 => (y * 4) as f32,
            _ => 100.0 + y as f32,
        });
        let frame = CcdFrame::new(data, header(2, "[1:4,1:3]"));

        let out = frame.trim_overscan().unwrap();

        assert_eq!(out.dimensions(), (4, 3));
        for y in 0..3 {
            let expected = 100.0 + y as f32 - 3.0 * y as f32;
            for x in 0..4 {
                assert!((out.data[(x, y)] - expected).abs() < 1e-5);
            }
        }
        assert_eq!(out.header.datasec, Section::full(4, 3));
        assert_eq!(out.header.name, "d1001");
    }

    #[test]
    fn test_trim_keeps_mask_aligned() {
        let mut frame = CcdFrame::new(Buffer2::new_filled(6, 4, 1.0), header(2, "[2:4,2:3]"));
        frame.mask[(2, 2)] = true;
        let out = frame.trim().unwrap();
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.mask[(1, 1)]);
        assert_eq!(out.masked_count(), 1);
    }

    #[test]
    fn test_mask_saturated_and_gain() {
        let data = Buffer2::new(3, 1, vec![100.0, 62_000.0, 62_001.0]);
        let mut frame = CcdFrame::new(data, header(1, "[1:2,1:1]"));
        frame.mask_saturated(62_000.0);
        assert_eq!(frame.mask.pixels(), &[false, false, true]);

        frame.apply_gain(1.8);
        assert!((frame.data[(0, 0)] - 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_subtract_bias() {
        let frame = CcdFrame::new(Buffer2::new_filled(3, 2, 110.0), header(1, "[1:3,1:2]"));
        let bias = Buffer2::from_fn(3, 2, |x, _| 10.0 * x as f32);

        let out = frame.subtract_bias(&bias).unwrap();

        assert_eq!(out.data.row(1), &[110.0, 100.0, 90.0]);
        assert_eq!(frame.data[(2, 1)], 110.0);
    }

    #[test]
    fn test_divide_flat_normalizes_by_flat_mean() {
        let frame = CcdFrame::new(Buffer2::new_filled(2, 2, 100.0), header(1, "[1:2,1:2]"));
        // Mean 2: effective flat is [0.5, 1.5, 1.0, 1.0].
        let flat = Buffer2::new(2, 2, vec![1.0, 3.0, 2.0, 2.0]);

        let out = frame.divide_flat(&flat).unwrap();

        for (a, b) in out.data.iter().zip([200.0, 100.0 / 1.5, 100.0, 100.0]) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
        assert_eq!(out.masked_count(), 0);
    }

    #[test]
    fn test_divide_flat_masks_zero_pixels() {
        let frame = CcdFrame::new(Buffer2::new_filled(2, 1, 100.0), header(1, "[1:2,1:1]"));
        let flat = Buffer2::new(2, 1, vec![0.0, 2.0]);
        let out = frame.divide_flat(&flat).unwrap();
        assert!(out.mask[(0, 0)]);
        assert!(!out.mask[(1, 0)]);
    }

    #[test]
    fn test_master_shape_must_match() {
        let frame = CcdFrame::new(Buffer2::new_filled(3, 2, 0.0), header(1, "[1:3,1:2]"));
        let err = frame.subtract_bias(&Buffer2::new_filled(2, 2, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                frame_type: FrameType::Bias,
                expected: (3, 2),
                actual: (2, 2),
                ..
            }
        ));
    }

    #[test]
    fn test_add_mask_requires_same_shape() {
        let mut frame = CcdFrame::new(Buffer2::new_filled(3, 2, 0.0), header(1, "[1:2,1:2]"));
        let mut extra = Buffer2::new_filled(3, 2, false);
        extra[(0, 1)] = true;
        frame.add_mask(&extra).unwrap();
        assert!(frame.mask[(0, 1)]);

        assert!(frame.add_mask(&Buffer2::new_filled(2, 2, false)).is_err());
    }
}
