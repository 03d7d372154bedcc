//! Source catalog produced by the external source finder.
//!
//! One whitespace-separated numeric row per detected source; `#` starts a
//! comment. Columns used: 0 frame (1-based), 1 stamp index, 2 x, 3 y,
//! 7 flux, 8 quality flag.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;

use super::error::{Error, Result};

const FRAME_COLUMN: usize = 0;
const STAMP_COLUMN: usize = 1;
const X_COLUMN: usize = 2;
const Y_COLUMN: usize = 3;
const FLUX_COLUMN: usize = 7;
const QUALITY_COLUMN: usize = 8;

/// One catalog row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRecord {
    /// 1-based frame number.
    pub frame: u32,
    pub stamp: usize,
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub quality: i32,
}

impl SourceRecord {
    pub fn log_flux(&self) -> f64 {
        self.flux.log10()
    }

    /// Clean detection bright enough to fit.
    pub fn qualifies(&self, min_log_flux: f64) -> bool {
        self.quality == 1 && self.log_flux() > min_log_flux
    }
}

/// Qualifying source together with the stamp that holds it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectedSource {
    pub record: SourceRecord,
    /// Position of the stamp in its frame's stamp cube.
    pub stamp_index: usize,
}

/// All catalog rows in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceCatalog {
    records: Vec<SourceRecord>,
}

impl SourceCatalog {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source catalog {}", path.display()))
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
        text.parse()
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Qualifying sources of 0-based frame `frame_index`.
    ///
    /// A source's stamp index is its position among all catalog rows of the
    /// same frame, qualifying or not, since the stamp cube holds one stamp
    /// per detection.
    pub fn select(&self, frame_index: usize, min_log_flux: f64) -> Vec<SelectedSource> {
        let frame = frame_index as u32 + 1;
        self.records
            .iter()
            .filter(|r| r.frame == frame)
            .enumerate()
            .filter(|(_, r)| r.qualifies(min_log_flux))
            .map(|(stamp_index, record)| SelectedSource {
                record: *record,
                stamp_index,
            })
            .collect()
    }
}

impl FromStr for SourceCatalog {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (line_index, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let columns = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::MalformedCatalog {
                    line: line_index + 1,
                    message: e.to_string(),
                })?;
            if columns.len() <= QUALITY_COLUMN {
                return Err(Error::MalformedCatalog {
                    line: line_index + 1,
                    message: format!(
                        "expected at least {} columns, found {}",
                        QUALITY_COLUMN + 1,
                        columns.len()
                    ),
                });
            }

            records.push(SourceRecord {
                frame: columns[FRAME_COLUMN] as u32,
                stamp: columns[STAMP_COLUMN] as usize,
                x: columns[X_COLUMN],
                y: columns[Y_COLUMN],
                flux: columns[FLUX_COLUMN],
                quality: columns[QUALITY_COLUMN] as i32,
            });
        }
        Ok(Self { records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = "\
# frame stamp x y a b c flux flag
1 0 10.5 20.5 0 0 0 5000 1
1 1 30.0 40.0 0 0 0 50 1
1 2 50.0 60.0 0 0 0 9000 0
1 3 70.0 80.0 0 0 0 2000 1   # trailing comment

2 0 11.0 21.0 0 0 0 300 1
";

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let catalog: SourceCatalog = CATALOG.parse().unwrap();
        assert_eq!(catalog.len(), 5);
        let first = catalog.records()[0];
        assert_eq!(first.frame, 1);
        assert_eq!(first.x, 10.5);
        assert_eq!(first.y, 20.5);
        assert_eq!(first.flux, 5000.0);
        assert_eq!(first.quality, 1);
    }

    #[test]
    fn test_select_applies_quality_and_flux_cut() {
        let catalog: SourceCatalog = CATALOG.parse().unwrap();
        let selected = catalog.select(0, 2.0);
        // Row 1 is too faint (log10 50 < 2), row 2 is flagged.
        let indices: Vec<usize> = selected.iter().map(|s| s.stamp_index).collect();
        assert_eq!(indices, vec![0, 3]);
        assert_eq!(selected[1].record.x, 70.0);
    }

    #[test]
    fn test_select_indexes_within_frame() {
        let catalog: SourceCatalog = CATALOG.parse().unwrap();
        let selected = catalog.select(1, 2.0);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].stamp_index, 0);
        assert!(catalog.select(5, 2.0).is_empty());
    }

    #[test]
    fn test_flux_cut_is_strict() {
        let record = SourceRecord {
            frame: 1,
            stamp: 0,
            x: 0.0,
            y: 0.0,
            flux: 100.0,
            quality: 1,
        };
        assert!(!record.qualifies(2.0));
    }

    #[test]
    fn test_parse_rejects_short_rows() {
        let err = "1 0 1.0 2.0".parse::<SourceCatalog>().unwrap_err();
        assert!(matches!(err, Error::MalformedCatalog { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let err = "1 0 x 2 0 0 0 100 1".parse::<SourceCatalog>().unwrap_err();
        assert!(matches!(err, Error::MalformedCatalog { line: 1, .. }));
    }
}
