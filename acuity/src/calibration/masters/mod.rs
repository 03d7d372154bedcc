//! Master bias and per-filter master flat creation.


use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::buffer2::Buffer2;

use super::FrameType;
use super::error::{Error, Result};
use super::fits;
use super::frame::CcdFrame;
use super::stacker::stack_frames;
use crate::config::{FrameLabels, FrameRole, StackingConfig};

/// A combined calibration frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterFrame {
    pub data: Buffer2<f32>,
    /// OBJECT label written with the frame.
    pub object: String,
    /// Filter, for flats.
    pub filter: Option<String>,
    /// Number of raw frames combined.
    pub frame_count: usize,
}

impl MasterFrame {
    pub fn bias(data: Buffer2<f32>, frame_count: usize) -> Self {
        Self {
            data,
            object: "Master_Bias".to_string(),
            filter: None,
            frame_count,
        }
    }

    pub fn flat(data: Buffer2<f32>, filter: &str, frame_count: usize) -> Self {
        Self {
            data,
            object: format!("{filter}-Band_Master_Flat"),
            filter: Some(filter.to_string()),
            frame_count,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self.filter {
            Some(_) => FrameType::Flat,
            None => FrameType::Bias,
        }
    }

    /// `master_bias.fits` or `master_flat_<filter>.fits`.
    pub fn file_name(&self) -> String {
        match &self.filter {
            Some(filter) => format!("master_flat_{filter}.fits"),
            None => "master_bias.fits".to_string(),
        }
    }

    /// Write into `dir`, overwriting an existing file.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(self.file_name());
        fits::save_image(&self.data, &self.object, &path)?;
        tracing::info!(
            frame_type = %self.frame_type(),
            path = %path.display(),
            "Saved master frame"
        );
        Ok(path)
    }
}

/// Short frame name used in logs and outputs: the stem up to the first `_`.
pub(crate) fn short_name(frame: &CcdFrame) -> &str {
    frame
        .header
        .name
        .split('_')
        .next()
        .unwrap_or(&frame.header.name)
}

fn frame_names<'a>(frames: impl IntoIterator<Item = &'a CcdFrame>) -> Vec<&'a str> {
    frames.into_iter().map(short_name).collect()
}

/// Combine every bias frame into the master bias.
pub fn master_bias(
    frames: &[CcdFrame],
    labels: &FrameLabels,
    config: &StackingConfig,
) -> Result<MasterFrame> {
    let biases: Vec<CcdFrame> = frames
        .iter()
        .filter(|f| labels.role(&f.header.object) == FrameRole::Bias)
        .cloned()
        .collect();

    tracing::info!(
        count = biases.len(),
        frames = ?frame_names(&biases),
        "Combining bias frames into master bias"
    );

    let data = stack_frames(&biases, FrameType::Bias, config)?;
    Ok(MasterFrame::bias(data, biases.len()))
}

/// Preferred flat role among `roles`: sky flat, then alternate sky flat,
/// then dome flat.
pub fn preferred_flat_role(roles: impl IntoIterator<Item = FrameRole>) -> Option<FrameRole> {
    let roles: Vec<FrameRole> = roles.into_iter().collect();
    FrameRole::FLAT_PREFERENCE
        .into_iter()
        .find(|preferred| roles.contains(preferred))
}

/// One master flat per filter, all of the preferred flat type.
///
/// The flat type is chosen once over every flat frame. Filters without
/// frames of that type get no master.
pub fn master_flats(
    frames: &[CcdFrame],
    labels: &FrameLabels,
    config: &StackingConfig,
) -> Result<BTreeMap<String, MasterFrame>> {
    let roles: Vec<FrameRole> = frames
        .iter()
        .map(|f| labels.role(&f.header.object))
        .collect();

    let mut masters = BTreeMap::new();
    let Some(role) = preferred_flat_role(roles.iter().copied()) else {
        tracing::warn!("No flat frames found");
        return Ok(masters);
    };
    tracing::info!(flat_type = %role, "Using flat type");

    let mut by_filter: BTreeMap<&str, Vec<CcdFrame>> = BTreeMap::new();
    for (frame, &frame_role) in frames.iter().zip(&roles) {
        if frame_role == role {
            by_filter
                .entry(frame.header.filter.as_str())
                .or_default()
                .push(frame.clone());
        }
    }

    for (filter, flats) in by_filter {
        tracing::info!(
            filter,
            count = flats.len(),
            frames = ?frame_names(&flats),
            "Combining flat frames into master flat"
        );

        let data = stack_frames(&flats, FrameType::Flat, config)?;
        masters.insert(filter.to_string(), MasterFrame::flat(data, filter, flats.len()));
    }

    Ok(masters)
}
