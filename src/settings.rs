use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::{Error, Result};

/// Display name used when no region-of-interest file is configured.
pub const DEFAULT_ROI_NAME: &str = "whole_brain";

pub const DEFAULT_FDR: f64 = 0.01;
pub const DEFAULT_NUM_ITERATIONS: usize = 500;

/// Session settings. String setters validate and keep the prior value on
/// rejection.
#[derive(Debug, Clone)]
pub struct Settings {
    output_dir: PathBuf,
    roi_file: Option<PathBuf>,
    fdr: f64,
    num_iterations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            roi_file: None,
            fdr: DEFAULT_FDR,
            num_iterations: DEFAULT_NUM_ITERATIONS,
        }
    }
}

fn default_output_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxelmeta")
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn roi_file(&self) -> Option<&Path> {
        self.roi_file.as_deref()
    }

    pub fn fdr(&self) -> f64 {
        self.fdr
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.output_dir = dir.into();
    }

    pub fn set_roi_file(&mut self, path: Option<PathBuf>) {
        self.roi_file = path;
    }

    /// Parse and set the FDR threshold; must be a number strictly
    /// between 0 and 1.
    pub fn set_fdr(&mut self, raw: &str) -> Result<()> {
        let invalid = || Error::InvalidSetting {
            field: "fdr",
            message: "please enter a number between 0 and 1".to_string(),
        };
        let value: f64 = raw.trim().parse().map_err(|_| invalid())?;
        if value <= 0.0 || value >= 1.0 {
            return Err(invalid());
        }
        debug!(fdr = value, "fdr updated");
        self.fdr = value;
        Ok(())
    }

    /// Parse and set the iteration count; must be a positive integer
    /// written in plain digits.
    pub fn set_num_iterations(&mut self, raw: &str) -> Result<()> {
        let invalid = || Error::InvalidSetting {
            field: "num_iterations",
            message: "please enter an integer greater than 0".to_string(),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: usize = trimmed.parse().map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }
        debug!(num_iterations = value, "iteration count updated");
        self.num_iterations = value;
        Ok(())
    }

    /// Create the output directory if it is missing.
    pub fn ensure_output_dir(&self) -> Result<&Path> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(&self.output_dir)
    }

    /// Display name of the configured region of interest.
    pub fn roi_name(&self, with_ext: bool) -> String {
        let Some(path) = &self.roi_file else {
            return DEFAULT_ROI_NAME.to_string();
        };
        let name = if with_ext {
            path.file_name()
        } else {
            path.file_stem()
        };
        name.map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_ROI_NAME.to_string())
    }

    /// Check that the configured paths are usable.
    pub fn validate(&self) -> Result<()> {
        if !self.output_dir.is_dir() {
            return Err(Error::InvalidSetting {
                field: "output_dir",
                message: "please select a valid output directory".to_string(),
            });
        }
        if let Some(roi) = &self.roi_file {
            if !roi.is_file() {
                return Err(Error::InvalidSetting {
                    field: "roi_file",
                    message: "please select a valid roi file".to_string(),
                });
            }
        }
        Ok(())
    }
}
