use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while validating input or orchestrating an analysis.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no expression entered")]
    EmptyExpression,

    #[error("illegal characters in expression: {0:?}")]
    IllegalCharacters(String),

    #[error("illegal usage of operators in expression: {0:?}")]
    IllegalOperators(String),

    #[error("unmatched parenthesis in expression: {0:?}")]
    UnmatchedParenthesis(String),

    #[error("{0:?} is not found in the database")]
    UnknownTerm(String),

    #[error("wildcard {0:?} matches no term in the database")]
    EmptyWildcard(String),

    #[error("term {0:?} already exists")]
    DuplicateTerm(String),

    #[error("must provide a list of valid study IDs")]
    NoValidStudyIds,

    #[error("no study found with the given expression")]
    EmptyStudySet,

    #[error("nothing specified for analysis")]
    NothingToAnalyze,

    #[error("no database loaded")]
    DatasetNotLoaded,

    #[error("voxel index {index} out of range for a space of {voxel_count} voxels")]
    VoxelOutOfRange { index: u32, voxel_count: usize },

    #[error("region of interest selects no voxels")]
    EmptyMask,

    #[error("no image named {0:?} in the analysis results")]
    UnknownImage(String),

    #[error("invalid setting for {field}: {message}")]
    InvalidSetting {
        field: &'static str,
        message: String,
    },

    #[error("invalid region-of-interest file {path}: {message}")]
    InvalidRoi { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed dataset archive: {0}")]
    Archive(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
