//! voxelmeta: term-based voxel-wise meta-analysis of study databases
//!
//! This library analyzes study activation databases indexed by a term
//! vocabulary: select a set of studies with a boolean term expression
//! (or an explicit ID list), run a voxel-wise meta-analysis with
//! multiple-comparison correction, and export the resulting images.
//!
//! The main components of this library are:
//! - `Dataset`: the study database, extensible with custom terms
//! - `Expr`: boolean term expressions (`&`, `|`, `~`, `*` wildcards)
//! - `MetaAnalysis`: the voxel-wise statistics engine
//! - `analyze_expression` / `analyze_all_terms` / `compare_expressions`:
//!   analysis entry points with file output
//! - `AppContext`: shared application state with a single-slot status
//!   gate and background load operations

mod analysis;
mod compare;
mod context;
mod correction;
mod dataset;
mod error;
mod expression;
mod images;
mod meta;
mod settings;
mod stats;
mod status;
mod utils;

pub use analysis::{analyze_all_terms, analyze_expression, AnalysisOptions};
pub use compare::{compare_expressions, CompareConfig, Comparison};
pub use context::{AppContext, AppEvent};
pub use correction::Correction;
pub use dataset::{
    Dataset, FeatureTable, ImageTable, StudyActivation, StudyId, StudySet,
    DEFAULT_LOADING_THRESHOLD,
};
pub use error::{Error, Result};
pub use expression::{validate_expression, Expr};
pub use images::MetaImages;
pub use meta::{MetaAnalysis, MetaParams};
pub use settings::{Settings, DEFAULT_FDR, DEFAULT_NUM_ITERATIONS, DEFAULT_ROI_NAME};
pub use status::{StatusBoard, StatusSnapshot, BUSY_NOTICE};
