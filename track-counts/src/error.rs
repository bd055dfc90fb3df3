use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::reference::{Crs, ReferenceLayer};

/// Failures that abort the work of a batch, a dimension or a consolidation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("i/o failure on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("reference dataset '{layer}' is unavailable: {reason}")]
    ReferenceUnavailable { layer: ReferenceLayer, reason: String },
    #[error("reference dataset '{layer}' uses {found}, but {requested} was requested")]
    CrsMismatch {
        layer: ReferenceLayer,
        requested: Crs,
        found: Crs,
    },
    #[error("csv failure on {}: {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("artifact {} has columns {found:?}, expected {expected:?}", path.display())]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("artifact {} row {row}: invalid count '{value}'", path.display())]
    InvalidCount {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("batch {ordinal} has artifacts of different sizes: {paths:?}")]
    ConflictingBatches { ordinal: usize, paths: Vec<PathBuf> },
    #[error("count overflow while merging key {key:?}")]
    CountOverflow { key: Vec<String> },
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Rejected run configuration. Raised before any batch is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch size must be a positive integer")]
    ZeroBatchSize,
    #[error("at least one aggregate dimension must be configured")]
    NoDimensions,
    #[error("dimension '{0}' is configured more than once")]
    DuplicateDimension(String),
    #[error("invalid dimension '{0}', expected one of region, country, activity")]
    UnknownDimension(String),
    #[error("invalid coordinate reference system '{0}'")]
    InvalidCrs(String),
    #[error("output directory {} is not writable: {source}", path.display())]
    OutputNotWritable { path: PathBuf, source: io::Error },
    #[error("alias table {}: {reason}", path.display())]
    InvalidAliases { path: PathBuf, reason: String },
    #[error("column '{column}' of dimension '{dimension}': {reason}")]
    InvalidSchema {
        dimension: String,
        column: String,
        reason: String,
    },
}

/// A single input line that could not be turned into a record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a geojson feature: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a feature, found '{0}'")]
    NotAFeature(String),
    #[error("feature has no geometry")]
    MissingGeometry,
    #[error("expected a point geometry, found {0}")]
    NotAPoint(&'static str),
}
