use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::alias::NameAliases;
use crate::dimension::{Dimension, DimensionSpec};
use crate::error::ConfigError;
use crate::reference::{Crs, ReferenceLayer};

/// Validated options of one run.
#[derive(Debug)]
pub struct RunConfig {
    /// empty means stdin
    pub inputs: Vec<PathBuf>,
    pub batch_size: usize,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub crs: Crs,
    pub skip_existing: bool,
    pub skip_batch_phase: bool,
    pub dimensions: Vec<DimensionSpec>,
    pub reference_paths: HashMap<ReferenceLayer, PathBuf>,
    pub aliases: Option<NameAliases>,
}

impl RunConfig {
    /// Checks everything that can be checked before the first batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.dimensions.is_empty() {
            return Err(ConfigError::NoDimensions);
        }
        prepare_output_dir(&self.output_dir)
    }
}

pub fn dimension_specs(dimensions: &[Dimension]) -> Result<Vec<DimensionSpec>, ConfigError> {
    if dimensions.is_empty() {
        return Err(ConfigError::NoDimensions);
    }
    let mut seen = HashSet::new();
    for dimension in dimensions {
        if !seen.insert(*dimension) {
            return Err(ConfigError::DuplicateDimension(dimension.to_string()));
        }
    }
    dimensions
        .iter()
        .map(|d| DimensionSpec::standard(*d))
        .collect()
}

/// Reference dataset locations, explicit paths taking precedence over the
/// data directory layout.
pub fn reference_paths(
    data_dir: &Path,
    counties: Option<PathBuf>,
    countries: Option<PathBuf>,
) -> HashMap<ReferenceLayer, PathBuf> {
    HashMap::from([
        (
            ReferenceLayer::Counties,
            counties.unwrap_or_else(|| ReferenceLayer::Counties.default_path(data_dir)),
        ),
        (
            ReferenceLayer::Countries,
            countries.unwrap_or_else(|| ReferenceLayer::Countries.default_path(data_dir)),
        ),
    ])
}

/// Creates the output directory and makes sure files can be created in it.
pub fn prepare_output_dir(path: &Path) -> Result<(), ConfigError> {
    let not_writable = |source: std::io::Error| ConfigError::OutputNotWritable {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).map_err(not_writable)?;
    tempfile::Builder::new()
        .prefix(".writable")
        .tempfile_in(path)
        .map_err(not_writable)?;
    Ok(())
}
