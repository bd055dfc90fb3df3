use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::table::CountTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Written,
    AlreadyPresent,
}

/// A count table file that is published at most once.
///
/// The table is written to a temporary file in the same directory and renamed
/// into place, so an existing file at `path` is always a complete table.
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
}

impl Artifact {
    pub fn new(dir: &Path, file_name: &str) -> Self {
        Self {
            path: dir.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Computes and publishes the table, unless `skip_existing` is set and the
    /// artifact is already there, in which case `compute` is not called.
    pub fn publish_with<F>(
        &self,
        skip_existing: bool,
        compute: F,
    ) -> Result<Publication, PipelineError>
    where
        F: FnOnce() -> Result<CountTable, PipelineError>,
    {
        if skip_existing && self.exists() {
            debug!("{} exists, skipping", self.path.display());
            return Ok(Publication::AlreadyPresent);
        }
        let table = compute()?;
        self.write(&table)?;
        info!(
            "wrote {} ({} rows, {} records)",
            self.path.display(),
            table.len(),
            table.total()
        );
        Ok(Publication::Written)
    }

    fn write(&self, table: &CountTable) -> Result<(), PipelineError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let io_err = |e: std::io::Error| PipelineError::io(&self.path, e);

        let tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| PipelineError::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            table
                .write_csv(&mut writer)
                .map_err(|e| PipelineError::csv(tmp.path(), e))?;
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        // replaces a concurrently published copy, whose content is identical
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
