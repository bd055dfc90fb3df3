use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use crate::dimension::DimensionSpec;
use crate::error::PipelineError;

/// Tuple of grouping column values, in schema order.
pub type CategoryKey = Vec<String>;

/// Counts per category key for one dimension.
///
/// Rows are kept sorted by key so that the written table only depends on its
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountTable {
    headers: Vec<String>,
    counts: BTreeMap<CategoryKey, u64>,
}

impl CountTable {
    pub fn new(spec: &DimensionSpec) -> Self {
        Self {
            headers: spec.headers(),
            counts: BTreeMap::new(),
        }
    }

    pub fn increment(&mut self, key: CategoryKey) {
        debug_assert_eq!(key.len() + 1, self.headers.len());
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Adds `count` to `key`, failing instead of wrapping around.
    pub fn add(&mut self, key: CategoryKey, count: u64) -> Result<(), PipelineError> {
        match self.counts.entry(key) {
            Entry::Vacant(vac) => {
                vac.insert(count);
            }
            Entry::Occupied(mut occ) => {
                let sum = occ
                    .get()
                    .checked_add(count)
                    .ok_or_else(|| PipelineError::CountOverflow {
                        key: occ.key().clone(),
                    })?;
                *occ.get_mut() = sum;
            }
        }
        Ok(())
    }

    /// Sets the count of `key`, returning the count it replaces.
    pub fn insert(&mut self, key: CategoryKey, count: u64) -> Option<u64> {
        self.counts.insert(key, count)
    }

    #[cfg(test)]
    pub fn get(&self, key: &[String]) -> Option<u64> {
        self.counts.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&CategoryKey, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for (key, count) in self.rows() {
            let count = count.to_string();
            wtr.write_record(key.iter().chain(std::iter::once(&count)))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Reads all rows of a count table artifact, duplicates included.
///
/// Every grouping column is read as a string; the header must match the
/// dimension schema exactly.
pub fn read_rows(
    path: &Path,
    spec: &DimensionSpec,
) -> Result<Vec<(CategoryKey, u64)>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let expected = spec.headers();
    let found: Vec<String> = rdr
        .headers()
        .map_err(|e| PipelineError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    if found != expected {
        return Err(PipelineError::SchemaMismatch {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }

    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| PipelineError::csv(path, e))?;
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        let count = match fields.pop() {
            Some(count) => count,
            None => continue,
        };
        let count = count.parse::<u64>().map_err(|_| PipelineError::InvalidCount {
            path: path.to_path_buf(),
            row: i + 1,
            value: count.clone(),
        })?;
        rows.push((fields, count));
    }
    Ok(rows)
}
