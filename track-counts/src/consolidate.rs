use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifact::{Artifact, Publication};
use crate::batch::BatchId;
use crate::dimension::{Dimension, DimensionSpec};
use crate::error::PipelineError;
use crate::table::{read_rows, CategoryKey, CountTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consolidation {
    pub dimension: Dimension,
    pub path: PathBuf,
    pub publication: Publication,
    /// number of batch artifacts merged, zero if the table was already there
    pub batches_merged: usize,
    pub total: u64,
}

/// Batch artifacts of a dimension in `output_dir`, ordered by batch ordinal.
///
/// Two artifacts claiming the same ordinal with different sizes come from
/// different inputs and are refused rather than counted twice.
pub fn discover(
    output_dir: &Path,
    spec: &DimensionSpec,
) -> Result<Vec<(BatchId, PathBuf)>, PipelineError> {
    let entries = fs::read_dir(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;
    let mut found: BTreeMap<usize, (BatchId, PathBuf)> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(output_dir, e))?;
        let name = entry.file_name();
        let id = match name
            .to_str()
            .and_then(|name| BatchId::from_artifact_name(name, spec.suffix))
        {
            Some(id) => id,
            None => continue,
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match found.entry(id.ordinal) {
            Entry::Vacant(vac) => {
                vac.insert((id, path));
            }
            Entry::Occupied(occ) => {
                return Err(PipelineError::ConflictingBatches {
                    ordinal: id.ordinal,
                    paths: vec![occ.get().1.clone(), path],
                });
            }
        }
    }
    Ok(found.into_values().collect())
}

/// Merges the rows of many count tables into one.
///
/// Keys seen more than once have their counts summed with overflow checks,
/// keys seen once are carried over unchanged. The merged total equals the
/// sum of all input counts.
pub fn merge_rows(
    spec: &DimensionSpec,
    rows: &[(CategoryKey, u64)],
) -> Result<CountTable, PipelineError> {
    let mut occurrences: HashMap<&CategoryKey, usize> = HashMap::with_capacity(rows.len());
    for (key, _) in rows {
        *occurrences.entry(key).or_insert(0) += 1;
    }
    let (duplicates, unique): (Vec<_>, Vec<_>) = rows
        .iter()
        .partition(|(key, _)| occurrences.get(key).map_or(false, |n| *n > 1));

    let mut merged = CountTable::new(spec);
    for (key, count) in duplicates {
        merged.add(key.clone(), *count)?;
    }
    for (key, count) in unique {
        let previous = merged.insert(key.clone(), *count);
        debug_assert!(previous.is_none(), "unique key {:?} already merged", key);
    }

    debug_assert_eq!(
        merged.rows().map(|(_, count)| u128::from(count)).sum::<u128>(),
        rows.iter().map(|(_, count)| u128::from(*count)).sum::<u128>()
    );
    Ok(merged)
}

/// Writes the canonical table of a dimension from its batch artifacts.
///
/// Does nothing if the canonical table exists. Batch artifacts are only read.
pub fn consolidate(
    output_dir: &Path,
    spec: &DimensionSpec,
) -> Result<Consolidation, PipelineError> {
    let artifact = Artifact::new(output_dir, &spec.canonical_artifact_name());
    info!("consolidating {}", artifact.path().display());

    let mut batches_merged = 0;
    let mut total = 0;
    let publication = artifact.publish_with(true, || {
        let batches = discover(output_dir, spec)?;
        if batches.is_empty() {
            warn!(
                "no {} batch artifacts in {}, writing an empty table",
                spec.dimension,
                output_dir.display()
            );
        }
        let mut rows = Vec::new();
        for (_, path) in batches.iter() {
            rows.extend(read_rows(path, spec)?);
        }
        let merged = merge_rows(spec, &rows)?;
        batches_merged = batches.len();
        total = merged.total();
        Ok(merged)
    })?;

    if publication == Publication::AlreadyPresent {
        info!("{} already present", artifact.path().display());
        total = read_rows(artifact.path(), spec)?
            .iter()
            .map(|(_, count)| *count)
            .sum();
    }

    Ok(Consolidation {
        dimension: spec.dimension,
        path: artifact.path().to_path_buf(),
        publication,
        batches_merged,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::{consolidate, discover, merge_rows};
    use crate::artifact::Publication;
    use crate::dimension::{Column, ColumnSource, Dimension, DimensionSpec};
    use crate::error::PipelineError;
    use proptest::prelude::*;
    use std::fs;

    fn key(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn two_column_spec() -> DimensionSpec {
        DimensionSpec::new(
            Dimension::Activity,
            vec![
                Column::text("Activity", ColumnSource::Record("Activity")),
                Column::code("code", ColumnSource::Record("code")),
            ],
            None,
            "_pair_count.csv",
        )
        .unwrap()
    }

    #[test]
    fn unique_rows_survive_and_duplicates_sum() {
        let spec = two_column_spec();
        let rows = vec![
            (key(&["A", "1"]), 3),
            (key(&["A", "1"]), 2),
            (key(&["B", "2"]), 5),
        ];
        let merged = merge_rows(&spec, &rows).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get(&key(&["A", "1"])), Some(5));
        assert_eq!(merged.get(&key(&["B", "2"])), Some(5));
    }

    #[test]
    fn unique_rows_are_copied_and_duplicates_checked() {
        let spec = two_column_spec();
        let rows = vec![
            (key(&["big", "1"]), u64::MAX),
            (key(&["A", "1"]), 1),
            (key(&["A", "1"]), 1),
        ];
        let merged = merge_rows(&spec, &rows).unwrap();
        assert_eq!(merged.get(&key(&["big", "1"])), Some(u64::MAX));
        assert_eq!(merged.get(&key(&["A", "1"])), Some(2));

        let overflowing = vec![(key(&["A", "1"]), u64::MAX), (key(&["A", "1"]), 1)];
        assert!(matches!(
            merge_rows(&spec, &overflowing),
            Err(PipelineError::CountOverflow { .. })
        ));
    }

    #[test]
    fn codes_are_compared_as_strings() {
        let spec = two_column_spec();
        let rows = vec![(key(&["A", "01"]), 1), (key(&["A", "1"]), 1)];
        let merged = merge_rows(&spec, &rows).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn consolidate_merges_batches_once() {
        let spec = two_column_spec();
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("batch.0.size.3_pair_count.csv"),
            "Activity,code,counts\nA,1,3\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("batch.1.size.7_pair_count.csv"),
            "Activity,code,counts\nA,1,2\nB,2,5\n",
        )
        .unwrap();
        // neither batch artifacts nor in-flight writes
        fs::write(dir.path().join(".tmpXYZ.partial"), "garbage").unwrap();
        fs::write(dir.path().join("batch.1.size.7_other_count.csv"), "garbage").unwrap();

        let first = consolidate(dir.path(), &spec).unwrap();
        assert_eq!(first.publication, Publication::Written);
        assert_eq!(first.batches_merged, 2);
        assert_eq!(first.total, 10);
        assert_eq!(
            fs::read_to_string(&first.path).unwrap(),
            "Activity,code,counts\nA,1,5\nB,2,5\n"
        );

        // a later batch does not change an already consolidated table
        fs::write(
            dir.path().join("batch.2.size.1_pair_count.csv"),
            "Activity,code,counts\nC,3,1\n",
        )
        .unwrap();
        let second = consolidate(dir.path(), &spec).unwrap();
        assert_eq!(second.publication, Publication::AlreadyPresent);
        assert_eq!(second.total, 10);
        assert_eq!(
            fs::read_to_string(&second.path).unwrap(),
            "Activity,code,counts\nA,1,5\nB,2,5\n"
        );

        // removing the canonical table recomputes it
        fs::remove_file(&second.path).unwrap();
        let third = consolidate(dir.path(), &spec).unwrap();
        assert_eq!(third.publication, Publication::Written);
        assert_eq!(third.total, 11);
    }

    #[test]
    fn no_batches_gives_empty_table() {
        let spec = DimensionSpec::standard(Dimension::Country).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = consolidate(dir.path(), &spec).unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(
            fs::read_to_string(&result.path).unwrap(),
            "SOVEREIGNT,SOV_A3,Name,counts\n"
        );
    }

    #[test]
    fn conflicting_batches_are_refused() {
        let spec = two_column_spec();
        let dir = tempfile::tempdir().unwrap();
        for name in ["batch.0.size.3_pair_count.csv", "batch.0.size.4_pair_count.csv"] {
            fs::write(dir.path().join(name), "Activity,code,counts\nA,1,3\n").unwrap();
        }
        assert!(matches!(
            discover(dir.path(), &spec),
            Err(PipelineError::ConflictingBatches { ordinal: 0, .. })
        ));
        assert!(consolidate(dir.path(), &spec).is_err());
        assert!(!dir.path().join(spec.canonical_artifact_name()).exists());
    }

    #[test]
    fn mismatched_batch_schema_fails() {
        let spec = two_column_spec();
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("batch.0.size.3_pair_count.csv"),
            "Activity,counts\nA,3\n",
        )
        .unwrap();
        assert!(matches!(
            consolidate(dir.path(), &spec),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    proptest! {
        #[test]
        fn merge_conserves_counts(
            rows in proptest::collection::vec((0u8..6, 0u8..3, 0u64..1000), 0..60)
        ) {
            let spec = two_column_spec();
            let rows: Vec<_> = rows
                .into_iter()
                .map(|(a, b, n)| (vec![a.to_string(), b.to_string()], n))
                .collect();
            let merged = merge_rows(&spec, &rows).unwrap();

            prop_assert_eq!(merged.total(), rows.iter().map(|r| r.1).sum::<u64>());
            for (key, count) in merged.rows() {
                let expected: u64 = rows.iter().filter(|r| &r.0 == key).map(|r| r.1).sum();
                prop_assert_eq!(count, expected);
            }
            let distinct: std::collections::HashSet<_> = rows.iter().map(|r| &r.0).collect();
            prop_assert_eq!(merged.len(), distinct.len());
        }
    }
}
