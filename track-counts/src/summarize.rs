use std::path::Path;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::alias::NameAliases;
use crate::artifact::{Artifact, Publication};
use crate::batch::Batch;
use crate::dimension::{ColumnKind, ColumnSource, Dimension, DimensionSpec};
use crate::error::PipelineError;
use crate::record::datetime::utc_date;
use crate::record::{attribute_text, Record};
use crate::reference::{Crs, GeometryProvider, ReferenceFeature};
use crate::table::{CategoryKey, CountTable};

/// Everything a batch summarization needs besides the batch itself.
#[derive(Clone, Copy)]
pub struct SummaryContext<'a> {
    pub output_dir: &'a Path,
    pub dimensions: &'a [DimensionSpec],
    pub provider: &'a dyn GeometryProvider,
    pub crs: &'a Crs,
    pub skip_existing: bool,
    pub aliases: Option<&'a NameAliases>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub computed: Vec<Dimension>,
    pub skipped: Vec<Dimension>,
    /// zero when every dimension was skipped, as nothing is decoded then
    pub decoded: usize,
    pub decode_failures: usize,
}

struct Decoded {
    records: Vec<Record>,
    failures: usize,
}

fn decode_batch<L: AsRef<[u8]>>(batch: &Batch<L>, aliases: Option<&NameAliases>) -> Decoded {
    let mut records = Vec::with_capacity(batch.items.len());
    let mut failures = 0;
    for (i, line) in batch.items.iter().enumerate() {
        match Record::decode(line) {
            Ok(mut record) => {
                if let Some(aliases) = aliases {
                    record.apply_aliases(aliases);
                }
                records.push(record);
            }
            Err(e) => {
                failures += 1;
                debug!("{} line {}: {}", batch.id, i, e);
            }
        }
    }
    if failures > 0 {
        warn!("{}: {} records could not be decoded", batch.id, failures);
    }
    Decoded { records, failures }
}

fn render(kind: ColumnKind, value: Option<&Value>) -> String {
    match (kind, value) {
        // integral codes exported as floats, e.g. 9.0
        (ColumnKind::Code, Some(Value::Number(n))) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        _ => attribute_text(value),
    }
}

fn category_key(
    spec: &DimensionSpec,
    record: &Record,
    joined: Option<&ReferenceFeature>,
) -> CategoryKey {
    spec.columns
        .iter()
        .map(|column| match column.source {
            ColumnSource::Record(attr) => render(column.kind, record.attribute(attr)),
            ColumnSource::Reference(attr) => {
                render(column.kind, joined.and_then(|f| f.attributes.get(attr)))
            }
            ColumnSource::Date(attr) => utc_date(record.attribute(attr)),
        })
        .collect()
}

/// Groups and counts records for one dimension.
///
/// Records outside every reference polygon are counted with empty reference
/// columns, so the table total always equals the number of records.
pub fn count_records(
    records: &[Record],
    spec: &DimensionSpec,
    provider: &dyn GeometryProvider,
    crs: &Crs,
) -> Result<CountTable, PipelineError> {
    let collection = spec
        .reference
        .map(|layer| provider.collection(layer, crs))
        .transpose()?;

    let mut table = CountTable::new(spec);
    for record in records {
        let joined = collection.as_ref().and_then(|c| c.locate(&record.point));
        table.increment(category_key(spec, record, joined));
    }
    debug_assert_eq!(table.total(), records.len() as u64);
    Ok(table)
}

/// Writes the count tables of one batch, one artifact per dimension.
///
/// Dimensions are independent: when one fails the others are still published
/// and the first failure is returned.
pub fn summarize<L: AsRef<[u8]>>(
    batch: &Batch<L>,
    ctx: &SummaryContext<'_>,
) -> Result<BatchOutcome, PipelineError> {
    let prefix = batch.id.prefix();
    let mut decoded: Option<Decoded> = None;
    let mut outcome = BatchOutcome::default();
    let mut first_error = None;

    for spec in ctx.dimensions {
        let artifact = Artifact::new(ctx.output_dir, &spec.batch_artifact_name(&prefix));
        let published = artifact.publish_with(ctx.skip_existing, || {
            let decoded = decoded.get_or_insert_with(|| decode_batch(batch, ctx.aliases));
            count_records(&decoded.records, spec, ctx.provider, ctx.crs)
        });
        match published {
            Ok(Publication::Written) => outcome.computed.push(spec.dimension),
            Ok(Publication::AlreadyPresent) => outcome.skipped.push(spec.dimension),
            Err(e) => {
                error!("{}: {} failed: {}", batch.id, spec.dimension, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if let Some(decoded) = decoded {
        outcome.decoded = decoded.records.len();
        outcome.decode_failures = decoded.failures;
    }
    Ok(outcome)
}
