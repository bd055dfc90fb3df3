use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::record::datetime::TIME_ATTRIBUTE;
use crate::record::NAME_ATTRIBUTE;
use crate::reference::ReferenceLayer;

/// Header of the trailing count column of every count table.
pub const COUNT_COLUMN: &str = "counts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Region,
    Country,
    Activity,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Region, Dimension::Country, Dimension::Activity];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Country => "country",
            Self::Activity => "activity",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "state" | "county" => Ok(Self::Region),
            _ => Self::ALL
                .iter()
                .copied()
                .find(|d| d.name() == name)
                .ok_or_else(|| ConfigError::UnknownDimension(s.to_string())),
        }
    }
}

/// Where a grouping column takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// attribute of the record itself
    Record(&'static str),
    /// attribute of the reference polygon the record falls into
    Reference(&'static str),
    /// UTC calendar date of a record timestamp attribute
    Date(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// Administrative code. Always handled as an opaque string so leading
    /// zeros survive.
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub header: &'static str,
    pub source: ColumnSource,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(header: &'static str, source: ColumnSource) -> Self {
        Self {
            header,
            source,
            kind: ColumnKind::Text,
        }
    }

    pub const fn code(header: &'static str, source: ColumnSource) -> Self {
        Self {
            header,
            source,
            kind: ColumnKind::Code,
        }
    }
}

/// Grouping schema and artifact naming of one aggregate dimension.
#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub dimension: Dimension,
    pub columns: Vec<Column>,
    pub reference: Option<ReferenceLayer>,
    /// suffix of batch artifact file names, e.g. `_state_count.csv`
    pub suffix: &'static str,
}

impl DimensionSpec {
    /// Builds a spec after checking its columns.
    ///
    /// Reference columns require a reference layer, headers must be unique
    /// and must not collide with the count column.
    pub fn new(
        dimension: Dimension,
        columns: Vec<Column>,
        reference: Option<ReferenceLayer>,
        suffix: &'static str,
    ) -> Result<Self, ConfigError> {
        let invalid = |column: &str, reason: &str| ConfigError::InvalidSchema {
            dimension: dimension.to_string(),
            column: column.to_string(),
            reason: reason.to_string(),
        };
        if columns.is_empty() {
            return Err(invalid("", "no grouping columns"));
        }
        let mut seen = HashSet::new();
        for column in columns.iter() {
            if column.header == COUNT_COLUMN {
                return Err(invalid(column.header, "collides with the count column"));
            }
            if !seen.insert(column.header) {
                return Err(invalid(column.header, "duplicate column"));
            }
            if matches!(column.source, ColumnSource::Reference(_)) && reference.is_none() {
                return Err(invalid(column.header, "no reference layer to join against"));
            }
        }
        Ok(Self {
            dimension,
            columns,
            reference,
            suffix,
        })
    }

    /// Built-in schema of a dimension.
    pub fn standard(dimension: Dimension) -> Result<Self, ConfigError> {
        use ColumnSource::{Date, Record, Reference};

        match dimension {
            Dimension::Region => Self::new(
                dimension,
                vec![
                    Column::text("STATE_NAME", Reference("STATE_NAME")),
                    Column::code("COUNTYFP", Reference("COUNTYFP")),
                    Column::text("NAME", Reference("NAME")),
                    Column::text("Name", Record(NAME_ATTRIBUTE)),
                ],
                Some(ReferenceLayer::Counties),
                "_state_count.csv",
            ),
            Dimension::Country => Self::new(
                dimension,
                vec![
                    Column::text("SOVEREIGNT", Reference("SOVEREIGNT")),
                    Column::code("SOV_A3", Reference("SOV_A3")),
                    Column::text("Name", Record(NAME_ATTRIBUTE)),
                ],
                Some(ReferenceLayer::Countries),
                "_country_count.csv",
            ),
            Dimension::Activity => Self::new(
                dimension,
                vec![
                    Column::text("Activity", Record("Activity")),
                    Column::text("Name", Record(NAME_ATTRIBUTE)),
                    Column::text("date", Date(TIME_ATTRIBUTE)),
                ],
                None,
                "_activity_count.csv",
            ),
        }
    }

    /// Grouping column headers followed by the count column.
    pub fn headers(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.header.to_string())
            .chain(std::iter::once(COUNT_COLUMN.to_string()))
            .collect()
    }

    pub fn batch_artifact_name(&self, batch_prefix: &str) -> String {
        format!("{}{}", batch_prefix, self.suffix)
    }

    /// File name of the merged, run-wide table.
    pub fn canonical_artifact_name(&self) -> String {
        format!("combined{}", self.suffix)
    }
}
