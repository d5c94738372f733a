use crate::classify::EntityCategory;
use crate::error::{PipelineError, Result};
use crate::period::{CanonicalPeriod, SourceFamily};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One nullable cell value in a decoded tabular batch.
///
/// Untagged so decoded-batch envelopes read naturally: JSON null, numbers and
/// strings map straight onto the variants, ISO dates onto `Date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Number(f64),
    Date(NaiveDate),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Canonical string key for classification lookups: integral numbers
    /// render without a fractional part, so raw code 10.0 matches map key "10".
    pub fn key_string(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            Scalar::Number(n) => n.to_string(),
            Scalar::Date(d) => d.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }
}

/// Declared type of a batch column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Text,
    Date,
}

/// One column of a decoded batch: name, declared type, and an optional
/// human-readable description attached from the data dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Column { name: name.into(), ty, description: None }
    }
}

/// The common in-memory tabular structure exchanged with the excluded
/// collaborators: an ordered schema plus row data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBatch {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Scalar>>,
}

impl TableBatch {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        let batch = TableBatch { columns, rows };
        batch.validate()?;
        Ok(batch)
    }

    /// Every row must be exactly as wide as the schema.
    pub fn validate(&self) -> Result<()> {
        let width = self.columns.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(PipelineError::MalformedBatch(format!(
                    "row {i} has {} values, schema has {width} columns",
                    row.len()
                )));
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Case-insensitive column lookup; upstream feeds disagree on casing.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Enumerated identity of an upstream provider. Priority ranks live in
/// configuration, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// FFIEC CDR bulk download (tab-delimited, one file per quarter)
    FfiecCdr,
    /// Chicago Fed historical and structure feeds (SAS XPORT)
    ChicagoFed,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::FfiecCdr => "ffiec_cdr",
            SourceTag::ChicagoFed => "chicago_fed",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceTag {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ffiec_cdr" => Ok(SourceTag::FfiecCdr),
            "chicago_fed" => Ok(SourceTag::ChicagoFed),
            other => Err(PipelineError::Config(format!("unknown source tag '{other}'"))),
        }
    }
}

/// A decoded upstream file as handed over by a source adapter: the batch plus
/// the identifier and source tag the reconciliation core keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedFile {
    pub identifier: String,
    pub source: SourceTag,
    pub batch: TableBatch,
}

/// An immutable snapshot of one (file, category) split, ready for
/// reconciliation. Created once, never mutated, moved into the Reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub period: CanonicalPeriod,
    pub category: EntityCategory,
    pub source: SourceTag,
    /// Identifier of the upstream file this split came from.
    pub origin: String,
    pub batch: TableBatch,
}

/// Core trait every upstream filing source must implement. The physical
/// decoding (SAS XPORT, tab-delimited text) happens behind this seam.
#[async_trait::async_trait]
pub trait FilingSource: Send + Sync {
    /// Which upstream provider this adapter speaks for.
    fn source_id(&self) -> SourceTag;

    /// Which filename encoding the provider's identifiers use.
    fn family(&self) -> SourceFamily;

    /// Category the whole batch routes to when the classification column is
    /// absent from a feed that only ever carries one filer type. Sources
    /// without one treat the missing column as a per-file error.
    fn default_category(&self) -> Option<EntityCategory> {
        None
    }

    /// List the identifiers available for this run. Identifiers carry the
    /// upstream file name, so the Period Resolver can run before any decode.
    async fn list_files(&self) -> Result<Vec<String>>;

    /// Decode one file into the common tabular structure.
    async fn decode(&self, identifier: &str) -> Result<DecodedFile>;
}
