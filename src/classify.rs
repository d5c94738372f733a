use crate::constants::{IDENTIFIER_CANDIDATES, IDENTIFIER_MARKER, NON_IDENTIFIER_SIBLINGS};
use crate::error::{PipelineError, Result};
use crate::types::TableBatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Output entity partitions. `Excluded` is the sentinel for filer types the
/// series does not cover; records landing there are counted and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    /// Commercial banks filing FFIEC 031/041 call reports
    #[serde(rename = "FFIEC_031_041")]
    Ffiec031041,
    /// U.S. branches and agencies of foreign banks (FFIEC 002)
    #[serde(rename = "FFIEC_002")]
    Ffiec002,
    /// Edge and Agreement corporations (FR 2886b)
    #[serde(rename = "FRB_2886b")]
    Frb2886b,
    /// Raw categorical values with no mapping
    #[serde(rename = "EXCLUDED")]
    Excluded,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Ffiec031041 => "FFIEC_031_041",
            EntityCategory::Ffiec002 => "FFIEC_002",
            EntityCategory::Frb2886b => "FRB_2886b",
            EntityCategory::Excluded => "EXCLUDED",
        }
    }

    /// The categories that produce output cells.
    pub fn output_categories() -> [EntityCategory; 3] {
        [EntityCategory::Ffiec031041, EntityCategory::Ffiec002, EntityCategory::Frb2886b]
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityCategory {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FFIEC_031_041" => Ok(EntityCategory::Ffiec031041),
            "FFIEC_002" => Ok(EntityCategory::Ffiec002),
            "FRB_2886b" => Ok(EntityCategory::Frb2886b),
            "EXCLUDED" => Ok(EntityCategory::Excluded),
            other => Err(PipelineError::Config(format!("unknown entity category '{other}'"))),
        }
    }
}

/// Immutable raw-value -> category mapping plus the column it reads.
/// Built from configuration once per run; values not in the map classify as
/// `Excluded`.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    column: String,
    map: BTreeMap<String, EntityCategory>,
}

impl ClassificationTable {
    pub fn new(column: impl Into<String>, map: BTreeMap<String, EntityCategory>) -> Self {
        ClassificationTable { column: column.into(), map }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn classify_value(&self, key: &str) -> EntityCategory {
        self.map.get(key).copied().unwrap_or(EntityCategory::Excluded)
    }
}

/// Partitions decoded batches by entity category. Rows pass through untouched;
/// only their grouping changes.
#[derive(Debug, Clone)]
pub struct Classifier {
    table: ClassificationTable,
}

impl Classifier {
    pub fn new(table: ClassificationTable) -> Self {
        Classifier { table }
    }

    /// Split a batch into per-category batches sharing the input schema.
    ///
    /// Total: every row lands in exactly one group, unmapped raw values in
    /// `Excluded`. Fails with `MissingClassificationColumn` when the
    /// categorical column is absent; the caller decides whether that is fatal
    /// to the batch or to the run.
    pub fn partition(&self, batch: &TableBatch) -> Result<BTreeMap<EntityCategory, TableBatch>> {
        let col = batch.column_index(self.table.column()).ok_or_else(|| {
            PipelineError::MissingClassificationColumn { column: self.table.column().to_string() }
        })?;

        let mut groups: BTreeMap<EntityCategory, Vec<Vec<crate::types::Scalar>>> = BTreeMap::new();
        for row in &batch.rows {
            let category = self.table.classify_value(&row[col].key_string());
            groups.entry(category).or_default().push(row.clone());
        }

        Ok(groups
            .into_iter()
            .map(|(category, rows)| {
                (category, TableBatch { columns: batch.columns.clone(), rows })
            })
            .collect())
    }
}

/// One step of the identifier-column search, evaluated in declaration order.
#[derive(Debug, Clone, Copy)]
pub enum ColumnMatcher {
    /// Match a column by exact (case-insensitive) name.
    Exact(&'static str),
    /// Match any column containing `token`, unless its full name is one of
    /// the known non-identifier siblings.
    SubstringExcluding { token: &'static str, exclude: &'static [&'static str] },
}

impl ColumnMatcher {
    fn matches(&self, name: &str) -> bool {
        let upper = name.to_ascii_uppercase();
        match self {
            ColumnMatcher::Exact(candidate) => upper == *candidate,
            ColumnMatcher::SubstringExcluding { token, exclude } => {
                upper.contains(*token) && !exclude.iter().any(|sibling| upper == *sibling)
            }
        }
    }
}

/// The ordered matcher chain for the filer-identifier column: exact candidates
/// first, then the marker-token fallback.
pub fn identifier_matchers() -> Vec<ColumnMatcher> {
    let mut matchers: Vec<ColumnMatcher> =
        IDENTIFIER_CANDIDATES.iter().copied().map(ColumnMatcher::Exact).collect();
    matchers.push(ColumnMatcher::SubstringExcluding {
        token: IDENTIFIER_MARKER,
        exclude: &NON_IDENTIFIER_SIBLINGS,
    });
    matchers
}

/// Locate the column holding the filer's unique numeric ID.
pub fn find_identifier_column(batch: &TableBatch) -> Result<usize> {
    for matcher in identifier_matchers() {
        if let Some(idx) = batch.columns.iter().position(|c| matcher.matches(&c.name)) {
            return Ok(idx);
        }
    }
    Err(PipelineError::NoIdentifierColumn { columns: batch.n_columns() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType, Scalar};

    fn table() -> ClassificationTable {
        let mut map = BTreeMap::new();
        map.insert("1".to_string(), EntityCategory::Ffiec031041);
        map.insert("10".to_string(), EntityCategory::Ffiec002);
        map.insert("11".to_string(), EntityCategory::Ffiec002);
        map.insert("13".to_string(), EntityCategory::Frb2886b);
        map.insert("17".to_string(), EntityCategory::Frb2886b);
        ClassificationTable::new("RSSD9331", map)
    }

    fn batch(codes: &[f64]) -> TableBatch {
        TableBatch::new(
            vec![
                Column::new("RSSD9001", ColumnType::Numeric),
                Column::new("RSSD9331", ColumnType::Numeric),
            ],
            codes
                .iter()
                .enumerate()
                .map(|(i, code)| vec![Scalar::Number(1000.0 + i as f64), Scalar::Number(*code)])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn partitions_by_raw_code() {
        let classifier = Classifier::new(table());
        let groups = classifier.partition(&batch(&[1.0, 10.0, 11.0, 13.0, 1.0])).unwrap();

        assert_eq!(groups[&EntityCategory::Ffiec031041].n_rows(), 2);
        assert_eq!(groups[&EntityCategory::Ffiec002].n_rows(), 2);
        assert_eq!(groups[&EntityCategory::Frb2886b].n_rows(), 1);
        assert!(!groups.contains_key(&EntityCategory::Excluded));
    }

    #[test]
    fn unmapped_codes_default_to_excluded() {
        let classifier = Classifier::new(table());
        let groups = classifier.partition(&batch(&[1.0, 99.0])).unwrap();
        assert_eq!(groups[&EntityCategory::Excluded].n_rows(), 1);
    }

    #[test]
    fn partition_is_deterministic_and_preserves_rows() {
        let classifier = Classifier::new(table());
        let input = batch(&[1.0, 10.0, 99.0, 17.0]);
        let first = classifier.partition(&input).unwrap();
        let second = classifier.partition(&input).unwrap();
        assert_eq!(first, second);

        let total: usize = first.values().map(TableBatch::n_rows).sum();
        assert_eq!(total, input.n_rows());
        for group in first.values() {
            assert_eq!(group.columns, input.columns);
        }
    }

    #[test]
    fn missing_categorical_column_is_an_error() {
        let classifier = Classifier::new(table());
        let no_col = TableBatch::new(vec![Column::new("RSSD9001", ColumnType::Numeric)], vec![])
            .unwrap();
        let err = classifier.partition(&no_col).unwrap_err();
        assert!(matches!(err, PipelineError::MissingClassificationColumn { .. }));
    }

    fn schema_of(names: &[&str]) -> TableBatch {
        TableBatch::new(
            names.iter().map(|n| Column::new(*n, ColumnType::Numeric)).collect(),
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn identifier_exact_candidates_win_in_order() {
        let batch = schema_of(&["IDRSSD", "RSSD9001", "RCON2170"]);
        assert_eq!(find_identifier_column(&batch).unwrap(), 1);

        let batch = schema_of(&["IDRSSD", "RCON2170"]);
        assert_eq!(find_identifier_column(&batch).unwrap(), 0);
    }

    #[test]
    fn identifier_substring_fallback_skips_date_siblings() {
        let batch = schema_of(&["RSSD9999", "RSSD9017", "RCON2170"]);
        assert_eq!(find_identifier_column(&batch).unwrap(), 1);
    }

    #[test]
    fn identifier_not_found_is_typed() {
        let batch = schema_of(&["RCON2170", "RIAD4340"]);
        let err = find_identifier_column(&batch).unwrap_err();
        assert!(matches!(err, PipelineError::NoIdentifierColumn { columns: 2 }));
    }
}
