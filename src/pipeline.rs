use crate::audit::{CoverageAuditor, GapReport};
use crate::classify::{self, Classifier, EntityCategory};
use crate::config::Config;
use crate::constants::{FILER_ID_COLUMN, PERIOD_COLUMN};
use crate::coverage_index::CoverageIndex;
use crate::dictionary::DataDictionary;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::period::{self, CanonicalPeriod};
use crate::reconcile::Reconciler;
use crate::sources;
use crate::types::{Column, ColumnType, FilingSource, RecordBatch, Scalar, SourceTag, TableBatch};
use crate::writer::{CellWriter, NdjsonCellWriter, WriteOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

/// Per-run knobs from the CLI.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub start_period: Option<CanonicalPeriod>,
    pub end_period: Option<CanonicalPeriod>,
    /// Rewrite cells even when the artifact on disk is identical.
    pub force: bool,
}

/// One input that could not be processed; the run continues without it.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub source: SourceTag,
    pub identifier: String,
    pub error: String,
    #[serde(skip)]
    classification_failure: bool,
}

/// Result of one ingest pass, for the end-of-run summary and the exit code.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub candidates: usize,
    pub excluded_records: usize,
    pub cells_populated: usize,
    pub cells_absent: usize,
    pub cells_written: usize,
    pub cells_unchanged: usize,
    pub failures: Vec<FileFailure>,
}

impl IngestSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

enum FileOutcome {
    Candidates { batches: Vec<RecordBatch>, excluded_records: usize },
    Skipped,
    Failed(FileFailure),
}

/// Wires the reconciliation core to its collaborators and drives a run:
/// per-file resolution/classification fans out as independent tasks, the
/// Reconciler runs once after the fan-out completes, winners go to the writer
/// and every decision lands in the coverage index.
pub struct Pipeline {
    config: Config,
    classifier: Arc<Classifier>,
    dictionary: Arc<DataDictionary>,
    reconciler: Reconciler,
    auditor: CoverageAuditor,
    writer: Box<dyn CellWriter>,
    index: CoverageIndex,
}

impl Pipeline {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let classifier = Arc::new(Classifier::new(config.classification_table()));
        let dictionary = Arc::new(load_dictionary(&config));
        let reconciler = Reconciler::new(config.precedence()?, config.exclusions.clone());
        let auditor = CoverageAuditor::new(config.series_bounds());
        let writer = Box::new(NdjsonCellWriter::new(config.run.data_root.join("cells")));
        let index = CoverageIndex::open_at_root(&config.run.data_root)?;
        Ok(Pipeline { config, classifier, dictionary, reconciler, auditor, writer, index })
    }

    /// The sources the configuration enables, as adapters.
    pub fn configured_sources(&self) -> Vec<Arc<dyn FilingSource>> {
        self.config
            .enabled_sources()
            .map(|s| Arc::from(sources::create_source(s)))
            .collect()
    }

    /// One full ingest pass over the given sources.
    pub async fn ingest(
        &self,
        source_adapters: Vec<Arc<dyn FilingSource>>,
        opts: &RunOptions,
    ) -> anyhow::Result<IngestSummary> {
        let (tx, mut rx) = mpsc::unbounded_channel::<FileOutcome>();
        let mut handles = Vec::new();
        let mut failures: Vec<FileFailure> = Vec::new();
        let mut files_seen = 0usize;

        for source in source_adapters {
            let tag = source.source_id();
            let names = match source.list_files().await {
                Ok(names) => names,
                Err(e) => {
                    error!(source = %tag, "failed to list source files: {e}");
                    failures.push(FileFailure {
                        source: tag,
                        identifier: "<listing>".to_string(),
                        error: e.to_string(),
                        classification_failure: false,
                    });
                    continue;
                }
            };
            info!(source = %tag, files = names.len(), "queued source files");
            println!("📥 {}: {} files queued", tag, names.len());

            for identifier in names {
                files_seen += 1;
                let tx = tx.clone();
                let source = source.clone();
                let classifier = self.classifier.clone();
                let dictionary = self.dictionary.clone();
                let opts = opts.clone();
                handles.push(tokio::spawn(async move {
                    let outcome =
                        process_file(source, classifier, dictionary, opts, identifier).await;
                    let _ = tx.send(outcome);
                }));
            }
        }
        drop(tx);

        // Synchronization barrier: precedence decisions need the complete
        // candidate set, so nothing is reconciled until every task is done.
        for handle in handles {
            let _ = handle.await;
        }

        let mut candidates: Vec<RecordBatch> = Vec::new();
        let mut files_skipped = 0usize;
        let mut excluded_records = 0usize;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                FileOutcome::Candidates { batches, excluded_records: excluded } => {
                    metrics::resolver::file_resolved();
                    excluded_records += excluded;
                    candidates.extend(batches);
                }
                FileOutcome::Skipped => {
                    metrics::resolver::file_skipped();
                    files_skipped += 1;
                }
                FileOutcome::Failed(failure) => {
                    metrics::resolver::file_failed();
                    warn!(
                        source = %failure.source,
                        identifier = %failure.identifier,
                        "file excluded from candidate set: {}",
                        failure.error
                    );
                    failures.push(failure);
                }
            }
        }

        if self.config.classification.fail_run {
            if let Some(failure) = failures.iter().find(|f| f.classification_failure) {
                anyhow::bail!(
                    "classification column missing in '{}' and classification.fail_run is set",
                    failure.identifier
                );
            }
        }

        info!(
            files = files_seen,
            skipped = files_skipped,
            failed = failures.len(),
            candidates = candidates.len(),
            "fan-out complete, reconciling"
        );
        println!(
            "🔀 Reconciling {} candidate batches from {} files...",
            candidates.len(),
            files_seen
        );

        metrics::reconciler::candidates(candidates.len());
        let candidate_count = candidates.len();
        let t_reconcile = Instant::now();
        let decisions = self.reconciler.reconcile(candidates)?;
        metrics::reconciler::duration(t_reconcile.elapsed().as_secs_f64());

        let mut summary = IngestSummary {
            files_seen,
            files_skipped,
            candidates: candidate_count,
            excluded_records,
            cells_populated: 0,
            cells_absent: 0,
            cells_written: 0,
            cells_unchanged: 0,
            failures,
        };

        for decision in decisions {
            match decision.winner {
                Some(batch) => {
                    metrics::reconciler::cell_populated();
                    summary.cells_populated += 1;
                    match self.writer.write_cell(&batch, opts.force) {
                        Ok(outcome) => {
                            match outcome {
                                WriteOutcome::Written(_) => {
                                    summary.cells_written += 1;
                                    metrics::writer::cell_written();
                                }
                                WriteOutcome::Unchanged(_) => {
                                    summary.cells_unchanged += 1;
                                    metrics::writer::cell_skipped();
                                }
                            }
                            let written = outcome.cell();
                            let artifact = written.path.to_string_lossy();
                            self.index.upsert_cell(
                                &decision.cell,
                                Some(&written.checksum),
                                Some(artifact.as_ref()),
                            )?;
                        }
                        Err(e) => {
                            metrics::writer::write_error();
                            error!(
                                period = %decision.cell.period,
                                category = %decision.cell.category,
                                "cell write failed: {e}"
                            );
                            summary.failures.push(FileFailure {
                                source: batch.source,
                                identifier: batch.origin.clone(),
                                error: format!("cell write failed: {e}"),
                                classification_failure: false,
                            });
                        }
                    }
                }
                None => {
                    metrics::reconciler::cell_absent();
                    summary.cells_absent += 1;
                    self.index.upsert_cell(&decision.cell, None, None)?;
                }
            }
        }

        Ok(summary)
    }

    /// Post-hoc coverage verification over the persisted cell index.
    pub fn audit(&self) -> anyhow::Result<GapReport> {
        let cells: Vec<_> = self.index.all_cells()?.into_iter().map(|c| c.cell).collect();
        let report = self.auditor.audit(&cells);
        metrics::auditor::gaps_detected(report.total_missing());
        Ok(report)
    }
}

fn load_dictionary(config: &Config) -> DataDictionary {
    match &config.run.dictionary {
        Some(path) => match DataDictionary::load(path) {
            Ok(dict) => {
                info!(entries = dict.len(), path = %path.display(), "loaded data dictionary");
                dict
            }
            Err(e) => {
                // Metadata only; its absence must not block reconciliation.
                warn!(path = %path.display(), "continuing without data dictionary: {e}");
                DataDictionary::empty()
            }
        },
        None => DataDictionary::empty(),
    }
}

#[instrument(skip_all, fields(source = %source.source_id(), identifier = %identifier))]
async fn process_file(
    source: Arc<dyn FilingSource>,
    classifier: Arc<Classifier>,
    dictionary: Arc<DataDictionary>,
    opts: RunOptions,
    identifier: String,
) -> FileOutcome {
    let tag = source.source_id();
    match process_file_inner(source, classifier, dictionary, &opts, &identifier).await {
        Ok(Some((batches, excluded_records))) => {
            FileOutcome::Candidates { batches, excluded_records }
        }
        Ok(None) => FileOutcome::Skipped,
        Err(e) => FileOutcome::Failed(FileFailure {
            source: tag,
            identifier,
            error: e.to_string(),
            classification_failure: matches!(e, PipelineError::MissingClassificationColumn { .. }),
        }),
    }
}

async fn process_file_inner(
    source: Arc<dyn FilingSource>,
    classifier: Arc<Classifier>,
    dictionary: Arc<DataDictionary>,
    opts: &RunOptions,
    identifier: &str,
) -> Result<Option<(Vec<RecordBatch>, usize)>> {
    let period = period::resolve(identifier, source.family())?;

    if opts.start_period.is_some_and(|start| period < start)
        || opts.end_period.is_some_and(|end| period > end)
    {
        return Ok(None);
    }

    let decoded = source.decode(identifier).await?;
    let normalized = normalize_schema(decoded.batch, period)?;

    let t_classify = Instant::now();
    let groups = match classifier.partition(&normalized) {
        Ok(groups) => groups,
        Err(PipelineError::MissingClassificationColumn { column }) => {
            // Single-filer-type feeds route whole batches to their declared
            // category; everything else treats the missing column as fatal
            // for this file.
            let Some(category) = source.default_category() else {
                return Err(PipelineError::MissingClassificationColumn { column });
            };
            info!(
                identifier = %identifier,
                category = %category,
                "no '{column}' column, routing whole batch to source default"
            );
            let mut groups = std::collections::BTreeMap::new();
            groups.insert(category, normalized);
            groups
        }
        Err(e) => return Err(e),
    };
    metrics::classifier::duration(t_classify.elapsed().as_secs_f64());

    let excluded_records =
        groups.get(&EntityCategory::Excluded).map_or(0, TableBatch::n_rows);

    let mut batches = Vec::new();
    for (category, mut group) in groups {
        if category == EntityCategory::Excluded {
            continue;
        }
        dictionary.annotate(&mut group);
        batches.push(RecordBatch {
            period,
            category,
            source: decoded.source,
            origin: identifier.to_string(),
            batch: group,
        });
    }
    metrics::classifier::batch_split(batches.len());
    metrics::classifier::records_excluded(excluded_records);

    Ok(Some((batches, excluded_records)))
}

/// Rewrite a decoded batch into the output shape: the filer-identifier column
/// first, the reporting period second, then the data columns in their
/// original order with uppercased names.
pub fn normalize_schema(batch: TableBatch, period: CanonicalPeriod) -> Result<TableBatch> {
    let id_idx = classify::find_identifier_column(&batch)?;

    let mut columns = batch.columns.clone();
    for column in &mut columns {
        column.name = column.name.to_ascii_uppercase();
    }

    // Pre-existing canonical columns are superseded by the fresh ones.
    let kept: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name != FILER_ID_COLUMN && c.name != PERIOD_COLUMN)
        .map(|(i, _)| i)
        .collect();

    let mut out_columns = vec![
        Column::new(FILER_ID_COLUMN, ColumnType::Numeric),
        Column::new(PERIOD_COLUMN, ColumnType::Date),
    ];
    out_columns.extend(kept.iter().map(|&i| columns[i].clone()));

    let period_value = Scalar::Date(period.end_date());
    let rows = batch
        .rows
        .iter()
        .map(|row| {
            let mut out = Vec::with_capacity(out_columns.len());
            out.push(row[id_idx].clone());
            out.push(period_value.clone());
            out.extend(kept.iter().map(|&i| row[i].clone()));
            out
        })
        .collect();

    TableBatch::new(out_columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn period(year: i32, quarter: u8) -> CanonicalPeriod {
        CanonicalPeriod::new(year, quarter).unwrap()
    }

    fn raw_batch() -> TableBatch {
        TableBatch::new(
            vec![
                Column::new("rssd9001", ColumnType::Numeric),
                Column::new("rssd9331", ColumnType::Numeric),
                Column::new("rcon2170", ColumnType::Numeric),
            ],
            vec![
                vec![Scalar::Number(12345.0), Scalar::Number(1.0), Scalar::Number(1000.0)],
                vec![Scalar::Number(67890.0), Scalar::Number(10.0), Scalar::Number(2000.0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn normalized_schema_leads_with_id_and_period() {
        let out = normalize_schema(raw_batch(), period(2005, 1)).unwrap();

        let names: Vec<&str> = out.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["RSSD_ID", "REPORTING_PERIOD", "RSSD9001", "RSSD9331", "RCON2170"]);

        assert_eq!(out.rows[0][0], Scalar::Number(12345.0));
        assert_eq!(out.rows[0][1], Scalar::Date(NaiveDate::from_ymd_opt(2005, 3, 31).unwrap()));
        // The raw identifier column stays in place as well.
        assert_eq!(out.rows[0][2], Scalar::Number(12345.0));
        assert_eq!(out.rows[1][4], Scalar::Number(2000.0));
    }

    #[test]
    fn stale_canonical_columns_are_replaced() {
        let stale = TableBatch::new(
            vec![
                Column::new("RSSD_ID", ColumnType::Numeric),
                Column::new("REPORTING_PERIOD", ColumnType::Date),
                Column::new("RCON2170", ColumnType::Numeric),
            ],
            vec![vec![
                Scalar::Number(111.0),
                Scalar::Date(NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()),
                Scalar::Number(5.0),
            ]],
        )
        .unwrap();

        let out = normalize_schema(stale, period(2020, 4)).unwrap();
        let names: Vec<&str> = out.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["RSSD_ID", "REPORTING_PERIOD", "RCON2170"]);
        assert_eq!(out.rows[0][0], Scalar::Number(111.0));
        assert_eq!(out.rows[0][1], Scalar::Date(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()));
    }

    #[test]
    fn schema_without_identifier_fails() {
        let no_id = TableBatch::new(
            vec![Column::new("RCON2170", ColumnType::Numeric)],
            vec![vec![Scalar::Number(1.0)]],
        )
        .unwrap();
        let err = normalize_schema(no_id, period(2020, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::NoIdentifierColumn { .. }));
    }
}
