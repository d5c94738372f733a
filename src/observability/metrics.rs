//! Metric recording for the pipeline stages.
//!
//! Names are centralized in `MetricName` so stage code never handles metric
//! strings directly.

use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Resolver metrics
    ResolverFilesResolved,
    ResolverFilesSkipped,
    ResolverFilesFailed,

    // Classifier metrics
    ClassifierBatchesSplit,
    ClassifierRecordsExcluded,
    ClassifierDuration,

    // Reconciler metrics
    ReconcilerCandidates,
    ReconcilerCellsPopulated,
    ReconcilerCellsAbsent,
    ReconcilerDuration,

    // Writer metrics
    WriterCellsWritten,
    WriterCellsSkipped,
    WriterWriteErrors,

    // Auditor metrics
    AuditorGapsDetected,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ResolverFilesResolved => "crp_resolver_files_resolved_total",
            MetricName::ResolverFilesSkipped => "crp_resolver_files_skipped_total",
            MetricName::ResolverFilesFailed => "crp_resolver_files_failed_total",

            MetricName::ClassifierBatchesSplit => "crp_classifier_batches_split_total",
            MetricName::ClassifierRecordsExcluded => "crp_classifier_records_excluded_total",
            MetricName::ClassifierDuration => "crp_classifier_duration_seconds",

            MetricName::ReconcilerCandidates => "crp_reconciler_candidates_total",
            MetricName::ReconcilerCellsPopulated => "crp_reconciler_cells_populated_total",
            MetricName::ReconcilerCellsAbsent => "crp_reconciler_cells_absent_total",
            MetricName::ReconcilerDuration => "crp_reconciler_duration_seconds",

            MetricName::WriterCellsWritten => "crp_writer_cells_written_total",
            MetricName::WriterCellsSkipped => "crp_writer_cells_skipped_total",
            MetricName::WriterWriteErrors => "crp_writer_write_errors_total",

            MetricName::AuditorGapsDetected => "crp_auditor_gaps_detected_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod resolver {
    use super::MetricName;

    pub fn file_resolved() {
        ::metrics::counter!(MetricName::ResolverFilesResolved.as_str()).increment(1);
    }

    pub fn file_skipped() {
        ::metrics::counter!(MetricName::ResolverFilesSkipped.as_str()).increment(1);
    }

    pub fn file_failed() {
        ::metrics::counter!(MetricName::ResolverFilesFailed.as_str()).increment(1);
    }
}

pub mod classifier {
    use super::MetricName;

    pub fn batch_split(categories: usize) {
        ::metrics::counter!(MetricName::ClassifierBatchesSplit.as_str())
            .increment(categories as u64);
    }

    pub fn records_excluded(count: usize) {
        ::metrics::counter!(MetricName::ClassifierRecordsExcluded.as_str())
            .increment(count as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ClassifierDuration.as_str()).record(secs);
    }
}

pub mod reconciler {
    use super::MetricName;

    pub fn candidates(count: usize) {
        ::metrics::counter!(MetricName::ReconcilerCandidates.as_str()).increment(count as u64);
    }

    pub fn cell_populated() {
        ::metrics::counter!(MetricName::ReconcilerCellsPopulated.as_str()).increment(1);
    }

    pub fn cell_absent() {
        ::metrics::counter!(MetricName::ReconcilerCellsAbsent.as_str()).increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::ReconcilerDuration.as_str()).record(secs);
    }
}

pub mod writer {
    use super::MetricName;

    pub fn cell_written() {
        ::metrics::counter!(MetricName::WriterCellsWritten.as_str()).increment(1);
    }

    pub fn cell_skipped() {
        ::metrics::counter!(MetricName::WriterCellsSkipped.as_str()).increment(1);
    }

    pub fn write_error() {
        ::metrics::counter!(MetricName::WriterWriteErrors.as_str()).increment(1);
    }
}

pub mod auditor {
    use super::MetricName;

    pub fn gaps_detected(count: usize) {
        ::metrics::counter!(MetricName::AuditorGapsDetected.as_str()).increment(count as u64);
    }
}
