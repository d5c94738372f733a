use crate::error::Result;
use crate::types::RecordBatch;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What a write attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Artifact written (or rewritten under --force).
    Written(WrittenCell),
    /// Artifact already on disk with identical content; nothing touched.
    Unchanged(WrittenCell),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrittenCell {
    pub path: PathBuf,
    pub checksum: String,
}

impl WriteOutcome {
    pub fn cell(&self) -> &WrittenCell {
        match self {
            WriteOutcome::Written(c) | WriteOutcome::Unchanged(c) => c,
        }
    }
}

/// Downstream writer port. The real columnar serializer lives outside this
/// crate; adapters here only need to write atomically — a crash mid-run must
/// never leave a half-written authoritative cell.
pub trait CellWriter: Send + Sync {
    fn write_cell(&self, batch: &RecordBatch, force: bool) -> Result<WriteOutcome>;
}

/// NDJSON adapter: one file per (category, period), schema line first, then
/// one line per row. Content-addressed skip keeps re-runs idempotent.
pub struct NdjsonCellWriter {
    root: PathBuf,
}

impl NdjsonCellWriter {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        NdjsonCellWriter { root: root.as_ref().to_path_buf() }
    }

    fn target(&self, batch: &RecordBatch) -> PathBuf {
        self.root.join(batch.category.as_str()).join(format!("{}.ndjson", batch.period))
    }

    fn render(batch: &RecordBatch) -> Result<String> {
        let mut out = String::new();
        out.push_str(&serde_json::to_string(&batch.batch.columns)?);
        out.push('\n');
        for row in &batch.batch.rows {
            out.push_str(&serde_json::to_string(row)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn checksum(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl CellWriter for NdjsonCellWriter {
    fn write_cell(&self, batch: &RecordBatch, force: bool) -> Result<WriteOutcome> {
        let path = self.target(batch);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = Self::render(batch)?;
        let checksum = Self::checksum(&content);
        let written = WrittenCell { path: path.clone(), checksum: checksum.clone() };

        if !force && path.exists() {
            let existing = fs::read_to_string(&path)?;
            if Self::checksum(&existing) == checksum {
                return Ok(WriteOutcome::Unchanged(written));
            }
        }

        // Full-or-nothing: stage next to the target, then rename into place.
        let tmp = path.with_extension("ndjson.tmp");
        fs::write(&tmp, &content)?;
        fs::rename(&tmp, &path)?;
        info!(
            period = %batch.period,
            category = %batch.category,
            rows = batch.batch.n_rows(),
            path = %path.display(),
            "cell written"
        );
        Ok(WriteOutcome::Written(written))
    }
}
