use crate::classify::EntityCategory;
use crate::error::{PipelineError, Result};
use crate::period::SourceFamily;
use crate::types::{DecodedFile, FilingSource, SourceTag, TableBatch};
use std::path::PathBuf;
use tracing::debug;

/// Reads decoded-batch envelopes from a directory: one JSON file per upstream
/// file, named after it (`call9203.xpt.json`), containing the serialized
/// tabular batch. The identifier handed onward keeps the upstream name so the
/// Period Resolver sees the original encoding.
pub struct DecodedJsonSource {
    tag: SourceTag,
    family: SourceFamily,
    input_dir: PathBuf,
    default_category: Option<EntityCategory>,
}

impl DecodedJsonSource {
    pub fn new(tag: SourceTag, family: SourceFamily, input_dir: PathBuf) -> Self {
        DecodedJsonSource { tag, family, input_dir, default_category: None }
    }

    pub fn with_default_category(mut self, category: Option<EntityCategory>) -> Self {
        self.default_category = category;
        self
    }
}

#[async_trait::async_trait]
impl FilingSource for DecodedJsonSource {
    fn source_id(&self) -> SourceTag {
        self.tag
    }

    fn family(&self) -> SourceFamily {
        self.family
    }

    fn default_category(&self) -> Option<EntityCategory> {
        self.default_category
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        debug!(source = %self.tag, files = names.len(), dir = %self.input_dir.display(), "listed decoded envelopes");
        Ok(names)
    }

    async fn decode(&self, identifier: &str) -> Result<DecodedFile> {
        let path = self.input_dir.join(identifier);
        let content = tokio::fs::read_to_string(&path).await?;
        let batch: TableBatch = serde_json::from_str(&content)?;
        batch.validate()?;
        if batch.columns.is_empty() {
            return Err(PipelineError::MalformedBatch(format!(
                "envelope '{identifier}' declares no columns"
            )));
        }
        Ok(DecodedFile { identifier: identifier.to_string(), source: self.tag, batch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType, Scalar};
    use tempfile::tempdir;

    fn envelope() -> TableBatch {
        TableBatch::new(
            vec![
                Column::new("RSSD9001", ColumnType::Numeric),
                Column::new("RSSD9331", ColumnType::Numeric),
            ],
            vec![vec![Scalar::Number(12345.0), Scalar::Number(1.0)]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn lists_only_json_envelopes_sorted() {
        let dir = tempdir().unwrap();
        for name in ["call9212.xpt.json", "call9203.xpt.json", "notes.txt"] {
            std::fs::write(
                dir.path().join(name),
                serde_json::to_string(&envelope()).unwrap(),
            )
            .unwrap();
        }
        let source = DecodedJsonSource::new(
            SourceTag::ChicagoFed,
            SourceFamily::Compact,
            dir.path().to_path_buf(),
        );
        let files = source.list_files().await.unwrap();
        assert_eq!(files, vec!["call9203.xpt.json", "call9212.xpt.json"]);
    }

    #[tokio::test]
    async fn decodes_an_envelope_with_its_tag() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("FFIEC_20240630.txt.json"),
            serde_json::to_string(&envelope()).unwrap(),
        )
        .unwrap();
        let source = DecodedJsonSource::new(
            SourceTag::FfiecCdr,
            SourceFamily::FullDate,
            dir.path().to_path_buf(),
        );
        let decoded = source.decode("FFIEC_20240630.txt.json").await.unwrap();
        assert_eq!(decoded.source, SourceTag::FfiecCdr);
        assert_eq!(decoded.identifier, "FFIEC_20240630.txt.json");
        assert_eq!(decoded.batch.n_rows(), 1);
    }

    #[tokio::test]
    async fn empty_schema_is_malformed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), r#"{"columns": [], "rows": []}"#).unwrap();
        let source = DecodedJsonSource::new(
            SourceTag::FfiecCdr,
            SourceFamily::FullDate,
            dir.path().to_path_buf(),
        );
        let err = source.decode("bad.json").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedBatch(_)));
    }
}
