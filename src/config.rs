use crate::audit::SeriesBounds;
use crate::classify::{ClassificationTable, EntityCategory};
use crate::constants;
use crate::error::{PipelineError, Result};
use crate::period::{CanonicalPeriod, SourceFamily};
use crate::reconcile::{ExclusionRule, Precedence};
use crate::types::SourceTag;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Immutable run configuration: which sources exist and at what precedence,
/// how raw records classify, which (source, category, range) combinations are
/// suppressed, and where each category's series legitimately ends.
///
/// Built once per run and passed into the Classifier/Reconciler/Auditor at
/// construction; nothing reads it as ambient global state.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(rename = "source")]
    pub sources: Vec<SourceConfig>,
    pub classification: ClassificationConfig,
    #[serde(default, rename = "exclusion")]
    pub exclusions: Vec<ExclusionRule>,
    #[serde(default)]
    pub series_bounds: BTreeMap<EntityCategory, CanonicalPeriod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Root for the cell index, written cells and failure summaries.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Optional mnemonic -> description dictionary (JSON), attached to output
    /// columns as metadata when present.
    #[serde(default)]
    pub dictionary: Option<PathBuf>,
}

fn default_data_root() -> PathBuf {
    PathBuf::from(constants::DEFAULT_DATA_ROOT)
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { data_root: default_data_root(), dictionary: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: SourceTag,
    pub family: SourceFamily,
    /// Lower rank wins when several sources cover the same (period, category).
    pub rank: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Directory of decoded-batch envelopes for this source.
    pub input_dir: PathBuf,
    /// Category for whole batches when the feed has no classification column
    /// (the CDR bulk files only ever carry commercial banks).
    #[serde(default)]
    pub default_category: Option<EntityCategory>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_classification_column")]
    pub column: String,
    /// Raw categorical value -> entity category. Unmapped values classify as
    /// EXCLUDED.
    pub map: BTreeMap<String, EntityCategory>,
    /// Escalate a missing classification column from file-fatal to run-fatal.
    #[serde(default)]
    pub fail_run: bool,
}

fn default_classification_column() -> String {
    constants::DEFAULT_CLASSIFICATION_COLUMN.to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{path}': {e}"))
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could only fail later and less clearly.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_sources().next().is_none() {
            return Err(PipelineError::Config("no enabled sources configured".to_string()));
        }
        let mut seen = BTreeMap::new();
        for source in self.enabled_sources() {
            if seen.insert(source.id, ()).is_some() {
                return Err(PipelineError::Config(format!(
                    "source {} configured more than once",
                    source.id
                )));
            }
        }
        // Rank collisions are caught here, before any file is touched.
        self.precedence()?;
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn precedence(&self) -> Result<Precedence> {
        Precedence::new(self.enabled_sources().map(|s| (s.id, s.rank)).collect())
    }

    pub fn classification_table(&self) -> ClassificationTable {
        ClassificationTable::new(self.classification.column.clone(), self.classification.map.clone())
    }

    pub fn series_bounds(&self) -> SeriesBounds {
        SeriesBounds::new(self.series_bounds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [run]
        data_root = "data"

        [[source]]
        id = "ffiec_cdr"
        family = "full_date"
        rank = 0
        input_dir = "data/decoded/ffiec_cdr"

        [[source]]
        id = "chicago_fed"
        family = "compact"
        rank = 1
        input_dir = "data/decoded/chicago_fed"

        [classification]
        column = "RSSD9331"

        [classification.map]
        1 = "FFIEC_031_041"
        10 = "FFIEC_002"
        11 = "FFIEC_002"
        13 = "FRB_2886b"
        17 = "FRB_2886b"

        [[exclusion]]
        source = "chicago_fed"
        category = "FFIEC_031_041"
        after = "2010Q4"

        [series_bounds]
        FFIEC_002 = "2021Q2"
        FRB_2886b = "2021Q2"
    "#;

    #[test]
    fn parses_the_full_shape() {
        let config: Config = toml::from_str(EXAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].id, SourceTag::FfiecCdr);
        assert_eq!(config.sources[0].family, SourceFamily::FullDate);
        assert!(config.sources[1].enabled);

        let table = config.classification_table();
        assert_eq!(table.column(), "RSSD9331");
        assert_eq!(table.classify_value("10"), EntityCategory::Ffiec002);
        assert_eq!(table.classify_value("42"), EntityCategory::Excluded);

        assert_eq!(config.exclusions.len(), 1);
        assert_eq!(
            config.series_bounds().bound(EntityCategory::Ffiec002),
            Some("2021Q2".parse().unwrap())
        );
        assert_eq!(config.series_bounds().bound(EntityCategory::Ffiec031041), None);
    }

    #[test]
    fn rank_collisions_are_rejected_at_load() {
        let broken = EXAMPLE.replace("rank = 1", "rank = 0");
        let config: Config = toml::from_str(&broken).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousPrecedence { .. }));
    }

    #[test]
    fn disabled_sources_do_not_collide() {
        let softened = EXAMPLE.replace(
            "rank = 1\n        input_dir",
            "rank = 0\n        enabled = false\n        input_dir",
        );
        let config: Config = toml::from_str(&softened).unwrap();
        config.validate().unwrap();
        assert_eq!(config.enabled_sources().count(), 1);
    }
}
