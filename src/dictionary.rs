use crate::error::Result;
use crate::types::TableBatch;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// MDRM mnemonic prefixes that appear on Call Reports. Dictionary entries
/// outside these prefixes are dropped at load.
pub const CALL_REPORT_PREFIXES: [&str; 8] =
    ["RCON", "RCFD", "RIAD", "RCFA", "RCFN", "RCFW", "RCOA", "RCOW"];

#[derive(Debug, Deserialize)]
struct DictionaryEntry {
    variable: String,
    description: String,
    #[serde(default)]
    last_updated: Option<NaiveDate>,
}

/// Optional mnemonic -> description mapping attached to output columns as
/// non-authoritative metadata. Loaded once per run; an empty dictionary is
/// always a valid substitute.
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    descriptions: HashMap<String, String>,
}

impl DataDictionary {
    pub fn empty() -> Self {
        DataDictionary::default()
    }

    /// Load from a JSON array of `{variable, description, last_updated?}`
    /// entries, keeping the most recent definition per variable and only
    /// Call Report prefixes.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let entries: Vec<DictionaryEntry> = serde_json::from_str(&content)?;

        let mut latest: HashMap<String, (Option<NaiveDate>, String)> = HashMap::new();
        for entry in entries {
            let variable = entry.variable.trim().to_ascii_uppercase();
            if !CALL_REPORT_PREFIXES.iter().any(|p| variable.starts_with(p)) {
                continue;
            }
            match latest.get(&variable) {
                Some((seen, _)) if *seen >= entry.last_updated => {}
                _ => {
                    latest.insert(variable, (entry.last_updated, entry.description));
                }
            }
        }

        Ok(DataDictionary {
            descriptions: latest.into_iter().map(|(k, (_, d))| (k, d)).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn describe(&self, mnemonic: &str) -> Option<&str> {
        self.descriptions.get(&mnemonic.to_ascii_uppercase()).map(String::as_str)
    }

    /// Attach descriptions to every column the dictionary knows. Columns
    /// without an entry keep whatever description they arrived with.
    pub fn annotate(&self, batch: &mut TableBatch) {
        for column in &mut batch.columns {
            if let Some(desc) = self.describe(&column.name) {
                column.description = Some(desc.to_string());
            }
        }
    }
}
