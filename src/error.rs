use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unparseable period identifier: {0}")]
    UnparseableIdentifier(String),

    #[error("'{identifier}': month {month:02} is not a quarter-end month")]
    InvalidQuarterEndMonth { identifier: String, month: u32 },

    #[error("'{identifier}': {date} is not a quarter-end date")]
    NonQuarterEndDate { identifier: String, date: String },

    #[error("classification column '{column}' not present in schema")]
    MissingClassificationColumn { column: String },

    #[error("no filer-identifier column found ({columns} columns searched)")]
    NoIdentifierColumn { columns: usize },

    #[error("ambiguous source precedence for {key}: {detail}")]
    AmbiguousPrecedence { key: String, detail: String },

    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Whether this error must abort the whole run rather than just the file
    /// that produced it. Ambiguous precedence means the configuration cannot
    /// produce a well-defined output set.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, PipelineError::AmbiguousPrecedence { .. } | PipelineError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
