/// Canonical name of the filer-identifier column every output batch leads with.
pub const FILER_ID_COLUMN: &str = "RSSD_ID";

/// Canonical name of the reporting-period column written second.
pub const PERIOD_COLUMN: &str = "REPORTING_PERIOD";

/// Raw categorical column driving entity classification.
pub const DEFAULT_CLASSIFICATION_COLUMN: &str = "RSSD9331";

/// Exact-name candidates for the filer-identifier column, tried in order.
pub const IDENTIFIER_CANDIDATES: [&str; 3] = ["RSSD9001", "IDRSSD", "RSSD_ID"];

/// Marker token for the substring fallback when no exact candidate matches.
pub const IDENTIFIER_MARKER: &str = "RSSD";

/// Columns that carry the marker token but are dates, not filer identifiers.
pub const NON_IDENTIFIER_SIBLINGS: [&str; 2] = ["RSSD9999", "RSSDDATE"];

/// Where the pipeline keeps logs, the cell index and written cells by default.
pub const DEFAULT_DATA_ROOT: &str = "data";
