pub mod decoded_json;

use crate::config::SourceConfig;
use crate::types::FilingSource;
use decoded_json::DecodedJsonSource;

/// Build the adapter for a configured source. Both upstream providers hand
/// their decoded batches over as JSON envelopes; the physical decoders (SAS
/// XPORT, tab-delimited) run outside this crate.
pub fn create_source(config: &SourceConfig) -> Box<dyn FilingSource> {
    Box::new(
        DecodedJsonSource::new(config.id, config.family, config.input_dir.clone())
            .with_default_category(config.default_category),
    )
}
