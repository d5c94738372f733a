pub mod audit;
pub mod classify;
pub mod config;
pub mod constants;
pub mod coverage_index;
pub mod dictionary;
pub mod error;
pub mod logging;
pub mod observability;
pub mod period;
pub mod pipeline;
pub mod reconcile;
pub mod sources;
pub mod types;
pub mod writer;
