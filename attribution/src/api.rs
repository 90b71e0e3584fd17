use thiserror::Error;

/// Failures that can abort a pipeline run. Everything else in the pipeline
/// degrades locally (see [`crate::storage::StorageError`]) and never
/// surfaces here.
#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("failed to parse page url: {0}")]
    MalformedUrl(#[from] url::ParseError),
}
