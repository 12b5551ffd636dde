//! Error types for harvest orchestration.

use thiserror::Error;

use super::datestamp::DatestampError;
use crate::oai::OaiError;
use crate::store::StoreError;

/// Minimum allowed file-harvest concurrency.
pub(crate) const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed file-harvest concurrency.
pub(crate) const MAX_CONCURRENCY: usize = 100;

/// Errors that can occur during harvest runs.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Another run currently owns this repository.
    #[error("repository {repo_id} already has a dataset harvest in progress")]
    AlreadyInProgress {
        /// The contested repository.
        repo_id: i64,
    },

    /// File harvest requested before the dataset harvest completed.
    #[error(
        "repository {repo_id} dataset harvest must be completed before harvesting file metadata (status: {status})"
    )]
    PreconditionFailed {
        /// The repository in question.
        repo_id: i64,
        /// Its current dataset-harvest status.
        status: String,
    },

    /// A record datestamp had an unrecognized format. Fatal: aborts the
    /// whole dataset-harvest run.
    #[error("fatal datestamp in record {identifier}: {source}")]
    Datestamp {
        /// The record whose datestamp failed to parse.
        identifier: String,
        /// The underlying parse failure.
        #[source]
        source: DatestampError,
    },

    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// OAI-PMH streaming failed.
    #[error(transparent)]
    Oai(#[from] OaiError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
