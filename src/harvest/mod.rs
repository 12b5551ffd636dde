//! Harvest orchestration: dataset identifiers, then per-dataset file
//! metadata.
//!
//! Harvesting one repository is a two-phase state machine:
//! 1. [`DatasetHarvester::harvest_identifiers`] streams OAI-PMH records
//!    and persists new datasets (repository status
//!    `not_started` → `in_progress` → `completed`).
//! 2. [`FileMetadataHarvester::harvest_file_metadata`] resolves each
//!    dataset's file listing concurrently (dataset status
//!    `unset` → `in_progress` → `completed`).
//!
//! Both phases are restart-safe: the dataset phase is idempotent via the
//! (pid, repository) existence guard, and the file phase deletes partial
//! rows of interrupted datasets before re-fetching.

mod dataset;
mod datestamp;
mod error;
mod files;

pub use dataset::{DatasetHarvester, HarvestCounts};
pub use datestamp::{DatestampError, parse_datestamp, parse_optional_datestamp};
pub use error::HarvestError;
pub use files::{
    DEFAULT_FILE_HARVEST_CONCURRENCY, ChecksumEntry, EmbargoEntry, FileEntry, FileListClient,
    FileListError, FileListing, FileMetadataHarvester, RawMetadata,
};
