//! File-metadata harvester: per-dataset file listings for one repository.
//!
//! For every dataset whose file harvest is not complete, the harvester
//! asks the file-listing boundary (`GET <base-url>/<pid>`) for the
//! dataset's files and persists one row per file. Datasets found
//! `in_progress` from an interrupted run have their partial file rows
//! deleted first, so the result set for a dataset is never a union of two
//! runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use futures_util::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use super::datestamp::parse_datestamp;
use super::error::{HarvestError, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::notify::Outbox;
use crate::store::{
    Dataset, FileHarvestStatus, MetadataStore, NewFileMetadata, RepoHarvestStatus, Repository,
};

/// Default number of datasets fetched concurrently per repository.
pub const DEFAULT_FILE_HARVEST_CONCURRENCY: usize = 8;

/// Connect timeout for file-listing requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for file-listing requests. Listing a large dataset can
/// take minutes on the boundary side.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(1800);

/// A per-dataset fetch slower than this is logged as a warning.
const SLOW_FETCH_WARNING: Duration = Duration::from_secs(60);

/// Errors from the file-listing boundary.
#[derive(Debug, Error)]
pub enum FileListError {
    /// The request exceeded the configured timeout.
    #[error("timeout fetching file listing from {url}")]
    Timeout {
        /// The request URL that timed out.
        url: String,
    },

    /// Network-level failure reaching the boundary.
    #[error("network error fetching file listing from {url}: {source}")]
    Network {
        /// The request URL.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The boundary answered with a non-success HTTP status.
    #[error("HTTP {status} from file-listing boundary {url}")]
    HttpStatus {
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response body was not the expected JSON shape.
    #[error("malformed file listing from {url}: {detail}")]
    MalformedResponse {
        /// The request URL.
        url: String,
        /// What was wrong with the body.
        detail: String,
    },
}

// ==================== file-listing wire types ====================

/// JSON listing returned by the file-listing boundary.
#[derive(Debug, Deserialize)]
pub struct FileListing {
    /// The dataset's files.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One file in a listing.
#[derive(Debug, Deserialize)]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// Retrieval link.
    pub link: String,
    /// Size in bytes.
    pub size: i64,
    /// Repository-specific metadata block.
    pub raw_metadata: RawMetadata,
}

/// The `raw_metadata` block of a file entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMetadata {
    /// MIME type.
    pub content_type: String,
    /// Checksum descriptor.
    pub checksum: ChecksumEntry,
    /// Whether access must be requested.
    #[serde(default)]
    pub file_access_request: bool,
    /// Publication date, when known.
    pub publication_date: Option<String>,
    /// Embargo block, when the file is embargoed.
    pub embargo: Option<EmbargoEntry>,
}

/// Checksum value and algorithm.
#[derive(Debug, Deserialize)]
pub struct ChecksumEntry {
    /// Hash value; may be absent when the source has not computed one.
    pub value: Option<String>,
    /// Algorithm name (md5, sha256, ...).
    #[serde(rename = "type")]
    pub checksum_type: String,
}

/// Embargo details of a file entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbargoEntry {
    /// When the embargo lifts.
    pub date_available: Option<String>,
}

impl FileEntry {
    /// Maps the wire entry into an insertable row for a dataset.
    ///
    /// Entry dates are parsed leniently: an unparseable date is stored as
    /// `NULL` rather than aborting the fetch.
    #[must_use]
    pub fn into_new_file_metadata(self, dataset_pid: &str) -> NewFileMetadata {
        let publication_date = parse_entry_date(self.raw_metadata.publication_date.as_deref());
        let embargo_date = parse_entry_date(
            self.raw_metadata
                .embargo
                .as_ref()
                .and_then(|e| e.date_available.as_deref()),
        );

        NewFileMetadata {
            name: self.name,
            link: self.link,
            size: self.size,
            mime_type: self.raw_metadata.content_type,
            checksum_value: self.raw_metadata.checksum.value,
            checksum_type: self.raw_metadata.checksum.checksum_type,
            access_request: self.raw_metadata.file_access_request,
            publication_date,
            embargo_date,
            dataset_pid: dataset_pid.to_string(),
        }
    }
}

fn parse_entry_date(value: Option<&str>) -> Option<NaiveDateTime> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    match parse_datestamp(value) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            debug!(error = %error, "ignoring unparseable file entry date");
            None
        }
    }
}

// ==================== file-listing client ====================

/// HTTP client for the file-listing boundary.
#[derive(Debug, Clone)]
pub struct FileListClient {
    client: Client,
    base_url: String,
}

impl FileListClient {
    /// Creates a client for the given boundary base URL with the default
    /// fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FileListError::Network`] if HTTP client construction
    /// fails.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FileListError> {
        Self::with_timeout(base_url, DEFAULT_FETCH_TIMEOUT)
    }

    /// Creates a client with a custom fetch timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FileListError::Network`] if HTTP client construction
    /// fails.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FileListError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|source| FileListError::Network {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    /// Fetches the file listing for a pid.
    ///
    /// # Errors
    ///
    /// Returns [`FileListError`] on timeout, transport failure, a
    /// non-success status, or a malformed body.
    pub async fn fetch(&self, pid: &str) -> Result<FileListing, FileListError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(pid)
        );

        let response = self.client.get(&url).send().await.map_err(|source| {
            if source.is_timeout() {
                FileListError::Timeout { url: url.clone() }
            } else {
                FileListError::Network {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FileListError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        response
            .json::<FileListing>()
            .await
            .map_err(|e| FileListError::MalformedResponse {
                url,
                detail: e.to_string(),
            })
    }
}

// ==================== harvester ====================

/// Harvests file metadata for every eligible dataset of a repository.
///
/// Eligible datasets (file harvest not `completed`) are fetched
/// concurrently, bounded by a semaphore. Per-dataset failures are logged
/// and leave the dataset `in_progress`; the next run cleans up and
/// retries.
pub struct FileMetadataHarvester {
    store: Arc<dyn MetadataStore>,
    client: FileListClient,
    outbox: Outbox,
    semaphore: Arc<Semaphore>,
}

impl FileMetadataHarvester {
    /// Creates a harvester with the default per-repository concurrency.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, client: FileListClient, outbox: Outbox) -> Self {
        Self {
            store,
            client,
            outbox,
            semaphore: Arc::new(Semaphore::new(DEFAULT_FILE_HARVEST_CONCURRENCY)),
        }
    }

    /// Creates a harvester with an explicit concurrency bound (1-100).
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::InvalidConcurrency`] if the value is
    /// outside the valid range.
    pub fn with_concurrency(
        store: Arc<dyn MetadataStore>,
        client: FileListClient,
        outbox: Outbox,
        concurrency: usize,
    ) -> Result<Self, HarvestError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(HarvestError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            store,
            client,
            outbox,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        })
    }

    /// Harvests file metadata for all eligible datasets of a repository.
    ///
    /// Precondition: the repository's dataset harvest must be `completed`.
    /// Datasets left `in_progress` by an interrupted run have their file
    /// rows deleted before re-fetching. All scheduled fetches run
    /// concurrently (bounded) and the call returns once every fetch has
    /// finished; per-dataset outcomes are logged, not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::PreconditionFailed`] when the dataset
    /// harvest is not completed, or [`HarvestError::Store`] when listing
    /// datasets or cleaning up partial rows fails.
    #[instrument(skip(self, repo), fields(repo_id = repo.id, name = %repo.name))]
    pub async fn harvest_file_metadata(&self, repo: &Repository) -> Result<(), HarvestError> {
        if repo.harvest_status() != RepoHarvestStatus::Completed {
            return Err(HarvestError::PreconditionFailed {
                repo_id: repo.id,
                status: repo.harvest_status_str.clone(),
            });
        }

        let datasets = self.store.datasets_for_repository(repo.id).await?;

        // Compensating cleanup: an in_progress dataset is the signature of
        // an interrupted prior run with possibly partial file rows.
        for dataset in &datasets {
            if dataset.file_harvest_status() == FileHarvestStatus::InProgress {
                let deleted = self.store.delete_file_metadata_by_pid(&dataset.pid).await?;
                warn!(
                    pid = %dataset.pid,
                    deleted,
                    "dataset was left in_progress; deleted partial file rows"
                );
            }
        }

        let eligible: Vec<&Dataset> = datasets
            .iter()
            .filter(|d| d.file_harvest_status() != FileHarvestStatus::Completed)
            .collect();

        info!(
            total = datasets.len(),
            eligible = eligible.len(),
            "starting file metadata harvest"
        );
        self.outbox.send(
            format!("File metadata harvest for repository {} started", repo.name),
            format!(
                "File metadata harvest for repository {} has started for {} dataset(s).",
                repo.name,
                eligible.len()
            ),
        );

        let fetches = eligible.iter().map(|dataset| async move {
            let Ok(_permit) = self.semaphore.acquire().await else {
                return;
            };
            if let Err(harvest_error) = self.harvest_files(dataset).await {
                error!(
                    pid = %dataset.pid,
                    error = %harvest_error,
                    "file harvest failed for dataset"
                );
            }
        });
        join_all(fetches).await;

        info!("file metadata harvest completed");
        self.outbox.send(
            format!(
                "File metadata harvest for repository {} completed",
                repo.name
            ),
            format!(
                "File metadata harvest for repository {} has finished.",
                repo.name
            ),
        );

        Ok(())
    }

    /// Fetches and persists the file listing for one dataset.
    ///
    /// Marks the dataset `in_progress`, fetches the listing with a bounded
    /// timeout, persists one row per file, then marks the dataset
    /// `completed`. On timeout or a non-success response the dataset stays
    /// `in_progress` for the next run's cleanup-and-retry.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Store`] for non-constraint store failures;
    /// boundary failures are absorbed into logging.
    #[instrument(skip(self, dataset), fields(pid = %dataset.pid))]
    pub async fn harvest_files(&self, dataset: &Dataset) -> Result<(), HarvestError> {
        let started = Instant::now();
        info!(pid = %dataset.pid, "starting file harvest");

        if !self.store.claim_file_harvest(&dataset.pid).await? {
            debug!(pid = %dataset.pid, "dataset already completed; nothing to do");
            return Ok(());
        }

        let listing = match self.client.fetch(&dataset.pid).await {
            Ok(listing) => listing,
            Err(FileListError::Timeout { url }) => {
                error!(pid = %dataset.pid, url = %url, "file listing request timed out");
                self.outbox.send(
                    "File metadata harvest timeout",
                    format!("Request for {} timed out while fetching file metadata.", dataset.pid),
                );
                return Ok(());
            }
            Err(fetch_error) => {
                error!(pid = %dataset.pid, error = %fetch_error, "failed to fetch file listing");
                return Ok(());
            }
        };

        let mut inserted: u64 = 0;
        let mut skipped: u64 = 0;
        for entry in listing.files {
            let row = entry.into_new_file_metadata(&dataset.pid);
            match self.store.insert_file_metadata(&row).await {
                Ok(()) => inserted += 1,
                Err(store_error) if store_error.is_constraint_violation() => {
                    warn!(
                        pid = %dataset.pid,
                        link = %row.link,
                        error = %store_error,
                        "file row violated a constraint; skipping"
                    );
                    skipped += 1;
                }
                Err(store_error) => return Err(store_error.into()),
            }
        }

        self.store.complete_file_harvest(&dataset.pid).await?;

        let elapsed = started.elapsed();
        info!(
            pid = %dataset.pid,
            inserted,
            skipped,
            elapsed_secs = elapsed.as_secs_f64(),
            "completed file harvest for dataset"
        );
        if elapsed > SLOW_FETCH_WARNING {
            warn!(
                pid = %dataset.pid,
                elapsed_secs = elapsed.as_secs_f64(),
                "file harvest exceeded {}s",
                SLOW_FETCH_WARNING.as_secs()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry_maps_all_fields() {
        let entry: FileEntry = serde_json::from_value(serde_json::json!({
            "name": "a.txt",
            "link": "https://example.org/a.txt",
            "size": 10,
            "raw_metadata": {
                "contentType": "text/plain",
                "checksum": {"value": "abc123", "type": "md5"},
                "fileAccessRequest": true,
                "publicationDate": "2023-06-01",
                "embargo": {"dateAvailable": "2024-01-01T00:00:00Z"}
            }
        }))
        .unwrap();

        let row = entry.into_new_file_metadata("10.1234/abc");
        assert_eq!(row.name, "a.txt");
        assert_eq!(row.size, 10);
        assert_eq!(row.mime_type, "text/plain");
        assert_eq!(row.checksum_value.as_deref(), Some("abc123"));
        assert_eq!(row.checksum_type, "md5");
        assert!(row.access_request);
        assert!(row.publication_date.is_some());
        assert!(row.embargo_date.is_some());
        assert_eq!(row.dataset_pid, "10.1234/abc");
    }

    #[test]
    fn test_file_entry_tolerates_missing_optionals() {
        let entry: FileEntry = serde_json::from_value(serde_json::json!({
            "name": "b.bin",
            "link": "https://example.org/b.bin",
            "size": 20,
            "raw_metadata": {
                "contentType": "application/octet-stream",
                "checksum": {"value": null, "type": "md5"}
            }
        }))
        .unwrap();

        let row = entry.into_new_file_metadata("10.1234/abc");
        assert!(row.checksum_value.is_none());
        assert!(!row.access_request);
        assert!(row.publication_date.is_none());
        assert!(row.embargo_date.is_none());
    }

    #[test]
    fn test_unparseable_entry_date_becomes_none() {
        assert!(parse_entry_date(Some("06/01/2023")).is_none());
        assert!(parse_entry_date(Some("")).is_none());
        assert!(parse_entry_date(Some("2023-06-01")).is_some());
    }
}
