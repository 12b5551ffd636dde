//! Row types and status definitions for the metadata store.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::pid::PidProtocol;

/// Dataset-harvest status of a repository.
///
/// Progresses forward only on the happy path:
/// `not_started` → `in_progress` → `completed`. `failed` is the explicit
/// terminal status for a run that died mid-stream; failed repositories can
/// be re-claimed for a fresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoHarvestStatus {
    /// No harvest has been attempted yet.
    NotStarted,
    /// A harvest run currently owns this repository.
    InProgress,
    /// The last harvest run finished normally.
    Completed,
    /// The last harvest run aborted (stream failure or fatal parse error).
    Failed,
}

impl RepoHarvestStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RepoHarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RepoHarvestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid repository harvest status: {s}")),
        }
    }
}

/// File-harvest status of a dataset.
///
/// Progresses forward only: `unset` → `in_progress` → `completed`. A dataset
/// found `in_progress` at the start of a run is the signature of an
/// interrupted prior run and triggers compensating cleanup of its file rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileHarvestStatus {
    /// File harvest has never been attempted.
    Unset,
    /// A file harvest owns (or owned, if interrupted) this dataset.
    InProgress,
    /// File metadata for this dataset is complete.
    Completed,
}

impl FileHarvestStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for FileHarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FileHarvestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unset" => Ok(Self::Unset),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("invalid file harvest status: {s}")),
        }
    }
}

/// A harvestable repository row.
#[derive(Debug, Clone, FromRow)]
pub struct Repository {
    /// Unique identifier.
    pub id: i64,
    /// Human-readable repository name.
    pub name: String,
    /// OAI-PMH base URL.
    pub url: String,
    /// Metadata prefix passed to `ListRecords`.
    pub metadata_prefix: String,
    /// Current dataset-harvest status (stored as text, parsed via `harvest_status()`).
    #[sqlx(rename = "harvest_status")]
    pub harvest_status_str: String,
    /// When the current/last dataset harvest started.
    pub harvest_started_at: Option<NaiveDateTime>,
    /// When the last dataset harvest ended.
    pub harvest_ended_at: Option<NaiveDateTime>,
}

impl Repository {
    /// Returns the parsed harvest status.
    ///
    /// Falls back to `NotStarted` if the stored string is invalid.
    #[must_use]
    pub fn harvest_status(&self) -> RepoHarvestStatus {
        self.harvest_status_str
            .parse()
            .unwrap_or(RepoHarvestStatus::NotStarted)
    }
}

/// Fields for inserting a new repository (administrative add-operation).
#[derive(Debug, Clone)]
pub struct NewRepository {
    /// Human-readable repository name.
    pub name: String,
    /// OAI-PMH base URL.
    pub url: String,
    /// Metadata prefix passed to `ListRecords`.
    pub metadata_prefix: String,
}

/// A harvested dataset row.
#[derive(Debug, Clone, FromRow)]
pub struct Dataset {
    /// Unique identifier.
    pub id: i64,
    /// Owning repository.
    pub repo_id: i64,
    /// Persistent identifier, unique across the whole store.
    pub pid: String,
    /// Identifier protocol tag (doi/hdl/ark), stored as text.
    #[sqlx(rename = "pid_protocol")]
    pub pid_protocol_str: String,
    /// OAI record datestamp.
    pub record_timestamp: Option<NaiveDateTime>,
    /// Publication date extracted from the record metadata.
    pub publication_date: Option<NaiveDateTime>,
    /// Current file-harvest status (stored as text, parsed via `file_harvest_status()`).
    #[sqlx(rename = "file_harvest_status")]
    pub file_harvest_status_str: String,
    /// When the current/last file harvest started.
    pub file_harvest_started_at: Option<NaiveDateTime>,
    /// When the last file harvest ended.
    pub file_harvest_ended_at: Option<NaiveDateTime>,
}

impl Dataset {
    /// Returns the parsed file-harvest status.
    ///
    /// Falls back to `Unset` if the stored string is invalid.
    #[must_use]
    pub fn file_harvest_status(&self) -> FileHarvestStatus {
        self.file_harvest_status_str
            .parse()
            .unwrap_or(FileHarvestStatus::Unset)
    }

    /// Returns the parsed identifier protocol.
    ///
    /// Falls back to `Doi` if the stored string is invalid.
    #[must_use]
    pub fn pid_protocol(&self) -> PidProtocol {
        self.pid_protocol_str.parse().unwrap_or(PidProtocol::Doi)
    }
}

/// Fields for inserting a new dataset (created exclusively by the dataset
/// harvester; file-harvest status starts `unset`).
#[derive(Debug, Clone)]
pub struct NewDataset {
    /// Owning repository.
    pub repo_id: i64,
    /// Normalized persistent identifier (prefix stripped).
    pub pid: String,
    /// Identifier protocol tag.
    pub pid_protocol: PidProtocol,
    /// OAI record datestamp.
    pub record_timestamp: Option<NaiveDateTime>,
    /// Publication date from the record metadata.
    pub publication_date: Option<NaiveDateTime>,
}

/// A file-metadata row belonging to a dataset.
#[derive(Debug, Clone, FromRow)]
pub struct FileMetadata {
    /// Unique identifier.
    pub id: i64,
    /// File name.
    pub name: String,
    /// Retrieval link.
    pub link: String,
    /// File size in bytes.
    pub size: i64,
    /// MIME type reported by the file-listing boundary.
    pub mime_type: String,
    /// Checksum value, when the source provides one.
    pub checksum_value: Option<String>,
    /// Checksum algorithm (e.g. md5, sha256).
    pub checksum_type: String,
    /// Whether access to the file must be requested.
    pub access_request: bool,
    /// File publication date.
    pub publication_date: Option<NaiveDateTime>,
    /// Embargo lift date, when present.
    pub embargo_date: Option<NaiveDateTime>,
    /// Owning dataset pid.
    pub dataset_pid: String,
}

/// Fields for inserting a new file-metadata row (created exclusively by the
/// file-metadata harvester).
#[derive(Debug, Clone)]
pub struct NewFileMetadata {
    /// File name.
    pub name: String,
    /// Retrieval link.
    pub link: String,
    /// File size in bytes.
    pub size: i64,
    /// MIME type reported by the file-listing boundary.
    pub mime_type: String,
    /// Checksum value, when the source provides one.
    pub checksum_value: Option<String>,
    /// Checksum algorithm.
    pub checksum_type: String,
    /// Whether access to the file must be requested.
    pub access_request: bool,
    /// File publication date.
    pub publication_date: Option<NaiveDateTime>,
    /// Embargo lift date, when present.
    pub embargo_date: Option<NaiveDateTime>,
    /// Owning dataset pid.
    pub dataset_pid: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_status_round_trip() {
        for status in [
            RepoHarvestStatus::NotStarted,
            RepoHarvestStatus::InProgress,
            RepoHarvestStatus::Completed,
            RepoHarvestStatus::Failed,
        ] {
            let parsed: RepoHarvestStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_repo_status_rejects_unknown() {
        assert!("pending".parse::<RepoHarvestStatus>().is_err());
    }

    #[test]
    fn test_file_status_round_trip() {
        for status in [
            FileHarvestStatus::Unset,
            FileHarvestStatus::InProgress,
            FileHarvestStatus::Completed,
        ] {
            let parsed: FileHarvestStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_file_status_rejects_unknown() {
        assert!("not_started".parse::<FileHarvestStatus>().is_err());
    }
}
