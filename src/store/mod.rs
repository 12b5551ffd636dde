//! Metadata store for repositories, datasets, and file metadata.
//!
//! This module provides `SQLite`-backed persistence for the harvest domain:
//! - [`Store`] - Main interface for store operations
//! - [`Repository`] / [`Dataset`] / [`FileMetadata`] - Row types
//! - [`RepoHarvestStatus`] / [`FileHarvestStatus`] - Lifecycle states
//! - [`MetadataStore`] - Boundary trait consumed by the harvesters
//! - [`StoreError`] - Operation error types
//!
//! Status transitions are claimed with single-statement
//! `UPDATE ... WHERE status ... ` guards so that two concurrent runs can
//! never both believe they own the same repository or dataset.
//!
//! # Example
//!
//! ```ignore
//! use harvester_core::store::{NewRepository, Store};
//! use harvester_core::Database;
//!
//! let db = Database::new_in_memory().await?;
//! let store = Store::new(db);
//!
//! let repo_id = store.insert_repository(&NewRepository {
//!     name: "demo".into(),
//!     url: "https://repo.example.org/oai".into(),
//!     metadata_prefix: "oai_dc".into(),
//! }).await?;
//! ```

mod boundary;
mod error;
mod models;

pub use boundary::MetadataStore;
pub use error::{StoreDbErrorKind, StoreError};
pub use models::{
    Dataset, FileHarvestStatus, FileMetadata, NewDataset, NewFileMetadata, NewRepository,
    RepoHarvestStatus, Repository,
};

use chrono::NaiveDateTime;
use sqlx::Row;
use tracing::instrument;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// Store for harvest metadata.
///
/// Provides atomic operations on repository, dataset, and file-metadata
/// rows backed by `SQLite` with WAL mode for concurrent access.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a new store with the given database connection.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== repositories ====================

    /// Inserts a new repository with `not_started` harvest status.
    ///
    /// This is the administrative add-operation; harvesters never create
    /// repositories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails, including a
    /// `constraint_violation` kind when (url, `metadata_prefix`) already
    /// exists.
    #[instrument(skip(self), fields(name = %repo.name, url = %repo.url))]
    pub async fn insert_repository(&self, repo: &NewRepository) -> Result<i64> {
        let result = sqlx::query(
            r"INSERT INTO repository (name, url, metadata_prefix)
              VALUES (?, ?, ?)
              RETURNING id",
        )
        .bind(&repo.name)
        .bind(&repo.url)
        .bind(&repo.metadata_prefix)
        .fetch_one(self.db.pool())
        .await?;

        Ok(result.get("id"))
    }

    /// Looks up a repository by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repository WHERE id = ?")
            .bind(repo_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(repo)
    }

    /// Looks up a repository by metadata prefix and URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_repository_by_prefix_and_url(
        &self,
        metadata_prefix: &str,
        url: &str,
    ) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>(
            "SELECT * FROM repository WHERE metadata_prefix = ? AND url = ?",
        )
        .bind(metadata_prefix)
        .bind(url)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(repo)
    }

    /// Lists all repositories ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let repos = sqlx::query_as::<_, Repository>("SELECT * FROM repository ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;

        Ok(repos)
    }

    /// Atomically claims a repository for a dataset-harvest run.
    ///
    /// Transitions the repository to `in_progress` with a fresh start
    /// timestamp, but only when no other run owns it. The check and the
    /// transition are one statement, so concurrent callers cannot both
    /// succeed.
    ///
    /// Returns `true` when the claim succeeded, `false` when the repository
    /// is already `in_progress` (or does not exist).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn claim_dataset_harvest(&self, repo_id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE repository
              SET harvest_status = ?, harvest_started_at = ?, harvest_ended_at = NULL
              WHERE id = ? AND harvest_status != ?",
        )
        .bind(RepoHarvestStatus::InProgress.as_str())
        .bind(now())
        .bind(repo_id)
        .bind(RepoHarvestStatus::InProgress.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a repository's dataset harvest as completed with an end
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RepositoryNotFound`] if the repository does not
    /// exist, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn complete_dataset_harvest(&self, repo_id: i64) -> Result<()> {
        self.finish_dataset_harvest(repo_id, RepoHarvestStatus::Completed)
            .await
    }

    /// Marks a repository's dataset harvest as failed with an end timestamp.
    ///
    /// A failed repository can be re-claimed for a fresh run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RepositoryNotFound`] if the repository does not
    /// exist, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn fail_dataset_harvest(&self, repo_id: i64) -> Result<()> {
        self.finish_dataset_harvest(repo_id, RepoHarvestStatus::Failed)
            .await
    }

    async fn finish_dataset_harvest(
        &self,
        repo_id: i64,
        status: RepoHarvestStatus,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE repository
              SET harvest_status = ?, harvest_ended_at = ?
              WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(now())
        .bind(repo_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RepositoryNotFound(repo_id));
        }
        Ok(())
    }

    // ==================== datasets ====================

    /// Checks whether a dataset exists for (pid, repository).
    ///
    /// This guard is what makes repeated dataset-harvest runs idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(pid = %pid))]
    pub async fn dataset_exists(&self, pid: &str, repo_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM dataset WHERE pid = ? AND repo_id = ? LIMIT 1")
            .bind(pid)
            .bind(repo_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.is_some())
    }

    /// Inserts a new dataset with `unset` file-harvest status.
    ///
    /// Returns `false` (instead of an error) when the insert hits a
    /// uniqueness violation: a concurrent writer beat us past the existence
    /// check. The violation is logged here at the boundary and the harvest
    /// continues past the record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for non-constraint failures.
    #[instrument(skip(self, dataset), fields(pid = %dataset.pid, repo_id = dataset.repo_id))]
    pub async fn insert_dataset(&self, dataset: &NewDataset) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT INTO dataset (repo_id, pid, pid_protocol, record_timestamp, publication_date)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(dataset.repo_id)
        .bind(&dataset.pid)
        .bind(dataset.pid_protocol.as_str())
        .bind(dataset.record_timestamp)
        .bind(dataset.publication_date)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = StoreError::from(err);
                if err.is_constraint_violation() {
                    tracing::warn!(pid = %dataset.pid, error = %err, "dataset insert violated a constraint; skipping record");
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Returns all datasets owned by a repository, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn datasets_for_repository(&self, repo_id: i64) -> Result<Vec<Dataset>> {
        let datasets =
            sqlx::query_as::<_, Dataset>("SELECT * FROM dataset WHERE repo_id = ? ORDER BY id")
                .bind(repo_id)
                .fetch_all(self.db.pool())
                .await?;

        Ok(datasets)
    }

    /// Looks up a dataset by pid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_dataset(&self, pid: &str) -> Result<Option<Dataset>> {
        let dataset = sqlx::query_as::<_, Dataset>("SELECT * FROM dataset WHERE pid = ?")
            .bind(pid)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(dataset)
    }

    /// Atomically claims a dataset for a file-harvest fetch.
    ///
    /// Transitions the dataset to `in_progress` with a fresh start
    /// timestamp unless its file harvest is already `completed`. A dataset
    /// left `in_progress` by an interrupted run is claimable again; the
    /// orchestrator deletes its partial file rows first.
    ///
    /// Returns `true` when the claim succeeded, `false` when the dataset is
    /// already completed (or does not exist).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(pid = %pid))]
    pub async fn claim_file_harvest(&self, pid: &str) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE dataset
              SET file_harvest_status = ?, file_harvest_started_at = ?, file_harvest_ended_at = NULL
              WHERE pid = ? AND file_harvest_status != ?",
        )
        .bind(FileHarvestStatus::InProgress.as_str())
        .bind(now())
        .bind(pid)
        .bind(FileHarvestStatus::Completed.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Marks a dataset's file harvest as completed with an end timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatasetNotFound`] if the dataset does not
    /// exist, or [`StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(pid = %pid))]
    pub async fn complete_file_harvest(&self, pid: &str) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE dataset
              SET file_harvest_status = ?, file_harvest_ended_at = ?
              WHERE pid = ?",
        )
        .bind(FileHarvestStatus::Completed.as_str())
        .bind(now())
        .bind(pid)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DatasetNotFound(pid.to_string()));
        }
        Ok(())
    }

    // ==================== file metadata ====================

    /// Inserts a new file-metadata row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails; callers treat
    /// a `constraint_violation` kind as a per-record skip.
    #[instrument(skip(self, file), fields(dataset_pid = %file.dataset_pid, link = %file.link))]
    pub async fn insert_file_metadata(&self, file: &NewFileMetadata) -> Result<()> {
        sqlx::query(
            r"INSERT INTO file_metadata (
                name, link, size, mime_type,
                checksum_value, checksum_type, access_request,
                publication_date, embargo_date, dataset_pid
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.name)
        .bind(&file.link)
        .bind(file.size)
        .bind(&file.mime_type)
        .bind(&file.checksum_value)
        .bind(&file.checksum_type)
        .bind(file.access_request)
        .bind(file.publication_date)
        .bind(file.embargo_date)
        .bind(&file.dataset_pid)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Deletes all file-metadata rows for a dataset pid.
    ///
    /// Compensating cleanup for interrupted file harvests; guarantees the
    /// result set for a dataset is never a union of two runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self), fields(pid = %pid))]
    pub async fn delete_file_metadata_by_pid(&self, pid: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_metadata WHERE dataset_pid = ?")
            .bind(pid)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Returns all file-metadata rows for a dataset, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(pid = %pid))]
    pub async fn file_metadata_for_dataset(&self, pid: &str) -> Result<Vec<FileMetadata>> {
        let files = sqlx::query_as::<_, FileMetadata>(
            "SELECT * FROM file_metadata WHERE dataset_pid = ? ORDER BY id",
        )
        .bind(pid)
        .fetch_all(self.db.pool())
        .await?;

        Ok(files)
    }

    // ==================== counts ====================

    /// Returns the number of datasets owned by a repository.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn dataset_count(&self, repo_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dataset WHERE repo_id = ?")
            .bind(repo_id)
            .fetch_one(self.db.pool())
            .await?;

        Ok(row.0)
    }

    /// Returns the number of datasets in a repository with a given
    /// file-harvest status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn dataset_count_by_file_status(
        &self,
        repo_id: i64,
        status: FileHarvestStatus,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM dataset WHERE repo_id = ? AND file_harvest_status = ?",
        )
        .bind(repo_id)
        .bind(status.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.0)
    }

    /// Returns the number of file-metadata rows across a repository's
    /// datasets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn file_metadata_count(&self, repo_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"SELECT COUNT(*)
              FROM file_metadata f
              JOIN dataset d ON f.dataset_pid = d.pid
              WHERE d.repo_id = ?",
        )
        .bind(repo_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.0)
    }
}
