//! Data-store seam consumed by the harvesters.
//!
//! This trait keeps the concrete `Store` APIs intact while letting the
//! harvest orchestration depend on an opaque data-access boundary.

use async_trait::async_trait;

use super::{Dataset, FileMetadata, NewDataset, NewFileMetadata, Repository, Result, Store};

/// Data-access contract for harvest operations.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Looks up a repository by id.
    async fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>>;

    /// Atomically claims a repository for a dataset-harvest run.
    async fn claim_dataset_harvest(&self, repo_id: i64) -> Result<bool>;

    /// Marks a repository's dataset harvest as completed.
    async fn complete_dataset_harvest(&self, repo_id: i64) -> Result<()>;

    /// Marks a repository's dataset harvest as failed.
    async fn fail_dataset_harvest(&self, repo_id: i64) -> Result<()>;

    /// Checks whether a dataset exists for (pid, repository).
    async fn dataset_exists(&self, pid: &str, repo_id: i64) -> Result<bool>;

    /// Inserts a new dataset; returns false when a constraint violation was
    /// absorbed at the boundary.
    async fn insert_dataset(&self, dataset: &NewDataset) -> Result<bool>;

    /// Returns all datasets owned by a repository.
    async fn datasets_for_repository(&self, repo_id: i64) -> Result<Vec<Dataset>>;

    /// Atomically claims a dataset for a file-harvest fetch.
    async fn claim_file_harvest(&self, pid: &str) -> Result<bool>;

    /// Marks a dataset's file harvest as completed.
    async fn complete_file_harvest(&self, pid: &str) -> Result<()>;

    /// Inserts a new file-metadata row.
    async fn insert_file_metadata(&self, file: &NewFileMetadata) -> Result<()>;

    /// Deletes all file-metadata rows for a dataset pid.
    async fn delete_file_metadata_by_pid(&self, pid: &str) -> Result<u64>;

    /// Returns all file-metadata rows for a dataset.
    async fn file_metadata_for_dataset(&self, pid: &str) -> Result<Vec<FileMetadata>>;
}

#[async_trait]
impl MetadataStore for Store {
    async fn get_repository(&self, repo_id: i64) -> Result<Option<Repository>> {
        Store::get_repository(self, repo_id).await
    }

    async fn claim_dataset_harvest(&self, repo_id: i64) -> Result<bool> {
        Store::claim_dataset_harvest(self, repo_id).await
    }

    async fn complete_dataset_harvest(&self, repo_id: i64) -> Result<()> {
        Store::complete_dataset_harvest(self, repo_id).await
    }

    async fn fail_dataset_harvest(&self, repo_id: i64) -> Result<()> {
        Store::fail_dataset_harvest(self, repo_id).await
    }

    async fn dataset_exists(&self, pid: &str, repo_id: i64) -> Result<bool> {
        Store::dataset_exists(self, pid, repo_id).await
    }

    async fn insert_dataset(&self, dataset: &NewDataset) -> Result<bool> {
        Store::insert_dataset(self, dataset).await
    }

    async fn datasets_for_repository(&self, repo_id: i64) -> Result<Vec<Dataset>> {
        Store::datasets_for_repository(self, repo_id).await
    }

    async fn claim_file_harvest(&self, pid: &str) -> Result<bool> {
        Store::claim_file_harvest(self, pid).await
    }

    async fn complete_file_harvest(&self, pid: &str) -> Result<()> {
        Store::complete_file_harvest(self, pid).await
    }

    async fn insert_file_metadata(&self, file: &NewFileMetadata) -> Result<()> {
        Store::insert_file_metadata(self, file).await
    }

    async fn delete_file_metadata_by_pid(&self, pid: &str) -> Result<u64> {
        Store::delete_file_metadata_by_pid(self, pid).await
    }

    async fn file_metadata_for_dataset(&self, pid: &str) -> Result<Vec<FileMetadata>> {
        Store::file_metadata_for_dataset(self, pid).await
    }
}
