//! Dataset harvester: OAI-PMH identifier harvesting for one repository.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::datestamp::parse_optional_datestamp;
use super::error::HarvestError;
use crate::notify::Outbox;
use crate::oai::{OaiClient, OaiRecord};
use crate::pid::normalize_pid;
use crate::store::{MetadataStore, NewDataset, Repository};

/// Record counters for one dataset-harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestCounts {
    /// Records seen on the stream.
    pub processed: u64,
    /// Records skipped (deleted, already present, or absorbed duplicates).
    pub skipped: u64,
    /// New dataset rows inserted.
    pub inserted: u64,
}

impl HarvestCounts {
    fn summary(&self) -> String {
        format!(
            "processed: {}, skipped: {}, inserted: {}",
            self.processed, self.skipped, self.inserted
        )
    }
}

/// Harvests dataset identifiers for one repository via OAI-PMH.
///
/// The run is strictly sequential: one `ListRecords` stream, no internal
/// fan-out. Per-record problems (deleted records, empty identifiers,
/// duplicates) are absorbed and counted; stream-level failures and
/// unrecognized datestamps abort the run and mark the repository `failed`.
pub struct DatasetHarvester {
    store: Arc<dyn MetadataStore>,
    outbox: Outbox,
}

impl DatasetHarvester {
    /// Creates a harvester over the given store boundary and outbox.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, outbox: Outbox) -> Self {
        Self { store, outbox }
    }

    /// Pulls all records from the repository's OAI-PMH endpoint and
    /// persists new datasets.
    ///
    /// Claims the repository (atomically transitioning it to
    /// `in_progress`), streams every page, then marks it `completed` and
    /// emits a best-effort completion notification with the run counters.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::AlreadyInProgress`] when another run owns
    /// the repository, [`HarvestError::Datestamp`] on a fatal datestamp
    /// parse failure, and [`HarvestError::Oai`]/[`HarvestError::Store`]
    /// for stream or store failures. Any abort marks the repository
    /// `failed` before the error propagates.
    #[instrument(skip(self, repo), fields(repo_id = repo.id, url = %repo.url, prefix = %repo.metadata_prefix))]
    pub async fn harvest_identifiers(
        &self,
        repo: &Repository,
    ) -> Result<HarvestCounts, HarvestError> {
        info!(
            url = %repo.url,
            metadata_prefix = %repo.metadata_prefix,
            "starting dataset harvest"
        );

        if !self.store.claim_dataset_harvest(repo.id).await? {
            return Err(HarvestError::AlreadyInProgress { repo_id: repo.id });
        }

        self.outbox.send(
            format!("Dataset harvest for repository {} started", repo.name),
            format!(
                "Dataset harvest for repository {} has started. Check the status later.",
                repo.name
            ),
        );

        match self.run_stream(repo).await {
            Ok(counts) => {
                self.store.complete_dataset_harvest(repo.id).await?;
                info!(
                    processed = counts.processed,
                    skipped = counts.skipped,
                    inserted = counts.inserted,
                    "dataset harvest completed"
                );
                self.outbox.send(
                    format!("Dataset harvest for repository {} completed", repo.name),
                    format!(
                        "Harvest completed for {} with metadataPrefix {}.\n{}",
                        repo.url,
                        repo.metadata_prefix,
                        counts.summary()
                    ),
                );
                Ok(counts)
            }
            Err(error) => {
                // Best-effort: the original error is what callers need to see.
                if let Err(status_error) = self.store.fail_dataset_harvest(repo.id).await {
                    warn!(
                        repo_id = repo.id,
                        error = %status_error,
                        "could not mark repository failed after aborted harvest"
                    );
                }
                self.outbox.send(
                    format!("Dataset harvest for repository {} failed", repo.name),
                    format!(
                        "Dataset harvest for repository {} aborted: {error}",
                        repo.name
                    ),
                );
                Err(error)
            }
        }
    }

    async fn run_stream(&self, repo: &Repository) -> Result<HarvestCounts, HarvestError> {
        let oai = OaiClient::new(&repo.url)?;
        let mut counts = HarvestCounts::default();

        let mut page = oai.list_records(&repo.metadata_prefix).await?;
        loop {
            for record in page.records {
                self.process_record(repo, record, &mut counts).await?;
            }
            match page.resumption_token {
                Some(token) => page = oai.resume(&token).await?,
                None => break,
            }
        }

        Ok(counts)
    }

    async fn process_record(
        &self,
        repo: &Repository,
        record: OaiRecord,
        counts: &mut HarvestCounts,
    ) -> Result<(), HarvestError> {
        counts.processed += 1;

        if record.deleted {
            counts.skipped += 1;
            warn!(identifier = %record.identifier, "skipping deleted record");
            return Ok(());
        }
        if record.identifier.is_empty() {
            warn!("skipping record with empty identifier");
            return Ok(());
        }

        let normalized = normalize_pid(&record.identifier);

        // Unrecognized datestamps are explicit fatal errors, not skips.
        let record_timestamp = parse_optional_datestamp(record.datestamp.as_deref())
            .map_err(|source| HarvestError::Datestamp {
                identifier: record.identifier.clone(),
                source,
            })?;
        let publication_date =
            parse_optional_datestamp(record.first_date()).map_err(|source| {
                HarvestError::Datestamp {
                    identifier: record.identifier.clone(),
                    source,
                }
            })?;

        if self.store.dataset_exists(&normalized.pid, repo.id).await? {
            counts.skipped += 1;
            warn!(
                pid = %normalized.pid,
                repo_id = repo.id,
                "dataset already exists; skipping"
            );
            return Ok(());
        }

        let inserted = self
            .store
            .insert_dataset(&NewDataset {
                repo_id: repo.id,
                pid: normalized.pid,
                pid_protocol: normalized.protocol,
                record_timestamp,
                publication_date,
            })
            .await?;

        if inserted {
            counts.inserted += 1;
        } else {
            // Duplicate absorbed at the store boundary.
            counts.skipped += 1;
        }
        Ok(())
    }
}
