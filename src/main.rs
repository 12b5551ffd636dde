//! CLI entry point for the harvester tool.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use harvester_core::{
    Database, DatasetHarvester, FileListClient, FileMetadataHarvester, LogNotifier, MetadataStore,
    Outbox, ShareResolver, Store,
};
use harvester_core::store::{FileHarvestStatus, NewRepository};
use tracing::debug;

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let db = Database::new(&args.db).await?;
    let store = Arc::new(Store::new(db));
    let (outbox, outbox_handle) = Outbox::spawn(Arc::new(LogNotifier));

    let outcome = run_command(args.command, &store, &outbox).await;

    // Flush pending notifications before exit.
    drop(outbox);
    let _ = outbox_handle.await;

    outcome
}

async fn run_command(command: Command, store: &Arc<Store>, outbox: &Outbox) -> Result<()> {
    match command {
        Command::AddRepo {
            name,
            url,
            metadata_prefix,
        } => {
            let repo_id = store
                .insert_repository(&NewRepository {
                    name: name.clone(),
                    url,
                    metadata_prefix,
                })
                .await
                .context("failed to add repository")?;
            println!("Added repository '{name}' with id {repo_id}");
            Ok(())
        }

        Command::HarvestDatasets { repo_id } => {
            let repo = store
                .get_repository(repo_id)
                .await?
                .with_context(|| format!("repository {repo_id} not found"))?;

            let boundary: Arc<dyn MetadataStore> = store.clone();
            let harvester = DatasetHarvester::new(boundary, outbox.clone());
            let counts = harvester.harvest_identifiers(&repo).await?;

            println!(
                "Dataset harvest for '{}' completed: processed {}, skipped {}, inserted {}",
                repo.name, counts.processed, counts.skipped, counts.inserted
            );
            Ok(())
        }

        Command::HarvestFiles {
            repo_id,
            file_listing_url,
            concurrency,
        } => {
            let repo = store
                .get_repository(repo_id)
                .await?
                .with_context(|| format!("repository {repo_id} not found"))?;

            let client = FileListClient::new(file_listing_url)?;
            let boundary: Arc<dyn MetadataStore> = store.clone();
            let harvester = FileMetadataHarvester::with_concurrency(
                boundary,
                client,
                outbox.clone(),
                usize::from(concurrency),
            )?;
            harvester.harvest_file_metadata(&repo).await?;

            println!("File metadata harvest for '{}' finished", repo.name);
            Ok(())
        }

        Command::Resolve { identifier } => {
            let resolver = ShareResolver::new()?;
            match resolver.resolve(&identifier).await {
                Some(files) => {
                    println!("{}", serde_json::to_string_pretty(&files)?);
                    Ok(())
                }
                None => bail!("identifier not resolvable: {identifier}"),
            }
        }

        Command::Status => {
            let repos = store.list_repositories().await?;
            if repos.is_empty() {
                println!("No repositories registered. Use `harvester add-repo` first.");
                return Ok(());
            }
            for repo in repos {
                let datasets = store.dataset_count(repo.id).await?;
                let completed = store
                    .dataset_count_by_file_status(repo.id, FileHarvestStatus::Completed)
                    .await?;
                let files = store.file_metadata_count(repo.id).await?;
                println!(
                    "[{}] {} ({} / {}): harvest {}, datasets {}, file harvests completed {}, file rows {}",
                    repo.id,
                    repo.name,
                    repo.url,
                    repo.metadata_prefix,
                    repo.harvest_status(),
                    datasets,
                    completed,
                    files
                );
            }
            Ok(())
        }
    }
}
