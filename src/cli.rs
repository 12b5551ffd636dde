//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use harvester_core::DEFAULT_FILE_HARVEST_CONCURRENCY;

/// Harvest dataset and file metadata from scholarly data repositories.
///
/// The harvester pulls dataset identifiers from OAI-PMH endpoints,
/// resolves each dataset's file listing, and persists the results for
/// later aggregate querying.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the SQLite database file
    #[arg(long, default_value = "harvester.db", global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register a repository for harvesting
    AddRepo {
        /// Human-readable repository name
        #[arg(long)]
        name: String,

        /// OAI-PMH base URL
        #[arg(long)]
        url: String,

        /// Metadata prefix passed to ListRecords
        #[arg(long)]
        metadata_prefix: String,
    },

    /// Harvest dataset identifiers for a repository via OAI-PMH
    HarvestDatasets {
        /// Repository id (see `harvester status`)
        #[arg(long)]
        repo_id: i64,
    },

    /// Harvest file metadata for every eligible dataset of a repository
    HarvestFiles {
        /// Repository id (see `harvester status`)
        #[arg(long)]
        repo_id: i64,

        /// Base URL of the file-listing boundary
        #[arg(long)]
        file_listing_url: String,

        /// Maximum concurrent per-dataset fetches (1-100)
        #[arg(short = 'c', long, default_value_t = DEFAULT_FILE_HARVEST_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
        concurrency: u8,
    },

    /// Resolve a persistent identifier to its share file listing
    Resolve {
        /// DOI or URL to resolve
        identifier: String,
    },

    /// Show harvest status for all repositories
    Status,
}
