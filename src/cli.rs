//! Command-line interface parsing for koistats
//!
//! This module handles parsing of CLI arguments using clap. Global options
//! configure the cache and the archive endpoints and can also be supplied
//! through `KOISTATS_*` environment variables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::DEFAULT_TTL_MINUTES;
use crate::data::nasa::{DEFAULT_REST_URL, DEFAULT_TAP_URL};
use crate::export::ExportFormat;
use crate::refresh::DEFAULT_POLL_INTERVAL_SECS;

/// Default HTTP timeout for archive requests in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest accepted TTL: one year
pub const MAX_TTL_MINUTES: u64 = 365 * 24 * 60;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// A TTL outside 1 minute..=1 year
    #[error("Invalid TTL: {0} minutes. The TTL must be between 1 minute and 1 year")]
    InvalidTtl(u64),

    /// A zero interval would poll in a busy loop
    #[error("Invalid interval: {0} seconds. Intervals must be at least 1 second")]
    InvalidInterval(u64),

    /// A zero timeout would fail every request
    #[error("Invalid timeout: {0} seconds. The timeout must be at least 1 second")]
    InvalidTimeout(u64),

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// koistats - Cached NASA Kepler KOI statistics
#[derive(Parser, Debug)]
#[command(name = "koistats")]
#[command(about = "Cached NASA Kepler KOI statistics with background refresh")]
#[command(version)]
pub struct Cli {
    /// Directory for cached statistics (default: XDG cache dir)
    #[arg(long, global = true, env = "KOISTATS_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Minutes a cached value stays fresh
    #[arg(
        long,
        global = true,
        env = "KOISTATS_TTL_MINUTES",
        default_value_t = DEFAULT_TTL_MINUTES as u64
    )]
    pub ttl_minutes: u64,

    /// NASA Exoplanet Archive TAP sync endpoint
    #[arg(long, global = true, env = "KOISTATS_TAP_URL", default_value = DEFAULT_TAP_URL)]
    pub tap_url: String,

    /// NASA Exoplanet Archive nstedAPI REST endpoint
    #[arg(long, global = true, env = "KOISTATS_REST_URL", default_value = DEFAULT_REST_URL)]
    pub rest_url: String,

    /// HTTP timeout for archive requests in seconds
    #[arg(
        long,
        global = true,
        env = "KOISTATS_TIMEOUT_SECS",
        default_value_t = DEFAULT_TIMEOUT_SECS
    )]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print KOI statistics, from cache when fresh
    Stats {
        /// Bypass the cache and fetch from the archive
        #[arg(long)]
        force: bool,

        /// Print the cached value immediately and refresh it if stale
        #[arg(long, conflicts_with = "force")]
        background: bool,
    },
    /// Print cache metadata without fetching
    Info,
    /// Delete the cached statistics
    Clear,
    /// Poll statistics on an interval until interrupted
    Watch {
        /// Seconds between polls
        #[arg(long, env = "KOISTATS_POLL_SECS", default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
        interval_secs: u64,
    },
    /// Print a page of KOI details
    Details {
        /// Rows per page
        #[arg(long, default_value_t = 100)]
        limit: u32,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Print a page of the dispositioned KOI listing
    Table {
        /// Rows per page
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Rows to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Export every dispositioned KOI as CSV or JSON
    Export {
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Run an ADQL query against the archive
    Query {
        /// The ADQL query text
        query: String,
    },
    /// Print the column descriptions of the KOI table
    Columns,
    /// Check that the archive is reachable
    Ping,
}
