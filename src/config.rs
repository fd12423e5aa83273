//! Runtime configuration derived from CLI arguments
//!
//! Validates the parsed arguments and wires up the archive client, the
//! durable store and the statistics cache.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{FileStore, StatsCache, SystemClock, DEFAULT_TTL_MINUTES};
use crate::cli::{Cli, CliError, Command, DEFAULT_TIMEOUT_SECS, MAX_TTL_MINUTES};
use crate::data::nasa::{DEFAULT_REST_URL, DEFAULT_TAP_URL};
use crate::data::NasaKoiClient;
use crate::refresh::RefreshConfig;

/// Configuration for a koistats run
#[derive(Debug, Clone)]
pub struct Config {
    /// How long cached statistics stay fresh
    pub ttl: chrono::Duration,
    /// Explicit cache directory, `None` for the XDG default
    pub cache_dir: Option<PathBuf>,
    /// TAP sync endpoint
    pub tap_url: String,
    /// nstedAPI REST endpoint
    pub rest_url: String,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Polling settings for `watch`
    pub refresh: RefreshConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::minutes(DEFAULT_TTL_MINUTES),
            cache_dir: None,
            tap_url: DEFAULT_TAP_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            refresh: RefreshConfig::default(),
        }
    }
}

impl Config {
    /// Creates a Config from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(Config)` with validated settings
    /// * `Err(CliError)` if the TTL is outside 1 minute..=1 year, or the
    ///   timeout or poll interval is zero
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let ttl = ttl_from_minutes(cli.ttl_minutes)?;
        if cli.timeout_secs == 0 {
            return Err(CliError::InvalidTimeout(cli.timeout_secs));
        }

        let mut refresh = RefreshConfig::default();
        if let Command::Watch { interval_secs } = cli.command {
            if interval_secs == 0 {
                return Err(CliError::InvalidInterval(interval_secs));
            }
            refresh.interval = Duration::from_secs(interval_secs);
        }

        Ok(Config {
            ttl,
            cache_dir: cli.cache_dir.clone(),
            tap_url: cli.tap_url.clone(),
            rest_url: cli.rest_url.clone(),
            http_timeout: Duration::from_secs(cli.timeout_secs),
            refresh,
        })
    }

    /// Builds the durable store for this configuration
    pub fn store(&self) -> FileStore {
        match &self.cache_dir {
            Some(dir) => FileStore::with_dir(dir.clone()),
            None => FileStore::new(),
        }
    }

    /// Builds the archive client with the configured timeout and endpoints
    pub fn client(&self) -> Result<NasaKoiClient, CliError> {
        let http_client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()?;

        Ok(NasaKoiClient::with_client(http_client).with_urls(&self.tap_url, &self.rest_url))
    }

    /// Builds a statistics cache fetching through `client`
    pub fn stats_cache(&self, client: NasaKoiClient) -> StatsCache {
        StatsCache::new(
            Arc::new(self.store()),
            Arc::new(client),
            Arc::new(SystemClock),
            self.ttl,
        )
    }
}

fn ttl_from_minutes(minutes: u64) -> Result<chrono::Duration, CliError> {
    if minutes == 0 || minutes > MAX_TTL_MINUTES {
        return Err(CliError::InvalidTtl(minutes));
    }
    i64::try_from(minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or(CliError::InvalidTtl(minutes))
}
