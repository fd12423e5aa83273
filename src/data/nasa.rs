//! NASA Exoplanet Archive client
//!
//! Queries the Kepler `cumulative` KOI table through the archive's TAP sync
//! endpoint (ADQL) and its nstedAPI REST endpoint.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, CACHE_CONTROL, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::{Disposition, KoiRecord, KoiStats, KoiTableRow, StatsSource};

/// Base URL for the archive's synchronous TAP service
pub const DEFAULT_TAP_URL: &str = "https://exoplanetarchive.ipac.caltech.edu/TAP/sync";

/// Base URL for the archive's nstedAPI REST service
pub const DEFAULT_REST_URL: &str =
    "https://exoplanetarchive.ipac.caltech.edu/cgi-bin/nstedAPI/nph-nstedAPI";

const CLIENT_USER_AGENT: &str = concat!("koistats/", env!("CARGO_PKG_VERSION"));

const STATS_QUERY: &str = "SELECT koi_disposition, COUNT(*) as count \
     FROM cumulative \
     WHERE koi_disposition IS NOT NULL \
     GROUP BY koi_disposition";

const CONNECTION_TEST_QUERY: &str = "SELECT COUNT(*) as total FROM cumulative";

const TABLE_INFO_QUERY: &str = "SELECT column_name, description, unit, ucd \
     FROM TAP_SCHEMA.columns \
     WHERE table_name = 'cumulative' \
     ORDER BY column_name";

/// Errors that can occur when querying the archive
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Archive answered with a non-success status
    #[error("HTTP error {status}: {message}")]
    Status { status: u16, message: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One row of the grouped disposition query
#[derive(Debug, Deserialize)]
struct DispositionCount {
    koi_disposition: Option<String>,
    /// The archive returns this as a number, older proxies as a string
    #[serde(default)]
    count: Value,
}

impl DispositionCount {
    fn count(&self) -> u64 {
        match &self.count {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(0),
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// Client for the NASA Exoplanet Archive
#[derive(Debug, Clone)]
pub struct NasaKoiClient {
    http_client: Client,
    tap_url: String,
    rest_url: String,
}

impl Default for NasaKoiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NasaKoiClient {
    /// Creates a new client pointed at the public archive
    pub fn new() -> Self {
        Self {
            http_client: Client::new(),
            tap_url: DEFAULT_TAP_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
        }
    }

    /// Creates a new client with a custom HTTP client (timeouts, proxies)
    pub fn with_client(http_client: Client) -> Self {
        Self {
            http_client,
            ..Self::new()
        }
    }

    /// Overrides the TAP and REST endpoints
    pub fn with_urls(mut self, tap_url: impl Into<String>, rest_url: impl Into<String>) -> Self {
        self.tap_url = tap_url.into();
        self.rest_url = rest_url.into();
        self
    }

    /// Fetches aggregate counts by disposition
    ///
    /// When `force_refresh` is set the request asks intermediaries not to
    /// serve a cached response.
    pub async fn fetch_koi_stats(&self, force_refresh: bool) -> Result<KoiStats, FetchError> {
        tracing::debug!(force_refresh, "querying KOI disposition counts");

        let mut request = self.adql_request(STATS_QUERY);
        if force_refresh {
            request = request.header(CACHE_CONTROL, "no-cache");
        }

        let body = self.send_json(request).await?;
        let rows: Vec<DispositionCount> = decode_rows(body)?;

        Ok(aggregate_stats(&rows))
    }

    /// Fetches a page of KOI details ordered by KOI name
    pub async fn fetch_details(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<KoiRecord>, FetchError> {
        let query = format!(
            "SELECT kepoi_name, koi_disposition, koi_pdisposition, koi_score, \
             koi_period, koi_prad, koi_teq \
             FROM cumulative \
             WHERE kepoi_name IS NOT NULL \
             ORDER BY kepoi_name \
             LIMIT {} OFFSET {}",
            limit, offset
        );

        let body = self.send_json(self.adql_request(&query)).await?;
        decode_rows(body)
    }

    /// Fetches every KOI with a disposition, for table views
    ///
    /// Uses the REST endpoint, which is not subject to the TAP row limit.
    pub async fn fetch_table_data(&self) -> Result<Vec<KoiTableRow>, FetchError> {
        let request = self.http_client.get(&self.rest_url).query(&[
            ("table", "cumulative"),
            ("format", "json"),
            (
                "select",
                "kepoi_name,kepler_name,koi_disposition,koi_period,koi_prad,koi_teq",
            ),
            (
                "where",
                "kepoi_name is not null and koi_disposition is not null",
            ),
            ("order", "kepoi_name"),
        ]);

        let body = self.send_json(request).await?;
        let rows: Vec<KoiTableRow> = decode_rows(body)?;
        tracing::info!(rows = rows.len(), "retrieved KOI table data");
        Ok(rows)
    }

    /// Runs an arbitrary ADQL query and returns the raw rows
    ///
    /// Responses that are not row arrays yield an empty result.
    pub async fn execute_query(&self, query: &str) -> Result<Vec<Value>, FetchError> {
        let query = query.trim();
        tracing::debug!(query, "executing ADQL query");

        let body = self.send_json(self.adql_request(query)).await?;
        Ok(rows_of(body).unwrap_or_default())
    }

    /// Returns the column descriptions of the `cumulative` table
    pub async fn fetch_table_info(&self) -> Result<Vec<Value>, FetchError> {
        self.execute_query(TABLE_INFO_QUERY).await
    }

    /// Checks whether the archive answers a trivial query
    pub async fn test_connection(&self) -> bool {
        let request = self.adql_request(CONNECTION_TEST_QUERY);
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!("archive connection test failed: {}", e);
                false
            }
        }
    }

    fn adql_request(&self, query: &str) -> RequestBuilder {
        self.http_client.get(&self.tap_url).query(&[
            ("REQUEST", "doQuery"),
            ("LANG", "ADQL"),
            ("FORMAT", "json"),
            ("QUERY", query),
        ])
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, FetchError> {
        let response = request
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            };
            return Err(FetchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl StatsSource for NasaKoiClient {
    async fn fetch_stats(&self, force_refresh: bool) -> Result<KoiStats, FetchError> {
        self.fetch_koi_stats(force_refresh).await
    }
}

/// Extracts the row array from a bare array or a `{ "data": [...] }` wrapper
fn rows_of(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(rows) => Some(rows),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => Some(rows),
            _ => None,
        },
        _ => None,
    }
}

fn decode_rows<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, FetchError> {
    let rows = rows_of(body).unwrap_or_default();
    Ok(serde_json::from_value(Value::Array(rows))?)
}

/// Sums disposition counts into a stats record
///
/// Unrecognised dispositions still count toward the total.
fn aggregate_stats(rows: &[DispositionCount]) -> KoiStats {
    let mut stats = KoiStats {
        total: 0,
        confirmed: 0,
        candidates: 0,
        false_positives: 0,
        last_updated: Utc::now(),
    };

    for row in rows {
        let count = row.count();
        stats.total += count;

        match row.koi_disposition.as_deref().and_then(Disposition::from_label) {
            Some(Disposition::Confirmed) => stats.confirmed = count,
            Some(Disposition::Candidate) => stats.candidates = count,
            Some(Disposition::FalsePositive) => stats.false_positives = count,
            None => {}
        }
    }

    stats
}
