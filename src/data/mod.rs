//! Core data models for KOI statistics
//!
//! This module contains the types returned by the NASA Exoplanet Archive
//! and the `StatsSource` seam the statistics cache fetches through.

pub mod nasa;

pub use nasa::{FetchError, NasaKoiClient};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate KOI counts by disposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KoiStats {
    /// Number of KOIs with any disposition
    #[serde(alias = "totalKOI")]
    pub total: u64,
    /// KOIs dispositioned CONFIRMED
    pub confirmed: u64,
    /// KOIs dispositioned CANDIDATE
    pub candidates: u64,
    /// KOIs dispositioned FALSE POSITIVE
    pub false_positives: u64,
    /// When the remote source produced these counts
    pub last_updated: DateTime<Utc>,
}

/// Classification label assigned to a KOI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    #[serde(rename = "CONFIRMED")]
    Confirmed,
    #[serde(rename = "CANDIDATE")]
    Candidate,
    #[serde(rename = "FALSE POSITIVE")]
    FalsePositive,
}

impl Disposition {
    /// Parses an archive disposition label, ignoring case and surrounding whitespace
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "CONFIRMED" => Some(Disposition::Confirmed),
            "CANDIDATE" => Some(Disposition::Candidate),
            "FALSE POSITIVE" => Some(Disposition::FalsePositive),
            _ => None,
        }
    }

    /// Returns the label used by the archive
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Confirmed => "CONFIRMED",
            Disposition::Candidate => "CANDIDATE",
            Disposition::FalsePositive => "FALSE POSITIVE",
        }
    }
}

/// A KOI row from the paginated details query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoiRecord {
    pub kepoi_name: String,
    pub koi_disposition: Option<String>,
    pub koi_pdisposition: Option<String>,
    pub koi_score: Option<f64>,
    /// Orbital period in days
    pub koi_period: Option<f64>,
    /// Planetary radius in Earth radii
    pub koi_prad: Option<f64>,
    /// Equilibrium temperature in K
    pub koi_teq: Option<f64>,
}

/// A KOI row from the full table listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoiTableRow {
    pub kepoi_name: String,
    /// Kepler name, present once a KOI is confirmed
    #[serde(default)]
    pub kepler_name: Option<String>,
    pub koi_disposition: Option<String>,
    pub koi_period: Option<f64>,
    pub koi_prad: Option<f64>,
    pub koi_teq: Option<f64>,
}

/// Remote source of aggregate KOI statistics
///
/// `force_refresh` is a hint passed through to the remote layer so that any
/// caching there can be bypassed as well.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self, force_refresh: bool) -> Result<KoiStats, FetchError>;
}
