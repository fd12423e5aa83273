//! Export and pagination of the KOI table listing
//!
//! Renders `KoiTableRow`s as CSV or as a JSON envelope, and slices the full
//! listing into pages for the `table` command.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::KoiTableRow;

/// CSV header, in the column order of `KoiTableRow`
const CSV_HEADER: &str = "kepoi_name,kepler_name,koi_disposition,koi_period,koi_prad,koi_teq";

/// Errors raised while exporting
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV needs at least one row
    #[error("No data available to export")]
    NoData,

    #[error("Failed to serialize export: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write export to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Output format for `export`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// JSON export envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonExport<'a> {
    pub count: usize,
    pub data: &'a [KoiTableRow],
    pub exported_at: DateTime<Utc>,
}

/// Pagination metadata of a `TablePage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    /// Rows in the full listing, before slicing
    pub total: usize,
}

/// One page of the KOI table listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePage<'a> {
    pub count: usize,
    pub data: &'a [KoiTableRow],
    pub pagination: Pagination,
    pub fetched_at: DateTime<Utc>,
}

/// Slices `rows[offset..offset + limit]`, clamped to the listing
pub fn paginate(
    rows: &[KoiTableRow],
    limit: usize,
    offset: usize,
    fetched_at: DateTime<Utc>,
) -> TablePage<'_> {
    let start = offset.min(rows.len());
    let end = start.saturating_add(limit).min(rows.len());
    let data = &rows[start..end];

    TablePage {
        count: data.len(),
        data,
        pagination: Pagination {
            limit,
            offset,
            total: rows.len(),
        },
        fetched_at,
    }
}

/// Quotes a cell containing a comma, quote or newline, doubling inner quotes
pub fn escape_csv_field(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn number_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Renders rows as CSV with a header line; missing values become empty cells
pub fn to_csv(rows: &[KoiTableRow]) -> Result<String, ExportError> {
    if rows.is_empty() {
        return Err(ExportError::NoData);
    }

    let mut csv = String::from(CSV_HEADER);
    for row in rows {
        let cells = [
            escape_csv_field(&row.kepoi_name),
            escape_csv_field(row.kepler_name.as_deref().unwrap_or_default()),
            escape_csv_field(row.koi_disposition.as_deref().unwrap_or_default()),
            number_cell(row.koi_period),
            number_cell(row.koi_prad),
            number_cell(row.koi_teq),
        ];
        csv.push('\n');
        csv.push_str(&cells.join(","));
    }
    Ok(csv)
}

/// Renders rows as a pretty-printed JSON envelope
pub fn to_json(rows: &[KoiTableRow], exported_at: DateTime<Utc>) -> Result<String, ExportError> {
    let envelope = JsonExport {
        count: rows.len(),
        data: rows,
        exported_at,
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Renders rows in `format`
pub fn render(
    rows: &[KoiTableRow],
    format: ExportFormat,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Json => to_json(rows, exported_at),
    }
}

/// Writes an export to `path`, creating parent directories as needed
pub fn write_to(path: &Path, content: &str) -> Result<(), ExportError> {
    let io_error = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    fs::write(path, content).map_err(io_error)?;

    tracing::info!(path = %path.display(), bytes = content.len(), "wrote KOI export");
    Ok(())
}
