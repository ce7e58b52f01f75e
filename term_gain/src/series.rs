//! Price-history loading.
//!
//! Files are CSV with a header row. Header names are trimmed before lookup
//! (exported index histories often carry `" Close"`-style headers). Only the
//! date column and one price column are read; other columns are ignored.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GainError, PricePoint, PriceSeries};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub date_column: String,
    pub price_column: String,
    /// `chrono` format string for the date column.
    pub date_format: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            date_column: "Date".to_string(),
            price_column: "Close".to_string(),
            date_format: "%m/%d/%y".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows: usize,
    pub duplicate_dates: usize,
    pub missing_prices: usize,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LoadedPrices {
    pub series: PriceSeries,
    pub stats: LoadStats,
}

pub fn load_prices(path: &Path, opts: &LoadOptions) -> Result<LoadedPrices, GainError> {
    let file = File::open(path).map_err(|source| GainError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = load_prices_from_reader(file, opts)?;
    debug!(
        "Loaded {} ({} rows, {} duplicate dates dropped)",
        path.display(),
        loaded.series.len(),
        loaded.stats.duplicate_dates
    );
    Ok(loaded)
}

/// Parse price CSV from any reader. Empty price cells load as `NaN`.
pub fn load_prices_from_reader<R: Read>(
    reader: R,
    opts: &LoadOptions,
) -> Result<LoadedPrices, GainError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let columns: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let date_idx = column_index(&columns, &opts.date_column)?;
    let price_idx = column_index(&columns, &opts.price_column)?;

    let mut points = Vec::new();
    let mut missing_prices = 0usize;
    for (i, record) in csv_reader.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let row = i + 2;
        let raw_date = record.get(date_idx).unwrap_or("").trim();
        if raw_date.is_empty() && record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let date = NaiveDate::parse_from_str(raw_date, &opts.date_format).map_err(|_| {
            GainError::ParseField {
                row,
                field: opts.date_column.clone(),
                raw: raw_date.to_string(),
            }
        })?;
        let raw_price = record.get(price_idx).unwrap_or("").trim();
        let close = if raw_price.is_empty() {
            missing_prices += 1;
            f64::NAN
        } else {
            parse_price(raw_price).ok_or_else(|| GainError::ParseField {
                row,
                field: opts.price_column.clone(),
                raw: raw_price.to_string(),
            })?
        };
        points.push(PricePoint { date, close });
    }

    let rows = points.len();
    let series = PriceSeries::from_points(points);
    Ok(LoadedPrices {
        stats: LoadStats {
            rows,
            duplicate_dates: rows - series.len(),
            missing_prices,
            columns,
        },
        series,
    })
}

fn column_index(columns: &[String], wanted: &str) -> Result<usize, GainError> {
    columns
        .iter()
        .position(|c| c == wanted)
        .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(wanted)))
        .ok_or_else(|| GainError::MissingColumn(wanted.to_string()))
}

fn parse_price(raw: &str) -> Option<f64> {
    if raw.contains(',') {
        raw.replace(',', "").parse().ok()
    } else {
        raw.parse().ok()
    }
}
