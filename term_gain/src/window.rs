use chrono::NaiveDate;

use crate::{GainError, PricePoint, PriceSeries};

/// Rows of `series` covering one event.
///
/// Starts at the first row dated on or after `start`, takes at most
/// `max_len` rows and never includes a row dated after `cutoff`.
pub fn extract_window(
    series: &PriceSeries,
    start: NaiveDate,
    cutoff: NaiveDate,
    max_len: usize,
    min_len: usize,
) -> Result<&[PricePoint], GainError> {
    let start_idx = series
        .first_on_or_after(start)
        .ok_or(GainError::NoDataAfterStart { start })?;
    let tail = &series.points()[start_idx..];
    let available = tail.partition_point(|p| p.date <= cutoff);
    let len = available.min(max_len);
    if len < min_len {
        return Err(GainError::InsufficientData {
            rows: len,
            min: min_len,
        });
    }
    Ok(&tail[..len])
}

/// Percentage change of each price relative to the first one.
pub fn percent_gains(closes: &[f64]) -> Result<Vec<f64>, GainError> {
    let Some(&base) = closes.first() else {
        return Err(GainError::InsufficientData { rows: 0, min: 1 });
    };
    if !base.is_finite() || base == 0.0 {
        return Err(GainError::InvalidStartPrice(base));
    }
    Ok(closes.iter().map(|p| 100.0 * (p - base) / base).collect())
}
