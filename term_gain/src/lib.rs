//! Percentage gain of an index over the first trading days of a term.
//!
//! The pipeline is linear: [`series`] loads a price table, [`window`] cuts the
//! per-event price window and turns it into a gain series, [`placement`]
//! picks where each series gets its portrait, and [`portrait`] builds the
//! bordered circular image drawn there.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod colors;
pub mod config;
pub mod placement;
pub mod portrait;
pub mod series;
pub mod window;

pub use colors::{palette_color, parse_color};
pub use config::{DatasetConfig, StudyConfig};
pub use placement::{choose_placements, Placement, PlacementKind, Placer};
pub use portrait::{circular_portrait, circular_portrait_from_image, overlay_size, MAX_OVERLAY_SIZE};
pub use series::{load_prices, load_prices_from_reader, LoadOptions, LoadStats, LoadedPrices};
pub use window::{extract_window, percent_gains};

#[derive(Error, Debug)]
pub enum GainError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(String),
    #[error("row {row}: cannot parse {field} from '{raw}'")]
    ParseField {
        row: usize,
        field: String,
        raw: String,
    },
    #[error("no price data on or after {start}")]
    NoDataAfterStart { start: NaiveDate },
    #[error("not enough data: {rows} rows, need at least {min}")]
    InsufficientData { rows: usize, min: usize },
    #[error("invalid starting price {0}")]
    InvalidStartPrice(f64),
    #[error("image not found: {}", .0.display())]
    MissingAsset(PathBuf),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid colour '{0}'")]
    InvalidColor(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse grouping of [`GainError`] used when reporting skipped events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    DataNotFound,
    MissingAsset,
    Computation,
    Input,
}

impl GainError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GainError::NoDataAfterStart { .. } | GainError::InsufficientData { .. } => {
                ErrorCategory::DataNotFound
            }
            GainError::MissingAsset(_) => ErrorCategory::MissingAsset,
            GainError::InvalidStartPrice(_) => ErrorCategory::Computation,
            _ => ErrorCategory::Input,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Anchor at the last index of each series.
    Last,
    /// Rejection-sample an interior index per series.
    Random,
}

impl Default for PlacementMode {
    fn default() -> Self {
        PlacementMode::Last
    }
}

/// What to do when random placement finds no free spot.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    Last,
    Skip,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Last
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementParams {
    pub mode: PlacementMode,
    pub attempts: usize,
    /// Sampled indices stay within `[edge_margin, N - edge_margin]`.
    pub edge_margin: usize,
    pub min_index_gap: f64,
    pub min_value_gap: f64,
    pub fallback: FallbackPolicy,
    pub seed: Option<u64>,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self {
            mode: PlacementMode::Last,
            attempts: 50,
            edge_margin: 5,
            min_index_gap: 20.0,
            min_value_gap: 2.0,
            fallback: FallbackPolicy::Last,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayParams {
    pub diameter: u32,
    pub border: u32,
}

impl Default for OverlayParams {
    fn default() -> Self {
        Self {
            diameter: 40,
            border: 3,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Params {
    pub cutoff: NaiveDate,
    pub max_window: usize,
    pub min_window: usize,
    pub overlay: OverlayParams,
    pub placement: PlacementParams,
}

impl Params {
    pub fn new(cutoff: NaiveDate) -> Self {
        Self {
            cutoff,
            max_window: 200,
            min_window: 5,
            overlay: OverlayParams::default(),
            placement: PlacementParams::default(),
        }
    }

    pub fn validate(&self) -> Result<(), GainError> {
        if self.min_window == 0 {
            return Err(GainError::Config("min_window must be at least 1".into()));
        }
        if self.max_window < self.min_window {
            return Err(GainError::Config(format!(
                "max_window ({}) is smaller than min_window ({})",
                self.max_window, self.min_window
            )));
        }
        if self.placement.attempts == 0 {
            return Err(GainError::Config("placement attempts must be at least 1".into()));
        }
        overlay_size(self.overlay.diameter, self.overlay.border)?;
        if self.placement.min_index_gap < 0.0 || self.placement.min_value_gap < 0.0 {
            return Err(GainError::Config("placement gaps must be non-negative".into()));
        }
        Ok(())
    }
}

/// One closing price on one trading day.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// Closing prices sorted by date, one row per date.
#[derive(Clone, Debug, Default)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Sorts by date and keeps the first row of any repeated date.
    pub fn from_points(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Index of the first row dated on or after `date`.
    pub fn first_on_or_after(&self, date: NaiveDate) -> Option<usize> {
        let idx = self.points.partition_point(|p| p.date < date);
        (idx < self.points.len()).then_some(idx)
    }
}

/// A term start: who, when, and how to draw it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub label: String,
    pub start: NaiveDate,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Gain trajectory of one event; `gains[0]` is always `0.0`.
#[derive(Clone, Debug, Serialize)]
pub struct EventGain {
    pub event: Event,
    pub dates: Vec<NaiveDate>,
    pub closes: Vec<f64>,
    pub gains: Vec<f64>,
}

impl EventGain {
    pub fn label(&self) -> &str {
        &self.event.label
    }

    /// Gain on the last priced day of the window. Trailing days without a
    /// close are passed over, so any window from [`compute_event`] has one.
    pub fn final_gain(&self) -> Option<f64> {
        self.gains.iter().rev().copied().find(|g| g.is_finite())
    }
}

#[derive(Debug)]
pub struct SkippedEvent {
    pub event: Event,
    pub error: GainError,
}

#[derive(Debug)]
pub enum EventOutcome {
    Computed(EventGain),
    Skipped(SkippedEvent),
}

/// Outcomes split into what gets drawn and what gets reported.
#[derive(Debug, Default)]
pub struct GainReport {
    pub computed: Vec<EventGain>,
    pub skipped: Vec<SkippedEvent>,
}

impl GainReport {
    pub fn from_outcomes(outcomes: Vec<EventOutcome>) -> Self {
        let mut report = GainReport::default();
        for outcome in outcomes {
            match outcome {
                EventOutcome::Computed(gain) => report.computed.push(gain),
                EventOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }
        report
    }

    /// `(computed index, final gain)` pairs in event order, one per bar.
    pub fn final_gains(&self) -> Vec<(usize, f64)> {
        self.computed
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.final_gain().map(|v| (i, v)))
            .collect()
    }
}

/// Compute the gain window of a single event.
pub fn compute_event(
    series: &PriceSeries,
    event: &Event,
    params: &Params,
) -> Result<EventGain, GainError> {
    let window = extract_window(
        series,
        event.start,
        params.cutoff,
        params.max_window,
        params.min_window,
    )?;
    let closes: Vec<f64> = window.iter().map(|p| p.close).collect();
    let gains = percent_gains(&closes)?;
    Ok(EventGain {
        event: event.clone(),
        dates: window.iter().map(|p| p.date).collect(),
        closes,
        gains,
    })
}

/// Compute every event in order; failures become [`EventOutcome::Skipped`].
pub fn compute_event_gains(
    series: &PriceSeries,
    events: &[Event],
    params: &Params,
) -> Vec<EventOutcome> {
    events
        .iter()
        .map(|event| match compute_event(series, event, params) {
            Ok(gain) => EventOutcome::Computed(gain),
            Err(error) => EventOutcome::Skipped(SkippedEvent {
                event: event.clone(),
                error,
            }),
        })
        .collect()
}
