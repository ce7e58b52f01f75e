//! Study configuration loaded from JSON.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Event, GainError, LoadOptions, OverlayParams, Params, PlacementParams};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DatasetConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub title: Option<String>,
}

impl DatasetConfig {
    /// Dataset named after the file stem, e.g. `sp500.csv` → `sp500`.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("prices")
            .to_string();
        Self {
            name,
            path: path.to_path_buf(),
            title: None,
        }
    }

    /// File-name friendly form of the dataset name.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.name.len());
        for ch in self.name.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
            } else if !slug.ends_with('_') {
                slug.push('_');
            }
        }
        let slug = slug.trim_matches('_');
        if slug.is_empty() {
            "prices".to_string()
        } else {
            slug.to_string()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default)]
    pub cutoff: Option<NaiveDate>,
    #[serde(default = "default_price_column")]
    pub price_column: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_max_window")]
    pub max_window: usize,
    #[serde(default = "default_min_window")]
    pub min_window: usize,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    pub events: Vec<Event>,
    #[serde(default)]
    pub overlay: OverlayParams,
    #[serde(default)]
    pub placement: PlacementParams,
}

fn default_price_column() -> String {
    LoadOptions::default().price_column
}

fn default_date_format() -> String {
    LoadOptions::default().date_format
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_max_window() -> usize {
    200
}

fn default_min_window() -> usize {
    5
}

impl StudyConfig {
    pub fn from_json(text: &str) -> Result<Self, GainError> {
        serde_json::from_str(text).map_err(|e| GainError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, GainError> {
        let text = fs::read_to_string(path).map_err(|source| GainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            price_column: self.price_column.clone(),
            date_format: self.date_format.clone(),
            ..LoadOptions::default()
        }
    }

    /// Computation parameters; `today` stands in for a missing cutoff.
    pub fn params(&self, today: NaiveDate) -> Params {
        Params {
            cutoff: self.cutoff.unwrap_or(today),
            max_window: self.max_window,
            min_window: self.min_window,
            overlay: self.overlay.clone(),
            placement: self.placement.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), GainError> {
        if self.events.is_empty() {
            return Err(GainError::Config("no events configured".into()));
        }
        let mut seen = HashSet::new();
        for event in &self.events {
            if !seen.insert(event.label.as_str()) {
                return Err(GainError::Config(format!(
                    "duplicate event label '{}'",
                    event.label
                )));
            }
            if let Some(color) = event.color.as_deref() {
                crate::parse_color(color)?;
            }
        }
        Ok(())
    }
}
