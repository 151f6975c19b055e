use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown setting: {0}")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for setting {key}")]
    InvalidValue { key: String, value: String },
}

/// Tunable thresholds and point awards. Every field can be overridden from a
/// JSON file, the store's config table or the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub points_per_report: u32,
    pub points_per_verified: u32,
    pub points_per_resolved: u32,
    /// Text similarity a combined-evidence match must exceed.
    pub duplicate_threshold: f64,
    pub geo_radius_meters: f64,
    /// Hamming distance at or below which two photos count as the same image.
    pub image_hash_threshold: u32,
    /// Hamming distance below which a photo is similar enough to need geo and text corroboration.
    pub loose_image_hash_threshold: u32,
    pub spam_report_limit: usize,
    pub spam_time_window_minutes: i64,
    pub spam_duplicate_ratio: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            points_per_report: 10,
            points_per_verified: 5,
            points_per_resolved: 20,
            duplicate_threshold: 0.55,
            geo_radius_meters: 200.0,
            image_hash_threshold: 2,
            loose_image_hash_threshold: 10,
            spam_report_limit: 10,
            spam_time_window_minutes: 10,
            spam_duplicate_ratio: 0.6,
        }
    }
}

impl Settings {
    pub const KEYS: [&'static str; 10] = [
        "points_per_report",
        "points_per_verified",
        "points_per_resolved",
        "duplicate_threshold",
        "geo_radius_meters",
        "image_hash_threshold",
        "loose_image_hash_threshold",
        "spam_report_limit",
        "spam_time_window_minutes",
        "spam_duplicate_ratio",
    ];

    /// Load settings from a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engines cannot use.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check(
            "duplicate_threshold",
            self.duplicate_threshold,
            in_unit_interval(self.duplicate_threshold),
        )?;
        check(
            "geo_radius_meters",
            self.geo_radius_meters,
            self.geo_radius_meters.is_finite() && self.geo_radius_meters >= 0.0,
        )?;
        check(
            "spam_duplicate_ratio",
            self.spam_duplicate_ratio,
            in_unit_interval(self.spam_duplicate_ratio),
        )?;
        // the window must fit in a chrono::Duration
        check(
            "spam_time_window_minutes",
            self.spam_time_window_minutes,
            self.spam_time_window_minutes >= 0
                && Duration::try_minutes(self.spam_time_window_minutes).is_some(),
        )?;
        Ok(())
    }

    /// Flatten into key/value pairs for the config table.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("points_per_report", self.points_per_report.to_string()),
            ("points_per_verified", self.points_per_verified.to_string()),
            ("points_per_resolved", self.points_per_resolved.to_string()),
            ("duplicate_threshold", self.duplicate_threshold.to_string()),
            ("geo_radius_meters", self.geo_radius_meters.to_string()),
            ("image_hash_threshold", self.image_hash_threshold.to_string()),
            (
                "loose_image_hash_threshold",
                self.loose_image_hash_threshold.to_string(),
            ),
            ("spam_report_limit", self.spam_report_limit.to_string()),
            (
                "spam_time_window_minutes",
                self.spam_time_window_minutes.to_string(),
            ),
            ("spam_duplicate_ratio", self.spam_duplicate_ratio.to_string()),
        ]
    }

    /// Override a single setting from its string form. On error nothing changes.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = || SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let raw = value.trim();

        let mut updated = self.clone();
        match key {
            "points_per_report" => updated.points_per_report = raw.parse().map_err(|_| invalid())?,
            "points_per_verified" => {
                updated.points_per_verified = raw.parse().map_err(|_| invalid())?
            }
            "points_per_resolved" => {
                updated.points_per_resolved = raw.parse().map_err(|_| invalid())?
            }
            "duplicate_threshold" => {
                updated.duplicate_threshold = raw.parse().map_err(|_| invalid())?
            }
            "geo_radius_meters" => updated.geo_radius_meters = raw.parse().map_err(|_| invalid())?,
            "image_hash_threshold" => {
                updated.image_hash_threshold = raw.parse().map_err(|_| invalid())?
            }
            "loose_image_hash_threshold" => {
                updated.loose_image_hash_threshold = raw.parse().map_err(|_| invalid())?
            }
            "spam_report_limit" => updated.spam_report_limit = raw.parse().map_err(|_| invalid())?,
            "spam_time_window_minutes" => {
                updated.spam_time_window_minutes = raw.parse().map_err(|_| invalid())?
            }
            "spam_duplicate_ratio" => {
                updated.spam_duplicate_ratio = raw.parse().map_err(|_| invalid())?
            }
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn in_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn check(key: &str, value: impl ToString, ok: bool) -> Result<(), SettingsError> {
    if ok {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
