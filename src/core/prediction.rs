use crate::database::models::{Category, Report, ReportStatus};
use serde::{Deserialize, Serialize};

/// Estimate returned when a category has no resolved history.
pub const DEFAULT_PREDICTION_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn for_sample_size(sample_size: usize) -> Self {
        match sample_size {
            n if n > 10 => Confidence::High,
            n if n > 5 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionEstimate {
    pub category: Category,
    pub prediction_hours: i64,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub confidence: Confidence,
    pub sample_size: usize,
}

/// Predict how long a new report in `category` will take to resolve from the
/// resolution times of past reports.
pub fn estimate_resolution_time(reports: &[Report], category: Category) -> ResolutionEstimate {
    let hours: Vec<i64> = reports
        .iter()
        .filter(|r| r.category == category && r.status == ReportStatus::Resolved)
        .filter_map(|r| r.resolution_time_hours)
        .collect();

    let (Some(&min), Some(&max)) = (hours.iter().min(), hours.iter().max()) else {
        return ResolutionEstimate {
            category,
            prediction_hours: DEFAULT_PREDICTION_HOURS,
            min: None,
            max: None,
            confidence: Confidence::Low,
            sample_size: 0,
        };
    };

    let mean = hours.iter().sum::<i64>() as f64 / hours.len() as f64;

    ResolutionEstimate {
        category,
        prediction_hours: mean.round() as i64,
        min: Some(min),
        max: Some(max),
        confidence: Confidence::for_sample_size(hours.len()),
        sample_size: hours.len(),
    }
}
