use crate::core::settings::Settings;
use crate::database::models::Report;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Score at or above which a new report is flagged.
pub const SPAM_FLAG_SCORE: u32 = 3;

const RATE_PENALTY: u32 = 2;
const DUPLICATE_PENALTY: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpamPolicy {
    pub time_window: Duration,
    pub report_limit: usize,
    pub duplicate_ratio: f64,
}

impl Default for SpamPolicy {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SpamPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            // validated settings always fit; an unchecked struct saturates
            time_window: Duration::try_minutes(settings.spam_time_window_minutes)
                .unwrap_or(Duration::MAX),
            report_limit: settings.spam_report_limit,
            duplicate_ratio: settings.spam_duplicate_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpamAssessment {
    pub recent_count: usize,
    pub duplicate_ratio: f64,
    pub score: u32,
    pub flagged: bool,
}

impl SpamPolicy {
    /// Score a reporter from their reports made before the one being submitted.
    pub fn assess(&self, prior_reports: &[Report], now: DateTime<Utc>) -> SpamAssessment {
        let recent_count = prior_reports
            .iter()
            .filter(|report| now.signed_duration_since(report.created_at) < self.time_window)
            .count();

        let duplicate_count = prior_reports
            .iter()
            .filter(|report| report.duplicate_of.is_some())
            .count();
        let duplicate_ratio = if prior_reports.is_empty() {
            0.0
        } else {
            duplicate_count as f64 / prior_reports.len() as f64
        };

        let mut score = 0;
        if recent_count > self.report_limit {
            score += RATE_PENALTY;
        }
        if duplicate_ratio > self.duplicate_ratio {
            score += DUPLICATE_PENALTY;
        }

        SpamAssessment {
            recent_count,
            duplicate_ratio,
            score,
            flagged: score >= SPAM_FLAG_SCORE,
        }
    }
}
