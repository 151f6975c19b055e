// Report status state machine.
//
// ```text
// pending ──► verified ──► in-progress ──► resolved
//    │            └──────────────────────────▲
//    ├──► rejected
//    └──► duplicate
// ```
//
// `resolved`, `rejected` and `duplicate` are terminal. Each transition stamps
// its timestamp and actor on the report and may award points to the reporter.

use crate::core::settings::Settings;
use crate::database::models::{Report, ReportStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub const DEFAULT_REJECTION_REASON: &str = "Issue rejected by authority";

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot move report from {from} to {to}")]
pub struct TransitionError {
    pub from: ReportStatus,
    pub to: ReportStatus,
}

/// Statuses reachable in one step from `from`.
pub fn next_statuses(from: ReportStatus) -> &'static [ReportStatus] {
    match from {
        ReportStatus::Pending => &[
            ReportStatus::Verified,
            ReportStatus::Rejected,
            ReportStatus::Duplicate,
        ],
        ReportStatus::Verified => &[ReportStatus::InProgress, ReportStatus::Resolved],
        ReportStatus::InProgress => &[ReportStatus::Resolved],
        ReportStatus::Resolved | ReportStatus::Rejected | ReportStatus::Duplicate => &[],
    }
}

pub fn check_transition(from: ReportStatus, to: ReportStatus) -> Result<(), TransitionError> {
    if next_statuses(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Details an authority supplies along with a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub new_status: ReportStatus,
    pub resolution_photo_ref: Option<String>,
    pub rejection_reason: Option<String>,
    /// Canonical report id; required when `new_status` is duplicate.
    pub duplicate_of: Option<String>,
}

impl StatusChange {
    pub fn to(new_status: ReportStatus) -> Self {
        Self {
            new_status,
            resolution_photo_ref: None,
            rejection_reason: None,
            duplicate_of: None,
        }
    }
}

/// Apply a validated transition to `report`, returning the points the reporter earns.
///
/// `change.duplicate_of` must already point at a canonical report.
pub fn apply_transition(
    report: &mut Report,
    change: &StatusChange,
    actor_id: &str,
    now: DateTime<Utc>,
    settings: &Settings,
) -> Result<u32, TransitionError> {
    check_transition(report.status, change.new_status)?;

    let mut award = 0;
    match change.new_status {
        ReportStatus::Verified => {
            report.verified_at = Some(now);
            report.verified_by = Some(actor_id.to_string());
            award = settings.points_per_verified;
        }
        ReportStatus::InProgress => {
            report.in_progress_at = Some(now);
            report.in_progress_by = Some(actor_id.to_string());
        }
        ReportStatus::Rejected => {
            report.rejected_at = Some(now);
            report.rejected_by = Some(actor_id.to_string());
            report.rejection_reason = Some(
                change
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string()),
            );
        }
        ReportStatus::Resolved => {
            report.resolved_at = Some(now);
            report.resolved_by = Some(actor_id.to_string());
            report.resolution_time_hours = Some(resolution_time_hours(report.created_at, now));
            if change.resolution_photo_ref.is_some() {
                report.resolution_photo_ref = change.resolution_photo_ref.clone();
            }
            award = settings.points_per_resolved;
        }
        ReportStatus::Duplicate => {
            report.duplicate_of = change.duplicate_of.clone();
        }
        ReportStatus::Pending => {}
    }

    report.status = change.new_status;
    report.updated_at = now;
    Ok(award)
}

/// Whole hours between creation and resolution, rounded half away from zero.
pub fn resolution_time_hours(created_at: DateTime<Utc>, resolved_at: DateTime<Utc>) -> i64 {
    let millis = resolved_at
        .signed_duration_since(created_at)
        .num_milliseconds();
    (millis as f64 / MILLIS_PER_HOUR).round() as i64
}

/// Points a report has earned its reporter by the time it is in `status`.
pub fn earned_points(status: ReportStatus, settings: &Settings) -> u32 {
    match status {
        ReportStatus::Pending | ReportStatus::Rejected | ReportStatus::Duplicate => {
            settings.points_per_report
        }
        ReportStatus::Verified | ReportStatus::InProgress => {
            settings.points_per_report + settings.points_per_verified
        }
        ReportStatus::Resolved => {
            settings.points_per_report + settings.points_per_verified + settings.points_per_resolved
        }
    }
}
