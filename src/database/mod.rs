pub mod memory;
pub mod models;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use models::{Category, Report, ReportStatus, Reporter};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report already exists: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Could not locate data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Predicate over reports, evaluated by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub reporter_id: Option<String>,
    pub status: Option<ReportStatus>,
    pub category: Option<Category>,
    pub exclude_statuses: Vec<ReportStatus>,
}

impl ReportFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Reports still eligible for duplicate matching.
    pub fn active() -> Self {
        Self {
            exclude_statuses: vec![ReportStatus::Resolved, ReportStatus::Duplicate],
            ..Self::default()
        }
    }

    pub fn by_reporter(reporter_id: &str) -> Self {
        Self {
            reporter_id: Some(reporter_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.reporter_id
            .as_deref()
            .map_or(true, |id| report.reporter_id == id)
            && self.status.map_or(true, |s| report.status == s)
            && self.category.map_or(true, |c| report.category == c)
            && !self.exclude_statuses.contains(&report.status)
    }
}

/// Persistence boundary for reports and reporter profiles.
///
/// Listing returns reports oldest first (creation time, then id). The
/// `update_*` and `commit_submission` methods are atomic read-modify-write
/// operations: no other write to the same key can interleave with `apply`.
pub trait Store: Send + Sync {
    fn insert_report(&self, report: &Report) -> Result<(), DatabaseError>;

    fn find_report(&self, id: &str) -> Result<Option<Report>, DatabaseError>;

    fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>, DatabaseError>;

    /// Returns the updated report, or `None` if no report has this id.
    fn update_report(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report),
    ) -> Result<Option<Report>, DatabaseError>;

    /// Update a report and award its reporter the points `apply` returns, as
    /// one unit. The reporter is only touched when the award is non-zero.
    fn update_report_awarding(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Report) -> u32,
    ) -> Result<Option<Report>, DatabaseError>;

    /// Returns the removed report, if any.
    fn delete_report(&self, id: &str) -> Result<Option<Report>, DatabaseError>;

    fn find_reporter(&self, id: &str) -> Result<Option<Reporter>, DatabaseError>;

    fn list_reporters(&self) -> Result<Vec<Reporter>, DatabaseError>;

    /// Insert or replace a reporter profile.
    fn save_reporter(&self, reporter: &Reporter) -> Result<(), DatabaseError>;

    /// Atomically adjust a reporter's counters, creating a zeroed `user`
    /// profile first if none exists.
    fn update_reporter(
        &self,
        id: &str,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError>;

    /// Insert a new report and adjust its reporter's counters as one unit.
    fn commit_submission(
        &self,
        report: &Report,
        apply: &mut dyn FnMut(&mut Reporter),
    ) -> Result<Reporter, DatabaseError>;

    fn active_reports(&self) -> Result<Vec<Report>, DatabaseError> {
        self.list_reports(&ReportFilter::active())
    }

    fn reports_by_reporter(&self, reporter_id: &str) -> Result<Vec<Report>, DatabaseError> {
        self.list_reports(&ReportFilter::by_reporter(reporter_id))
    }
}

pub(crate) fn sort_oldest_first(reports: &mut [Report]) {
    reports.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Default on-disk location for the report database.
pub fn get_database_path() -> Result<PathBuf, DatabaseError> {
    let data_dir = dirs::data_dir().ok_or(DatabaseError::NoDataDir)?;

    let app_dir = data_dir.join("civicrs");
    std::fs::create_dir_all(&app_dir)?;

    Ok(app_dir.join("civicrs.db"))
}
