use crate::core::duplicate::{DraftEvidence, DuplicateResolver, MatchKind, MatchThresholds};
use crate::core::fingerprint::FingerprintService;
use crate::core::geo::{Coordinates, InvalidCoordinateError};
use crate::core::lifecycle::{apply_transition, earned_points, StatusChange, TransitionError};
use crate::core::prediction::{estimate_resolution_time, ResolutionEstimate};
use crate::core::settings::Settings;
use crate::core::severity::assess_severity;
use crate::core::spam::SpamPolicy;
use crate::database::models::{Actor, Category, Comment, Report, ReportStatus, Reporter, Role};
use crate::database::{DatabaseError, ReportFilter, Store};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(#[from] InvalidCoordinateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// A report as submitted, before any evaluation.
#[derive(Debug, Clone)]
pub struct ReportDraft {
    pub reporter_id: String,
    pub title: String,
    pub category: Category,
    pub description: String,
    pub coordinates: Coordinates,
    pub image_bytes: Vec<u8>,
    pub classifier_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Submission {
    Accepted(Report),
    /// Nothing was stored and the reporter was not charged.
    DuplicateRejected {
        original_report_id: String,
        original_title: String,
        original_created_at: DateTime<Utc>,
        match_kind: MatchKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpvoteOutcome {
    pub upvote_count: usize,
    pub has_upvoted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_reports: usize,
    pub by_status: BTreeMap<String, usize>,
    pub spam_reports: usize,
    pub reporter_count: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

pub struct ReportService<S: Store> {
    store: S,
    settings: Settings,
    fingerprints: FingerprintService,
    submission_lock: Mutex<()>,
}

impl<S: Store> ReportService<S> {
    pub fn new(store: S) -> Self {
        Self::with_settings(store, Settings::default())
    }

    pub fn with_settings(store: S, settings: Settings) -> Self {
        Self {
            store,
            settings,
            fingerprints: FingerprintService::new(),
            submission_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn submit(&self, draft: ReportDraft) -> Result<Submission, ReportError> {
        self.submit_at(draft, Utc::now())
    }

    /// Evaluate a draft and, unless it duplicates an active report, persist it.
    ///
    /// The store is only written once every check has passed. Concurrent
    /// submissions through the same service are serialized so two reports of
    /// one incident cannot both slip past the duplicate scan.
    pub fn submit_at(
        &self,
        draft: ReportDraft,
        now: DateTime<Utc>,
    ) -> Result<Submission, ReportError> {
        let reporter_id = required(&draft.reporter_id, "Reporter id")?;
        let title = required(&draft.title, "Title")?;
        let description = required(&draft.description, "Description")?;
        draft.coordinates.validate()?;
        if draft.image_bytes.is_empty() {
            return Err(ReportError::Validation("A photo is required".to_string()));
        }

        let fingerprint = match self.fingerprints.fingerprint(&draft.image_bytes) {
            Ok(fingerprint) => Some(fingerprint),
            Err(err) => {
                warn!("Photo from {} not fingerprinted: {}", reporter_id, err);
                None
            }
        };
        let photo_digest = self.fingerprints.content_digest(&draft.image_bytes);

        let _guard = self
            .submission_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let active = self.store.active_reports()?;
        let evidence = DraftEvidence {
            fingerprint: fingerprint.as_ref(),
            coordinates: draft.coordinates,
            description: &description,
        };
        let resolver = DuplicateResolver::new(MatchThresholds::from(&self.settings));
        if let Some(found) = resolver.resolve(&evidence, &active) {
            let original = active
                .iter()
                .find(|r| r.id == found.report_id)
                .ok_or_else(|| ReportError::NotFound(found.report_id.clone()))?;
            return Ok(Submission::DuplicateRejected {
                original_report_id: original.id.clone(),
                original_title: original.title.clone(),
                original_created_at: original.created_at,
                match_kind: found.kind,
            });
        }

        let prior = self.store.reports_by_reporter(&reporter_id)?;
        let spam = SpamPolicy::from(&self.settings).assess(&prior, now);
        if spam.flagged {
            warn!(
                "Flagging report from {} as spam (score {}, {} recent, duplicate ratio {:.2})",
                reporter_id, spam.score, spam.recent_count, spam.duplicate_ratio
            );
        }

        let severity = assess_severity(&description, draft.category, &draft.classifier_labels);

        let report = Report {
            id: format!("rpt_{}", Uuid::new_v4().simple()),
            reporter_id,
            title,
            category: draft.category,
            description,
            coordinates: draft.coordinates,
            image_fingerprint: fingerprint,
            photo_digest,
            classifier_labels: draft.classifier_labels,
            status: ReportStatus::Pending,
            duplicate_of: None,
            severity,
            flagged_as_spam: spam.flagged,
            created_at: now,
            updated_at: now,
            verified_at: None,
            verified_by: None,
            in_progress_at: None,
            in_progress_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
            resolved_at: None,
            resolved_by: None,
            resolution_time_hours: None,
            resolution_photo_ref: None,
            upvotes: BTreeSet::new(),
            comments: Vec::new(),
        };

        let points = self.settings.points_per_report;
        self.store.commit_submission(&report, &mut |reporter| {
            reporter.report_count = reporter.report_count.saturating_add(1);
            reporter.award(points);
            if spam.flagged {
                reporter.spam_score = spam.score;
            }
        })?;

        info!(
            "Accepted report {} ({}, severity {})",
            report.id, report.category, report.severity
        );
        Ok(Submission::Accepted(report))
    }

    pub fn get_report(&self, report_id: &str) -> Result<Report, ReportError> {
        self.store
            .find_report(report_id)?
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))
    }

    /// Reports visible to `actor`, newest first.
    pub fn list_reports(
        &self,
        actor: &Actor,
        filter: ReportFilter,
    ) -> Result<Vec<Report>, ReportError> {
        let mut filter = filter;
        match actor.role {
            Role::User => filter.reporter_id = Some(actor.id.clone()),
            Role::Authority => filter.exclude_statuses.push(ReportStatus::Duplicate),
            Role::Admin => {}
        }

        let mut reports = self.store.list_reports(&filter)?;
        reports.reverse();
        Ok(reports)
    }

    pub fn update_status(
        &self,
        report_id: &str,
        change: StatusChange,
        actor: &Actor,
    ) -> Result<Report, ReportError> {
        self.update_status_at(report_id, change, actor, Utc::now())
    }

    pub fn update_status_at(
        &self,
        report_id: &str,
        change: StatusChange,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Report, ReportError> {
        if !actor.is_staff() {
            return Err(ReportError::Forbidden(
                "Only authorities can change report status".to_string(),
            ));
        }

        let mut change = change;
        if change.new_status == ReportStatus::Duplicate {
            let target = change
                .duplicate_of
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    ReportError::Validation("A duplicate needs the original report id".to_string())
                })?;
            let canonical = self.canonical_report_id(target)?;
            if canonical == report_id {
                return Err(ReportError::Validation(
                    "A report cannot duplicate itself".to_string(),
                ));
            }
            change.duplicate_of = Some(canonical);
        } else {
            change.duplicate_of = None;
        }

        let settings = &self.settings;
        let mut outcome = Ok(());
        let updated = self
            .store
            .update_report_awarding(report_id, &mut |report| {
                match apply_transition(report, &change, &actor.id, now, settings) {
                    Ok(award) => award,
                    Err(err) => {
                        outcome = Err(err);
                        0
                    }
                }
            })?
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))?;
        outcome?;

        info!(
            "Report {} moved to {} by {}",
            updated.id, updated.status, actor.id
        );

        Ok(updated)
    }

    /// Follow `duplicate_of` links from `report_id` to the report they end at.
    fn canonical_report_id(&self, report_id: &str) -> Result<String, ReportError> {
        let mut current = self.get_report(report_id)?;
        let mut visited = HashSet::new();

        while let Some(next) = current.duplicate_of.clone() {
            if !visited.insert(current.id.clone()) {
                break;
            }
            match self.store.find_report(&next)? {
                Some(report) => current = report,
                None => break,
            }
        }

        Ok(current.id)
    }

    /// Remove a report and take back the points it earned its reporter.
    pub fn delete_report(&self, report_id: &str, actor: &Actor) -> Result<Report, ReportError> {
        let report = self.get_report(report_id)?;
        if actor.role == Role::User && report.reporter_id != actor.id {
            return Err(ReportError::Forbidden(
                "Users can only delete their own reports".to_string(),
            ));
        }

        let removed = self
            .store
            .delete_report(report_id)?
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))?;

        let clawback = earned_points(removed.status, &self.settings);
        self.store
            .update_reporter(&removed.reporter_id, &mut |reporter| {
                reporter.deduct(clawback);
                reporter.report_count = reporter.report_count.saturating_sub(1);
            })?;

        info!(
            "Deleted report {} ({}), clawed back {} points",
            removed.id, removed.status, clawback
        );
        Ok(removed)
    }

    pub fn toggle_upvote(
        &self,
        report_id: &str,
        actor: &Actor,
    ) -> Result<UpvoteOutcome, ReportError> {
        let mut has_upvoted = false;
        let report = self
            .store
            .update_report(report_id, &mut |report| {
                has_upvoted = if report.upvotes.remove(&actor.id) {
                    false
                } else {
                    report.upvotes.insert(actor.id.clone())
                };
            })?
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))?;

        Ok(UpvoteOutcome {
            upvote_count: report.upvote_count(),
            has_upvoted,
        })
    }

    pub fn add_comment(
        &self,
        report_id: &str,
        actor: &Actor,
        text: &str,
    ) -> Result<Comment, ReportError> {
        self.add_comment_at(report_id, actor, text, Utc::now())
    }

    pub fn add_comment_at(
        &self,
        report_id: &str,
        actor: &Actor,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Comment, ReportError> {
        let text = required(text, "Comment text")?;
        let comment = Comment {
            id: format!("cmt_{}", Uuid::new_v4().simple()),
            author_id: actor.id.clone(),
            author_role: actor.role,
            text,
            created_at: now,
        };

        self.store
            .update_report(report_id, &mut |report| {
                report.comments.push(comment.clone());
            })?
            .ok_or_else(|| ReportError::NotFound(report_id.to_string()))?;

        Ok(comment)
    }

    pub fn list_comments(&self, report_id: &str) -> Result<Vec<Comment>, ReportError> {
        Ok(self.get_report(report_id)?.comments)
    }

    pub fn estimate_resolution_time(
        &self,
        category: Category,
    ) -> Result<ResolutionEstimate, ReportError> {
        let resolved = self.store.list_reports(&ReportFilter {
            status: Some(ReportStatus::Resolved),
            category: Some(category),
            ..ReportFilter::default()
        })?;
        Ok(estimate_resolution_time(&resolved, category))
    }

    pub fn analytics(&self, actor: &Actor) -> Result<Analytics, ReportError> {
        if actor.role != Role::Admin {
            return Err(ReportError::Forbidden(
                "Analytics are restricted to admins".to_string(),
            ));
        }

        let reports = self.store.list_reports(&ReportFilter::all())?;
        let reporter_count = self
            .store
            .list_reporters()?
            .iter()
            .filter(|reporter| reporter.role == Role::User)
            .count();

        let mut by_status = BTreeMap::new();
        let mut by_category = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for report in &reports {
            *by_status.entry(report.status.to_string()).or_insert(0) += 1;
            *by_category.entry(report.category.to_string()).or_insert(0) += 1;
            *by_severity.entry(report.severity.to_string()).or_insert(0) += 1;
        }

        Ok(Analytics {
            total_reports: reports.len(),
            by_status,
            spam_reports: reports.iter().filter(|r| r.flagged_as_spam).count(),
            reporter_count,
            by_category,
            by_severity,
        })
    }

    /// Create a profile, or change the role of an existing one keeping its counters.
    pub fn register_reporter(
        &self,
        reporter_id: &str,
        role: Role,
    ) -> Result<Reporter, ReportError> {
        let reporter_id = required(reporter_id, "Reporter id")?;
        Ok(self
            .store
            .update_reporter(&reporter_id, &mut |reporter| reporter.role = role)?)
    }

    pub fn get_reporter(&self, reporter_id: &str) -> Result<Reporter, ReportError> {
        self.store
            .find_reporter(reporter_id)?
            .ok_or_else(|| ReportError::NotFound(reporter_id.to_string()))
    }
}

fn required(value: &str, field: &str) -> Result<String, ReportError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ReportError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::tests::split_png;
    use crate::database::tests::epoch;
    use crate::database::models::Severity;
    use crate::database::{MemoryStore, SqliteStore};
    use chrono::Duration;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use std::io::Cursor;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn authority() -> Actor {
        Actor::new("auth_1", Role::Authority)
    }

    fn admin() -> Actor {
        Actor::new("admin_1", Role::Admin)
    }

    /// Light image with a dark square in one quadrant; each quadrant hashes far
    /// from the others.
    fn quadrant_png(quadrant: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(64, 64, |x, y| {
            if (x / 32) + 2 * (y / 32) == quadrant {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn draft(reporter_id: &str, image_bytes: Vec<u8>) -> ReportDraft {
        ReportDraft {
            reporter_id: reporter_id.to_string(),
            title: "Pothole on Station Road".to_string(),
            category: Category::Pothole,
            description: "Large pothole near the bus stop".to_string(),
            coordinates: Coordinates::new(18.5204, 73.8567).unwrap(),
            image_bytes,
            classifier_labels: vec!["pothole".to_string()],
        }
    }

    fn accepted(submission: Submission) -> Report {
        match submission {
            Submission::Accepted(report) => report,
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    fn service() -> ReportService<MemoryStore> {
        ReportService::new(MemoryStore::new())
    }

    fn submit<S: Store>(service: &ReportService<S>, draft: ReportDraft) -> Report {
        accepted(service.submit_at(draft, epoch()).unwrap())
    }

    fn move_to<S: Store>(
        service: &ReportService<S>,
        report_id: &str,
        status: ReportStatus,
    ) -> Result<Report, ReportError> {
        service.update_status_at(report_id, StatusChange::to(status), &authority(), epoch())
    }

    #[test]
    fn test_accepted_submission_awards_points() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));

        assert!(report.id.starts_with("rpt_"));
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.image_fingerprint.is_some());
        assert_eq!(report.photo_digest.len(), 64);
        assert_eq!(report.severity, Severity::High);
        assert!(!report.flagged_as_spam);

        let reporter = service.get_reporter("usr_1").unwrap();
        assert_eq!(reporter.points, 10);
        assert_eq!(reporter.report_count, 1);
    }

    #[test]
    fn test_same_photo_is_rejected_without_charging() {
        let service = service();
        let original = submit(&service, draft("usr_1", split_png(64, true)));

        let mut second = draft("usr_2", split_png(128, true));
        second.coordinates = Coordinates::new(-33.86, 151.2).unwrap();
        second.description = "Completely different words".to_string();
        let verdict = service
            .submit_at(second, epoch() + Duration::minutes(5))
            .unwrap();

        match verdict {
            Submission::DuplicateRejected {
                original_report_id,
                original_title,
                match_kind,
                ..
            } => {
                assert_eq!(original_report_id, original.id);
                assert_eq!(original_title, "Pothole on Station Road");
                assert_eq!(match_kind, MatchKind::ExactImage);
            }
            other => panic!("expected duplicate, got {:?}", other),
        }

        assert!(service.get_reporter("usr_2").is_err());
        assert_eq!(service.store().list_reports(&ReportFilter::all()).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_identical_submissions_accept_one() {
        let threads = 8;
        let service = Arc::new(service());
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let draft = draft(&format!("usr_{}", i), split_png(64, true));
                    barrier.wait();
                    service.submit_at(draft, epoch()).unwrap()
                })
            })
            .collect();
        let verdicts: Vec<Submission> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let accepted: Vec<&Report> = verdicts
            .iter()
            .filter_map(|verdict| match verdict {
                Submission::Accepted(report) => Some(report),
                _ => None,
            })
            .collect();
        assert_eq!(accepted.len(), 1);

        let rejected = verdicts
            .iter()
            .filter(|verdict| match verdict {
                Submission::DuplicateRejected {
                    original_report_id, ..
                } => *original_report_id == accepted[0].id,
                _ => false,
            })
            .count();
        assert_eq!(rejected, threads - 1);

        let stored = service.store().list_reports(&ReportFilter::all()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(service.store().list_reporters().unwrap().len(), 1);
    }

    #[test]
    fn test_resolved_reports_do_not_block_new_ones() {
        let service = service();
        let original = submit(&service, draft("usr_1", split_png(64, true)));
        move_to(&service, &original.id, ReportStatus::Verified).unwrap();
        move_to(&service, &original.id, ReportStatus::Resolved).unwrap();

        let again = service
            .submit_at(draft("usr_2", split_png(64, true)), epoch() + Duration::days(2))
            .unwrap();
        assert!(matches!(again, Submission::Accepted(_)));
    }

    #[test]
    fn test_undecodable_photo_is_accepted_without_fingerprint() {
        let service = service();
        let first = accepted(
            service
                .submit_at(draft("usr_1", b"not an image".to_vec()), epoch())
                .unwrap(),
        );
        assert!(first.image_fingerprint.is_none());

        // identical location and text still never make a duplicate on their own
        let second = service
            .submit_at(draft("usr_2", b"not an image".to_vec()), epoch())
            .unwrap();
        assert!(matches!(second, Submission::Accepted(_)));
    }

    #[test]
    fn test_invalid_drafts_leave_store_untouched() {
        let service = service();

        let mut blank = draft("usr_1", split_png(64, true));
        blank.description = "   ".to_string();
        assert!(matches!(
            service.submit_at(blank, epoch()),
            Err(ReportError::Validation(_))
        ));

        let no_photo = draft("usr_1", Vec::new());
        assert!(matches!(
            service.submit_at(no_photo, epoch()),
            Err(ReportError::Validation(_))
        ));

        let mut off_map = draft("usr_1", split_png(64, true));
        off_map.coordinates = Coordinates {
            latitude: 95.0,
            longitude: 0.0,
        };
        assert!(matches!(
            service.submit_at(off_map, epoch()),
            Err(ReportError::InvalidCoordinates(_))
        ));

        assert!(service.store().list_reports(&ReportFilter::all()).unwrap().is_empty());
        assert!(service.store().list_reporters().unwrap().is_empty());
    }

    #[test]
    fn test_rapid_reporter_with_duplicate_history_is_flagged() {
        let settings = Settings {
            spam_report_limit: 2,
            ..Settings::default()
        };
        let service = ReportService::with_settings(MemoryStore::new(), settings);

        let mut ids = Vec::new();
        for quadrant in 0..3 {
            let report = accepted(
                service
                    .submit_at(
                        draft("usr_1", quadrant_png(quadrant)),
                        epoch() + Duration::minutes(i64::from(quadrant)),
                    )
                    .unwrap(),
            );
            ids.push(report.id);
        }
        for id in &ids[1..] {
            let change = StatusChange {
                duplicate_of: Some(ids[0].clone()),
                ..StatusChange::to(ReportStatus::Duplicate)
            };
            service
                .update_status_at(id, change, &authority(), epoch())
                .unwrap();
        }

        let flagged = accepted(
            service
                .submit_at(draft("usr_1", quadrant_png(3)), epoch() + Duration::minutes(4))
                .unwrap(),
        );
        assert!(flagged.flagged_as_spam);
        assert_eq!(service.get_reporter("usr_1").unwrap().spam_score, 4);

        // a first report is never flagged
        let calm = accepted(
            service
                .submit_at(draft("usr_2", b"junk".to_vec()), epoch())
                .unwrap(),
        );
        assert!(!calm.flagged_as_spam);
    }

    #[test]
    fn test_status_lifecycle_awards_points() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));

        let user = Actor::new("usr_1", Role::User);
        assert!(matches!(
            service.update_status_at(
                &report.id,
                StatusChange::to(ReportStatus::Verified),
                &user,
                epoch()
            ),
            Err(ReportError::Forbidden(_))
        ));

        let verified = service
            .update_status_at(
                &report.id,
                StatusChange::to(ReportStatus::Verified),
                &authority(),
                epoch() + Duration::hours(1),
            )
            .unwrap();
        assert_eq!(verified.verified_by.as_deref(), Some("auth_1"));
        assert_eq!(service.get_reporter("usr_1").unwrap().points, 15);

        service
            .update_status_at(
                &report.id,
                StatusChange::to(ReportStatus::InProgress),
                &authority(),
                epoch() + Duration::hours(2),
            )
            .unwrap();

        let resolved = service
            .update_status_at(
                &report.id,
                StatusChange {
                    resolution_photo_ref: Some("fixed.jpg".to_string()),
                    ..StatusChange::to(ReportStatus::Resolved)
                },
                &admin(),
                epoch() + Duration::minutes(30 * 60 + 31),
            )
            .unwrap();
        assert_eq!(resolved.resolution_time_hours, Some(31));
        assert_eq!(resolved.resolution_photo_ref.as_deref(), Some("fixed.jpg"));
        assert_eq!(service.get_reporter("usr_1").unwrap().points, 35);

        assert!(matches!(
            move_to(&service, &report.id, ReportStatus::Verified),
            Err(ReportError::InvalidTransition(_))
        ));
        assert!(matches!(
            move_to(&service, "rpt_missing", ReportStatus::Verified),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejection_keeps_default_reason() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));

        let rejected = move_to(&service, &report.id, ReportStatus::Rejected).unwrap();
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some("Issue rejected by authority")
        );
        assert_eq!(service.get_reporter("usr_1").unwrap().points, 10);
    }

    #[test]
    fn test_duplicate_target_resolves_to_canonical_report() {
        let service = service();
        let a = submit(&service, draft("usr_1", quadrant_png(0)));
        let b = submit(&service, draft("usr_2", quadrant_png(1)));
        let c = submit(&service, draft("usr_3", quadrant_png(2)));

        let mark = |id: &str, target: &str| {
            service.update_status_at(
                id,
                StatusChange {
                    duplicate_of: Some(target.to_string()),
                    ..StatusChange::to(ReportStatus::Duplicate)
                },
                &authority(),
                epoch(),
            )
        };

        assert_eq!(mark(&b.id, &a.id).unwrap().duplicate_of, Some(a.id.clone()));
        assert_eq!(mark(&c.id, &b.id).unwrap().duplicate_of, Some(a.id.clone()));

        let d = submit(&service, draft("usr_4", quadrant_png(3)));
        assert!(matches!(mark(&d.id, &d.id), Err(ReportError::Validation(_))));
        assert!(matches!(mark(&d.id, "rpt_missing"), Err(ReportError::NotFound(_))));
        assert!(matches!(
            move_to(&service, &d.id, ReportStatus::Duplicate),
            Err(ReportError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_claws_back_earned_points() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));
        move_to(&service, &report.id, ReportStatus::Verified).unwrap();

        let stranger = Actor::new("usr_2", Role::User);
        assert!(matches!(
            service.delete_report(&report.id, &stranger),
            Err(ReportError::Forbidden(_))
        ));

        let owner = Actor::new("usr_1", Role::User);
        service.delete_report(&report.id, &owner).unwrap();

        let reporter = service.get_reporter("usr_1").unwrap();
        assert_eq!(reporter.points, 0);
        assert_eq!(reporter.report_count, 0);
        assert!(matches!(
            service.get_report(&report.id),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_clawback_clamps_at_zero() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));
        service
            .store()
            .update_reporter("usr_1", &mut |r| r.points = 3)
            .unwrap();

        service.delete_report(&report.id, &authority()).unwrap();
        assert_eq!(service.get_reporter("usr_1").unwrap().points, 0);
    }

    #[test]
    fn test_upvote_toggles() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));
        let voter = Actor::new("usr_9", Role::User);

        let first = service.toggle_upvote(&report.id, &voter).unwrap();
        assert_eq!(
            first,
            UpvoteOutcome {
                upvote_count: 1,
                has_upvoted: true,
            }
        );

        let other = service
            .toggle_upvote(&report.id, &Actor::new("usr_8", Role::User))
            .unwrap();
        assert_eq!(other.upvote_count, 2);

        let undone = service.toggle_upvote(&report.id, &voter).unwrap();
        assert_eq!(
            undone,
            UpvoteOutcome {
                upvote_count: 1,
                has_upvoted: false,
            }
        );
    }

    #[test]
    fn test_comments_are_trimmed_and_listed() {
        let service = service();
        let report = submit(&service, draft("usr_1", split_png(64, true)));

        let comment = service
            .add_comment_at(&report.id, &authority(), "  Crew assigned  ", epoch())
            .unwrap();
        assert_eq!(comment.text, "Crew assigned");
        assert_eq!(comment.author_role, Role::Authority);

        assert!(matches!(
            service.add_comment_at(&report.id, &authority(), " ", epoch()),
            Err(ReportError::Validation(_))
        ));
        assert!(matches!(
            service.add_comment_at("rpt_missing", &authority(), "hi", epoch()),
            Err(ReportError::NotFound(_))
        ));

        assert_eq!(service.list_comments(&report.id).unwrap(), vec![comment]);
    }

    #[test]
    fn test_listing_respects_roles() {
        let service = service();
        let a = submit(&service, draft("usr_1", quadrant_png(0)));
        let b = accepted(
            service
                .submit_at(draft("usr_2", quadrant_png(1)), epoch() + Duration::minutes(1))
                .unwrap(),
        );
        service
            .update_status_at(
                &b.id,
                StatusChange {
                    duplicate_of: Some(a.id.clone()),
                    ..StatusChange::to(ReportStatus::Duplicate)
                },
                &authority(),
                epoch(),
            )
            .unwrap();
        let c = accepted(
            service
                .submit_at(draft("usr_1", quadrant_png(2)), epoch() + Duration::minutes(2))
                .unwrap(),
        );

        let ids = |actor: &Actor| -> Vec<String> {
            service
                .list_reports(actor, ReportFilter::all())
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect()
        };

        assert_eq!(ids(&Actor::new("usr_1", Role::User)), vec![c.id.clone(), a.id.clone()]);
        assert_eq!(ids(&authority()), vec![c.id.clone(), a.id.clone()]);
        assert_eq!(ids(&admin()), vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        // a user cannot widen the filter to someone else's reports
        let sneaky = service
            .list_reports(
                &Actor::new("usr_1", Role::User),
                ReportFilter::by_reporter("usr_2"),
            )
            .unwrap();
        assert!(sneaky.iter().all(|r| r.reporter_id == "usr_1"));
    }

    #[test]
    fn test_estimate_uses_resolved_history() {
        let service = service();
        assert_eq!(
            service
                .estimate_resolution_time(Category::Pothole)
                .unwrap()
                .prediction_hours,
            48
        );

        for (quadrant, hours) in [(0, 10), (1, 20)] {
            let report = accepted(
                service
                    .submit_at(draft("usr_1", quadrant_png(quadrant)), epoch())
                    .unwrap(),
            );
            move_to(&service, &report.id, ReportStatus::Verified).unwrap();
            service
                .update_status_at(
                    &report.id,
                    StatusChange::to(ReportStatus::Resolved),
                    &authority(),
                    epoch() + Duration::hours(hours),
                )
                .unwrap();
        }

        let estimate = service.estimate_resolution_time(Category::Pothole).unwrap();
        assert_eq!(estimate.prediction_hours, 15);
        assert_eq!(estimate.sample_size, 2);
    }

    #[test]
    fn test_analytics_is_admin_only() {
        let service = service();
        submit(&service, draft("usr_1", quadrant_png(0)));
        submit(&service, draft("usr_2", quadrant_png(1)));

        assert!(matches!(
            service.analytics(&authority()),
            Err(ReportError::Forbidden(_))
        ));

        let stats = service.analytics(&admin()).unwrap();
        assert_eq!(stats.total_reports, 2);
        assert_eq!(stats.by_status.get("pending"), Some(&2));
        assert_eq!(stats.by_category.get("pothole"), Some(&2));
        assert_eq!(stats.reporter_count, 2);
        assert_eq!(stats.spam_reports, 0);

        // staff profiles are not counted as reporters
        service.register_reporter("auth_1", Role::Authority).unwrap();
        service.register_reporter("admin_1", Role::Admin).unwrap();
        assert_eq!(service.analytics(&admin()).unwrap().reporter_count, 2);
    }

    #[test]
    fn test_register_reporter_keeps_counters() {
        let service = service();
        submit(&service, draft("usr_1", split_png(64, true)));

        let promoted = service.register_reporter("usr_1", Role::Authority).unwrap();
        assert_eq!(promoted.role, Role::Authority);
        assert_eq!(promoted.points, 10);
    }

    #[test]
    fn test_sqlite_backed_service_rejects_duplicates() {
        let service = ReportService::new(SqliteStore::open_in_memory().unwrap());
        submit(&service, draft("usr_1", split_png(64, true)));
        let second = service
            .submit_at(draft("usr_2", split_png(64, true)), epoch())
            .unwrap();
        assert!(matches!(second, Submission::DuplicateRejected { .. }));
    }
}
