use crate::core::fingerprint::Fingerprint;
use crate::core::geo::Coordinates;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// Report models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub reporter_id: String,
    pub title: String,
    pub category: Category,
    pub description: String,
    pub coordinates: Coordinates,
    pub image_fingerprint: Option<Fingerprint>,
    pub photo_digest: String,
    #[serde(default)]
    pub classifier_labels: Vec<String>,
    pub status: ReportStatus,
    pub duplicate_of: Option<String>,
    pub severity: Severity,
    pub flagged_as_spam: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified_by: Option<String>,
    #[serde(default)]
    pub in_progress_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub in_progress_by: Option<String>,
    #[serde(default)]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejected_by: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolution_time_hours: Option<i64>,
    #[serde(default)]
    pub resolution_photo_ref: Option<String>,
    #[serde(default)]
    pub upvotes: BTreeSet<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Report {
    pub fn upvote_count(&self) -> usize {
        self.upvotes.len()
    }

    /// Whether the report still takes part in duplicate matching.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    pub author_role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// Reporter profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reporter {
    pub id: String,
    pub role: Role,
    pub points: u32,
    pub report_count: u32,
    pub spam_score: u32,
}

impl Reporter {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            points: 0,
            report_count: 0,
            spam_score: 0,
        }
    }

    pub fn award(&mut self, points: u32) {
        self.points = self.points.saturating_add(points);
    }

    /// Deductions clamp at zero.
    pub fn deduct(&mut self, points: u32) {
        self.points = self.points.saturating_sub(points);
    }
}

/// The caller on whose behalf an operation runs, as vouched for by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Authority | Role::Admin)
    }
}

// Enums for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
    Pending,
    Verified,
    Rejected,
    InProgress,
    Resolved,
    Duplicate,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 6] = [
        ReportStatus::Pending,
        ReportStatus::Verified,
        ReportStatus::Rejected,
        ReportStatus::InProgress,
        ReportStatus::Resolved,
        ReportStatus::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Verified => "verified",
            ReportStatus::Rejected => "rejected",
            ReportStatus::InProgress => "in-progress",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Duplicate => "duplicate",
        }
    }

    /// Resolved and duplicate reports are inert for matching.
    pub fn is_active(&self) -> bool {
        !matches!(self, ReportStatus::Resolved | ReportStatus::Duplicate)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "verified" => Ok(ReportStatus::Verified),
            "rejected" => Ok(ReportStatus::Rejected),
            "in-progress" | "in_progress" | "inProgress" => Ok(ReportStatus::InProgress),
            "resolved" => Ok(ReportStatus::Resolved),
            "duplicate" => Ok(ReportStatus::Duplicate),
            other => Err(ParseEnumError::new("status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Pothole,
    Garbage,
    Streetlight,
    WaterLeakage,
    Drainage,
    RoadDamage,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Pothole,
        Category::Garbage,
        Category::Streetlight,
        Category::WaterLeakage,
        Category::Drainage,
        Category::RoadDamage,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pothole => "pothole",
            Category::Garbage => "garbage",
            Category::Streetlight => "streetlight",
            Category::WaterLeakage => "water-leakage",
            Category::Drainage => "drainage",
            Category::RoadDamage => "road-damage",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '_'], "-");
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("category", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_score(score: u8) -> Self {
        match score {
            s if s >= 4 => Severity::Critical,
            3 => Severity::High,
            2 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Authority,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Authority => "authority",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "authority" => Ok(Role::Authority),
            "admin" => Ok(Role::Admin),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}
