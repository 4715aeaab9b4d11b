//! Domain records shared by storage, scoring and the HTTP layer

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ENUMS
// ============================================================================

/// Lifecycle of a report
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSql, FromSql,
)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "report_status")]
pub enum ReportStatus {
    #[default]
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "in_progress")]
    InProgress,
    #[postgres(name = "resolved")]
    Resolved,
    #[postgres(name = "rejected")]
    Rejected,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 4] = [
        ReportStatus::Pending,
        ReportStatus::InProgress,
        ReportStatus::Resolved,
        ReportStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Rejected => "rejected",
        }
    }

    /// Human readable label, e.g. "In Progress"
    pub fn label(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "Pending",
            ReportStatus::InProgress => "In Progress",
            ReportStatus::Resolved => "Resolved",
            ReportStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "in_progress" => Ok(ReportStatus::InProgress),
            "resolved" => Ok(ReportStatus::Resolved),
            "rejected" => Ok(ReportStatus::Rejected),
            other => Err(format!("unknown report status '{}'", other)),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSql, FromSql,
)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "user_role")]
pub enum Role {
    #[default]
    #[postgres(name = "user")]
    User,
    #[postgres(name = "admin")]
    Admin,
}

/// Stored invite state. "Expired" is derived from `expires_at`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSql, FromSql,
)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "invite_status")]
pub enum InviteStatus {
    #[default]
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "accepted")]
    Accepted,
    #[postgres(name = "revoked")]
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "member_role")]
pub enum MemberRole {
    #[postgres(name = "admin")]
    Admin,
    #[postgres(name = "member")]
    Member,
}

// ============================================================================
// RECORDS
// ============================================================================

/// A citizen report (complaint)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub description: String,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image_url: Option<String>,
    pub status: ReportStatus,
    pub municipality: Option<String>,
    pub notes: Option<String>,
    pub verified: bool,
    pub clean_up: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub website: Option<String>,
    pub role: Role,
    pub municipality_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: Uuid, email: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.to_string(),
            username: None,
            full_name: None,
            avatar_url: None,
            website: None,
            role: Role::User,
            municipality_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminInvite {
    pub id: Uuid,
    pub email: String,
    pub token: String,
    pub invited_by: Uuid,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_by: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Municipality {
    pub id: String,
    pub name: String,
}

impl Municipality {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MunicipalityMember {
    pub municipality_id: String,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminLog {
    pub id: Uuid,
    pub action: String,
    pub user_id: Uuid,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored login credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// A session row. Only the SHA-256 digest of the bearer token is stored.
#[derive(Debug, Clone)]
pub struct Session {
    pub token_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// UPDATES
// ============================================================================

/// Admin triage of a single report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ReportStatus,
    /// `None` leaves the routing untouched, `Some(None)` clears it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipality: Option<Option<String>>,
    /// `None` leaves notes untouched, `Some(None)` clears them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_up: Option<bool>,
}

impl StatusUpdate {
    /// Apply to an in-memory record
    pub fn apply(&self, report: &mut Report, now: DateTime<Utc>) {
        report.status = self.status;
        if let Some(municipality) = &self.municipality {
            report.municipality = municipality.clone();
        }
        if let Some(notes) = &self.notes {
            report.notes = notes.clone();
        }
        if let Some(verified) = self.verified {
            report.verified = verified;
        }
        if let Some(clean_up) = self.clean_up {
            report.clean_up = clean_up;
        }
        report.updated_at = now;
    }
}

/// Editable profile fields; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub website: Option<String>,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut Profile, now: DateTime<Utc>) {
        if let Some(v) = &self.username {
            profile.username = non_blank(v);
        }
        if let Some(v) = &self.full_name {
            profile.full_name = non_blank(v);
        }
        if let Some(v) = &self.avatar_url {
            profile.avatar_url = non_blank(v);
        }
        if let Some(v) = &self.website {
            profile.website = non_blank(v);
        }
        profile.updated_at = now;
    }
}

pub(crate) fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
