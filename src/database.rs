//! Storage abstraction
//!
//! `PgStorage` is the production driver; `ReferenceDb` keeps everything in
//! memory for tests and local development.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AdminInvite, AdminLog, Credentials, MemberRole, Municipality, MunicipalityMember, Profile,
    Report, ReportStatus, Role, Session, StatusUpdate,
};
use crate::reports::StatusCounts;

pub type DynDatabase = Arc<dyn Database>;

#[async_trait]
pub trait Database: Send + Sync {
    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Insert a profile; does nothing if the id already exists
    async fn insert_profile(&self, profile: &Profile) -> Result<()>;

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>>;

    /// Case-insensitive lookup
    async fn fetch_profile_by_email(&self, email: &str) -> Result<Option<Profile>>;

    async fn list_profiles(&self) -> Result<Vec<Profile>>;

    /// Overwrite the self-service fields of an existing profile. Role and
    /// department are left alone.
    async fn save_profile(&self, profile: &Profile) -> Result<()>;

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<bool>;

    async fn count_admins(&self) -> Result<u64>;

    /// Promote `user_id` only if no admin exists yet
    async fn promote_first_admin(&self, user_id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Credentials and sessions
    // ------------------------------------------------------------------

    /// Insert a profile together with its login credentials. Returns false,
    /// writing nothing, when the email is already registered.
    async fn create_account(&self, profile: &Profile, credentials: &Credentials)
        -> Result<bool>;

    async fn fetch_credentials(&self, email: &str) -> Result<Option<Credentials>>;

    async fn insert_session(&self, session: &Session) -> Result<()>;

    async fn fetch_session(&self, token_hash: &str) -> Result<Option<Session>>;

    async fn delete_session(&self, token_hash: &str) -> Result<()>;

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    async fn insert_report(&self, report: &Report) -> Result<()>;

    async fn fetch_report(&self, id: Uuid) -> Result<Option<Report>>;

    /// All reports, newest first, optionally restricted to one status
    async fn list_reports(&self, status: Option<ReportStatus>) -> Result<Vec<Report>>;

    async fn list_reports_by_user(&self, user_id: Uuid) -> Result<Vec<Report>>;

    async fn list_reports_by_municipality(&self, municipality_id: &str) -> Result<Vec<Report>>;

    /// Apply an update, returning the new row or `None` if not found
    async fn update_report(
        &self,
        id: Uuid,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Report>>;

    async fn count_reports_by_status(&self) -> Result<StatusCounts>;

    // ------------------------------------------------------------------
    // Admin invites
    // ------------------------------------------------------------------

    async fn insert_invite(&self, invite: &AdminInvite) -> Result<()>;

    async fn fetch_invite_by_token(&self, token: &str) -> Result<Option<AdminInvite>>;

    async fn has_pending_invite(&self, email: &str) -> Result<bool>;

    /// Pending invites, newest first
    async fn list_pending_invites(&self) -> Result<Vec<AdminInvite>>;

    /// Revoke a pending invite; false if no pending invite has that id
    async fn revoke_invite(&self, id: Uuid) -> Result<bool>;

    /// Mark a pending invite accepted and promote the user in one step.
    /// Returns false if the invite was no longer pending.
    async fn accept_invite(&self, invite_id: Uuid, user_id: Uuid, now: DateTime<Utc>)
        -> Result<bool>;

    // ------------------------------------------------------------------
    // Municipalities
    // ------------------------------------------------------------------

    /// Ordered by name
    async fn list_municipalities(&self) -> Result<Vec<Municipality>>;

    /// Insert or rename; only used to seed the default departments
    async fn upsert_municipality(&self, municipality: &Municipality) -> Result<()>;

    /// Insert a new department owned by `owner`, who becomes its admin member
    /// and is routed to it. Returns false if the id is taken.
    async fn create_municipality(&self, municipality: &Municipality, owner: Uuid)
        -> Result<bool>;

    /// Add or update a membership and route the user's department queue to
    /// it. Returns false if the department or the profile does not exist.
    async fn add_member(
        &self,
        municipality_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<bool>;

    async fn list_members(&self, municipality_id: &str) -> Result<Vec<MunicipalityMember>>;

    // ------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------

    async fn insert_admin_log(&self, log: &AdminLog) -> Result<()>;
}
