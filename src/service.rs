//! TrashClick application service
//!
//! Every operation the HTTP API exposes lives here, on top of a
//! [`Database`](crate::database::Database) driver. Handlers only extract
//! input and serialize output.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::config::Config;
use crate::database::DynDatabase;
use crate::error::{ApiError, ApiResult};
use crate::geocode::GeocodingClient;
use crate::invite::{self, InviteValidity};
use crate::media::{MediaStore, StoredImage};
use crate::models::{
    non_blank, AdminInvite, AdminLog, Credentials, MemberRole, Municipality, MunicipalityMember,
    Profile, ProfilePatch, Report, ReportStatus,
};
use crate::reports::{
    self, default_municipalities, BatchUpdate, NewReport, ReportFilter, StatusChange,
    StatusCounts, BATCH_CHUNK_SIZE,
};
use crate::scoring::{self, LeaderboardEntry, UserStats};

/// Reports shown on the personal dashboard
const RECENT_REPORTS: usize = 5;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    /// Defaults to a plain member
    #[serde(default)]
    pub role: Option<MemberRole>,
}

/// Issued on register and login. The token is only ever returned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub profile: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub profile: Profile,
    pub stats: UserStats,
    pub recent_reports: Vec<Report>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminOverview {
    pub admin_count: u64,
    pub reports: StatusCounts,
    pub total_reports: u64,
    /// At most one administrator exists
    pub single_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedInvite {
    pub invite: AdminInvite,
    pub accept_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCheck {
    pub status: InviteValidity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupStatus {
    pub admin_exists: bool,
    pub setup_key_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub requested: usize,
    pub updated: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct TrashClick {
    db: DynDatabase,
    config: Config,
    media: MediaStore,
    geocoder: Option<GeocodingClient>,
}

impl TrashClick {
    pub fn new(db: DynDatabase, config: Config) -> Self {
        let media = MediaStore::new(&config.media, config.public_url());
        let geocoder = GeocodingClient::from_config(&config.geocoding);
        if geocoder.is_none() {
            info!("No geocoding API key configured, reverse geocoding disabled");
        }
        Self {
            db,
            config,
            media,
            geocoder,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    // ========================================================================
    // AUTH
    // ========================================================================

    pub async fn register(&self, req: RegisterRequest) -> ApiResult<AuthSession> {
        let email = invite::normalize_email(&req.email)?;
        auth::check_password(&req.password).map_err(ApiError::BadRequest)?;

        let username = req.username.as_deref().and_then(non_blank);
        if let Some(username) = &username {
            auth::check_username(username).map_err(ApiError::BadRequest)?;
        }

        let user_id = Uuid::new_v4();
        let credentials = Credentials {
            user_id,
            email: email.clone(),
            password_hash: auth::hash_password(&req.password)?,
        };
        let mut profile = Profile::new(user_id, &email);
        profile.username = username;
        profile.full_name = req.full_name.as_deref().and_then(non_blank);

        if !self.db.create_account(&profile, &credentials).await? {
            return Err(ApiError::conflict("An account with this email already exists"));
        }

        info!("Registered user {}", user_id);
        self.start_session(profile).await
    }

    pub async fn login(&self, req: LoginRequest) -> ApiResult<AuthSession> {
        let invalid = || ApiError::unauthorized("Invalid email or password");

        let credentials = self
            .db
            .fetch_credentials(req.email.trim())
            .await?
            .ok_or_else(invalid)?;
        if !auth::verify_password(&req.password, &credentials.password_hash) {
            return Err(invalid());
        }

        let profile = match self.db.fetch_profile(credentials.user_id).await? {
            Some(profile) => profile,
            None => {
                let profile = Profile::new(credentials.user_id, &credentials.email);
                self.db.insert_profile(&profile).await?;
                info!("Initialised missing profile for {}", credentials.user_id);
                profile
            }
        };

        self.start_session(profile).await
    }

    async fn start_session(&self, profile: Profile) -> ApiResult<AuthSession> {
        let (token, session) = auth::new_session(
            profile.id,
            Utc::now(),
            self.config.admin.session_ttl_days,
        );
        self.db.insert_session(&session).await?;
        Ok(AuthSession {
            token,
            expires_at: session.expires_at,
            profile,
        })
    }

    pub async fn logout(&self, token: &str) -> ApiResult<()> {
        self.db.delete_session(&auth::token_digest(token)).await?;
        Ok(())
    }

    /// Resolve a bearer token to the caller's profile
    pub async fn authenticate(&self, token: &str) -> ApiResult<Profile> {
        let digest = auth::token_digest(token);
        let session = self
            .db
            .fetch_session(&digest)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

        if !auth::session_is_live(&session, Utc::now()) {
            debug!("Session for {} expired", session.user_id);
            self.db.delete_session(&digest).await?;
            return Err(ApiError::unauthorized("Invalid or expired session"));
        }

        self.db
            .fetch_profile(session.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Profile not found"))
    }

    pub fn require_admin(&self, user: &Profile) -> ApiResult<()> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator access required"))
        }
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    pub async fn get_profile(&self, user: &Profile) -> ApiResult<Profile> {
        self.db
            .fetch_profile(user.id)
            .await?
            .ok_or_else(|| ApiError::not_found("Profile not found"))
    }

    pub async fn update_profile(&self, user: &Profile, patch: ProfilePatch) -> ApiResult<Profile> {
        if let Some(username) = patch.username.as_deref().and_then(non_blank) {
            auth::check_username(&username).map_err(ApiError::BadRequest)?;
        }

        let mut profile = self.get_profile(user).await?;
        patch.apply(&mut profile, Utc::now());
        self.db.save_profile(&profile).await?;
        Ok(profile)
    }

    pub async fn dashboard(&self, user: &Profile) -> ApiResult<Dashboard> {
        let mut reports = self.db.list_reports_by_user(user.id).await?;
        let stats = scoring::user_stats(&reports, &self.config.scoring);
        reports.truncate(RECENT_REPORTS);
        Ok(Dashboard {
            profile: user.clone(),
            stats,
            recent_reports: reports,
        })
    }

    pub async fn leaderboard(&self, limit: Option<usize>) -> ApiResult<Vec<LeaderboardEntry>> {
        let limit = self.config.leaderboard_limit(limit);
        let profiles = self.db.list_profiles().await?;
        let reports = self.db.list_reports(None).await?;
        Ok(scoring::build_leaderboard(
            &profiles,
            &reports,
            &self.config.scoring,
            limit,
        ))
    }

    // ========================================================================
    // MUNICIPALITIES
    // ========================================================================

    pub async fn list_municipalities(&self) -> ApiResult<Vec<Municipality>> {
        let mut municipalities = self.db.list_municipalities().await?;

        if municipalities.is_empty() {
            info!("No municipalities yet, seeding defaults");
            for municipality in default_municipalities() {
                self.db.upsert_municipality(&municipality).await?;
            }
            municipalities = self.db.list_municipalities().await?;
        }

        municipalities.retain(|m| !m.id.trim().is_empty() && !m.name.trim().is_empty());
        Ok(municipalities)
    }

    pub async fn create_municipality(&self, user: &Profile, name: &str) -> ApiResult<Municipality> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::bad_request("Municipality name is required"));
        }
        let id = reports::slugify(name);
        if id.is_empty() {
            return Err(ApiError::bad_request(
                "Municipality name must contain letters or digits",
            ));
        }

        let municipality = Municipality::new(&id, name);
        if !self.db.create_municipality(&municipality, user.id).await? {
            return Err(ApiError::conflict(format!(
                "Municipality '{}' already exists",
                id
            )));
        }

        info!("Municipality '{}' created by {}", id, user.id);
        Ok(municipality)
    }

    pub async fn municipality_members(&self, id: &str) -> ApiResult<Vec<MunicipalityMember>> {
        Ok(self.db.list_members(id).await?)
    }

    /// Put a user on a department. Site admins and the department's own
    /// admins may do this.
    pub async fn add_member(
        &self,
        caller: &Profile,
        municipality_id: &str,
        req: AddMemberRequest,
    ) -> ApiResult<Vec<MunicipalityMember>> {
        let members = self.db.list_members(municipality_id).await?;
        let department_admin = members
            .iter()
            .any(|m| m.user_id == caller.id && m.role == MemberRole::Admin);
        if !caller.is_admin() && !department_admin {
            return Err(ApiError::forbidden(
                "Only administrators can manage department members",
            ));
        }

        let email = invite::normalize_email(&req.email)?;
        let target = self
            .db
            .fetch_profile_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::not_found("No user with that email"))?;

        let role = req.role.unwrap_or(MemberRole::Member);
        if !self.db.add_member(municipality_id, target.id, role).await? {
            return Err(ApiError::not_found("Municipality not found"));
        }

        info!(
            "{} added {} to '{}' as {:?}",
            caller.id, target.id, municipality_id, role
        );
        Ok(self.db.list_members(municipality_id).await?)
    }

    /// Reports routed to the caller's department
    pub async fn department_reports(&self, user: &Profile) -> ApiResult<Vec<Report>> {
        match user.municipality_id.as_deref().and_then(non_blank) {
            Some(id) => Ok(self.db.list_reports_by_municipality(&id).await?),
            None => Ok(Vec::new()),
        }
    }

    // ========================================================================
    // REPORTS
    // ========================================================================

    pub async fn upload_image(
        &self,
        filename: Option<&str>,
        content_type: &str,
        bytes: &[u8],
    ) -> ApiResult<StoredImage> {
        Ok(self
            .media
            .upload_image(filename, content_type, bytes)
            .await?)
    }

    pub async fn submit_report(&self, user: &Profile, form: NewReport) -> ApiResult<Report> {
        if let Err(errors) = reports::validate_new_report(&form) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::BadRequest(message));
        }

        let report = reports::build_report(&form, user.id, Utc::now());
        self.db.insert_report(&report).await?;
        Ok(report)
    }

    pub async fn list_my_reports(
        &self,
        user: &Profile,
        filter: &ReportFilter,
    ) -> ApiResult<Vec<Report>> {
        let mut reports = self.db.list_reports_by_user(user.id).await?;
        filter.apply(&mut reports);
        Ok(reports)
    }

    pub async fn get_report(&self, id: Uuid) -> ApiResult<Report> {
        self.db
            .fetch_report(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Report {} not found", id)))
    }

    pub async fn list_all_reports(
        &self,
        admin: &Profile,
        status: Option<ReportStatus>,
    ) -> ApiResult<Vec<Report>> {
        self.require_admin(admin)?;
        Ok(self.db.list_reports(status).await?)
    }

    pub async fn update_report_status(
        &self,
        admin: &Profile,
        id: Uuid,
        change: StatusChange,
    ) -> ApiResult<Report> {
        self.require_admin(admin)?;

        let update = change.into_update();
        let report = self
            .db
            .update_report(id, &update, Utc::now())
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Report {} not found", id)))?;

        info!("Report {} set to {} by {}", id, report.status, admin.id);
        Ok(report)
    }

    /// Apply one status (and routing) to many reports, a chunk at a time
    pub async fn batch_update(&self, admin: &Profile, batch: BatchUpdate) -> ApiResult<BatchResult> {
        self.require_admin(admin)?;
        let update = batch.to_update().map_err(ApiError::BadRequest)?;

        let now = Utc::now();
        let mut updated = 0;
        for chunk in batch.ids.chunks(BATCH_CHUNK_SIZE) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|id| self.db.update_report(*id, &update, now)),
            )
            .await;

            for result in results {
                if result?.is_some() {
                    updated += 1;
                }
            }
        }

        info!(
            "Batch update by {}: {}/{} reports set to {}",
            admin.id,
            updated,
            batch.ids.len(),
            update.status
        );
        Ok(BatchResult {
            requested: batch.ids.len(),
            updated,
        })
    }

    pub async fn admin_overview(&self, admin: &Profile) -> ApiResult<AdminOverview> {
        self.require_admin(admin)?;
        let admin_count = self.db.count_admins().await?;
        let counts = self.db.count_reports_by_status().await?;
        Ok(AdminOverview {
            admin_count,
            total_reports: counts.total(),
            reports: counts,
            single_admin: admin_count <= 1,
        })
    }

    // ========================================================================
    // ADMIN INVITES
    // ========================================================================

    pub async fn create_invite(&self, admin: &Profile, email: &str) -> ApiResult<CreatedInvite> {
        self.require_admin(admin)?;

        let normalized = invite::normalize_email(email)?;
        let pending = self.db.has_pending_invite(&normalized).await?;
        let existing = self.db.fetch_profile_by_email(&normalized).await?;
        let email = invite::check_new_invite(&normalized, pending, existing.as_ref())?;

        let record = invite::new_invite(
            &email,
            admin.id,
            Utc::now(),
            self.config.invites.expiry_days,
        );
        self.db.insert_invite(&record).await?;

        Ok(CreatedInvite {
            accept_url: invite::accept_url(self.config.public_url(), &record.token),
            invite: record,
        })
    }

    pub async fn list_pending_invites(&self, admin: &Profile) -> ApiResult<Vec<AdminInvite>> {
        self.require_admin(admin)?;
        Ok(self.db.list_pending_invites().await?)
    }

    pub async fn revoke_invite(&self, admin: &Profile, id: Uuid) -> ApiResult<()> {
        self.require_admin(admin)?;
        if !self.db.revoke_invite(id).await? {
            return Err(ApiError::not_found("No pending invitation with that id"));
        }
        info!("Invite {} revoked by {}", id, admin.id);
        Ok(())
    }

    pub async fn check_invite(&self, token: &str) -> ApiResult<InviteCheck> {
        let record = self.db.fetch_invite_by_token(token).await?;
        let status = invite::classify(record.as_ref(), Utc::now());
        let (email, expires_at) = match (&record, status) {
            (Some(inv), InviteValidity::Valid) => (Some(inv.email.clone()), Some(inv.expires_at)),
            _ => (None, None),
        };
        Ok(InviteCheck {
            status,
            message: status.message().to_string(),
            email,
            expires_at,
        })
    }

    /// Accept an invite and promote the caller
    pub async fn accept_invite(&self, user: &Profile, token: &str) -> ApiResult<Profile> {
        let now = Utc::now();
        let record = self.db.fetch_invite_by_token(token).await?;

        let record = match (invite::classify(record.as_ref(), now), record) {
            (InviteValidity::Valid, Some(record)) => record,
            (status @ (InviteValidity::Expired | InviteValidity::Used), _) => {
                return Err(ApiError::conflict(status.message()))
            }
            (status, _) => return Err(ApiError::not_found(status.message())),
        };

        if !self.db.accept_invite(record.id, user.id, now).await? {
            return Err(ApiError::conflict(InviteValidity::Used.message()));
        }

        info!("User {} accepted admin invite {}", user.id, record.id);
        self.get_profile(user).await
    }

    // ========================================================================
    // SETUP
    // ========================================================================

    fn setup_key_required(&self, peer: IpAddr) -> bool {
        self.config.setup_key().is_some() && !peer.is_loopback()
    }

    pub async fn setup_status(&self, peer: IpAddr) -> ApiResult<SetupStatus> {
        Ok(SetupStatus {
            admin_exists: self.db.count_admins().await? > 0,
            setup_key_required: self.setup_key_required(peer),
        })
    }

    /// Promote the caller to the first administrator
    pub async fn setup_admin(
        &self,
        user: &Profile,
        key: Option<&str>,
        peer: IpAddr,
    ) -> ApiResult<Profile> {
        if self.db.count_admins().await? > 0 {
            return Err(ApiError::conflict("An administrator already exists"));
        }

        if self.setup_key_required(peer) && key.map(str::trim) != self.config.setup_key() {
            warn!("Rejected admin setup from {} with a wrong setup key", peer);
            return Err(ApiError::forbidden("Invalid setup key"));
        }

        if !self.db.promote_first_admin(user.id).await? {
            return Err(ApiError::conflict("An administrator already exists"));
        }

        let log = AdminLog {
            id: Uuid::new_v4(),
            action: "initial_setup".to_string(),
            user_id: user.id,
            details: Some(format!("First administrator {} created", user.email)),
            created_at: Utc::now(),
        };
        if let Err(e) = self.db.insert_admin_log(&log).await {
            warn!("Failed to write initial_setup admin log: {}", e);
        }

        info!("User {} is now the first administrator", user.id);
        self.get_profile(user).await
    }

    // ========================================================================
    // GEOCODING
    // ========================================================================

    pub async fn reverse_geocode(&self, lat: f64, lon: f64) -> ApiResult<Option<String>> {
        let geocoder = self
            .geocoder
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("geocoding not configured"))?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ApiError::bad_request("Coordinates out of range"));
        }

        Ok(geocoder.reverse(lat, lon).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Arc;

    use crate::database::Database;
    use crate::models::{InviteStatus, Role};
    use crate::reference_db::ReferenceDb;
    use crate::reports::SortOrder;

    fn service_with(db: Arc<ReferenceDb>, config: Config) -> TrashClick {
        TrashClick::new(db, config)
    }

    fn service() -> (TrashClick, Arc<ReferenceDb>) {
        let db = Arc::new(ReferenceDb::new());
        (service_with(db.clone(), Config::default()), db)
    }

    async fn user(svc: &TrashClick, email: &str, name: &str) -> Profile {
        svc.register(RegisterRequest {
            email: email.to_string(),
            password: "s3cret-pass".to_string(),
            full_name: Some(name.to_string()),
            username: None,
        })
        .await
        .unwrap()
        .profile
    }

    async fn admin(svc: &TrashClick, db: &ReferenceDb, email: &str) -> Profile {
        let mut profile = user(svc, email, "Admin").await;
        db.set_role(profile.id, Role::Admin).await.unwrap();
        profile.role = Role::Admin;
        profile
    }

    fn form(description: &str) -> NewReport {
        NewReport {
            description: description.to_string(),
            location: "Riverside Park".to_string(),
            municipality: Some("parks-recreation".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_login_authenticate() {
        let (svc, db) = service();
        let session = svc
            .register(RegisterRequest {
                email: "Ana@Example.org".to_string(),
                password: "s3cret-pass".to_string(),
                full_name: Some("Ana".to_string()),
                username: Some("ana_eco".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(session.profile.email, "ana@example.org");

        let me = svc.authenticate(&session.token).await.unwrap();
        assert_eq!(me.id, session.profile.id);

        let duplicate = svc
            .register(RegisterRequest {
                email: "ana@example.org".to_string(),
                password: "another-pass".to_string(),
                full_name: None,
                username: None,
            })
            .await;
        assert!(matches!(duplicate, Err(ApiError::Conflict(_))));
        assert_eq!(db.list_profiles().await.unwrap().len(), 1);

        let wrong = svc
            .login(LoginRequest {
                email: "ana@example.org".to_string(),
                password: "nope-nope".to_string(),
            })
            .await;
        assert!(matches!(wrong, Err(ApiError::Unauthorized(_))));

        let login = svc
            .login(LoginRequest {
                email: "ana@example.org".to_string(),
                password: "s3cret-pass".to_string(),
            })
            .await
            .unwrap();
        svc.logout(&login.token).await.unwrap();
        assert!(matches!(
            svc.authenticate(&login.token).await,
            Err(ApiError::Unauthorized(_))
        ));
        // The first session is unaffected
        assert!(svc.authenticate(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (svc, _db) = service();
        let short = svc
            .register(RegisterRequest {
                email: "a@b.org".to_string(),
                password: "123".to_string(),
                full_name: None,
                username: None,
            })
            .await;
        assert!(matches!(short, Err(ApiError::BadRequest(_))));

        let no_at = svc
            .register(RegisterRequest {
                email: "not-an-email".to_string(),
                password: "123456".to_string(),
                full_name: None,
                username: None,
            })
            .await;
        assert!(matches!(no_at, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_submit_and_list_reports() {
        let (svc, _db) = service();
        let me = user(&svc, "citizen@example.org", "Citizen").await;

        let too_short = svc.submit_report(&me, form("trash")).await;
        assert!(matches!(too_short, Err(ApiError::BadRequest(_))));

        let first = svc
            .submit_report(&me, form("Overflowing bins near the playground"))
            .await
            .unwrap();
        assert_eq!(first.status, ReportStatus::Pending);
        assert_eq!(first.user_id, Some(me.id));

        svc.submit_report(&me, form("Plastic bags caught in the hedge"))
            .await
            .unwrap();

        let filter = ReportFilter {
            search: Some("PLAYGROUND".to_string()),
            ..Default::default()
        };
        let found = svc.list_my_reports(&me, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, first.id);

        let oldest = ReportFilter {
            sort: SortOrder::Oldest,
            ..Default::default()
        };
        let all = svc.list_my_reports(&me, &oldest).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].created_at <= all[1].created_at);

        assert!(matches!(
            svc.get_report(Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_admin_triage_requires_admin() {
        let (svc, db) = service();
        let citizen = user(&svc, "citizen@example.org", "Citizen").await;
        let boss = admin(&svc, &db, "boss@example.org").await;
        let report = svc
            .submit_report(&citizen, form("Oil spill at the harbour steps"))
            .await
            .unwrap();

        let change = StatusChange {
            status: ReportStatus::Resolved,
            municipality: Some("unassigned".to_string()),
            notes: Some("Cleaned by crew 4".to_string()),
            verified: Some(true),
            clean_up: None,
        };
        assert!(matches!(
            svc.update_report_status(&citizen, report.id, change.clone())
                .await,
            Err(ApiError::Forbidden(_))
        ));

        let updated = svc
            .update_report_status(&boss, report.id, change)
            .await
            .unwrap();
        assert_eq!(updated.status, ReportStatus::Resolved);
        assert_eq!(updated.municipality, None);
        assert_eq!(updated.notes.as_deref(), Some("Cleaned by crew 4"));
        assert!(updated.verified);

        let dashboard = svc.dashboard(&citizen).await.unwrap();
        assert_eq!(dashboard.stats.resolved, 1);
        assert_eq!(dashboard.stats.points, 30);

        let board = svc.leaderboard(None).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, citizen.id);
        assert_eq!(board[0].rank, 1);
    }

    #[tokio::test]
    async fn test_batch_update_in_chunks() {
        let (svc, db) = service();
        let citizen = user(&svc, "citizen@example.org", "Citizen").await;
        let boss = admin(&svc, &db, "boss@example.org").await;

        let mut ids = Vec::new();
        for i in 0..23 {
            let report = svc
                .submit_report(&citizen, form(&format!("Litter pile number {}", i)))
                .await
                .unwrap();
            ids.push(report.id);
        }
        ids.push(Uuid::new_v4());

        let result = svc
            .batch_update(
                &boss,
                BatchUpdate {
                    ids,
                    status: Some(ReportStatus::InProgress),
                    municipality: Some("public-works".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.requested, 24);
        assert_eq!(result.updated, 23);

        let routed = svc
            .list_all_reports(&boss, Some(ReportStatus::InProgress))
            .await
            .unwrap();
        assert_eq!(routed.len(), 23);
        assert!(routed
            .iter()
            .all(|r| r.municipality.as_deref() == Some("public-works")));

        let empty = svc
            .batch_update(
                &boss,
                BatchUpdate {
                    ids: vec![],
                    status: Some(ReportStatus::Resolved),
                    municipality: None,
                },
            )
            .await;
        assert!(matches!(empty, Err(ApiError::BadRequest(_))));

        let overview = svc.admin_overview(&boss).await.unwrap();
        assert_eq!(overview.admin_count, 1);
        assert!(overview.single_admin);
        assert_eq!(overview.reports.in_progress, 23);
        assert_eq!(overview.total_reports, 23);
    }

    #[tokio::test]
    async fn test_invite_lifecycle() {
        let (svc, db) = service();
        let boss = admin(&svc, &db, "boss@example.org").await;
        let invitee = user(&svc, "helper@example.org", "Helper").await;

        assert!(matches!(
            svc.create_invite(&invitee, "x@example.org").await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            svc.create_invite(&boss, "boss@example.org").await,
            Err(ApiError::Conflict(_))
        ));

        let created = svc
            .create_invite(&boss, " Helper@Example.org ")
            .await
            .unwrap();
        assert_eq!(created.invite.email, "helper@example.org");
        assert!(created
            .accept_url
            .ends_with(&format!("/admin/accept-invite?token={}", created.invite.token)));

        assert!(matches!(
            svc.create_invite(&boss, "helper@example.org").await,
            Err(ApiError::Conflict(_))
        ));

        let check = svc.check_invite(&created.invite.token).await.unwrap();
        assert_eq!(check.status, InviteValidity::Valid);
        assert_eq!(check.email.as_deref(), Some("helper@example.org"));

        let promoted = svc
            .accept_invite(&invitee, &created.invite.token)
            .await
            .unwrap();
        assert!(promoted.is_admin());

        let used = svc.check_invite(&created.invite.token).await.unwrap();
        assert_eq!(used.status, InviteValidity::Used);
        assert!(used.email.is_none());
        assert!(matches!(
            svc.accept_invite(&invitee, &created.invite.token).await,
            Err(ApiError::Conflict(_))
        ));

        assert!(matches!(
            svc.accept_invite(&invitee, "no-such-token").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(svc.list_pending_invites(&boss).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_and_expired_invites() {
        let (svc, db) = service();
        let boss = admin(&svc, &db, "boss@example.org").await;
        let invitee = user(&svc, "late@example.org", "Late").await;

        let created = svc.create_invite(&boss, "late@example.org").await.unwrap();
        svc.revoke_invite(&boss, created.invite.id).await.unwrap();
        assert!(matches!(
            svc.revoke_invite(&boss, created.invite.id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            svc.accept_invite(&invitee, &created.invite.token).await,
            Err(ApiError::NotFound(_))
        ));

        let mut expired = invite::new_invite("late@example.org", boss.id, Utc::now(), 7);
        expired.expires_at = Utc::now() - chrono::Duration::hours(1);
        db.insert_invite(&expired).await.unwrap();
        assert_eq!(expired.status, InviteStatus::Pending);

        assert_eq!(
            svc.check_invite(&expired.token).await.unwrap().status,
            InviteValidity::Expired
        );
        assert!(matches!(
            svc.accept_invite(&invitee, &expired.token).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_first_admin() {
        let db = Arc::new(ReferenceDb::new());
        let mut config = Config::default();
        config.admin.setup_key = "open-sesame".to_string();
        let svc = service_with(db.clone(), config);

        let first = user(&svc, "first@example.org", "First").await;
        let remote = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
        let local = IpAddr::V6(Ipv6Addr::LOCALHOST);

        let status = svc.setup_status(remote).await.unwrap();
        assert!(!status.admin_exists);
        assert!(status.setup_key_required);
        assert!(!svc.setup_status(local).await.unwrap().setup_key_required);

        assert!(matches!(
            svc.setup_admin(&first, Some("wrong"), remote).await,
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            svc.setup_admin(&first, None, remote).await,
            Err(ApiError::Forbidden(_))
        ));

        let promoted = svc
            .setup_admin(&first, Some("open-sesame"), remote)
            .await
            .unwrap();
        assert!(promoted.is_admin());

        let logs = db.admin_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, "initial_setup");

        let second = user(&svc, "second@example.org", "Second").await;
        assert!(matches!(
            svc.setup_admin(&second, None, local).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(svc.setup_status(local).await.unwrap().admin_exists);
    }

    #[tokio::test]
    async fn test_municipalities_seed_and_create() {
        let (svc, _db) = service();
        let me = user(&svc, "clerk@example.org", "Clerk").await;

        let seeded = svc.list_municipalities().await.unwrap();
        assert_eq!(seeded.len(), 5);
        assert!(seeded.windows(2).all(|w| w[0].name <= w[1].name));

        let created = svc
            .create_municipality(&me, "  Harbour Authority ")
            .await
            .unwrap();
        assert_eq!(created.id, "harbour-authority");
        assert_eq!(created.name, "Harbour Authority");
        assert_eq!(svc.list_municipalities().await.unwrap().len(), 6);

        let members = svc.municipality_members("harbour-authority").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, me.id);
        assert_eq!(members[0].role, MemberRole::Admin);

        assert!(matches!(
            svc.create_municipality(&me, "   ").await,
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_create_municipality_rejects_existing_id() {
        let (svc, _db) = service();
        svc.list_municipalities().await.unwrap();
        let clerk = user(&svc, "clerk@city.gov", "Clerk").await;
        let mallory = user(&svc, "mallory@example.org", "Mallory").await;

        let hall = svc.create_municipality(&clerk, "Harbour Hall").await.unwrap();
        assert_eq!(hall.id, "harbour-hall");

        for name in ["HARBOUR HALL!!", "City Hall"] {
            assert!(matches!(
                svc.create_municipality(&mallory, name).await,
                Err(ApiError::Conflict(_))
            ));
        }

        let all = svc.list_municipalities().await.unwrap();
        let names: Vec<&str> = all.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"Harbour Hall"));
        assert!(names.contains(&"City Hall"));
        assert!(!names.contains(&"HARBOUR HALL!!"));

        let members = svc.municipality_members("harbour-hall").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, clerk.id);
        assert!(svc.municipality_members("city-hall").await.unwrap().is_empty());

        let mallory = svc.get_profile(&mallory).await.unwrap();
        assert!(mallory.municipality_id.is_none());
        assert!(svc.department_reports(&mallory).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_department_reports_follow_membership() {
        let (svc, db) = service();
        svc.list_municipalities().await.unwrap();
        let boss = admin(&svc, &db, "boss@city.gov").await;
        let citizen = user(&svc, "citizen@example.org", "Citizen").await;
        let clerk = user(&svc, "clerk@example.org", "Clerk").await;

        svc.submit_report(&citizen, form("Broken bench covered in graffiti"))
            .await
            .unwrap();

        // Self-service edits cannot route a user to a department
        let patch: ProfilePatch = serde_json::from_str(
            r#"{"full_name": "Sneaky", "municipality_id": "parks-recreation"}"#,
        )
        .unwrap();
        let citizen = svc.update_profile(&citizen, patch).await.unwrap();
        assert_eq!(citizen.full_name.as_deref(), Some("Sneaky"));
        assert!(citizen.municipality_id.is_none());
        assert!(svc.department_reports(&citizen).await.unwrap().is_empty());

        let denied = svc
            .add_member(
                &citizen,
                "parks-recreation",
                AddMemberRequest {
                    email: "citizen@example.org".to_string(),
                    role: None,
                },
            )
            .await;
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        let members = svc
            .add_member(
                &boss,
                "parks-recreation",
                AddMemberRequest {
                    email: "Clerk@Example.org".to_string(),
                    role: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, MemberRole::Member);

        let clerk = svc.get_profile(&clerk).await.unwrap();
        assert_eq!(clerk.municipality_id.as_deref(), Some("parks-recreation"));
        assert_eq!(svc.department_reports(&clerk).await.unwrap().len(), 1);

        // A saved profile edit keeps the assignment
        let clerk = svc
            .update_profile(
                &clerk,
                ProfilePatch {
                    website: Some("https://parks.example".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(clerk.municipality_id.as_deref(), Some("parks-recreation"));

        let missing = svc
            .add_member(
                &boss,
                "nowhere",
                AddMemberRequest {
                    email: "clerk@example.org".to_string(),
                    role: None,
                },
            )
            .await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));

        let unknown = svc
            .add_member(
                &boss,
                "parks-recreation",
                AddMemberRequest {
                    email: "ghost@example.org".to_string(),
                    role: None,
                },
            )
            .await;
        assert!(matches!(unknown, Err(ApiError::NotFound(_))));

        let bad_name = svc
            .update_profile(
                &clerk,
                ProfilePatch {
                    username: Some("no spaces allowed".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad_name, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_department_admin_can_add_members() {
        let (svc, _db) = service();
        let owner = user(&svc, "owner@harbour.gov", "Owner").await;
        let crew = user(&svc, "crew@harbour.gov", "Crew").await;

        svc.create_municipality(&owner, "Harbour Authority")
            .await
            .unwrap();
        let owner = svc.get_profile(&owner).await.unwrap();
        assert_eq!(owner.municipality_id.as_deref(), Some("harbour-authority"));

        let members = svc
            .add_member(
                &owner,
                "harbour-authority",
                AddMemberRequest {
                    email: "crew@harbour.gov".to_string(),
                    role: Some(MemberRole::Member),
                },
            )
            .await
            .unwrap();
        assert_eq!(members.len(), 2);

        let crew = svc.get_profile(&crew).await.unwrap();
        let denied = svc
            .add_member(
                &crew,
                "harbour-authority",
                AddMemberRequest {
                    email: "crew@harbour.gov".to_string(),
                    role: Some(MemberRole::Admin),
                },
            )
            .await;
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_geocoding_disabled_without_key() {
        let (svc, _db) = service();
        match svc.reverse_geocode(52.37, 4.89).await {
            Err(ApiError::BadRequest(msg)) => assert_eq!(msg, "geocoding not configured"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
