//! In-memory database driver
//!
//! Every table is a map behind its own lock. Locks are never held across an
//! await point.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::database::Database;
use crate::models::{
    AdminInvite, AdminLog, Credentials, InviteStatus, MemberRole, Municipality,
    MunicipalityMember, Profile, Report, ReportStatus, Role, Session, StatusUpdate,
};
use crate::reports::{sort_reports, SortOrder, StatusCounts};

#[derive(Default)]
pub struct ReferenceDb {
    profiles: RwLock<HashMap<Uuid, Profile>>,
    credentials: RwLock<HashMap<String, Credentials>>,
    sessions: RwLock<HashMap<String, Session>>,
    reports: RwLock<HashMap<Uuid, Report>>,
    invites: RwLock<HashMap<Uuid, AdminInvite>>,
    municipalities: RwLock<HashMap<String, Municipality>>,
    members: RwLock<Vec<(String, Uuid, MemberRole, DateTime<Utc>)>>,
    admin_logs: Mutex<Vec<AdminLog>>,
}

impl ReferenceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries written so far
    pub fn admin_logs(&self) -> Vec<AdminLog> {
        self.admin_logs.lock().clone()
    }

    fn collect_reports(&self, pred: impl Fn(&Report) -> bool) -> Vec<Report> {
        let mut out: Vec<Report> = self
            .reports
            .read()
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect();
        sort_reports(&mut out, SortOrder::Newest);
        out
    }
}

#[async_trait]
impl Database for ReferenceDb {
    async fn insert_profile(&self, profile: &Profile) -> Result<()> {
        self.profiles
            .write()
            .entry(profile.id)
            .or_insert_with(|| profile.clone());
        Ok(())
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        Ok(self.profiles.read().get(&id).cloned())
    }

    async fn fetch_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        Ok(self
            .profiles
            .read()
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let mut profiles: Vec<Profile> = self.profiles.read().values().cloned().collect();
        profiles.sort_by_key(|p| p.created_at);
        Ok(profiles)
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        let mut profiles = self.profiles.write();
        match profiles.get_mut(&profile.id) {
            Some(existing) => {
                existing.username = profile.username.clone();
                existing.full_name = profile.full_name.clone();
                existing.avatar_url = profile.avatar_url.clone();
                existing.website = profile.website.clone();
                existing.updated_at = profile.updated_at;
                Ok(())
            }
            None => Err(anyhow::anyhow!("profile {} not found", profile.id)),
        }
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<bool> {
        let mut profiles = self.profiles.write();
        Ok(match profiles.get_mut(&user_id) {
            Some(p) => {
                p.role = role;
                p.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn count_admins(&self) -> Result<u64> {
        Ok(self
            .profiles
            .read()
            .values()
            .filter(|p| p.is_admin())
            .count() as u64)
    }

    async fn promote_first_admin(&self, user_id: Uuid) -> Result<bool> {
        let mut profiles = self.profiles.write();
        if profiles.values().any(|p| p.is_admin()) {
            return Ok(false);
        }
        Ok(match profiles.get_mut(&user_id) {
            Some(p) => {
                p.role = Role::Admin;
                p.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn create_account(&self, profile: &Profile, credentials: &Credentials) -> Result<bool> {
        let mut creds = self.credentials.write();
        let mut profiles = self.profiles.write();
        let key = credentials.email.to_lowercase();
        if creds.contains_key(&key)
            || profiles.contains_key(&profile.id)
            || profiles.values().any(|p| p.email.eq_ignore_ascii_case(&profile.email))
        {
            return Ok(false);
        }
        profiles.insert(profile.id, profile.clone());
        creds.insert(key, credentials.clone());
        Ok(true)
    }

    async fn fetch_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        Ok(self.credentials.read().get(&email.to_lowercase()).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn fetch_session(&self, token_hash: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.sessions.write().remove(token_hash);
        Ok(())
    }

    async fn insert_report(&self, report: &Report) -> Result<()> {
        let mut reports = self.reports.write();
        if reports.contains_key(&report.id) {
            anyhow::bail!("report {} already exists", report.id);
        }
        reports.insert(report.id, report.clone());
        Ok(())
    }

    async fn fetch_report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.reports.read().get(&id).cloned())
    }

    async fn list_reports(&self, status: Option<ReportStatus>) -> Result<Vec<Report>> {
        Ok(self.collect_reports(|r| status.map_or(true, |s| r.status == s)))
    }

    async fn list_reports_by_user(&self, user_id: Uuid) -> Result<Vec<Report>> {
        Ok(self.collect_reports(|r| r.user_id == Some(user_id)))
    }

    async fn list_reports_by_municipality(&self, municipality_id: &str) -> Result<Vec<Report>> {
        Ok(self.collect_reports(|r| r.municipality.as_deref() == Some(municipality_id)))
    }

    async fn update_report(
        &self,
        id: Uuid,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let mut reports = self.reports.write();
        Ok(reports.get_mut(&id).map(|report| {
            update.apply(report, now);
            report.clone()
        }))
    }

    async fn count_reports_by_status(&self) -> Result<StatusCounts> {
        let mut counts = StatusCounts::default();
        for report in self.reports.read().values() {
            counts.add(report.status, 1);
        }
        Ok(counts)
    }

    async fn insert_invite(&self, invite: &AdminInvite) -> Result<()> {
        self.invites.write().insert(invite.id, invite.clone());
        Ok(())
    }

    async fn fetch_invite_by_token(&self, token: &str) -> Result<Option<AdminInvite>> {
        Ok(self
            .invites
            .read()
            .values()
            .find(|i| i.token == token)
            .cloned())
    }

    async fn has_pending_invite(&self, email: &str) -> Result<bool> {
        Ok(self
            .invites
            .read()
            .values()
            .any(|i| i.status == InviteStatus::Pending && i.email.eq_ignore_ascii_case(email)))
    }

    async fn list_pending_invites(&self) -> Result<Vec<AdminInvite>> {
        let mut out: Vec<AdminInvite> = self
            .invites
            .read()
            .values()
            .filter(|i| i.status == InviteStatus::Pending)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn revoke_invite(&self, id: Uuid) -> Result<bool> {
        let mut invites = self.invites.write();
        Ok(match invites.get_mut(&id) {
            Some(i) if i.status == InviteStatus::Pending => {
                i.status = InviteStatus::Revoked;
                true
            }
            _ => false,
        })
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // Lock order: invites, then profiles
        let mut invites = self.invites.write();
        let mut profiles = self.profiles.write();

        let Some(invite) = invites.get_mut(&invite_id) else {
            return Ok(false);
        };
        if invite.status != InviteStatus::Pending {
            return Ok(false);
        }
        let Some(profile) = profiles.get_mut(&user_id) else {
            return Ok(false);
        };

        invite.status = InviteStatus::Accepted;
        invite.accepted_by = Some(user_id);
        invite.accepted_at = Some(now);
        profile.role = Role::Admin;
        profile.updated_at = now;
        Ok(true)
    }

    async fn list_municipalities(&self) -> Result<Vec<Municipality>> {
        let mut out: Vec<Municipality> = self.municipalities.read().values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn upsert_municipality(&self, municipality: &Municipality) -> Result<()> {
        self.municipalities
            .write()
            .insert(municipality.id.clone(), municipality.clone());
        Ok(())
    }

    async fn create_municipality(&self, municipality: &Municipality, owner: Uuid) -> Result<bool> {
        let mut municipalities = self.municipalities.write();
        let mut members = self.members.write();
        let mut profiles = self.profiles.write();

        if municipalities.contains_key(&municipality.id) {
            return Ok(false);
        }
        let Some(profile) = profiles.get_mut(&owner) else {
            anyhow::bail!("profile {} not found", owner);
        };

        municipalities.insert(municipality.id.clone(), municipality.clone());
        members.push((municipality.id.clone(), owner, MemberRole::Admin, Utc::now()));
        profile.municipality_id = Some(municipality.id.clone());
        profile.updated_at = Utc::now();
        Ok(true)
    }

    async fn add_member(
        &self,
        municipality_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<bool> {
        let municipalities = self.municipalities.read();
        let mut members = self.members.write();
        let mut profiles = self.profiles.write();

        if !municipalities.contains_key(municipality_id) {
            return Ok(false);
        }
        let Some(profile) = profiles.get_mut(&user_id) else {
            return Ok(false);
        };

        match members
            .iter_mut()
            .find(|(m, u, _, _)| m == municipality_id && *u == user_id)
        {
            Some(existing) => existing.2 = role,
            None => members.push((municipality_id.to_string(), user_id, role, Utc::now())),
        }
        profile.municipality_id = Some(municipality_id.to_string());
        profile.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_members(&self, municipality_id: &str) -> Result<Vec<MunicipalityMember>> {
        let members = self.members.read();
        let profiles = self.profiles.read();
        Ok(members
            .iter()
            .filter(|(m, _, _, _)| m == municipality_id)
            .map(|(m, user_id, role, joined_at)| {
                let profile = profiles.get(user_id);
                MunicipalityMember {
                    municipality_id: m.clone(),
                    user_id: *user_id,
                    role: *role,
                    email: profile.map(|p| p.email.clone()),
                    full_name: profile.and_then(|p| p.full_name.clone()),
                    joined_at: *joined_at,
                }
            })
            .collect())
    }

    async fn insert_admin_log(&self, log: &AdminLog) -> Result<()> {
        self.admin_logs.lock().push(log.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invite::new_invite;
    use tokio_test::{assert_ok, assert_err};

    #[tokio::test]
    async fn test_accept_invite_is_single_use() {
        let db = ReferenceDb::new();
        let user = Profile::new(Uuid::new_v4(), "new@admin.org");
        db.insert_profile(&user).await.unwrap();
        let invite = new_invite("new@admin.org", Uuid::new_v4(), Utc::now(), 7);
        db.insert_invite(&invite).await.unwrap();

        assert!(db.accept_invite(invite.id, user.id, Utc::now()).await.unwrap());
        assert!(!db.accept_invite(invite.id, user.id, Utc::now()).await.unwrap());

        let stored = db.fetch_invite_by_token(&invite.token).await.unwrap().unwrap();
        assert_eq!(stored.status, InviteStatus::Accepted);
        assert_eq!(stored.accepted_by, Some(user.id));
        assert!(db.fetch_profile(user.id).await.unwrap().unwrap().is_admin());
    }

    #[tokio::test]
    async fn test_promote_first_admin_only_once() {
        let db = ReferenceDb::new();
        let a = Profile::new(Uuid::new_v4(), "a@x.org");
        let b = Profile::new(Uuid::new_v4(), "b@x.org");
        db.insert_profile(&a).await.unwrap();
        db.insert_profile(&b).await.unwrap();

        assert!(db.promote_first_admin(a.id).await.unwrap());
        assert!(!db.promote_first_admin(b.id).await.unwrap());
        assert_eq!(db.count_admins().await.unwrap(), 1);
    }

    fn account(email: &str) -> (Profile, Credentials) {
        let id = Uuid::new_v4();
        let credentials = Credentials {
            user_id: id,
            email: email.to_string(),
            password_hash: "x".to_string(),
        };
        (Profile::new(id, email), credentials)
    }

    #[tokio::test]
    async fn test_accounts_unique_by_email() {
        let db = ReferenceDb::new();
        let (profile, creds) = account("Ada@Example.org");
        assert!(db.create_account(&profile, &creds).await.unwrap());

        let (dup_profile, dup_creds) = account("ada@example.org");
        assert!(!db.create_account(&dup_profile, &dup_creds).await.unwrap());
        assert!(db.fetch_profile(dup_profile.id).await.unwrap().is_none());

        let stored = db.fetch_credentials("ADA@example.org").await.unwrap().unwrap();
        assert_eq!(stored.user_id, profile.id);
        assert_eq!(db.list_profiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_municipality_never_takes_over() {
        let db = ReferenceDb::new();
        let (clerk, clerk_creds) = account("clerk@city.gov");
        let (other, other_creds) = account("other@example.org");
        db.create_account(&clerk, &clerk_creds).await.unwrap();
        db.create_account(&other, &other_creds).await.unwrap();

        let hall = Municipality::new("city-hall", "City Hall");
        assert!(db.create_municipality(&hall, clerk.id).await.unwrap());

        let renamed = Municipality::new("city-hall", "CITY HALL!!");
        assert!(!db.create_municipality(&renamed, other.id).await.unwrap());

        let all = db.list_municipalities().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "City Hall");

        let members = db.list_members("city-hall").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, clerk.id);
        assert!(db.fetch_profile(other.id).await.unwrap().unwrap().municipality_id.is_none());
    }

    #[tokio::test]
    async fn test_add_member_routes_profile() {
        let db = ReferenceDb::new();
        let (user, creds) = account("crew@city.gov");
        db.create_account(&user, &creds).await.unwrap();

        assert!(!db.add_member("nowhere", user.id, MemberRole::Member).await.unwrap());

        db.upsert_municipality(&Municipality::new("public-works", "Public Works"))
            .await
            .unwrap();
        assert!(!db
            .add_member("public-works", Uuid::new_v4(), MemberRole::Member)
            .await
            .unwrap());
        assert!(db.add_member("public-works", user.id, MemberRole::Member).await.unwrap());
        assert!(db.add_member("public-works", user.id, MemberRole::Admin).await.unwrap());

        let members = db.list_members("public-works").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, MemberRole::Admin);
        let profile = db.fetch_profile(user.id).await.unwrap().unwrap();
        assert_eq!(profile.municipality_id.as_deref(), Some("public-works"));
    }

    #[tokio::test]
    async fn test_duplicate_report_rejected() {
        let db = ReferenceDb::new();
        let now = Utc::now();
        let report = crate::reports::build_report(
            &crate::reports::NewReport {
                description: "Graffiti on the bridge".to_string(),
                location: "North Bridge".to_string(),
                municipality: Some("public-works".to_string()),
                ..Default::default()
            },
            Uuid::new_v4(),
            now,
        );
        assert_ok!(db.insert_report(&report).await);
        assert_err!(db.insert_report(&report).await);
    }

    #[tokio::test]
    async fn test_revoke_only_pending() {
        let db = ReferenceDb::new();
        let invite = new_invite("x@y.org", Uuid::new_v4(), Utc::now(), 7);
        db.insert_invite(&invite).await.unwrap();
        assert!(db.has_pending_invite("X@Y.org").await.unwrap());
        assert!(db.revoke_invite(invite.id).await.unwrap());
        assert!(!db.revoke_invite(invite.id).await.unwrap());
        assert!(!db.has_pending_invite("x@y.org").await.unwrap());
        assert!(db.list_pending_invites().await.unwrap().is_empty());
    }
}
