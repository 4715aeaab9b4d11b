//! PostgreSQL Storage for TrashClick
//!
//! Provides persistent storage for reports, profiles, invites and sessions.
//! Connects to PostgreSQL with DATABASE_URL.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::models::{
    AdminInvite, AdminLog, Credentials, InviteStatus, MemberRole, Municipality,
    MunicipalityMember, Profile, Report, ReportStatus, Role, Session, StatusUpdate,
};
use crate::reports::StatusCounts;

/// Embedded migrations, applied in order
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (1, "001_schema", include_str!("../migrations/001_schema.sql")),
    (
        2,
        "002_municipality_members",
        include_str!("../migrations/002_municipality_members.sql"),
    ),
];

const REPORT_COLUMNS: &str = "id, user_id, description, location, latitude, longitude, image_url, \
     status, municipality, notes, verified, clean_up, created_at, updated_at";

const PROFILE_COLUMNS: &str = "id, email, username, full_name, avatar_url, website, role, \
     municipality_id, created_at, updated_at";

const INVITE_COLUMNS: &str =
    "id, email, token, invited_by, status, created_at, expires_at, accepted_by, accepted_at";

// ============================================================================
// PG STORAGE
// ============================================================================

#[derive(Clone)]
pub struct PgStorage {
    pool: Pool,
}

impl PgStorage {
    /// Create storage from DATABASE_URL
    pub async fn new(database_url: &str, settings: &DatabaseConfig) -> Result<Self> {
        use deadpool_postgres::{ManagerConfig, PoolConfig, RecyclingMethod};
        use std::time::Duration;

        let mut config = Config::new();
        config.url = Some(database_url.to_string());

        config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        config.pool = Some(PoolConfig {
            max_size: settings.pool_max_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(Duration::from_secs(settings.query_timeout_secs)),
                create: Some(Duration::from_secs(10)),
                recycle: Some(Duration::from_secs(30)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client
            .execute(
                &format!(
                    "SET statement_timeout = '{}s'",
                    settings.query_timeout_secs
                ),
                &[],
            )
            .await?;

        info!(
            "Connected to PostgreSQL (pool_size: {}, query_timeout: {}s)",
            settings.pool_max_size, settings.query_timeout_secs
        );

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create storage from DATABASE_URL environment variable
    pub async fn from_env(settings: &DatabaseConfig) -> Result<Self> {
        let url =
            std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
        Self::new(&url, settings).await
    }

    /// Run embedded migrations
    async fn run_migrations(&self) -> Result<()> {
        let client = self.pool.get().await?;

        // Check if migrations table exists
        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'schema_migrations')",
                &[],
            )
            .await?
            .get(0);

        for (version, name, sql) in MIGRATIONS {
            let applied: bool = if exists || *version > 1 {
                client
                    .query_one(
                        "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = $1)",
                        &[version],
                    )
                    .await?
                    .get(0)
            } else {
                false
            };

            if !applied {
                client.batch_execute(sql).await?;
                info!("Applied migration {}", name);
            }
        }

        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn row_to_report(r: &Row) -> Report {
    Report {
        id: r.get(0),
        user_id: r.get(1),
        description: r.get(2),
        location: r.get(3),
        latitude: r.get(4),
        longitude: r.get(5),
        image_url: r.get(6),
        status: r.get(7),
        municipality: r.get(8),
        notes: r.get(9),
        verified: r.get(10),
        clean_up: r.get(11),
        created_at: r.get(12),
        updated_at: r.get(13),
    }
}

fn row_to_profile(r: &Row) -> Profile {
    Profile {
        id: r.get(0),
        email: r.get(1),
        username: r.get(2),
        full_name: r.get(3),
        avatar_url: r.get(4),
        website: r.get(5),
        role: r.get(6),
        municipality_id: r.get(7),
        created_at: r.get(8),
        updated_at: r.get(9),
    }
}

fn row_to_invite(r: &Row) -> AdminInvite {
    AdminInvite {
        id: r.get(0),
        email: r.get(1),
        token: r.get(2),
        invited_by: r.get(3),
        status: r.get(4),
        created_at: r.get(5),
        expires_at: r.get(6),
        accepted_by: r.get(7),
        accepted_at: r.get(8),
    }
}

#[async_trait]
impl Database for PgStorage {
    // ========================================================================
    // PROFILES
    // ========================================================================

    async fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO profiles (id, email, username, full_name, avatar_url, website, role, municipality_id, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &profile.id,
                    &profile.email,
                    &profile.username,
                    &profile.full_name,
                    &profile.avatar_url,
                    &profile.website,
                    &profile.role,
                    &profile.municipality_id,
                    &profile.created_at,
                    &profile.updated_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn fetch_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM profiles WHERE id = $1", PROFILE_COLUMNS),
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(row_to_profile))
    }

    async fn fetch_profile_by_email(&self, email: &str) -> Result<Option<Profile>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM profiles WHERE LOWER(email) = LOWER($1)",
                    PROFILE_COLUMNS
                ),
                &[&email],
            )
            .await?;

        Ok(row.as_ref().map(row_to_profile))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!("SELECT {} FROM profiles ORDER BY created_at", PROFILE_COLUMNS),
                &[],
            )
            .await?;

        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn save_profile(&self, profile: &Profile) -> Result<()> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE profiles
                 SET username = $2, full_name = $3, avatar_url = $4, website = $5,
                     updated_at = $6
                 WHERE id = $1",
                &[
                    &profile.id,
                    &profile.username,
                    &profile.full_name,
                    &profile.avatar_url,
                    &profile.website,
                    &profile.updated_at,
                ],
            )
            .await?;

        if updated == 0 {
            anyhow::bail!("profile {} not found", profile.id);
        }
        Ok(())
    }

    async fn set_role(&self, user_id: Uuid, role: Role) -> Result<bool> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE profiles SET role = $2, updated_at = NOW() WHERE id = $1",
                &[&user_id, &role],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn count_admins(&self) -> Result<u64> {
        let client = self.pool.get().await?;

        let row = client
            .query_one("SELECT COUNT(*) FROM profiles WHERE role = 'admin'", &[])
            .await?;

        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn promote_first_admin(&self, user_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE profiles SET role = 'admin', updated_at = NOW()
                 WHERE id = $1
                   AND NOT EXISTS (SELECT 1 FROM profiles WHERE role = 'admin')",
                &[&user_id],
            )
            .await?;

        Ok(updated > 0)
    }

    // ========================================================================
    // CREDENTIALS & SESSIONS
    // ========================================================================

    async fn create_account(&self, profile: &Profile, credentials: &Credentials) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Profile first, credentials reference it
        let profile_inserted = tx
            .execute(
                "INSERT INTO profiles (id, email, username, full_name, avatar_url, website, role, municipality_id, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT DO NOTHING",
                &[
                    &profile.id,
                    &profile.email,
                    &profile.username,
                    &profile.full_name,
                    &profile.avatar_url,
                    &profile.website,
                    &profile.role,
                    &profile.municipality_id,
                    &profile.created_at,
                    &profile.updated_at,
                ],
            )
            .await?;

        if profile_inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let credentials_inserted = tx
            .execute(
                "INSERT INTO credentials (user_id, email, password_hash)
                 VALUES ($1, $2, $3)
                 ON CONFLICT DO NOTHING",
                &[
                    &credentials.user_id,
                    &credentials.email.to_lowercase(),
                    &credentials.password_hash,
                ],
            )
            .await?;

        if credentials_inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        debug!("Created account {}", profile.id);
        Ok(true)
    }

    async fn fetch_credentials(&self, email: &str) -> Result<Option<Credentials>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT user_id, email, password_hash FROM credentials WHERE LOWER(email) = LOWER($1)",
                &[&email],
            )
            .await?;

        Ok(row.map(|r| Credentials {
            user_id: r.get(0),
            email: r.get(1),
            password_hash: r.get(2),
        }))
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &session.token_hash,
                    &session.user_id,
                    &session.created_at,
                    &session.expires_at,
                ],
            )
            .await?;

        Ok(())
    }

    async fn fetch_session(&self, token_hash: &str) -> Result<Option<Session>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT token_hash, user_id, created_at, expires_at FROM sessions WHERE token_hash = $1",
                &[&token_hash],
            )
            .await?;

        Ok(row.map(|r| Session {
            token_hash: r.get(0),
            user_id: r.get(1),
            created_at: r.get(2),
            expires_at: r.get(3),
        }))
    }

    async fn delete_session(&self, token_hash: &str) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute("DELETE FROM sessions WHERE token_hash = $1", &[&token_hash])
            .await?;

        Ok(())
    }

    // ========================================================================
    // REPORTS
    // ========================================================================

    async fn insert_report(&self, report: &Report) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                &format!(
                    "INSERT INTO complaints ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                    REPORT_COLUMNS
                ),
                &[
                    &report.id,
                    &report.user_id,
                    &report.description,
                    &report.location,
                    &report.latitude,
                    &report.longitude,
                    &report.image_url,
                    &report.status,
                    &report.municipality,
                    &report.notes,
                    &report.verified,
                    &report.clean_up,
                    &report.created_at,
                    &report.updated_at,
                ],
            )
            .await?;

        info!("Recorded report {} ({})", report.id, report.location);
        Ok(())
    }

    async fn fetch_report(&self, id: Uuid) -> Result<Option<Report>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM complaints WHERE id = $1", REPORT_COLUMNS),
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(row_to_report))
    }

    async fn list_reports(&self, status: Option<ReportStatus>) -> Result<Vec<Report>> {
        let client = self.pool.get().await?;

        let rows = match status {
            Some(status) => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM complaints WHERE status = $1 ORDER BY created_at DESC",
                            REPORT_COLUMNS
                        ),
                        &[&status],
                    )
                    .await?
            }
            None => {
                client
                    .query(
                        &format!(
                            "SELECT {} FROM complaints ORDER BY created_at DESC",
                            REPORT_COLUMNS
                        ),
                        &[],
                    )
                    .await?
            }
        };

        Ok(rows.iter().map(row_to_report).collect())
    }

    async fn list_reports_by_user(&self, user_id: Uuid) -> Result<Vec<Report>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM complaints WHERE user_id = $1 ORDER BY created_at DESC",
                    REPORT_COLUMNS
                ),
                &[&user_id],
            )
            .await?;

        Ok(rows.iter().map(row_to_report).collect())
    }

    async fn list_reports_by_municipality(&self, municipality_id: &str) -> Result<Vec<Report>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM complaints WHERE municipality = $1 ORDER BY created_at DESC",
                    REPORT_COLUMNS
                ),
                &[&municipality_id],
            )
            .await?;

        Ok(rows.iter().map(row_to_report).collect())
    }

    async fn update_report(
        &self,
        id: Uuid,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let client = self.pool.get().await?;

        let set_municipality = update.municipality.is_some();
        let municipality = update.municipality.clone().flatten();
        let set_notes = update.notes.is_some();
        let notes = update.notes.clone().flatten();

        let row = client
            .query_opt(
                &format!(
                    "UPDATE complaints SET
                        status = $2,
                        municipality = CASE WHEN $3 THEN $4 ELSE municipality END,
                        notes = CASE WHEN $5 THEN $6 ELSE notes END,
                        verified = COALESCE($7, verified),
                        clean_up = COALESCE($8, clean_up),
                        updated_at = $9
                     WHERE id = $1
                     RETURNING {}",
                    REPORT_COLUMNS
                ),
                &[
                    &id,
                    &update.status,
                    &set_municipality,
                    &municipality,
                    &set_notes,
                    &notes,
                    &update.verified,
                    &update.clean_up,
                    &now,
                ],
            )
            .await?;

        if row.is_some() {
            debug!("Updated report {} to {}", id, update.status);
        }
        Ok(row.as_ref().map(row_to_report))
    }

    async fn count_reports_by_status(&self) -> Result<StatusCounts> {
        let client = self.pool.get().await?;

        let rows = client
            .query("SELECT status, COUNT(*) FROM complaints GROUP BY status", &[])
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: ReportStatus = row.get(0);
            let count: i64 = row.get(1);
            counts.add(status, count as u64);
        }
        Ok(counts)
    }

    // ========================================================================
    // ADMIN INVITES
    // ========================================================================

    async fn insert_invite(&self, invite: &AdminInvite) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                &format!(
                    "INSERT INTO admin_invites ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    INVITE_COLUMNS
                ),
                &[
                    &invite.id,
                    &invite.email,
                    &invite.token,
                    &invite.invited_by,
                    &invite.status,
                    &invite.created_at,
                    &invite.expires_at,
                    &invite.accepted_by,
                    &invite.accepted_at,
                ],
            )
            .await?;

        info!("Created admin invite for {}", invite.email);
        Ok(())
    }

    async fn fetch_invite_by_token(&self, token: &str) -> Result<Option<AdminInvite>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM admin_invites WHERE token = $1", INVITE_COLUMNS),
                &[&token],
            )
            .await?;

        Ok(row.as_ref().map(row_to_invite))
    }

    async fn has_pending_invite(&self, email: &str) -> Result<bool> {
        let client = self.pool.get().await?;

        let exists: bool = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM admin_invites WHERE LOWER(email) = LOWER($1) AND status = 'pending')",
                &[&email],
            )
            .await?
            .get(0);

        Ok(exists)
    }

    async fn list_pending_invites(&self) -> Result<Vec<AdminInvite>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM admin_invites WHERE status = 'pending' ORDER BY created_at DESC",
                    INVITE_COLUMNS
                ),
                &[],
            )
            .await?;

        Ok(rows.iter().map(row_to_invite).collect())
    }

    async fn revoke_invite(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;

        let updated = client
            .execute(
                "UPDATE admin_invites SET status = 'revoked' WHERE id = $1 AND status = 'pending'",
                &[&id],
            )
            .await?;

        Ok(updated > 0)
    }

    async fn accept_invite(
        &self,
        invite_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let claimed = tx
            .execute(
                "UPDATE admin_invites
                 SET status = $2, accepted_by = $3, accepted_at = $4
                 WHERE id = $1 AND status = 'pending'",
                &[&invite_id, &InviteStatus::Accepted, &user_id, &now],
            )
            .await?;

        if claimed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let promoted = tx
            .execute(
                "UPDATE profiles SET role = 'admin', updated_at = $2 WHERE id = $1",
                &[&user_id, &now],
            )
            .await?;

        if promoted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        info!("Invite {} accepted by {}", invite_id, user_id);
        Ok(true)
    }

    // ========================================================================
    // MUNICIPALITIES
    // ========================================================================

    async fn list_municipalities(&self) -> Result<Vec<Municipality>> {
        let client = self.pool.get().await?;

        let rows = client
            .query("SELECT id, name FROM municipalities ORDER BY name", &[])
            .await?;

        Ok(rows
            .iter()
            .map(|r| Municipality {
                id: r.get(0),
                name: r.get(1),
            })
            .collect())
    }

    async fn upsert_municipality(&self, municipality: &Municipality) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO municipalities (id, name) VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
                &[&municipality.id, &municipality.name],
            )
            .await?;

        Ok(())
    }

    async fn create_municipality(&self, municipality: &Municipality, owner: Uuid) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let inserted = tx
            .execute(
                "INSERT INTO municipalities (id, name) VALUES ($1, $2)
                 ON CONFLICT (id) DO NOTHING",
                &[&municipality.id, &municipality.name],
            )
            .await?;

        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO municipality_members (municipality_id, user_id, role)
             VALUES ($1, $2, $3)",
            &[&municipality.id, &owner, &MemberRole::Admin],
        )
        .await?;

        let routed = tx
            .execute(
                "UPDATE profiles SET municipality_id = $2, updated_at = NOW() WHERE id = $1",
                &[&owner, &municipality.id],
            )
            .await?;

        if routed == 0 {
            tx.rollback().await?;
            anyhow::bail!("profile {} not found", owner);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn add_member(
        &self,
        municipality_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let routed = tx
            .execute(
                "UPDATE profiles SET municipality_id = $2, updated_at = NOW()
                 WHERE id = $1 AND EXISTS (SELECT 1 FROM municipalities WHERE id = $2)",
                &[&user_id, &municipality_id],
            )
            .await?;

        if routed == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO municipality_members (municipality_id, user_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (municipality_id, user_id) DO UPDATE SET role = EXCLUDED.role",
            &[&municipality_id, &user_id, &role],
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_members(&self, municipality_id: &str) -> Result<Vec<MunicipalityMember>> {
        let client = self.pool.get().await?;

        let rows = client
            .query(
                "SELECT m.municipality_id, m.user_id, m.role, p.email, p.full_name, m.joined_at
                 FROM municipality_members m
                 LEFT JOIN profiles p ON p.id = m.user_id
                 WHERE m.municipality_id = $1
                 ORDER BY m.joined_at",
                &[&municipality_id],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| MunicipalityMember {
                municipality_id: r.get(0),
                user_id: r.get(1),
                role: r.get(2),
                email: r.get(3),
                full_name: r.get(4),
                joined_at: r.get(5),
            })
            .collect())
    }

    // ========================================================================
    // AUDIT
    // ========================================================================

    async fn insert_admin_log(&self, log: &AdminLog) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .execute(
                "INSERT INTO admin_logs (id, action, user_id, details, created_at)
                 VALUES ($1, $2, $3, $4, $5)",
                &[&log.id, &log.action, &log.user_id, &log.details, &log.created_at],
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::database::DynDatabase;
    use crate::error::ApiError;
    use crate::service::{LoginRequest, RegisterRequest, TrashClick};

    #[test]
    fn test_migrations_are_contiguous() {
        for (i, (version, name, sql)) in MIGRATIONS.iter().enumerate() {
            assert_eq!(*version, i as i32 + 1);
            assert!(name.starts_with(&format!("{:03}_", version)));
            let marker = format!(
                "INSERT INTO schema_migrations (version) VALUES ({})",
                version
            );
            assert!(sql.contains(&marker), "{} does not record its version", name);
        }
    }

    #[test]
    fn test_column_lists_match_schema() {
        let schema = MIGRATIONS[0].2;
        for column in PROFILE_COLUMNS.split(',').chain(REPORT_COLUMNS.split(',')) {
            let column = column.trim();
            assert!(
                schema.contains(&format!("    {} ", column)),
                "column {} missing from schema",
                column
            );
        }
    }

    /// Live driver, only when DATABASE_URL points at a scratch database
    async fn live_storage() -> Option<PgStorage> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(
            PgStorage::new(&url, &DatabaseConfig::default())
                .await
                .expect("connect to DATABASE_URL"),
        )
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "s3cret-pass".to_string(),
            full_name: Some("Postgres Tester".to_string()),
            username: None,
        }
    }

    #[tokio::test]
    async fn test_account_invite_and_department_flow() {
        let Some(storage) = live_storage().await else {
            return;
        };
        let db: DynDatabase = Arc::new(storage);
        let svc = TrashClick::new(db.clone(), Config::default());
        let tag = Uuid::new_v4().simple().to_string();

        // Register then log in
        let citizen_email = format!("citizen-{}@example.org", tag);
        let session = svc.register(register_request(&citizen_email)).await.unwrap();
        assert!(matches!(
            svc.register(register_request(&citizen_email.to_uppercase()))
                .await,
            Err(ApiError::Conflict(_))
        ));

        let login = svc
            .login(LoginRequest {
                email: citizen_email.clone(),
                password: "s3cret-pass".to_string(),
            })
            .await
            .unwrap();
        let citizen = svc.authenticate(&login.token).await.unwrap();
        assert_eq!(citizen.id, session.profile.id);

        // Invite acceptance is single use
        let boss = svc
            .register(register_request(&format!("boss-{}@example.org", tag)))
            .await
            .unwrap()
            .profile;
        assert!(db.set_role(boss.id, Role::Admin).await.unwrap());
        let boss = db.fetch_profile(boss.id).await.unwrap().unwrap();

        let created = svc.create_invite(&boss, &citizen_email).await.unwrap();
        let promoted = svc
            .accept_invite(&citizen, &created.invite.token)
            .await
            .unwrap();
        assert!(promoted.is_admin());
        assert!(matches!(
            svc.accept_invite(&citizen, &created.invite.token).await,
            Err(ApiError::Conflict(_))
        ));

        // Existing departments cannot be claimed
        let name = format!("Dept {}", tag);
        let dept = svc.create_municipality(&boss, &name).await.unwrap();
        assert!(matches!(
            svc.create_municipality(&citizen, &name.to_uppercase()).await,
            Err(ApiError::Conflict(_))
        ));
        let members = svc.municipality_members(&dept.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, boss.id);
        assert_eq!(members[0].role, MemberRole::Admin);

        let boss = svc.get_profile(&boss).await.unwrap();
        assert_eq!(boss.municipality_id.as_deref(), Some(dept.id.as_str()));
    }
}
