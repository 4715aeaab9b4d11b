//! TrashClick API client

use anyhow::{anyhow, Context, Result};
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use trashclick::media::StoredImage;
use trashclick::models::{
    AdminInvite, MemberRole, Municipality, MunicipalityMember, Profile, Report,
};
use trashclick::reports::{BatchUpdate, NewReport, StatusChange};
use trashclick::scoring::LeaderboardEntry;
use trashclick::service::{
    AddMemberRequest, AdminOverview, AuthSession, BatchResult, CreatedInvite, Dashboard,
    InviteCheck,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TrashClickClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl TrashClickClient {
    pub fn new(api_url: &str, token: Option<String>) -> Self {
        // Build HTTP client with timeout, falling back to default client if builder fails
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn api_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/api/{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.api_url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        if self.token.is_none() {
            return Err(anyhow!(
                "Not logged in. Run `trashclick login` and export TRASHCLICK_TOKEN"
            ));
        }
        Ok(self.request(method, path))
    }

    async fn read<T: DeserializeOwned>(resp: Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp.json().await.context("Unexpected response from server");
        }
        let text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        Err(anyhow!("{} ({})", error_message(&text), status))
    }

    async fn expect_ok(resp: Response) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_else(|_| "Unknown error".into());
        Err(anyhow!("{} ({})", error_message(&text), status))
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        builder: RequestBuilder,
        body: &B,
    ) -> Result<T> {
        let resp = builder
            .json(body)
            .send()
            .await
            .context("Failed to connect to server")?;
        Self::read(resp).await
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let resp = builder.send().await.context("Failed to connect to server")?;
        Self::read(resp).await
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> Result<AuthSession> {
        let body = json!({ "email": email, "password": password, "full_name": full_name });
        Self::send_json(self.request(Method::POST, "auth/register"), &body).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let body = json!({ "email": email, "password": password });
        Self::send_json(self.request(Method::POST, "auth/login"), &body).await
    }

    pub async fn profile(&self) -> Result<Profile> {
        Self::fetch(self.authed(Method::GET, "profile")?).await
    }

    // ------------------------------------------------------------------
    // Public
    // ------------------------------------------------------------------

    pub async fn health(&self) -> Result<Value> {
        let url = format!("{}/health", self.base_url);
        Self::fetch(self.client.get(url)).await
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let data: Value =
            Self::fetch(self.request(Method::GET, &format!("leaderboard?limit={}", limit))).await?;
        match data.get("leaderboard") {
            Some(entries) => Ok(serde_json::from_value(entries.clone())?),
            None => Ok(vec![]),
        }
    }

    pub async fn municipalities(&self) -> Result<Vec<Municipality>> {
        Self::fetch(self.request(Method::GET, "municipalities")).await
    }

    pub async fn create_municipality(&self, name: &str) -> Result<Municipality> {
        Self::send_json(
            self.authed(Method::POST, "municipalities")?,
            &json!({ "name": name }),
        )
        .await
    }

    pub async fn add_member(
        &self,
        municipality_id: &str,
        email: &str,
        role: MemberRole,
    ) -> Result<Vec<MunicipalityMember>> {
        let path = format!(
            "municipalities/{}/members",
            urlencoding::encode(municipality_id)
        );
        Self::send_json(
            self.authed(Method::POST, &path)?,
            &AddMemberRequest {
                email: email.to_string(),
                role: Some(role),
            },
        )
        .await
    }

    pub async fn check_invite(&self, token: &str) -> Result<InviteCheck> {
        let path = format!("invites/{}", urlencoding::encode(token));
        Self::fetch(self.request(Method::GET, &path)).await
    }

    // ------------------------------------------------------------------
    // Citizen
    // ------------------------------------------------------------------

    pub async fn dashboard(&self) -> Result<Dashboard> {
        Self::fetch(self.authed(Method::GET, "dashboard")?).await
    }

    pub async fn upload_image(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage> {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part("image", part);
        let resp = self
            .authed(Method::POST, "uploads")?
            .multipart(form)
            .send()
            .await
            .context("Failed to connect to server")?;
        Self::read(resp).await
    }

    pub async fn submit_report(&self, report: &NewReport) -> Result<Report> {
        Self::send_json(self.authed(Method::POST, "reports")?, report).await
    }

    pub async fn my_reports(
        &self,
        status: Option<&str>,
        sort: Option<&str>,
        search: Option<&str>,
    ) -> Result<Vec<Report>> {
        let mut query = Vec::new();
        if let Some(status) = status {
            query.push(("status", status));
        }
        if let Some(sort) = sort {
            query.push(("sort", sort));
        }
        if let Some(search) = search {
            query.push(("search", search));
        }
        Self::fetch(self.authed(Method::GET, "reports")?.query(&query)).await
    }

    pub async fn accept_invite(&self, token: &str) -> Result<Profile> {
        let path = format!("invites/{}/accept", urlencoding::encode(token));
        Self::fetch(self.authed(Method::POST, &path)?).await
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    pub async fn admin_overview(&self) -> Result<AdminOverview> {
        Self::fetch(self.authed(Method::GET, "admin/overview")?).await
    }

    pub async fn admin_reports(&self, status: Option<&str>) -> Result<Vec<Report>> {
        let builder = self.authed(Method::GET, "admin/reports")?;
        let builder = match status {
            Some(status) => builder.query(&[("status", status)]),
            None => builder,
        };
        Self::fetch(builder).await
    }

    pub async fn update_report(&self, id: Uuid, change: &StatusChange) -> Result<Report> {
        Self::send_json(
            self.authed(Method::PATCH, &format!("admin/reports/{}", id))?,
            change,
        )
        .await
    }

    pub async fn batch_update(&self, batch: &BatchUpdate) -> Result<BatchResult> {
        Self::send_json(self.authed(Method::POST, "admin/reports/batch")?, batch).await
    }

    pub async fn create_invite(&self, email: &str) -> Result<CreatedInvite> {
        Self::send_json(
            self.authed(Method::POST, "admin/invites")?,
            &json!({ "email": email }),
        )
        .await
    }

    pub async fn pending_invites(&self) -> Result<Vec<AdminInvite>> {
        Self::fetch(self.authed(Method::GET, "admin/invites")?).await
    }

    pub async fn revoke_invite(&self, id: Uuid) -> Result<()> {
        let resp = self
            .authed(Method::DELETE, &format!("admin/invites/{}", id))?
            .send()
            .await
            .context("Failed to connect to server")?;
        Self::expect_ok(resp).await
    }
}

/// Pull `error` out of a JSON error body, or fall back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = TrashClickClient::new("http://localhost:8080/", None);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_api_url() {
        let client = TrashClickClient::new("http://localhost:8080", None);
        assert_eq!(
            client.api_url("/admin/reports"),
            "http://localhost:8080/api/admin/reports"
        );
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let client = TrashClickClient::new("http://localhost:8080", Some("  ".to_string()));
        assert!(!client.has_token());
        assert!(client.authed(Method::GET, "dashboard").is_err());
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error":"Invalid setup key"}"#), "Invalid setup key");
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }
}
