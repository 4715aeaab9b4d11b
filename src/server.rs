//! TrashClick Server
//!
//! HTTP API for the web and terminal clients.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::parse_bearer;
use crate::error::{ApiError, ApiResult};
use crate::models::{Profile, ProfilePatch};
use crate::reports::{
    parse_status_filter, BatchUpdate, NewReport, ReportFilter, SortOrder, StatusChange,
};
use crate::service::{AddMemberRequest, LoginRequest, RegisterRequest, TrashClick};

/// Multipart framing allowance on top of the image size limit
const UPLOAD_OVERHEAD: usize = 64 * 1024;

pub struct AppState {
    pub service: TrashClick,
    pub started_at: std::time::Instant,
}

pub type SharedState = Arc<AppState>;

pub fn create_router(state: SharedState) -> Router {
    let media_root = state.service.media().root().to_path_buf();
    let upload_limit = state.service.config().media.max_file_size + UPLOAD_OVERHEAD;

    let api = Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/profile", get(get_profile_handler).put(update_profile_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/leaderboard", get(leaderboard_handler))
        .route(
            "/municipalities",
            get(list_municipalities_handler).post(create_municipality_handler),
        )
        .route(
            "/municipalities/:id/members",
            get(members_handler).post(add_member_handler),
        )
        .route("/department/reports", get(department_reports_handler))
        .route(
            "/uploads",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/reports", get(list_reports_handler).post(submit_report_handler))
        .route("/reports/:id", get(get_report_handler))
        .route("/admin/overview", get(admin_overview_handler))
        .route("/admin/reports", get(admin_reports_handler))
        .route("/admin/reports/batch", post(batch_update_handler))
        .route("/admin/reports/:id", patch(update_report_handler))
        .route(
            "/admin/invites",
            get(list_invites_handler).post(create_invite_handler),
        )
        .route("/admin/invites/:id", delete(revoke_invite_handler))
        .route(
            "/admin/setup",
            get(setup_status_handler).post(setup_admin_handler),
        )
        .route("/invites/:token", get(check_invite_handler))
        .route("/invites/:token/accept", post(accept_invite_handler))
        .route("/geocode/reverse", get(reverse_geocode_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .nest_service("/media", ServeDir::new(media_root))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// EXTRACTORS
// ============================================================================

/// Raw bearer token from the Authorization header
pub struct BearerToken(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BearerToken {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .map(|t| BearerToken(t.to_string()))
            .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))
    }
}

/// The authenticated caller
pub struct AuthUser(pub Profile);

#[async_trait]
impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        state.service.authenticate(&token).await.map(AuthUser)
    }
}

// ============================================================================
// HEALTH & AUTH
// ============================================================================

async fn health_handler(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(json!({
        "healthy": true,
        "service": "trashclick",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

async fn register_handler(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state.service.register(req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login_handler(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.login(req).await?))
}

async fn logout_handler(
    State(state): State<SharedState>,
    BearerToken(token): BearerToken,
) -> ApiResult<StatusCode> {
    state.service.logout(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// PROFILE, DASHBOARD, LEADERBOARD
// ============================================================================

async fn get_profile_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_profile(&user).await?))
}

async fn update_profile_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.update_profile(&user, patch).await?))
}

async fn dashboard_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.dashboard(&user).await?))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

async fn leaderboard_handler(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<impl IntoResponse> {
    let entries = state.service.leaderboard(query.limit).await?;
    Ok(Json(json!({ "leaderboard": entries })))
}

// ============================================================================
// MUNICIPALITIES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateMunicipalityRequest {
    pub name: String,
}

async fn list_municipalities_handler(
    State(state): State<SharedState>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_municipalities().await?))
}

async fn create_municipality_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateMunicipalityRequest>,
) -> ApiResult<impl IntoResponse> {
    let municipality = state.service.create_municipality(&user, &req.name).await?;
    Ok((StatusCode::CREATED, Json(municipality)))
}

async fn members_handler(
    State(state): State<SharedState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.municipality_members(&id).await?))
}

async fn add_member_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.add_member(&user, &id, req).await?))
}

async fn department_reports_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.department_reports(&user).await?))
}

// ============================================================================
// UPLOADS & REPORTS
// ============================================================================

async fn upload_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        debug!("Upload from {}: {} bytes", user.id, bytes.len());
        let stored = state
            .service
            .upload_image(filename.as_deref(), &content_type, &bytes)
            .await?;
        return Ok((StatusCode::CREATED, Json(stored)));
    }

    Err(ApiError::bad_request("Missing 'image' field"))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportsQuery {
    pub status: Option<String>,
    pub sort: Option<SortOrder>,
    pub search: Option<String>,
}

async fn list_reports_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = ReportFilter {
        status: parse_status_filter(query.status.as_deref()).map_err(ApiError::BadRequest)?,
        sort: query.sort.unwrap_or_default(),
        search: query.search,
    };
    Ok(Json(state.service.list_my_reports(&user, &filter).await?))
}

async fn submit_report_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(form): Json<NewReport>,
) -> ApiResult<impl IntoResponse> {
    let report = state.service.submit_report(&user, form).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_report_handler(
    State(state): State<SharedState>,
    AuthUser(_user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.get_report(id).await?))
}

// ============================================================================
// ADMIN
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

async fn admin_overview_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.admin_overview(&user).await?))
}

async fn admin_reports_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = parse_status_filter(query.status.as_deref()).map_err(ApiError::BadRequest)?;
    Ok(Json(state.service.list_all_reports(&user, status).await?))
}

async fn update_report_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.service.update_report_status(&user, id, change).await?,
    ))
}

async fn batch_update_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(batch): Json<BatchUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.batch_update(&user, batch).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
}

async fn list_invites_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_pending_invites(&user).await?))
}

async fn create_invite_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateInviteRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = state.service.create_invite(&user, &req.email).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn revoke_invite_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.service.revoke_invite(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct SetupRequest {
    #[serde(default)]
    pub setup_key: Option<String>,
}

async fn setup_status_handler(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.setup_status(peer.ip()).await?))
}

async fn setup_admin_handler(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    AuthUser(user): AuthUser,
    Json(req): Json<SetupRequest>,
) -> ApiResult<impl IntoResponse> {
    let profile = state
        .service
        .setup_admin(&user, req.setup_key.as_deref(), peer.ip())
        .await?;
    Ok(Json(profile))
}

// ============================================================================
// INVITES (PUBLIC)
// ============================================================================

async fn check_invite_handler(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.check_invite(&token).await?))
}

async fn accept_invite_handler(
    State(state): State<SharedState>,
    AuthUser(user): AuthUser,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.accept_invite(&user, &token).await?))
}

// ============================================================================
// GEOCODING
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReverseQuery {
    pub lat: f64,
    pub lon: f64,
}

async fn reverse_geocode_handler(
    State(state): State<SharedState>,
    Query(query): Query<ReverseQuery>,
) -> ApiResult<impl IntoResponse> {
    let address = state.service.reverse_geocode(query.lat, query.lon).await?;
    Ok(Json(json!({ "address": address })))
}

pub async fn run_server(host: &str, port: u16, service: TrashClick) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        service,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting TrashClick server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
