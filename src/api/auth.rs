//! Authentication API endpoints
//!
//! Handles HTTP requests for accounts and sessions:
//! - POST /api/v1/auth/register - Create an account
//! - POST /api/v1/auth/login - Issue a session
//! - POST /api/v1/auth/logout - Revoke the presented token
//! - GET /api/v1/auth/me - Current user
//! - GET /api/v1/auth/sessions - List own sessions
//! - DELETE /api/v1/auth/sessions - Revoke all own sessions

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::context::RequestContext;
use crate::api::middleware::{extract_bearer_token, ApiError, AppState};
use crate::models::{CreateUserInput, Role, Session, User};
use crate::services::SessionServiceError;

/// Request body for registration and login
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

/// Response for user info
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Response for successful login
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A session as shown to its owner. The token is never listed.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub role: Role,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            role: session.role,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    pub revoked: usize,
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/sessions", get(list_sessions).delete(revoke_all_sessions))
}

/// POST /api/v1/auth/register
///
/// The first account becomes an admin.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .accounts
        .register(CreateUserInput::new(body.username, body.password))
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// POST /api/v1/auth/login
async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (user, session) = state
        .accounts
        .login(&body.username, &body.password, &ctx.client_ip, &ctx.user_agent)
        .await?;

    Ok(Json(AuthResponse {
        user: user.into(),
        token: session.token,
        expires_at: session.expires_at,
    }))
}

/// POST /api/v1/auth/logout
///
/// Revokes the token the request was authenticated with. Revoking a
/// session that vanished in the meantime is not an error.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    match state.sessions.revoke_by_token(token).await {
        Ok(()) | Err(SessionServiceError::NotFound) => Ok(StatusCode::NO_CONTENT),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/v1/auth/me
async fn get_current_user(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.accounts.current_user(ctx.identity()).await?;
    Ok(Json(user.into()))
}

/// GET /api/v1/auth/sessions - newest first
async fn list_sessions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let identity = ctx.authorized(Role::User)?;

    let mut sessions = state.sessions.list_by_user(identity.user_id).await?;
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// DELETE /api/v1/auth/sessions
async fn revoke_all_sessions(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<RevokeAllResponse>, ApiError> {
    let identity = ctx.authorized(Role::User)?;
    let revoked = state.sessions.revoke_all_by_user(identity.user_id).await?;
    Ok(Json(RevokeAllResponse { revoked }))
}
