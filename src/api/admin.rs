//! Admin API endpoints
//!
//! - PUT /api/v1/admin/users/{id}/role - Change a user's role
//! - GET /api/v1/admin/audit - Recent audit events
//! - GET /api/v1/admin/users/{id}/audit - Audit events about one user
//! - GET /api/v1/admin/stats - Unit-of-work counters
//!
//! The router sits behind `require_auth` and `require_admin`; the
//! interactors check the role again on the identity they are given.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::api::auth::UserResponse;
use crate::api::context::RequestContext;
use crate::api::middleware::{ApiError, AppState};
use crate::config::SessionStoreDriver;
use crate::db::TransactionStatsSnapshot;
use crate::models::{AuditEvent, Role};

const DEFAULT_AUDIT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub session_store: SessionStoreDriver,
    pub transactions: TransactionStatsSnapshot,
}

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{id}/role", put(change_role))
        .route("/users/{id}/audit", get(list_user_audit))
        .route("/audit", get(list_audit))
        .route("/stats", get(get_stats))
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::validation_error(format!("Invalid user id '{}'", id)))
}

/// PUT /api/v1/admin/users/{id}/role
///
/// Every session of the target user is revoked once the change commits.
async fn change_role(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let target_id = parse_user_id(&id)?;
    let role = Role::from_str(&body.role)
        .map_err(|_| ApiError::validation_error(format!("Unknown role '{}'", body.role)))?;

    let user = state
        .accounts
        .change_role(ctx.identity(), target_id, role)
        .await?;

    Ok(Json(user.into()))
}

/// GET /api/v1/admin/audit?limit=N
async fn list_audit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let events = state
        .accounts
        .list_audit(ctx.identity(), query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT))
        .await?;

    Ok(Json(events))
}

/// GET /api/v1/admin/users/{id}/audit
async fn list_user_audit(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    let subject_id = parse_user_id(&id)?;
    let events = state
        .accounts
        .list_audit_for_user(ctx.identity(), subject_id)
        .await?;

    Ok(Json(events))
}

/// GET /api/v1/admin/stats
async fn get_stats(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<StatsResponse>, ApiError> {
    ctx.authorized(Role::Admin)?;

    Ok(Json(StatsResponse {
        session_store: state.store.driver(),
        transactions: state.transactions.stats(),
    }))
}
