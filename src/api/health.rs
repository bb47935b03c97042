//! Health check
//!
//! GET /api/v1/health pings the database and the session store. Either
//! failing turns the whole check into a 503.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::middleware::AppState;
use crate::db;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub session_store: &'static str,
}

fn component(result: &anyhow::Result<()>, name: &str) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!("Health check: {} unreachable: {:#}", name, e);
            "unavailable"
        }
    }
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, store) = tokio::join!(db::ping(&state.pool), state.store.ping());
    let healthy = database.is_ok() && store.is_ok();

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        database: component(&database, "database"),
        session_store: component(&store, "session store"),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
