//! API layer - HTTP handlers and routing
//!
//! All endpoints live under `/api/v1`:
//! - Auth endpoints (public register/login, authenticated session management)
//! - Admin endpoints (role changes, audit logs, counters)
//! - Health check

pub mod admin;
pub mod auth;
pub mod context;
pub mod health;
pub mod middleware;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServerConfig;

pub use context::RequestContext;
pub use middleware::{ApiError, AppState};

/// Build the main API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (need auth but not admin)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .route("/health", get(health::health))
        .merge(admin_routes)
        .merge(protected_routes)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!("Ignoring invalid CORS origin '{}': {}", origin, e);
            cors
        }
    }
}

/// Build the complete router with middleware
///
/// Requests that outlive `request_timeout_seconds` are dropped, which
/// rolls back any unit of work they still hold.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.request_timeout(),
        ))
        .layer(cors_layer(&server.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
