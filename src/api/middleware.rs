//! API middleware
//!
//! Contains:
//! - Application state shared by every handler
//! - `ApiError`, the single place where failures become HTTP responses
//! - Authentication (bearer token validation)
//! - Authorization (admin gate)

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;

use crate::db::{DynTransactionFactory, PoolTransactionFactory};
use crate::models::{Role, VerifiedIdentity};
use crate::services::{
    authorize_by_role, AccountService, AccountServiceError, AuthorizationError,
    DynIdentityVerifier, SessionIdentityClient, SessionService, SessionServiceError,
    VerificationError,
};
use crate::store::{DynKeyValueStore, KvSessionRepository};

const REALM: &str = "application";

/// Shown for every rejected token, whatever the reason
const INVALID_TOKEN_DESCRIPTION: &str = "The access token is invalid";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: DynKeyValueStore,
    pub transactions: DynTransactionFactory,
    pub sessions: Arc<SessionService>,
    pub verifier: DynIdentityVerifier,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    /// Wire the services over an open pool and session store
    pub fn new(pool: SqlitePool, store: DynKeyValueStore, lifetime: chrono::Duration) -> Self {
        let transactions = PoolTransactionFactory::boxed(pool.clone());
        let sessions = Arc::new(SessionService::new(
            KvSessionRepository::boxed(store.clone()),
            lifetime,
        ));
        let verifier = SessionIdentityClient::boxed(sessions.clone());
        let accounts = Arc::new(AccountService::new(transactions.clone(), sessions.clone()));

        Self {
            pool,
            store,
            transactions,
            sessions,
            verifier,
            accounts,
        }
    }
}

/// Error response for API errors
///
/// Serialized as `{"error": "<message>"}`. 401 responses also carry a
/// `WWW-Authenticate` challenge.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    challenge: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            challenge: None,
        }
    }

    /// 401 for a request that presented no usable credentials
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            challenge: Some(format!("Bearer realm=\"{}\"", REALM)),
            ..Self::new(StatusCode::UNAUTHORIZED, message)
        }
    }

    /// 401 for a token that was presented and rejected
    pub fn invalid_token() -> Self {
        Self {
            challenge: Some(format!(
                "Bearer realm=\"{}\", error=\"invalid_token\", error_description=\"{}\"",
                REALM, INVALID_TOKEN_DESCRIPTION
            )),
            ..Self::new(StatusCode::UNAUTHORIZED, INVALID_TOKEN_DESCRIPTION)
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// 500 with a generic body; the detail only goes to the log
    pub fn internal_error(detail: impl fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", detail);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(json!({ "error": self.message }))).into_response();

        if let Some(challenge) = self.challenge {
            match HeaderValue::from_str(&challenge) {
                Ok(value) => {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
                Err(e) => tracing::error!("Invalid WWW-Authenticate value: {}", e),
            }
        }

        response
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(e: AuthorizationError) -> Self {
        ApiError::forbidden(e.to_string())
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(e: SessionServiceError) -> Self {
        match e {
            SessionServiceError::NotFound => ApiError::not_found("Session not found"),
            other => ApiError::internal_error(other),
        }
    }
}

impl From<AccountServiceError> for ApiError {
    fn from(e: AccountServiceError) -> Self {
        match e {
            AccountServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            AccountServiceError::UsernameTaken(_) => ApiError::conflict(e.to_string()),
            AccountServiceError::InvalidCredentials => ApiError::unauthorized(e.to_string()),
            AccountServiceError::UserNotFound => ApiError::not_found(e.to_string()),
            AccountServiceError::Forbidden(inner) => inner.into(),
            AccountServiceError::Session(inner) => inner.into(),
            other => ApiError::internal_error(other),
        }
    }
}

/// Extract the bearer token from the Authorization header
///
/// The scheme is matched case-insensitively. A missing header, another
/// scheme, or an empty token all yield `None`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Authentication middleware
///
/// On success the request carries a `VerifiedIdentity` extension. Every
/// rejected token gets the same 401; a verification failure on our side
/// is a 500.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;

    let identity = match state.verifier.validate_session(&token).await {
        Ok(identity) => identity,
        Err(VerificationError::Unexpected(detail)) => {
            return Err(ApiError::internal_error(format!(
                "Session verification failed: {}",
                detail
            )));
        }
        Err(e) => {
            tracing::info!(code = e.code(), "Rejected bearer token");
            return Err(ApiError::invalid_token());
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Admin authorization middleware; runs after `require_auth`
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    authorize_by_role(request.extensions().get::<VerifiedIdentity>(), Role::Admin)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&headers_with_auth("Bearer test-token-123")),
            Some("test-token-123")
        );
        assert_eq!(
            extract_bearer_token(&headers_with_auth("bearer abc")),
            Some("abc")
        );
    }

    #[test]
    fn test_extract_bearer_token_rejects() {
        assert!(extract_bearer_token(&HeaderMap::new()).is_none());
        assert!(extract_bearer_token(&headers_with_auth("Basic dXNlcjpwYXNz")).is_none());
        assert!(extract_bearer_token(&headers_with_auth("Bearer ")).is_none());
        assert!(extract_bearer_token(&headers_with_auth("Bearer")).is_none());
        assert!(extract_bearer_token(&headers_with_auth("Token abc")).is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_challenge() {
        let response = ApiError::unauthorized("Missing bearer token").into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer realm=\"application\""
        );
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Missing bearer token" })
        );
    }

    #[tokio::test]
    async fn test_invalid_token_challenge() {
        let response = ApiError::invalid_token().into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(challenge.starts_with("Bearer realm=\"application\""));
        assert!(challenge.contains("error=\"invalid_token\""));
        assert!(challenge.contains("error_description="));
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = ApiError::internal_error("connection refused (os error 111)").into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Internal server error" })
        );
    }

    #[test]
    fn test_account_error_mapping() {
        let cases = [
            (
                AccountServiceError::ValidationError("too short".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AccountServiceError::UsernameTaken("alice".to_string()),
                StatusCode::CONFLICT,
            ),
            (AccountServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (AccountServiceError::UserNotFound, StatusCode::NOT_FOUND),
            (
                AccountServiceError::Forbidden(AuthorizationError::InsufficientPrivileges),
                StatusCode::FORBIDDEN,
            ),
            (
                AccountServiceError::Session(SessionServiceError::PartialRevoke {
                    revoked: 1,
                    failed: 1,
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }
}
