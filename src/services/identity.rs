//! Identity verification client
//!
//! The one channel through which other modules learn about session state:
//! a bearer token goes in, a `VerifiedIdentity` or a typed failure comes out.
//! Nothing outside this module and the session service touches the session
//! store.
//!
//! Failure kinds stay distinct here (for logs) and are collapsed by the HTTP
//! layer, except `Unexpected`, which is never reported as an authentication
//! failure.

use crate::models::VerifiedIdentity;
use crate::services::session::{is_well_formed_token, SessionService};
use async_trait::async_trait;
use std::sync::Arc;

/// Why a token did not yield an identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// Token is malformed or unknown
    #[error("Invalid session token")]
    Invalid,

    #[error("Session expired")]
    Expired,

    #[error("Session revoked")]
    Revoked,

    /// The session store failed or returned an unreadable record
    #[error("Session verification failed: {0}")]
    Unexpected(String),
}

impl VerificationError {
    /// Stable code for logs
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::Invalid => "invalid_token",
            VerificationError::Expired => "session_expired",
            VerificationError::Revoked => "session_revoked",
            VerificationError::Unexpected(_) => "verification_unavailable",
        }
    }

    /// Whether the failure is the caller's (401) rather than ours (500)
    pub fn is_authentication_failure(&self) -> bool {
        !matches!(self, VerificationError::Unexpected(_))
    }
}

/// Turns a bearer token into a verified identity
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn validate_session(&self, token: &str) -> Result<VerifiedIdentity, VerificationError>;
}

/// Type alias for a shared verifier
pub type DynIdentityVerifier = Arc<dyn IdentityVerifier>;

/// Identity verifier backed by the session lifecycle service
pub struct SessionIdentityClient {
    sessions: Arc<SessionService>,
}

impl SessionIdentityClient {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }

    /// Create a boxed verifier for use with dependency injection
    pub fn boxed(sessions: Arc<SessionService>) -> DynIdentityVerifier {
        Arc::new(Self::new(sessions))
    }
}

#[async_trait]
impl IdentityVerifier for SessionIdentityClient {
    async fn validate_session(&self, token: &str) -> Result<VerifiedIdentity, VerificationError> {
        if !is_well_formed_token(token) {
            return Err(VerificationError::Invalid);
        }

        let session = match self.sessions.lookup(token).await {
            Ok(Some(session)) => session,
            Ok(None) => return Err(VerificationError::Invalid),
            Err(e) => {
                tracing::error!("Session lookup failed: {}", e);
                return Err(VerificationError::Unexpected(e.to_string()));
            }
        };

        if session.is_revoked() {
            return Err(VerificationError::Revoked);
        }
        if session.is_expired() {
            return Err(VerificationError::Expired);
        }

        Ok(VerifiedIdentity::from(&session))
    }
}
