//! Session lifecycle service
//!
//! Issues, revokes and lists sessions:
//! - `create_session` - after a successful credential check
//! - `revoke_by_token` - single-session logout
//! - `revoke_all_by_user` - bulk revoke, e.g. after a role change
//! - `list_by_user` - the self-service "active sessions" view
//!
//! No operation retries; a store failure is returned to the caller as is.

use crate::models::{Role, Session, SessionStatus};
use crate::store::{SessionRepository, SessionStoreError};
use chrono::{Duration, SubsecRound, Utc};
use data_encoding::BASE64URL_NOPAD;
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

/// Random bytes per session token
pub const TOKEN_BYTES: usize = 32;

/// Encoded token length (base64url, no padding)
pub const TOKEN_LENGTH: usize = 43;

/// Error types for session service operations
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    /// No usable session under the token. Returned alike for tokens that
    /// never existed, have expired, or were already revoked.
    #[error("Session not found")]
    NotFound,

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(#[from] SessionStoreError),

    /// Some sessions of a bulk revoke could not be revoked
    #[error("Revoked {revoked} session(s) but failed to revoke {failed}")]
    PartialRevoke { revoked: usize, failed: usize },

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Generate an opaque session token: 32 bytes from the OS random source,
/// base64url encoded without padding.
pub fn generate_token() -> Result<String, SessionServiceError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|e| anyhow::anyhow!("Failed to generate session token: {}", e))?;
    Ok(BASE64URL_NOPAD.encode(&bytes))
}

/// Whether a string could be a token issued by `generate_token`
pub fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Session lifecycle service
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    lifetime: Duration,
}

impl SessionService {
    /// Create a session service issuing sessions valid for `lifetime`
    pub fn new(repo: Arc<dyn SessionRepository>, lifetime: Duration) -> Self {
        Self { repo, lifetime }
    }

    /// Issue a new active session for an authenticated user
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable` if the session could not be saved
    /// - `InternalError` if the expiry falls outside the representable range
    pub async fn create_session(
        &self,
        user_id: Uuid,
        role: Role,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<Session, SessionServiceError> {
        let created_at = Utc::now().trunc_subsecs(0);
        let expires_at = created_at
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| anyhow::anyhow!("Session lifetime {} overflows", self.lifetime))?;

        let session = Session {
            token: generate_token()?,
            id: Uuid::new_v4(),
            user_id,
            role,
            status: SessionStatus::Active,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            created_at,
            expires_at,
        };

        self.repo.save(&session).await.map_err(|e| {
            tracing::error!(user_id = %user_id, "Failed to save session: {}", e);
            e
        })?;

        tracing::info!(session_id = %session.id, user_id = %user_id, "Session created");

        Ok(session)
    }

    /// Raw read of the session stored under `token`
    pub async fn lookup(&self, token: &str) -> Result<Option<Session>, SessionServiceError> {
        Ok(self.repo.load(token).await?)
    }

    /// Revoke the session stored under `token`
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no active, unexpired session under the token
    /// - `StoreUnavailable` if the store could not be read or written
    pub async fn revoke_by_token(&self, token: &str) -> Result<(), SessionServiceError> {
        let session = match self.repo.load(token).await? {
            Some(session) if session.is_usable() => session,
            _ => return Err(SessionServiceError::NotFound),
        };

        self.revoke(session).await?;
        Ok(())
    }

    /// Revoke every active session of a user, returning how many were revoked
    ///
    /// # Errors
    ///
    /// - `PartialRevoke` if any session could not be revoked; the others
    ///   stay revoked
    /// - `StoreUnavailable` if the user's sessions could not be listed
    pub async fn revoke_all_by_user(&self, user_id: Uuid) -> Result<usize, SessionServiceError> {
        let sessions: Vec<Session> = self
            .repo
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(Session::is_usable)
            .collect();

        let results = join_all(sessions.into_iter().map(|s| self.revoke(s))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let revoked = results.len() - failed;

        if failed > 0 {
            for err in results.iter().filter_map(|r| r.as_ref().err()) {
                tracing::error!(user_id = %user_id, "Failed to revoke session: {}", err);
            }
            return Err(SessionServiceError::PartialRevoke { revoked, failed });
        }

        tracing::info!(user_id = %user_id, revoked, "Revoked all sessions of user");
        Ok(revoked)
    }

    /// Active sessions of a user. Order is unspecified.
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionServiceError> {
        Ok(self
            .repo
            .list_by_user(user_id)
            .await?
            .into_iter()
            .filter(Session::is_usable)
            .collect())
    }

    async fn revoke(&self, mut session: Session) -> Result<(), SessionStoreError> {
        session.status = SessionStatus::Revoked;
        self.repo.save(&session).await?;
        tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvSessionRepository, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn memory_service() -> SessionService {
        let repo = KvSessionRepository::boxed(Arc::new(MemoryStore::new()));
        SessionService::new(repo, Duration::hours(1))
    }

    /// Repository whose `save` fails for chosen tokens
    struct FlakyRepository {
        inner: KvSessionRepository,
        failing: Mutex<HashSet<String>>,
    }

    impl FlakyRepository {
        fn new() -> Self {
            Self {
                inner: KvSessionRepository::new(Arc::new(MemoryStore::new())),
                failing: Mutex::new(HashSet::new()),
            }
        }

        fn fail_saves_for(&self, token: &str) {
            self.failing.lock().unwrap().insert(token.to_string());
        }
    }

    #[async_trait]
    impl SessionRepository for FlakyRepository {
        async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
            if self.failing.lock().unwrap().contains(&session.token) {
                return Err(SessionStoreError::Unavailable(anyhow::anyhow!("write timed out")));
            }
            self.inner.save(session).await
        }

        async fn load(&self, token: &str) -> Result<Option<Session>, SessionStoreError> {
            self.inner.load(token).await
        }

        async fn delete(&self, token: &str) -> Result<bool, SessionStoreError> {
            self.inner.delete(token).await
        }

        async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionStoreError> {
            self.inner.list_by_user(user_id).await
        }
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token().unwrap();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(!token.contains('='));
        assert!(is_well_formed_token(&token));
    }

    #[test]
    fn test_generate_token_unique() {
        let tokens: HashSet<String> = (0..100).map(|_| generate_token().unwrap()).collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn test_is_well_formed_token() {
        assert!(!is_well_formed_token(""));
        assert!(!is_well_formed_token(&"a".repeat(42)));
        assert!(!is_well_formed_token(&"a".repeat(44)));
        assert!(!is_well_formed_token(&format!("{}=", "a".repeat(42))));
        assert!(!is_well_formed_token(&format!("{}+", "a".repeat(42))));
        assert!(is_well_formed_token(&format!("{}-_", "a".repeat(41))));
    }

    #[tokio::test]
    async fn test_create_session() {
        let service = memory_service();
        let user_id = Uuid::new_v4();

        let session = service
            .create_session(user_id, Role::User, "10.0.0.1", "curl/8.0")
            .await
            .unwrap();

        assert_eq!(session.user_id, user_id);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.expires_at - session.created_at, Duration::hours(1));
        assert_eq!(session.created_at.timestamp_subsec_nanos(), 0);

        let stored = service.lookup(&session.token).await.unwrap();
        assert_eq!(stored, Some(session));
    }

    #[tokio::test]
    async fn test_create_session_lifetime_overflow() {
        let repo = KvSessionRepository::boxed(Arc::new(MemoryStore::new()));
        let service = SessionService::new(repo, Duration::days(365 * 300_000));

        let result = service
            .create_session(Uuid::new_v4(), Role::User, "10.0.0.1", "curl/8.0")
            .await;
        assert!(matches!(result, Err(SessionServiceError::InternalError(_))));
    }

    #[tokio::test]
    async fn test_create_session_store_failure() {
        struct DownRepository;

        #[async_trait]
        impl SessionRepository for DownRepository {
            async fn save(&self, _session: &Session) -> Result<(), SessionStoreError> {
                Err(SessionStoreError::Unavailable(anyhow::anyhow!("connection refused")))
            }
            async fn load(&self, _token: &str) -> Result<Option<Session>, SessionStoreError> {
                Err(SessionStoreError::Unavailable(anyhow::anyhow!("connection refused")))
            }
            async fn delete(&self, _token: &str) -> Result<bool, SessionStoreError> {
                Err(SessionStoreError::Unavailable(anyhow::anyhow!("connection refused")))
            }
            async fn list_by_user(&self, _user_id: Uuid) -> Result<Vec<Session>, SessionStoreError> {
                Err(SessionStoreError::Unavailable(anyhow::anyhow!("connection refused")))
            }
        }

        let service = SessionService::new(Arc::new(DownRepository), Duration::hours(1));
        let result = service
            .create_session(Uuid::new_v4(), Role::User, "10.0.0.1", "curl/8.0")
            .await;

        assert!(matches!(result, Err(SessionServiceError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_login_then_list_sessions() {
        let service = memory_service();
        let user_id = Uuid::new_v4();

        service
            .create_session(user_id, Role::User, "192.168.1.20", "Mozilla/5.0")
            .await
            .unwrap();

        let sessions = service.list_by_user(user_id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Active);
        assert_eq!(sessions[0].ip_address, "192.168.1.20");
        assert_eq!(sessions[0].user_agent, "Mozilla/5.0");
    }

    #[tokio::test]
    async fn test_revoke_by_token_is_idempotent_not_found() {
        let service = memory_service();
        let session = service
            .create_session(Uuid::new_v4(), Role::User, "10.0.0.1", "curl/8.0")
            .await
            .unwrap();

        service.revoke_by_token(&session.token).await.unwrap();

        let stored = service.lookup(&session.token).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Revoked);
        assert_eq!(stored.expires_at, session.expires_at);

        assert!(matches!(
            service.revoke_by_token(&session.token).await,
            Err(SessionServiceError::NotFound)
        ));
        assert!(matches!(
            service.revoke_by_token(&session.token).await,
            Err(SessionServiceError::NotFound)
        ));
        assert!(matches!(
            service.revoke_by_token("never-issued").await,
            Err(SessionServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoked_session_not_listed() {
        let service = memory_service();
        let user_id = Uuid::new_v4();
        let a = service
            .create_session(user_id, Role::User, "10.0.0.1", "a")
            .await
            .unwrap();
        service
            .create_session(user_id, Role::User, "10.0.0.2", "b")
            .await
            .unwrap();

        service.revoke_by_token(&a.token).await.unwrap();

        let sessions = service.list_by_user(user_id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_agent, "b");
    }

    #[tokio::test]
    async fn test_revoke_all_by_user() {
        let service = memory_service();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let a = service
            .create_session(user_id, Role::User, "10.0.0.1", "a")
            .await
            .unwrap();
        let b = service
            .create_session(user_id, Role::User, "10.0.0.2", "b")
            .await
            .unwrap();
        let c = service
            .create_session(other, Role::User, "10.0.0.3", "c")
            .await
            .unwrap();

        assert_eq!(service.revoke_all_by_user(user_id).await.unwrap(), 2);

        for token in [&a.token, &b.token] {
            let stored = service.lookup(token).await.unwrap().unwrap();
            assert!(stored.is_revoked());
        }
        assert!(!service.lookup(&c.token).await.unwrap().unwrap().is_revoked());

        // Nothing left to revoke
        assert_eq!(service.revoke_all_by_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_all_reports_partial_failure() {
        let repo = Arc::new(FlakyRepository::new());
        let service = SessionService::new(repo.clone(), Duration::hours(1));
        let user_id = Uuid::new_v4();

        service
            .create_session(user_id, Role::User, "10.0.0.1", "a")
            .await
            .unwrap();
        let stuck = service
            .create_session(user_id, Role::User, "10.0.0.2", "b")
            .await
            .unwrap();
        repo.fail_saves_for(&stuck.token);

        let err = service.revoke_all_by_user(user_id).await.unwrap_err();
        assert!(matches!(
            err,
            SessionServiceError::PartialRevoke {
                revoked: 1,
                failed: 1
            }
        ));

        let remaining = service.list_by_user(user_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, stuck.token);
    }
}
