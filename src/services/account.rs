//! Account service
//!
//! Interactors for registration, login, role management and the audit
//! trail. Each interactor:
//! 1. validates input and checks authorization (no side effects yet)
//! 2. opens one unit of work
//! 3. runs every repository call on it
//! 4. commits on success, rolls back on any error
//!
//! Role changes and their audit event share one unit of work, so either
//! both are stored or neither is.

use crate::db::repositories::{is_unique_violation, SqlxAuditRepository, SqlxUserRepository};
use crate::db::{DynTransactionFactory, TransactionError, UnitOfWork};
use crate::models::{
    AuditAction, AuditEvent, CreateUserInput, Role, Session, User, VerifiedIdentity,
};
use crate::services::authz::{authorize_by_role, AuthorizationError};
use crate::services::password::{hash_password, verify_dummy, verify_password};
use crate::services::session::{SessionService, SessionServiceError};
use anyhow::Context;
use serde_json::json;
use sqlx::Sqlite;
use std::sync::Arc;
use uuid::Uuid;

const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 50;
const MIN_PASSWORD_LENGTH: usize = 8;

/// Upper bound on audit events returned by one call
pub const MAX_AUDIT_PAGE: i64 = 200;

/// Error types for account operations
#[derive(Debug, thiserror::Error)]
pub enum AccountServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// Unknown user or wrong password; the two are not distinguished
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error(transparent)]
    Forbidden(#[from] AuthorizationError),

    #[error(transparent)]
    Session(#[from] SessionServiceError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Commit on success, roll back on failure.
///
/// A failed rollback is logged and the original error is returned.
async fn finish<T>(
    mut uow: UnitOfWork<Sqlite>,
    result: Result<T, AccountServiceError>,
) -> Result<T, AccountServiceError> {
    match result {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::error!(
                    state = %uow.state(),
                    "Rollback after failed operation also failed: {}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

fn validate_registration(input: &CreateUserInput) -> Result<(), AccountServiceError> {
    let username = input.username.as_str();
    let length = username.chars().count();

    if length < MIN_USERNAME_LENGTH || length > MAX_USERNAME_LENGTH {
        return Err(AccountServiceError::ValidationError(format!(
            "Username must be between {} and {} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AccountServiceError::ValidationError(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }

    if input.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AccountServiceError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    Ok(())
}

/// Account service
pub struct AccountService {
    transactions: DynTransactionFactory,
    sessions: Arc<SessionService>,
}

impl AccountService {
    pub fn new(transactions: DynTransactionFactory, sessions: Arc<SessionService>) -> Self {
        Self {
            transactions,
            sessions,
        }
    }

    /// Register a new user. The first user becomes an admin.
    ///
    /// # Errors
    ///
    /// - `ValidationError` if the username or password is unacceptable
    /// - `UsernameTaken` if the username exists
    /// - `Transaction` / `InternalError` for database failures
    pub async fn register(&self, input: CreateUserInput) -> Result<User, AccountServiceError> {
        validate_registration(&input)?;

        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::register_in(&mut uow, input.username, password_hash).await;
        let user = finish(uow, result).await?;

        tracing::info!(user_id = %user.id, role = %user.role, "User registered");
        Ok(user)
    }

    async fn register_in(
        uow: &mut UnitOfWork<Sqlite>,
        username: String,
        password_hash: String,
    ) -> Result<User, AccountServiceError> {
        let mut users = SqlxUserRepository::new(uow)?;

        let role = if users.count().await? == 0 {
            Role::Admin
        } else {
            Role::User
        };

        // Uniqueness is left to the UNIQUE constraint alone
        let user = User::new(username, password_hash, role);
        if let Err(err) = users.create(&user).await {
            if is_unique_violation(&err) {
                return Err(AccountServiceError::UsernameTaken(user.username));
            }
            return Err(err.into());
        }

        let mut audit = SqlxAuditRepository::new(uow)?;
        audit
            .record(&AuditEvent::new(
                None,
                AuditAction::UserRegistered,
                user.id,
                json!({ "username": user.username, "role": user.role }),
            ))
            .await?;

        Ok(user)
    }

    /// Check credentials and issue a session
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` for an unknown user or a wrong password
    /// - `Session` if the session could not be stored
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> Result<(User, Session), AccountServiceError> {
        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::find_by_username_in(&mut uow, username).await;
        let user = finish(uow, result).await?;

        let user = match user {
            Some(user) => user,
            None => {
                verify_dummy(password);
                tracing::info!("Login failed: unknown user");
                return Err(AccountServiceError::InvalidCredentials);
            }
        };

        if !verify_password(password, &user.password_hash).context("Failed to verify password")? {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            return Err(AccountServiceError::InvalidCredentials);
        }

        let session = self
            .sessions
            .create_session(user.id, user.role, ip_address, user_agent)
            .await?;

        Ok((user, session))
    }

    /// The account behind a verified identity
    pub async fn current_user(
        &self,
        identity: Option<&VerifiedIdentity>,
    ) -> Result<User, AccountServiceError> {
        authorize_by_role(identity, Role::User)?;
        let user_id = identity
            .map(|identity| identity.user_id)
            .ok_or(AuthorizationError::InsufficientPrivileges)?;

        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::get_user_in(&mut uow, user_id).await;
        finish(uow, result).await
    }

    async fn find_by_username_in(
        uow: &mut UnitOfWork<Sqlite>,
        username: &str,
    ) -> Result<Option<User>, AccountServiceError> {
        let mut users = SqlxUserRepository::new(uow)?;
        Ok(users.get_by_username(username).await?)
    }

    async fn get_user_in(
        uow: &mut UnitOfWork<Sqlite>,
        user_id: Uuid,
    ) -> Result<User, AccountServiceError> {
        let mut users = SqlxUserRepository::new(uow)?;
        users
            .get_by_id(user_id)
            .await?
            .ok_or(AccountServiceError::UserNotFound)
    }

    /// Change a user's role (admin only), then revoke that user's sessions
    /// so no session keeps the old role snapshot.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if the caller is not an admin (nothing is touched)
    /// - `UserNotFound` if the target does not exist
    /// - `Session` if the role changed but some sessions could not be revoked
    pub async fn change_role(
        &self,
        identity: Option<&VerifiedIdentity>,
        target_id: Uuid,
        role: Role,
    ) -> Result<User, AccountServiceError> {
        authorize_by_role(identity, Role::Admin)?;
        let actor_id = identity.map(|identity| identity.user_id);

        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::change_role_in(&mut uow, actor_id, target_id, role).await;
        let (user, changed) = finish(uow, result).await?;

        if changed {
            tracing::info!(user_id = %user.id, role = %user.role, "User role changed");
            self.sessions.revoke_all_by_user(user.id).await?;
        }

        Ok(user)
    }

    async fn change_role_in(
        uow: &mut UnitOfWork<Sqlite>,
        actor_id: Option<Uuid>,
        target_id: Uuid,
        role: Role,
    ) -> Result<(User, bool), AccountServiceError> {
        let mut users = SqlxUserRepository::new(uow)?;

        let mut user = users
            .get_by_id(target_id)
            .await?
            .ok_or(AccountServiceError::UserNotFound)?;

        if user.role == role {
            return Ok((user, false));
        }

        let previous = user.role;
        users.update_role(target_id, role).await?;
        user.role = role;

        let mut audit = SqlxAuditRepository::new(uow)?;
        audit
            .record(&AuditEvent::new(
                actor_id,
                AuditAction::RoleChanged,
                target_id,
                json!({ "from": previous, "to": role }),
            ))
            .await?;

        Ok((user, true))
    }

    /// Most recent audit events (admin only)
    pub async fn list_audit(
        &self,
        identity: Option<&VerifiedIdentity>,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AccountServiceError> {
        authorize_by_role(identity, Role::Admin)?;

        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::list_audit_in(&mut uow, limit.clamp(1, MAX_AUDIT_PAGE)).await;
        finish(uow, result).await
    }

    /// Audit events about one user, newest first (admin only)
    pub async fn list_audit_for_user(
        &self,
        identity: Option<&VerifiedIdentity>,
        subject_id: Uuid,
    ) -> Result<Vec<AuditEvent>, AccountServiceError> {
        authorize_by_role(identity, Role::Admin)?;

        let mut uow = self.transactions.new_transaction().await?;
        let result = Self::list_audit_for_user_in(&mut uow, subject_id).await;
        finish(uow, result).await
    }

    async fn list_audit_for_user_in(
        uow: &mut UnitOfWork<Sqlite>,
        subject_id: Uuid,
    ) -> Result<Vec<AuditEvent>, AccountServiceError> {
        let mut users = SqlxUserRepository::new(uow)?;
        if users.get_by_id(subject_id).await?.is_none() {
            return Err(AccountServiceError::UserNotFound);
        }

        let mut audit = SqlxAuditRepository::new(uow)?;
        Ok(audit.list_for_subject(subject_id).await?)
    }

    async fn list_audit_in(
        uow: &mut UnitOfWork<Sqlite>,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AccountServiceError> {
        let mut audit = SqlxAuditRepository::new(uow)?;
        Ok(audit.list_recent(limit).await?)
    }
}
