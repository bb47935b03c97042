//! Role-based authorization
//!
//! The single authorization check shared by every module. Interactors call
//! it after reading the caller's identity and before opening a unit of
//! work, so a rejected caller causes no store or database side effects.

use crate::models::{Role, VerifiedIdentity};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("Insufficient privileges")]
    InsufficientPrivileges,
}

/// Check that the caller holds at least `required`.
///
/// A missing identity fails like an insufficient role.
pub fn authorize_by_role(
    identity: Option<&VerifiedIdentity>,
    required: Role,
) -> Result<(), AuthorizationError> {
    match identity {
        Some(identity) if identity.role.satisfies(required) => Ok(()),
        Some(identity) => {
            tracing::warn!(
                user_id = %identity.user_id,
                role = %identity.role,
                required = %required,
                "Authorization denied"
            );
            Err(AuthorizationError::InsufficientPrivileges)
        }
        None => {
            tracing::warn!(required = %required, "Authorization denied: no identity");
            Err(AuthorizationError::InsufficientPrivileges)
        }
    }
}

/// Check a raw role tag against `required`. Empty or unknown tags fail.
pub fn authorize_role_tag(tag: &str, required: Role) -> Result<(), AuthorizationError> {
    match Role::from_str(tag) {
        Ok(role) if role.satisfies(required) => Ok(()),
        _ => Err(AuthorizationError::InsufficientPrivileges),
    }
}
