//! Verified caller identity

use serde::Serialize;
use uuid::Uuid;

use super::{Role, Session};

/// The (user, role) pair attached to a request after its session token
/// has been validated.
///
/// Lives in the request extensions under its own type, so there is exactly
/// one key to look it up by. Never persisted and never shared between
/// requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub role: Role,
}

impl VerifiedIdentity {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }
}

impl From<&Session> for VerifiedIdentity {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id,
            role: session.role,
        }
    }
}
