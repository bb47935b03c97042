//! User model
//!
//! This module defines the User entity and the two-level role hierarchy
//! shared by every feature module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User entity representing a registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: Uuid,
    /// Username (unique)
    pub username: String,
    /// Password hash (argon2 PHC string)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// User role
    pub role: Role,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with a fresh id.
    ///
    /// The password must already be hashed; see `services::password::hash_password()`.
    pub fn new(username: String, password_hash: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            role,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Role for authorization.
///
/// Exactly two levels: an `Admin` holds every privilege a `User` has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account
    User,
    /// Administrator - full access
    Admin,
}

impl Role {
    /// Wire tag used by the session store and the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Whether a holder of `self` meets a `required` role.
    ///
    /// Equal roles pass, `Admin` satisfies `User`, nothing else does.
    pub fn satisfies(self, required: Role) -> bool {
        matches!(
            (self, required),
            (Role::User, Role::User) | (Role::Admin, Role::Admin) | (Role::Admin, Role::User)
        )
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    /// Tags are matched exactly; empty or unknown tags are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(anyhow::anyhow!("Invalid role: {:?}", s)),
        }
    }
}

/// Input for registering a new user (before password hashing)
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    /// Username
    pub username: String,
    /// Plaintext password (will be hashed)
    pub password: String,
}

impl CreateUserInput {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_tags_round_trip() {
        for role in [Role::User, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(role.to_string(), role.as_str());
        }
    }

    #[test]
    fn test_role_rejects_empty_and_unknown_tags() {
        assert!("".parse::<Role>().is_err());
        assert!("Admin".parse::<Role>().is_err());
        assert!("root".parse::<Role>().is_err());
        assert!(" user".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let role: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_new_user_has_fresh_id() {
        let a = User::new("a".into(), "hash".into(), Role::User);
        let b = User::new("b".into(), "hash".into(), Role::Admin);
        assert_ne!(a.id, b.id);
        assert_eq!(b.role, Role::Admin);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User::new("alice".into(), "secret-hash".into(), Role::User);
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
