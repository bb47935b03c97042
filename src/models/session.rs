//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Role;

/// Session entity for user authentication
///
/// The token is the store key. It is never written as a field of the
/// stored record and is reattached when the record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer token
    #[serde(skip_serializing, default)]
    pub token: String,
    /// Session ID
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Role snapshot taken when the session was issued
    pub role: Role,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Client IP at issuance
    pub ip_address: String,
    /// Client user agent at issuance
    pub user_agent: String,
    /// Creation timestamp (whole seconds)
    pub created_at: DateTime<Utc>,
    /// Absolute expiration timestamp (whole seconds, never extended)
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Check if the session has been revoked
    pub fn is_revoked(&self) -> bool {
        self.status == SessionStatus::Revoked
    }

    /// Active and not yet expired
    pub fn is_usable(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }
}

/// Session status. Only ever moves `Active -> Revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "revoked" => Ok(SessionStatus::Revoked),
            _ => Err(anyhow::anyhow!("Invalid session status: {:?}", s)),
        }
    }
}
