//! Audit event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A record of a privileged or account-changing action.
///
/// Written inside the same unit of work as the change it describes, so an
/// event exists if and only if the change was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    /// Who performed the action (`None` for self-service registration)
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    /// The user the action was applied to
    pub subject_id: Uuid,
    /// Free-form JSON detail
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor_id: Option<Uuid>,
        action: AuditAction,
        subject_id: Uuid,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            subject_id,
            detail,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserRegistered,
    RoleChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegistered => "user_registered",
            AuditAction::RoleChanged => "role_changed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_registered" => Ok(AuditAction::UserRegistered),
            "role_changed" => Ok(AuditAction::RoleChanged),
            _ => Err(anyhow::anyhow!("Invalid audit action: {}", s)),
        }
    }
}
