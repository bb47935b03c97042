//! Audit event repository
//!
//! Events are written on the same unit of work as the change they record.

use crate::db::transaction::{TransactionError, UnitOfWork};
use crate::models::{AuditAction, AuditEvent};
use anyhow::{Context, Result};
use sqlx::{Row, Sqlite, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

/// Audit repository bound to one unit of work
pub struct SqlxAuditRepository<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> SqlxAuditRepository<'a> {
    pub fn new(uow: &'a mut UnitOfWork<Sqlite>) -> Result<Self, TransactionError> {
        Ok(Self {
            conn: uow.connection()?,
        })
    }

    /// Append an event
    pub async fn record(&mut self, event: &AuditEvent) -> Result<()> {
        let detail =
            serde_json::to_string(&event.detail).context("Failed to serialize audit detail")?;

        sqlx::query(
            r#"
            INSERT INTO audit_events (id, actor_id, action, subject_id, detail, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.actor_id.map(|id| id.to_string()))
        .bind(event.action.as_str())
        .bind(event.subject_id.to_string())
        .bind(detail)
        .bind(event.created_at)
        .execute(&mut *self.conn)
        .await
        .context("Failed to record audit event")?;

        Ok(())
    }

    /// Most recent events first
    pub async fn list_recent(&mut self, limit: i64) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, subject_id, detail, created_at
            FROM audit_events
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list audit events")?;

        rows.iter().map(row_to_event).collect()
    }

    /// Events applied to one user, most recent first
    pub async fn list_for_subject(&mut self, subject_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, action, subject_id, detail, created_at
            FROM audit_events
            WHERE subject_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(subject_id.to_string())
        .fetch_all(&mut *self.conn)
        .await
        .context("Failed to list audit events for subject")?;

        rows.iter().map(row_to_event).collect()
    }
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {} in database: {}", column, raw))
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent> {
    let id: String = row.get("id");
    let actor_id: Option<String> = row.get("actor_id");
    let action: String = row.get("action");
    let subject_id: String = row.get("subject_id");
    let detail: String = row.get("detail");

    Ok(AuditEvent {
        id: parse_uuid(&id, "id")?,
        actor_id: actor_id
            .as_deref()
            .map(|raw| parse_uuid(raw, "actor_id"))
            .transpose()?,
        action: AuditAction::from_str(&action)
            .with_context(|| format!("Invalid audit action in database: {}", action))?,
        subject_id: parse_uuid(&subject_id, "subject_id")?,
        detail: serde_json::from_str(&detail).context("Invalid audit detail in database")?,
        created_at: row.get("created_at"),
    })
}
