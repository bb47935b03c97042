//! Database migrations module
//!
//! Code-based migrations embedded in the binary as SQL strings. Applied
//! versions are tracked in the `_migrations` table; each migration runs
//! inside its own transaction together with its tracking row.
//!
//! # Usage
//!
//! ```ignore
//! use gatehouse::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use sqlx::SqlitePool;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements
    pub up: &'static str,
}

/// All migrations, in application order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY NOT NULL,
                username VARCHAR(50) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
        "#,
    },
    Migration {
        version: 2,
        name: "create_audit_events",
        up: r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id TEXT PRIMARY KEY NOT NULL,
                actor_id TEXT,
                action VARCHAR(50) NOT NULL,
                subject_id TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (actor_id) REFERENCES users(id) ON DELETE SET NULL,
                FOREIGN KEY (subject_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_audit_events_subject ON audit_events(subject_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_created_at ON audit_events(created_at);
        "#,
    },
];

/// Run all pending migrations
///
/// # Returns
///
/// Number of migrations applied
///
/// # Errors
///
/// Returns an error if any migration fails to apply; that migration is
/// rolled back as a whole.
pub async fn run_migrations(pool: &SqlitePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied_versions = get_applied_versions(pool).await?;

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&i64::from(migration.version)) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create migrations table")?;

    Ok(())
}

async fn get_applied_versions(pool: &SqlitePool) -> Result<Vec<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .context("Failed to read applied migrations")
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin migration")?;

    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await
        .context("Failed to record migration")?;

    tx.commit().await.context("Failed to commit migration")?;

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    if sql.len() > 100 {
        let mut end = 100;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &sql[..end])
    } else {
        sql.to_string()
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        // Running again should apply 0 migrations
        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_applied_versions_are_tracked() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let versions = get_applied_versions(&pool).await.expect("Failed to read versions");
        let expected: Vec<i64> = MIGRATIONS.iter().map(|m| i64::from(m.version)).collect();
        assert_eq!(versions, expected);
    }

    #[tokio::test]
    async fn test_role_check_constraint() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let insert = "INSERT INTO users (id, username, password_hash, role) VALUES (?, ?, ?, ?)";

        let ok = sqlx::query(insert)
            .bind("u1")
            .bind("alice")
            .bind("hash")
            .bind("admin")
            .execute(&pool)
            .await;
        assert!(ok.is_ok());

        let bad = sqlx::query(insert)
            .bind("u2")
            .bind("bob")
            .bind("hash")
            .bind("root")
            .execute(&pool)
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_unique_username() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let insert = "INSERT INTO users (id, username, password_hash) VALUES (?, ?, ?)";
        sqlx::query(insert)
            .bind("u1")
            .bind("alice")
            .bind("hash")
            .execute(&pool)
            .await
            .expect("Failed to create first user");

        let duplicate = sqlx::query(insert)
            .bind("u2")
            .bind("alice")
            .bind("hash")
            .execute(&pool)
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_audit_subject_foreign_key() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let result = sqlx::query(
            "INSERT INTO audit_events (id, action, subject_id) VALUES (?, ?, ?)",
        )
        .bind("e1")
        .bind("user_registered")
        .bind("missing-user")
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);\n-- trailing";
        assert_eq!(split_sql_statements(sql_with_comments).len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
