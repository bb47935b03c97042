//! User repository
//!
//! Database operations for users, executed on the connection of one unit of
//! work. Build a repository with `SqlxUserRepository::new(&mut uow)?`; the
//! mutable borrow keeps other repositories off the same handle until this
//! one is dropped.

use crate::db::transaction::{TransactionError, UnitOfWork};
use crate::models::{Role, User};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, Sqlite, SqliteConnection};
use std::str::FromStr;
use uuid::Uuid;

/// User repository bound to one unit of work
pub struct SqlxUserRepository<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> SqlxUserRepository<'a> {
    /// Create a repository on the unit of work's connection
    ///
    /// # Errors
    /// `TransactionError::AlreadyFinished` if the unit of work was committed
    /// or rolled back.
    pub fn new(uow: &'a mut UnitOfWork<Sqlite>) -> Result<Self, TransactionError> {
        Ok(Self {
            conn: uow.connection()?,
        })
    }

    /// Insert a new user
    ///
    /// A taken username fails with an error for which
    /// `is_unique_violation` holds.
    pub async fn create(&mut self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.conn)
        .await
        .context("Failed to create user")?;

        Ok(())
    }

    pub async fn get_by_id(&mut self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, role, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to get user by ID")?;

        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn get_by_username(&mut self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, role, created_at, updated_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *self.conn)
        .await
        .context("Failed to get user by username")?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Set a user's role, returning whether the user exists
    pub async fn update_role(&mut self, id: Uuid, role: Role) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&mut *self.conn)
            .await
            .context("Failed to update user role")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&mut self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&mut *self.conn)
            .await
            .context("Failed to count users")?;

        Ok(row.get("count"))
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .with_context(|| format!("Invalid user id in database: {}", id_str))?;

    let role_str: String = row.get("role");
    let role = Role::from_str(&role_str)
        .with_context(|| format!("Invalid role in database: {}", role_str))?;

    Ok(User {
        id,
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::is_unique_violation;
    use crate::db::transaction::{PoolTransactionFactory, TransactionFactory};
    use crate::db::{create_test_pool, migrations};

    async fn setup_factory() -> PoolTransactionFactory<Sqlite> {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        PoolTransactionFactory::new(pool)
    }

    fn test_user(username: &str, role: Role) -> User {
        User::new(username.to_string(), "$argon2id$test".to_string(), role)
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let factory = setup_factory().await;
        let user = test_user("alice", Role::Admin);

        let mut uow = factory.new_transaction().await.unwrap();
        let mut repo = SqlxUserRepository::new(&mut uow).unwrap();
        repo.create(&user).await.unwrap();

        let by_id = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(by_id.role, Role::Admin);

        let by_name = repo.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        assert!(repo.get_by_username("bob").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);

        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let factory = setup_factory().await;

        let mut uow = factory.new_transaction().await.unwrap();
        let mut repo = SqlxUserRepository::new(&mut uow).unwrap();
        repo.create(&test_user("alice", Role::User)).await.unwrap();

        let err = repo.create(&test_user("alice", Role::User)).await.unwrap_err();
        assert!(is_unique_violation(&err), "{:#}", err);
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_other_failures_are_not_unique_violations() {
        let factory = setup_factory().await;

        let mut uow = factory.new_transaction().await.unwrap();
        sqlx::query("DROP TABLE audit_events")
            .execute(uow.connection().unwrap())
            .await
            .unwrap();
        sqlx::query("DROP TABLE users")
            .execute(uow.connection().unwrap())
            .await
            .unwrap();

        let mut repo = SqlxUserRepository::new(&mut uow).unwrap();
        let err = repo.create(&test_user("alice", Role::User)).await.unwrap_err();
        assert!(!is_unique_violation(&err));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_role() {
        let factory = setup_factory().await;
        let user = test_user("alice", Role::User);

        let mut uow = factory.new_transaction().await.unwrap();
        let mut repo = SqlxUserRepository::new(&mut uow).unwrap();
        repo.create(&user).await.unwrap();

        assert!(repo.update_role(user.id, Role::Admin).await.unwrap());
        assert!(!repo.update_role(Uuid::new_v4(), Role::Admin).await.unwrap());

        let updated = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(updated.role, Role::Admin);

        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_finished_unit_of_work_rejects_repository() {
        let factory = setup_factory().await;

        let mut uow = factory.new_transaction().await.unwrap();
        uow.commit().await.unwrap();

        assert!(matches!(
            SqlxUserRepository::new(&mut uow),
            Err(TransactionError::AlreadyFinished(_))
        ));
    }
}
