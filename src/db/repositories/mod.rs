//! Database repositories
//!
//! Repositories execute on the connection of a `UnitOfWork`; there is no
//! pool-backed repository. Each one borrows the unit of work mutably, so
//! repositories inside one interactor take turns on the same transaction.

pub mod audit;
pub mod user;

pub use audit::SqlxAuditRepository;
pub use user::SqlxUserRepository;

/// Whether a repository error was caused by a UNIQUE constraint
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}
