//! Database layer
//!
//! Relational persistence for the Gatehouse core, backed by SQLite.
//!
//! # Architecture
//!
//! - `pool`: the process-wide connection pool, created once at startup
//! - `migrations`: schema embedded in the binary
//! - `transaction`: `UnitOfWork` and the factory that opens one per operation
//! - `repositories`: data access built from a live unit of work
//!
//! # Usage
//!
//! ```ignore
//! use gatehouse::config::DatabaseConfig;
//! use gatehouse::db::{create_pool, migrations, PoolTransactionFactory, TransactionFactory};
//! use gatehouse::db::repositories::SqlxUserRepository;
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//!
//! let factory = PoolTransactionFactory::boxed(pool);
//! let mut uow = factory.new_transaction().await?;
//! let user = SqlxUserRepository::new(&mut uow)?.get_by_username("alice").await?;
//! uow.commit().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;
pub mod transaction;

pub use pool::{create_pool, create_test_pool, ping};
pub use transaction::{
    DynTransactionFactory, PoolTransactionFactory, TransactionError, TransactionFactory,
    TransactionState, TransactionStats, TransactionStatsSnapshot, UnitOfWork,
};
