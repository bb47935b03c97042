//! Unit of work
//!
//! A `UnitOfWork` wraps one database transaction for the length of one
//! logical operation. Repositories are built from `&mut UnitOfWork<DB>`, so
//! every repository call made by one interactor shares the same atomic
//! scope, and a repository cannot exist without an open unit of work.
//!
//! Terminal operations:
//! - `commit` and `rollback` may each be called once and exclude each other;
//!   any later call returns `TransactionError::AlreadyFinished`.
//! - A failed commit leaves nothing applied and is counted as a rollback.
//! - Dropping a unit of work that is still open (early return without
//!   rollback, cancelled request future, panic) rolls it back, logs a
//!   warning and is counted as abandoned.
//!
//! The database type is a generic parameter, so handing a repository a
//! transaction for the wrong backend does not compile.

use async_trait::async_trait;
use sqlx::{Database, Pool, Sqlite, Transaction};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lifecycle state of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Open => f.write_str("open"),
            TransactionState::Committed => f.write_str("committed"),
            TransactionState::RolledBack => f.write_str("rolled back"),
        }
    }
}

/// Transaction errors
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    #[error("Failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    /// A terminal operation was attempted on a finished unit of work
    #[error("Unit of work already {0}")]
    AlreadyFinished(TransactionState),
}

/// Process-wide transaction counters
#[derive(Debug, Default)]
pub struct TransactionStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of `TransactionStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TransactionStatsSnapshot {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub abandoned: u64,
}

impl TransactionStatsSnapshot {
    /// Units of work begun but not yet finished
    pub fn open(&self) -> u64 {
        self.begun
            .saturating_sub(self.committed + self.rolled_back + self.abandoned)
    }
}

impl TransactionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TransactionStatsSnapshot {
        TransactionStatsSnapshot {
            begun: self.begun.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// One atomic scope over a single database transaction
pub struct UnitOfWork<DB: Database> {
    tx: Option<Transaction<'static, DB>>,
    state: TransactionState,
    stats: Arc<TransactionStats>,
}

impl<DB: Database> fmt::Debug for UnitOfWork<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<DB: Database> UnitOfWork<DB> {
    fn new(tx: Transaction<'static, DB>, stats: Arc<TransactionStats>) -> Self {
        stats.begun.fetch_add(1, Ordering::Relaxed);
        Self {
            tx: Some(tx),
            state: TransactionState::Open,
            stats,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The live connection repositories execute on
    pub fn connection(&mut self) -> Result<&mut DB::Connection, TransactionError> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(TransactionError::AlreadyFinished(self.state)),
        }
    }

    fn take_open(&mut self) -> Result<Transaction<'static, DB>, TransactionError> {
        self.tx
            .take()
            .ok_or(TransactionError::AlreadyFinished(self.state))
    }

    /// Commit every write made through this unit of work
    pub async fn commit(&mut self) -> Result<(), TransactionError> {
        let tx = self.take_open()?;

        match tx.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // The transaction was consumed by the failed commit and is
                // rolled back as it is dropped.
                self.state = TransactionState::RolledBack;
                self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Transaction commit failed: {}", e);
                Err(TransactionError::Commit(e))
            }
        }
    }

    /// Discard every write made through this unit of work
    pub async fn rollback(&mut self) -> Result<(), TransactionError> {
        let tx = self.take_open()?;

        self.state = TransactionState::RolledBack;
        self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);

        tx.rollback().await.map_err(|e| {
            tracing::error!("Transaction rollback failed: {}", e);
            TransactionError::Rollback(e)
        })
    }
}

impl<DB: Database> Drop for UnitOfWork<DB> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Unit of work dropped while open; rolling back");
        }
    }
}

/// Opens units of work
#[async_trait]
pub trait TransactionFactory: Send + Sync {
    type Database: Database;

    /// Begin a new unit of work
    async fn new_transaction(&self) -> Result<UnitOfWork<Self::Database>, TransactionError>;

    /// Counters for every unit of work this factory has opened
    fn stats(&self) -> TransactionStatsSnapshot;
}

/// Shared transaction factory over SQLite
pub type DynTransactionFactory = Arc<dyn TransactionFactory<Database = Sqlite>>;

/// Transaction factory backed by a connection pool
pub struct PoolTransactionFactory<DB: Database> {
    pool: Pool<DB>,
    stats: Arc<TransactionStats>,
}

impl<DB: Database> PoolTransactionFactory<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self {
            pool,
            stats: Arc::new(TransactionStats::new()),
        }
    }
}

impl PoolTransactionFactory<Sqlite> {
    /// Create a boxed factory for use with dependency injection
    pub fn boxed(pool: Pool<Sqlite>) -> DynTransactionFactory {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TransactionFactory for PoolTransactionFactory<Sqlite> {
    type Database = Sqlite;

    async fn new_transaction(&self) -> Result<UnitOfWork<Sqlite>, TransactionError> {
        let tx = self.pool.begin().await.map_err(|e| {
            tracing::error!("Failed to begin transaction: {}", e);
            TransactionError::Begin(e)
        })?;
        Ok(UnitOfWork::new(tx, self.stats.clone()))
    }

    fn stats(&self) -> TransactionStatsSnapshot {
        self.stats.snapshot()
    }
}
