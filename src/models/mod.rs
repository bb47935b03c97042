//! Data models
//!
//! This module contains the data structures shared across the Gatehouse core:
//! - Store entities (Session, User, AuditEvent)
//! - Request-scoped types (VerifiedIdentity)
//! - Input types for the account interactors

mod audit;
mod identity;
mod session;
mod user;

pub use audit::{AuditAction, AuditEvent};
pub use identity::VerifiedIdentity;
pub use session::{Session, SessionStatus};
pub use user::{CreateUserInput, Role, User};
