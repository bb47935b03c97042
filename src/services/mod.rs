//! Services layer
//!
//! - `session`: session lifecycle (issue, revoke, list)
//! - `identity`: token to verified identity, the boundary other modules use
//! - `authz`: the shared role check
//! - `account`: interactors that run inside a unit of work
//! - `password`: argon2 hashing

pub mod account;
pub mod authz;
pub mod identity;
pub mod password;
pub mod session;

pub use account::{AccountService, AccountServiceError};
pub use authz::{authorize_by_role, authorize_role_tag, AuthorizationError};
pub use identity::{DynIdentityVerifier, IdentityVerifier, SessionIdentityClient, VerificationError};
pub use password::{hash_password, verify_password};
pub use session::{generate_token, SessionService, SessionServiceError};
