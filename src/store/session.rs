//! Session store adapter
//!
//! Maps `Session` entities to and from flat hash records in a key-value
//! engine.
//!
//! Wire record, keyed by `session:<token>`:
//!
//! | field        | value                          |
//! |--------------|--------------------------------|
//! | `id`         | session UUID                   |
//! | `user_id`    | owning user UUID               |
//! | `user_role`  | `user` / `admin`               |
//! | `status`     | `active` / `revoked`           |
//! | `ip_address` | client IP at issuance          |
//! | `user_agent` | client user agent at issuance  |
//! | `created_at` | epoch seconds (integer)        |
//! | `expires_at` | epoch seconds (integer)        |
//!
//! Timestamps are always written as integers. Reads also accept numeric
//! strings, since some engines return every hash field as a string.
//!
//! Tokens owned by a user are indexed in the set `user_sessions:<user_id>`.
//! Each member is added with the TTL of its record. Members whose record
//! has gone are pruned when the index is read.

use super::{DynKeyValueStore, StoreRecord, StoreValue};
use crate::models::{Role, Session, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

const SESSION_KEY_PREFIX: &str = "session:";
const USER_INDEX_KEY_PREFIX: &str = "user_sessions:";

const FIELD_ID: &str = "id";
const FIELD_USER_ID: &str = "user_id";
const FIELD_ROLE: &str = "user_role";
const FIELD_STATUS: &str = "status";
const FIELD_IP_ADDRESS: &str = "ip_address";
const FIELD_USER_AGENT: &str = "user_agent";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_EXPIRES_AT: &str = "expires_at";

/// Session store errors
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// A stored record could not be turned back into a session
    #[error("Failed to decode session record: {0}")]
    Decode(String),

    /// The key-value engine failed or could not be reached
    #[error("Session store unavailable: {0:#}")]
    Unavailable(#[source] anyhow::Error),
}

impl From<anyhow::Error> for SessionStoreError {
    fn from(err: anyhow::Error) -> Self {
        SessionStoreError::Unavailable(err)
    }
}

/// Session repository trait
///
/// The domain-facing port for session persistence. `load` returns `None`
/// for tokens that never existed and for records the engine has expired;
/// callers cannot tell the two apart.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store the session under its token, expiring it at `expires_at`
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError>;

    /// Load the session stored under `token`
    async fn load(&self, token: &str) -> Result<Option<Session>, SessionStoreError>;

    /// Delete the session stored under `token`, returning whether it existed
    async fn delete(&self, token: &str) -> Result<bool, SessionStoreError>;

    /// All stored sessions of a user, in no particular order
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionStoreError>;
}

fn session_key(token: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, token)
}

fn user_index_key(user_id: Uuid) -> String {
    format!("{}{}", USER_INDEX_KEY_PREFIX, user_id)
}

/// Encode a session as a flat record. The token is not part of the record.
pub fn encode_session(session: &Session) -> Vec<(String, StoreValue)> {
    vec![
        (FIELD_ID.to_string(), session.id.to_string().into()),
        (FIELD_USER_ID.to_string(), session.user_id.to_string().into()),
        (FIELD_ROLE.to_string(), session.role.as_str().into()),
        (FIELD_STATUS.to_string(), session.status.as_str().into()),
        (FIELD_IP_ADDRESS.to_string(), session.ip_address.clone().into()),
        (FIELD_USER_AGENT.to_string(), session.user_agent.clone().into()),
        (FIELD_CREATED_AT.to_string(), session.created_at.timestamp().into()),
        (FIELD_EXPIRES_AT.to_string(), session.expires_at.timestamp().into()),
    ]
}

/// Decode a stored record, reattaching the token it was stored under
pub fn decode_session(token: &str, record: &StoreRecord) -> Result<Session, SessionStoreError> {
    Ok(Session {
        token: token.to_string(),
        id: uuid_field(record, FIELD_ID)?,
        user_id: uuid_field(record, FIELD_USER_ID)?,
        role: text_field(record, FIELD_ROLE)?
            .parse::<Role>()
            .map_err(|e| SessionStoreError::Decode(e.to_string()))?,
        status: text_field(record, FIELD_STATUS)?
            .parse::<SessionStatus>()
            .map_err(|e| SessionStoreError::Decode(e.to_string()))?,
        ip_address: text_field(record, FIELD_IP_ADDRESS)?.to_string(),
        user_agent: text_field(record, FIELD_USER_AGENT)?.to_string(),
        created_at: timestamp_field(record, FIELD_CREATED_AT)?,
        expires_at: timestamp_field(record, FIELD_EXPIRES_AT)?,
    })
}

fn field<'a>(record: &'a StoreRecord, name: &str) -> Result<&'a StoreValue, SessionStoreError> {
    record
        .get(name)
        .ok_or_else(|| SessionStoreError::Decode(format!("missing field '{}'", name)))
}

fn text_field<'a>(record: &'a StoreRecord, name: &str) -> Result<&'a str, SessionStoreError> {
    match field(record, name)? {
        StoreValue::Text(s) => Ok(s),
        StoreValue::Int(_) => Err(SessionStoreError::Decode(format!(
            "field '{}' must be a string",
            name
        ))),
    }
}

fn uuid_field(record: &StoreRecord, name: &str) -> Result<Uuid, SessionStoreError> {
    let raw = text_field(record, name)?;
    Uuid::parse_str(raw).map_err(|e| {
        SessionStoreError::Decode(format!("field '{}' is not a UUID ({:?}): {}", name, raw, e))
    })
}

fn timestamp_field(record: &StoreRecord, name: &str) -> Result<DateTime<Utc>, SessionStoreError> {
    let secs = match field(record, name)? {
        StoreValue::Int(n) => *n,
        StoreValue::Text(s) => s.trim().parse::<i64>().map_err(|_| {
            SessionStoreError::Decode(format!("field '{}' is not numeric: {:?}", name, s))
        })?,
    };

    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
        SessionStoreError::Decode(format!("field '{}' is out of range: {}", name, secs))
    })
}

/// Session repository backed by a key-value engine
pub struct KvSessionRepository {
    store: DynKeyValueStore,
}

impl KvSessionRepository {
    /// Create a new session repository over the given engine
    pub fn new(store: DynKeyValueStore) -> Self {
        Self { store }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(store: DynKeyValueStore) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(store))
    }
}

#[async_trait]
impl SessionRepository for KvSessionRepository {
    async fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        let remaining = session.expires_at - Utc::now();
        let ttl = match remaining.to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => {
                tracing::debug!(session_id = %session.id, "Skipping save of already expired session");
                return Ok(());
            }
        };

        self.store
            .put_hash(&session_key(&session.token), &encode_session(session), ttl)
            .await?;
        self.store
            .set_add(&user_index_key(session.user_id), &session.token, ttl)
            .await?;

        Ok(())
    }

    async fn load(&self, token: &str) -> Result<Option<Session>, SessionStoreError> {
        match self.store.get_hash(&session_key(token)).await? {
            Some(record) => decode_session(token, &record).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, token: &str) -> Result<bool, SessionStoreError> {
        let key = session_key(token);

        // Only `user_id` is needed to find the index entry
        let owner = match self.store.get_hash(&key).await? {
            Some(record) => Some(uuid_field(&record, FIELD_USER_ID)),
            None => None,
        };

        let removed = self.store.delete(&key).await?;

        match owner {
            Some(Ok(user_id)) => {
                self.store.set_remove(&user_index_key(user_id), token).await?;
            }
            Some(Err(e)) => {
                tracing::warn!("Deleted session with unreadable owner: {}", e);
            }
            None => {}
        }

        Ok(removed)
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<Session>, SessionStoreError> {
        let index_key = user_index_key(user_id);
        let tokens = self.store.set_members(&index_key).await?;

        let loaded = join_all(tokens.iter().map(|token| self.load(token))).await;

        let mut sessions = Vec::with_capacity(tokens.len());
        for (token, result) in tokens.iter().zip(loaded) {
            match result? {
                Some(session) => sessions.push(session),
                None => {
                    self.store.set_remove(&index_key, token).await?;
                }
            }
        }

        Ok(sessions)
    }
}
