//! Per-request caller context
//!
//! Handlers take a `RequestContext` and pass its identity explicitly into
//! the interactors, which do their own authorization. A handler behind
//! `require_auth` always sees `Some` identity; a public handler sees `None`.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::models::{Role, VerifiedIdentity};
use crate::services::{authorize_by_role, AuthorizationError};

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone)]
pub struct RequestContext {
    identity: Option<VerifiedIdentity>,
    pub client_ip: String,
    pub user_agent: String,
}

impl RequestContext {
    pub fn identity(&self) -> Option<&VerifiedIdentity> {
        self.identity.as_ref()
    }

    /// The identity, if it holds at least `required`
    pub fn authorized(&self, required: Role) -> Result<&VerifiedIdentity, AuthorizationError> {
        authorize_by_role(self.identity(), required)?;
        self.identity().ok_or(AuthorizationError::InsufficientPrivileges)
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let client_ip = forwarded_ip(&parts.headers)
            .or(peer)
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .unwrap_or(UNKNOWN_CLIENT)
            .to_string();

        Ok(Self {
            identity: parts.extensions.get::<VerifiedIdentity>().copied(),
            client_ip,
            user_agent,
        })
    }
}

/// Client IP from X-Forwarded-For (first hop) or X-Real-IP
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(ip) = forwarded.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}
