//! Request authentication and routing headers.
//!
//! ```text
//! Authorization: Token <token>   ──► PlatformAuth  (token A or token B → Platform)
//! Authorization: Token <admin>   ──► AdminAuth     (local backend, /hub only)
//! OCPI-from-*/OCPI-to-*/X-*-ID   ──► Routing       (RoutingContext)
//! ```

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;
use tracing::debug;

use ampere_core::{PartyKey, Platform, RoutingContext};

use crate::error::ApiError;
use crate::AppState;

pub const FROM_COUNTRY_CODE: &str = "ocpi-from-country-code";
pub const FROM_PARTY_ID: &str = "ocpi-from-party-id";
pub const TO_COUNTRY_CODE: &str = "ocpi-to-country-code";
pub const TO_PARTY_ID: &str = "ocpi-to-party-id";
pub const REQUEST_ID: &str = "x-request-id";
pub const CORRELATION_ID: &str = "x-correlation-id";

/// Token presented in `Authorization: Token <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("token") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Remote Platforms
// =============================================================================

/// The remote platform behind the presented token.
pub struct PlatformAuth(pub Platform);

impl FromRequestParts<AppState> for PlatformAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
        match state.ctx.authenticate(token).await {
            Ok(platform) if platform.is_local => Err(ApiError::Unauthorized),
            Ok(platform) => Ok(PlatformAuth(platform)),
            Err(ampere_sync::SyncError::InvalidToken) => {
                debug!(path = %parts.uri.path(), "Unknown token");
                Err(ApiError::Unauthorized)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Local Backend
// =============================================================================

/// The local backend, authenticated with the configured admin token.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let expected = state
            .ctx
            .config
            .server
            .admin_token
            .as_deref()
            .ok_or(ApiError::AdminDisabled)?;
        match bearer_token(&parts.headers) {
            Some(token) if token == expected => Ok(AdminAuth),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

// =============================================================================
// Routing Headers
// =============================================================================

/// Routing headers of the request. Missing parties stay `None`.
pub struct Routing(pub RoutingContext);

impl Routing {
    pub fn from_headers(headers: &HeaderMap) -> RoutingContext {
        let party = |cc: &str, pid: &str| match (header(headers, cc), header(headers, pid)) {
            (Some(cc), Some(pid)) => Some(PartyKey::new(cc, pid)),
            _ => None,
        };
        let mut routing = RoutingContext::between(
            party(FROM_COUNTRY_CODE, FROM_PARTY_ID),
            party(TO_COUNTRY_CODE, TO_PARTY_ID),
        );
        if let Some(id) = header(headers, CORRELATION_ID).or_else(|| header(headers, REQUEST_ID)) {
            routing.correlation_id = id.to_string();
        }
        routing
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Routing {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Routing(Routing::from_headers(&parts.headers)))
    }
}
