//! Middleware and extractors for authenticated routes.
//!
//! `jwt_auth` validates the bearer access token and stores the resulting
//! `AuthenticatedUser` in the request extensions. `ClientContext` captures the
//! caller's User-Agent and IP address for session binding.

use crate::api::common::{ApiError, service_error_to_http};
use crate::auth::models::ClientContext;
use crate::auth::service::SessionRotator;
use crate::errors::ServiceError;
use axum::{
    extract::{ConnectInfo, Extension, FromRequestParts, Request},
    http::{
        HeaderMap,
        header::{AUTHORIZATION, USER_AGENT},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// JWT authentication middleware
pub async fn jwt_auth(
    Extension(rotator): Extension<Arc<SessionRotator>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).map_err(service_error_to_http)?;
    let user = rotator
        .authenticate(token)
        .map_err(service_error_to_http)?;

    // Add the user to request extensions for use in handlers
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The header must split on single spaces into exactly two parts.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ServiceError> {
    let missing = || ServiceError::unauthorized("no authorization header provided");

    let header = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or_else(missing)?;

    let parts: Vec<&str> = header.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] => Ok(*token),
        _ => Err(missing()),
    }
}

/// First `X-Forwarded-For` entry, else the peer address without its port.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => String::new(),
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientContext {
            user_agent,
            ip_address: client_ip(&parts.headers, peer),
        })
    }
}
