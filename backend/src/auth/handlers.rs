//! Handler functions for authentication-related API endpoints.
//!
//! These functions decode request bodies, capture the client context, and
//! hand off to `auth::service` for the session logic.

use crate::api::common::{ApiError, service_error_to_http};
use crate::auth::models::*;
use crate::auth::service::SessionRotator;
use crate::errors::ServiceError;
use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    response::Json as ResponseJson,
};
use std::sync::Arc;

/// Maps any body decode failure to a 400.
fn decode_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        service_error_to_http(ServiceError::bad_request(format!(
            "can't decode body: {}",
            rejection.body_text()
        )))
    })
}

/// Handle user registration request
#[axum::debug_handler]
pub async fn register(
    Extension(rotator): Extension<Arc<SessionRotator>>,
    client: ClientContext,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<ResponseJson<AuthResponse>, ApiError> {
    let request = decode_body(payload)?;

    match rotator.register(request, &client).await {
        Ok(response) => Ok(ResponseJson(response)),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// Handle user login request
#[axum::debug_handler]
pub async fn login(
    Extension(rotator): Extension<Arc<SessionRotator>>,
    client: ClientContext,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<ResponseJson<AuthResponse>, ApiError> {
    let request = decode_body(payload)?;

    match rotator.login(request, &client).await {
        Ok(response) => Ok(ResponseJson(response)),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// Handle token refresh request
#[axum::debug_handler]
pub async fn refresh_token(
    Extension(rotator): Extension<Arc<SessionRotator>>,
    client: ClientContext,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<ResponseJson<TokenPair>, ApiError> {
    let request = decode_body(payload)?;

    match rotator.refresh(request, &client).await {
        Ok(response) => Ok(ResponseJson(response)),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// Handle logout request; revokes every refresh token of the caller
#[axum::debug_handler]
pub async fn logout(
    Extension(rotator): Extension<Arc<SessionRotator>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<ResponseJson<LogoutResponse>, ApiError> {
    match rotator.logout(&user).await {
        Ok(response) => Ok(ResponseJson(response)),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// Return the user id carried by the bearer token
#[axum::debug_handler]
pub async fn get_user_id(
    Extension(user): Extension<AuthenticatedUser>,
) -> ResponseJson<UserIdResponse> {
    ResponseJson(UserIdResponse {
        user_id: user.user_id,
    })
}
