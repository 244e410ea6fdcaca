//! Defines the HTTP routes for authentication.
//!
//! These routes handle registration, login, token refresh, logout and the
//! bearer-protected user id lookup. The router expects an
//! `Extension<Arc<SessionRotator>>` layer from the caller.

use crate::auth::handlers::*;
use crate::auth::middleware::*;
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Creates the authentication router with all auth-related routes
pub fn auth_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .route("/logout", post(logout).layer(middleware::from_fn(jwt_auth)))
        .route(
            "/users/id",
            get(get_user_id).layer(middleware::from_fn(jwt_auth)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::SessionRotator;
    use crate::database::Database;
    use crate::services::notification_dispatcher::testing::RecordingNotifier;
    use crate::utils::jwt::TokenIssuer;
    use crate::utils::password::PasswordHasher;
    use axum::{
        Extension,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const AGENT: &str = "test-client/1.0";
    const IP: &str = "198.51.100.4";

    async fn app() -> Router {
        let db = Database::in_memory().await.unwrap();
        let hasher = PasswordHasher::new(4).unwrap();
        let issuer = TokenIssuer::new("router-secret", 3600, hasher.clone());
        let (notifier, _alerts) = RecordingNotifier::new();
        let rotator = SessionRotator::new(
            db.pool().clone(),
            issuer,
            hasher,
            Arc::new(notifier),
            String::new(),
            7 * 24 * 3600,
        );

        auth_router().layer(Extension(Arc::new(rotator)))
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, AGENT)
            .header("x-forwarded-for", IP)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn register(app: &Router, email: &str, password: &str) -> Value {
        let (status, body) = send(
            app,
            post_json("/register", &json!({"email": email, "password": password})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn test_register_returns_tokens_without_password_hash() {
        let app = app().await;
        let body = register(&app, "a@x.com", "pw123").await;

        assert!(!body["access_token"].as_str().unwrap().is_empty());
        assert!(!body["refresh_token"].as_str().unwrap().is_empty());
        assert_eq!(body["user"]["email"], "a@x.com");
        assert!(body["user"]["id"].is_string());
        assert!(body["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_register_conflicts() {
        let app = app().await;
        register(&app, "a@x.com", "pw123").await;

        let (status, body) = send(
            &app,
            post_json("/register", &json!({"email": "a@x.com", "password": "pw123"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["error_type"], "conflict");
    }

    #[tokio::test]
    async fn test_login_with_wrong_password() {
        let app = app().await;
        register(&app, "a@x.com", "pw123").await;

        let (status, body) = send(
            &app,
            post_json("/login", &json!({"email": "a@x.com", "password": "wrongpw"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("access_token").is_none());
        assert!(body.get("refresh_token").is_none());

        let (status, body) = send(
            &app,
            post_json("/login", &json!({"email": "a@x.com", "password": "pw123"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["access_token"].is_string());
    }

    #[tokio::test]
    async fn test_undecodable_bodies_are_bad_requests() {
        let app = app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["error_type"], "bad_request");

        let (status, _) = send(&app, post_json("/refresh", &json!({"refresh_token": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_id_requires_bearer() {
        let app = app().await;
        let body = register(&app, "a@x.com", "pw123").await;
        let access_token = body["access_token"].as_str().unwrap();

        let (status, id_body) = send(&app, with_bearer("GET", "/users/id", access_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(id_body["user_id"], body["user"]["id"]);

        let request = Request::builder()
            .uri("/users/id")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "no authorization header provided");

        let (status, _) = send(&app, with_bearer("GET", "/users/id", "forged.token.value")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_then_logout_flow() {
        let app = app().await;
        let session = register(&app, "a@x.com", "pw123").await;

        let (status, rotated) = send(
            &app,
            post_json(
                "/refresh",
                &json!({
                    "refresh_token": session["refresh_token"],
                    "access_token": session["access_token"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(rotated["refresh_token"], session["refresh_token"]);

        let access_token = rotated["access_token"].as_str().unwrap();
        let (status, body) = send(&app, with_bearer("POST", "/logout", access_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "successfully logged out");

        let (status, body) = send(
            &app,
            post_json(
                "/refresh",
                &json!({
                    "refresh_token": rotated["refresh_token"],
                    "access_token": rotated["access_token"],
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "invalid or expired refresh token");
    }
}
