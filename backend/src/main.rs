//! Main entry point for the session backend.
//!
//! This file initializes the Axum web server, sets up database connections,
//! and registers the authentication routes and middleware. It also starts the
//! background sweeper that purges expired refresh tokens.

mod api;
mod auth;
mod config;
mod database;
mod errors;
mod repositories;
mod services;
mod utils;

use crate::api::common::ApiResponse;
use crate::auth::service::SessionRotator;
use crate::repositories::refresh_token_repository::RefreshTokenRepository;
use crate::services::notification_dispatcher::WebhookNotifier;
use crate::utils::jwt::TokenIssuer;
use crate::utils::password::PasswordHasher;
use axum::{Extension, Router, response::Json, routing::get};
use config::Config;
use database::Database;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let db = Database::new(&config).await?;
    let pool = db.pool().clone();

    let hasher = PasswordHasher::new(config.bcrypt_cost)?;
    let issuer = TokenIssuer::new(
        &config.token_secret,
        config.access_token_ttl_seconds,
        hasher.clone(),
    );
    let rotator = Arc::new(SessionRotator::new(
        pool.clone(),
        issuer,
        hasher,
        Arc::new(WebhookNotifier::new()?),
        config.webhook_url.clone(),
        config.refresh_token_ttl_seconds,
    ));

    if config.refresh_purge_interval_seconds > 0 {
        tokio::spawn(purge_expired_refresh_tokens(
            pool,
            Duration::from_secs(config.refresh_purge_interval_seconds),
        ));
    }

    let app = Router::new()
        .route("/", get(root_handler))
        .merge(auth::routes::auth_router())
        .layer(Extension(rotator));

    let bind_address = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!("Starting session server on port {}", config.server_port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    db.close().await;
    Ok(())
}

async fn root_handler() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(
        json!({
            "service": "Session Backend",
            "version": env!("CARGO_PKG_VERSION")
        }),
        "Welcome to the session API",
    ))
}

/// Deletes expired refresh tokens on a fixed interval.
async fn purge_expired_refresh_tokens(pool: SqlitePool, every: Duration) {
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;

        match RefreshTokenRepository::new(&pool)
            .delete_expired(chrono::Utc::now())
            .await
        {
            Ok(0) => {}
            Ok(purged) => info!("Purged {} expired refresh token(s)", purged),
            Err(e) => error!("Failed to purge expired refresh tokens: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
