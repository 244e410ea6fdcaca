//! Core business logic for the authentication system.
//!
//! `SessionRotator` registers and logs users in, and runs the refresh
//! exchange. Each successful issuance stores exactly one refresh record bound
//! to the access token minted with it. A refresh secret can be exchanged once:
//! the consumed record is deleted and its replacement inserted in the same
//! transaction.

use crate::auth::models::*;
use crate::database::models::{CreateRefreshToken, CreateUser, RefreshToken};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::refresh_token_repository::RefreshTokenRepository;
use crate::repositories::user_repository::{UserRepository, is_unique_violation};
use crate::services::notification_dispatcher::{Notifier, dispatch};
use crate::utils::jwt::{TokenIssuer, fingerprint, lifetime};
use crate::utils::password::PasswordHasher;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use validator::Validate;

const INVALID_CREDENTIALS: &str = "invalid email or password";
const INVALID_REFRESH_TOKEN: &str = "invalid or expired refresh token";

/// Session service shared by every request; built once at startup.
pub struct SessionRotator {
    pool: SqlitePool,
    issuer: TokenIssuer,
    hasher: PasswordHasher,
    notifier: Arc<dyn Notifier>,
    webhook_url: String,
    refresh_token_ttl: Duration,
}

/// How the presenting client differs from the one a record was issued to.
#[derive(Debug, PartialEq, Eq)]
enum ClientDrift {
    Unchanged,
    IpChanged,
    UserAgentChanged,
}

/// Everything minted for one issuance, before it is persisted.
struct IssuedSession {
    access_token: String,
    refresh_token: String,
    record: CreateRefreshToken,
}

impl SessionRotator {
    pub fn new(
        pool: SqlitePool,
        issuer: TokenIssuer,
        hasher: PasswordHasher,
        notifier: Arc<dyn Notifier>,
        webhook_url: String,
        refresh_token_ttl_seconds: u64,
    ) -> Self {
        SessionRotator {
            pool,
            issuer,
            hasher,
            notifier,
            webhook_url,
            refresh_token_ttl: lifetime(refresh_token_ttl_seconds),
        }
    }

    /// Creates a user and opens their first session.
    ///
    /// # Errors
    /// - `BadRequest` for invalid input or a hashing failure
    /// - `Conflict` if the email is already registered
    pub async fn register(
        &self,
        request: CredentialsRequest,
        client: &ClientContext,
    ) -> ServiceResult<AuthResponse> {
        let request = normalize(request);
        request.validate().map_err(ServiceError::from_validation)?;

        let password_hash = self
            .hasher
            .hash(&request.password)
            .map_err(|_| ServiceError::bad_request("can't hash password"))?;

        let user_repo = UserRepository::new(&self.pool);
        if user_repo.email_exists(&request.email).await? {
            return Err(ServiceError::conflict("User", &request.email));
        }

        let user = match user_repo
            .create_user(CreateUser {
                id: uuid::Uuid::now_v7().to_string(),
                email: request.email.clone(),
                password_hash,
            })
            .await
        {
            Ok(user) => user,
            // Lost a race with a concurrent registration of the same email
            Err(e) if is_unique_violation(&e) => {
                return Err(ServiceError::conflict("User", &request.email));
            }
            Err(e) => return Err(e.into()),
        };

        let session = self.issue_session(&user.id, client)?;
        RefreshTokenRepository::new(&self.pool)
            .save(session.record)
            .await?;

        info!("Registered user {}", user.id);

        Ok(AuthResponse {
            user: user.into(),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        })
    }

    /// Verifies credentials and opens a new session.
    ///
    /// Unknown email and wrong password produce the same `Unauthorized`.
    pub async fn login(
        &self,
        request: CredentialsRequest,
        client: &ClientContext,
    ) -> ServiceResult<AuthResponse> {
        let request = normalize(request);
        request.validate().map_err(ServiceError::from_validation)?;

        let user = match UserRepository::new(&self.pool)
            .get_user_by_email(&request.email)
            .await?
        {
            Some(user) => user,
            None => {
                self.hasher.burn(&request.password);
                return Err(ServiceError::unauthorized(INVALID_CREDENTIALS));
            }
        };

        if !self.hasher.verify(&request.password, &user.password_hash) {
            return Err(ServiceError::unauthorized(INVALID_CREDENTIALS));
        }

        let session = self.issue_session(&user.id, client)?;
        RefreshTokenRepository::new(&self.pool)
            .save(session.record)
            .await?;

        info!("User {} logged in", user.id);

        Ok(AuthResponse {
            user: user.into(),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        })
    }

    /// Exchanges a refresh secret plus its paired access token for a new pair.
    ///
    /// A user-agent change revokes every session of the user. An IP change
    /// only raises a webhook alert.
    pub async fn refresh(
        &self,
        request: RefreshTokenRequest,
        client: &ClientContext,
    ) -> ServiceResult<TokenPair> {
        request.validate().map_err(ServiceError::from_validation)?;

        let repo = RefreshTokenRepository::new(&self.pool);

        let record = match repo
            .find_by_presented_secret(&request.refresh_token, &self.issuer)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return Err(ServiceError::unauthorized(INVALID_REFRESH_TOKEN)),
            Err(e) => {
                error!("Refresh token lookup failed: {}", e);
                return Err(ServiceError::unauthorized(INVALID_REFRESH_TOKEN));
            }
        };

        match check_binding(&record, &request.access_token, client, Utc::now())? {
            ClientDrift::UserAgentChanged => {
                warn!(
                    "User-Agent changed for user {}; revoking all sessions",
                    record.user_id
                );
                repo.delete_all_for_user(&record.user_id)
                    .await
                    .map_err(|e| {
                        error!("Failed to revoke sessions of {}: {}", record.user_id, e);
                        ServiceError::internal("failed to deauthorize user")
                    })?;
                return Err(ServiceError::unauthorized(
                    "unauthorized: user-agent changed",
                ));
            }
            ClientDrift::IpChanged => self.report_ip_change(&record, &client.ip_address),
            ClientDrift::Unchanged => {}
        }

        // Minted up front so the write transaction only spans delete and insert.
        let session = self.issue_session(&record.user_id, client)?;

        let pending = match repo.begin_rotation(&record.token_hash).await {
            Ok(Some(pending)) => pending,
            Ok(None) => return Err(ServiceError::unauthorized(INVALID_REFRESH_TOKEN)),
            Err(e) => {
                error!("Failed to delete consumed refresh token: {}", e);
                return Err(ServiceError::internal("can't delete refresh token"));
            }
        };

        pending.complete(session.record).await.map_err(|e| {
            error!("Failed to save rotated refresh token: {}", e);
            ServiceError::internal("can't save refresh token")
        })?;

        info!(
            "Rotated refresh token for user {} (issued {})",
            record.user_id, record.created_at
        );

        Ok(TokenPair {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        })
    }

    /// Resolves a bearer access token to its user.
    pub fn authenticate(&self, access_token: &str) -> ServiceResult<AuthenticatedUser> {
        self.issuer
            .verify_access_token(access_token)
            .map(|user_id| AuthenticatedUser { user_id })
            .map_err(|e| ServiceError::unauthorized(format!("invalid token: {}", e)))
    }

    /// Revokes every refresh token of the user, not only the current one.
    ///
    /// Access tokens already issued stay valid until they expire.
    pub async fn logout(&self, user: &AuthenticatedUser) -> ServiceResult<LogoutResponse> {
        let revoked = RefreshTokenRepository::new(&self.pool)
            .delete_all_for_user(&user.user_id)
            .await?;

        info!(
            "User {} logged out, {} refresh token(s) revoked",
            user.user_id, revoked
        );

        Ok(LogoutResponse {
            message: "successfully logged out".to_string(),
        })
    }

    /// Mints an access token and a refresh secret bound to it.
    fn issue_session(&self, user_id: &str, client: &ClientContext) -> ServiceResult<IssuedSession> {
        let access_token = self
            .issuer
            .issue_access_token(user_id)
            .map_err(|e| ServiceError::internal(format!("can't generate access token: {}", e)))?;

        let refresh = self
            .issuer
            .issue_refresh_secret()
            .map_err(|_| ServiceError::internal("can't create refresh token"))?;

        let record = CreateRefreshToken {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            token_hash: refresh.hash,
            expires_at: Utc::now()
                .checked_add_signed(self.refresh_token_ttl)
                .ok_or_else(|| ServiceError::internal("refresh token lifetime out of range"))?,
            access_token_fingerprint: fingerprint(&access_token),
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
        };

        Ok(IssuedSession {
            access_token,
            refresh_token: refresh.secret,
            record,
        })
    }

    fn report_ip_change(&self, record: &RefreshToken, new_ip: &str) {
        info!(
            "IP change for user {}: {} -> {}",
            record.user_id, record.ip_address, new_ip
        );

        let payload = json!({
            "user_id": record.user_id,
            "event": "ip_change",
            "old_ip": record.ip_address,
            "new_ip": new_ip,
            "timestamp": Utc::now().to_rfc3339(),
        });

        dispatch(self.notifier.clone(), self.webhook_url.clone(), payload);
    }
}

/// Checks a looked-up record against the presented access token and client.
///
/// Expiry is checked again here even though lookup already skips expired
/// records, since the record may lapse between the two.
fn check_binding(
    record: &RefreshToken,
    access_token: &str,
    client: &ClientContext,
    now: DateTime<Utc>,
) -> ServiceResult<ClientDrift> {
    if record.is_expired_at(now) {
        return Err(ServiceError::unauthorized("refresh token expired"));
    }

    if record.access_token_fingerprint != fingerprint(access_token) {
        warn!("Token pair mismatch for user {}", record.user_id);
        return Err(ServiceError::unauthorized("token pair mismatch"));
    }

    if record.user_agent != client.user_agent {
        Ok(ClientDrift::UserAgentChanged)
    } else if record.ip_address != client.ip_address {
        Ok(ClientDrift::IpChanged)
    } else {
        Ok(ClientDrift::Unchanged)
    }
}

fn normalize(request: CredentialsRequest) -> CredentialsRequest {
    CredentialsRequest {
        email: request.email.trim().to_lowercase(),
        password: request.password,
    }
}
