//! Access-token and refresh-secret issuance.
//!
//! Access tokens are HS512-signed JWTs carrying the user id and a one hour
//! expiry. Refresh secrets are 256 random bits, URL-safe base64 encoded, and
//! only ever stored as a bcrypt hash. A refresh record is bound to the access
//! token it was issued with through the token's SHA-256 fingerprint.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::errors::ServiceResult;
use crate::utils::password::PasswordHasher;

const ALGORITHM: Algorithm = Algorithm::HS512;
const REFRESH_SECRET_BYTES: usize = 32;

/// Claims embedded in every access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub user_id: String,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Unique token id so two tokens minted in the same second differ.
    pub jti: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed claims")]
    MalformedClaims,
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// A freshly minted refresh secret. `secret` goes to the client, `hash` to
/// storage.
#[derive(Debug)]
pub struct RefreshSecret {
    pub secret: String,
    pub hash: String,
}

/// Mints and checks access tokens and refresh secrets.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
    hasher: PasswordHasher,
}

impl TokenIssuer {
    pub fn new(secret: &str, access_token_ttl_seconds: u64, hasher: PasswordHasher) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        // Only the configured algorithm is accepted. Expiry is checked by hand
        // because the library treats `exp == now` as still valid.
        let mut validation = Validation::new(ALGORITHM);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        TokenIssuer {
            encoding_key,
            decoding_key,
            validation,
            access_token_ttl: lifetime(access_token_ttl_seconds),
            hasher,
        }
    }

    /// Signs a new access token for `user_id`.
    pub fn issue_access_token(&self, user_id: &str) -> Result<String, TokenError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(self.access_token_ttl)
            .ok_or_else(|| TokenError::Signing("access token lifetime out of range".to_string()))?;

        let claims = Claims {
            user_id: user_id.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: uuid::Uuid::now_v7().to_string(),
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies signature and expiry and returns the embedded user id.
    pub fn verify_access_token(&self, token: &str) -> Result<String, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::MissingAlgorithm => TokenError::BadSignature,
                _ => TokenError::MalformedClaims,
            })?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        if claims.user_id.is_empty() {
            return Err(TokenError::MalformedClaims);
        }

        Ok(claims.user_id)
    }

    /// Generates a random refresh secret and its storage hash.
    pub fn issue_refresh_secret(&self) -> ServiceResult<RefreshSecret> {
        let mut bytes = [0u8; REFRESH_SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = URL_SAFE_NO_PAD.encode(bytes);
        let hash = self.hasher.hash(&secret)?;

        Ok(RefreshSecret { secret, hash })
    }

    pub fn verify_refresh_secret(&self, presented: &str, stored_hash: &str) -> bool {
        self.hasher.verify(presented, stored_hash)
    }
}

/// Converts a configured lifetime in seconds, saturating instead of wrapping.
pub fn lifetime(seconds: u64) -> Duration {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Hex SHA-256 of the full token string.
pub fn fingerprint(access_token: &str) -> String {
    hex::encode(Sha256::digest(access_token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: &str) -> TokenIssuer {
        TokenIssuer::new(secret, 3600, PasswordHasher::new(4).unwrap())
    }

    fn sign_with(claims: &Claims, algorithm: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_expiring_at(exp: i64) -> Claims {
        Claims {
            user_id: "user-1".to_string(),
            iat: exp - 3600,
            exp,
            jti: "jti".to_string(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = issuer("secret");
        let token = issuer.issue_access_token("user-1").unwrap();
        assert_eq!(issuer.verify_access_token(&token).unwrap(), "user-1");
    }

    #[test]
    fn test_tokens_are_unique() {
        let issuer = issuer("secret");
        let first = issuer.issue_access_token("user-1").unwrap();
        let second = issuer.issue_access_token("user-1").unwrap();
        assert_ne!(first, second);
        assert_ne!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let token = issuer("secret").issue_access_token("user-1").unwrap();
        assert_eq!(
            issuer("other").verify_access_token(&token),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let claims = claims_expiring_at(Utc::now().timestamp() + 600);
        let token = sign_with(&claims, Algorithm::HS256, "secret");
        assert_eq!(
            issuer("secret").verify_access_token(&token),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_expiry_is_exclusive() {
        let issuer = issuer("secret");

        let past = sign_with(
            &claims_expiring_at(Utc::now().timestamp() - 10),
            ALGORITHM,
            "secret",
        );
        assert_eq!(issuer.verify_access_token(&past), Err(TokenError::Expired));

        let now = sign_with(
            &claims_expiring_at(Utc::now().timestamp()),
            ALGORITHM,
            "secret",
        );
        assert_eq!(issuer.verify_access_token(&now), Err(TokenError::Expired));
    }

    #[test]
    fn test_malformed_claims() {
        let issuer = issuer("secret");
        assert_eq!(
            issuer.verify_access_token("not.a.jwt"),
            Err(TokenError::MalformedClaims)
        );

        #[derive(Serialize)]
        struct NoUser {
            exp: i64,
        }
        let token = encode(
            &Header::new(ALGORITHM),
            &NoUser {
                exp: Utc::now().timestamp() + 600,
            },
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(
            issuer.verify_access_token(&token),
            Err(TokenError::MalformedClaims)
        );
    }

    #[test]
    fn test_refresh_secret() {
        let issuer = issuer("secret");
        let pair = issuer.issue_refresh_secret().unwrap();

        // 32 bytes, unpadded base64
        assert_eq!(pair.secret.len(), 43);
        assert!(
            pair.secret
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(pair.secret, pair.hash);
        assert!(issuer.verify_refresh_secret(&pair.secret, &pair.hash));
        assert!(!issuer.verify_refresh_secret("guess", &pair.hash));
    }

    #[test]
    fn test_oversized_lifetime_is_an_error() {
        assert_eq!(lifetime(3600), Duration::hours(1));
        assert_eq!(lifetime(u64::MAX), Duration::MAX);

        let issuer = TokenIssuer::new("secret", u64::MAX, PasswordHasher::new(4).unwrap());
        assert!(matches!(
            issuer.issue_access_token("user-1"),
            Err(TokenError::Signing(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 64);
    }
}
