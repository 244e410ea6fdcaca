//! Application-wide configuration settings.
//!
//! Loaded once at startup and never re-read; the resulting `Config` is
//! immutable and handed to the components that need it.

use anyhow::{Context, Result, bail};
use std::env;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
/// Ten years; anything longer is a misconfiguration.
const MAX_TOKEN_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub token_secret: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    pub bcrypt_cost: u32,
    /// Empty disables anomaly notifications.
    pub webhook_url: String,
    pub server_port: u16,
    /// Zero disables the expired-record sweeper.
    pub refresh_purge_interval_seconds: u64,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL not set")?;

        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 5u32)?;
        let acquire_timeout_seconds = parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECONDS", 3u64)?;

        let token_secret = lookup("TOKEN_SECRET").context("TOKEN_SECRET not set")?;
        if token_secret.is_empty() {
            bail!("TOKEN_SECRET must not be empty");
        }

        let access_token_ttl_seconds = parse_or(
            &lookup,
            "ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        )?;
        let refresh_token_ttl_seconds = parse_or(
            &lookup,
            "REFRESH_TOKEN_TTL_SECONDS",
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        )?;
        for (key, ttl) in [
            ("ACCESS_TOKEN_TTL_SECONDS", access_token_ttl_seconds),
            ("REFRESH_TOKEN_TTL_SECONDS", refresh_token_ttl_seconds),
        ] {
            if !(1..=MAX_TOKEN_TTL_SECONDS).contains(&ttl) {
                bail!("{} must be between 1 and {}", key, MAX_TOKEN_TTL_SECONDS);
            }
        }

        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            bail!("BCRYPT_COST must be between 4 and 31");
        }

        let webhook_url = lookup("WEBHOOK_URL").unwrap_or_default();

        let server_port = parse_or(&lookup, "SERVER_PORT", 8080u16)?;

        let refresh_purge_interval_seconds =
            parse_or(&lookup, "REFRESH_PURGE_INTERVAL_SECONDS", 3600u64)?;

        Ok(Config {
            database_url,
            max_connections,
            acquire_timeout_seconds,
            token_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            bcrypt_cost,
            webhook_url,
            server_port,
            refresh_purge_interval_seconds,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("TOKEN_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 5);
        assert_eq!(config.access_token_ttl_seconds, 3600);
        assert_eq!(config.refresh_token_ttl_seconds, 604_800);
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.server_port, 8080);
        assert!(config.webhook_url.is_empty());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = Config::from_lookup(lookup_from(&[("DATABASE_URL", "sqlite::memory:")]))
            .unwrap_err();
        assert!(err.to_string().contains("TOKEN_SECRET"));

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("TOKEN_SECRET", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("TOKEN_SECRET", "s3cret"),
            ("SERVER_PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));

        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("TOKEN_SECRET", "s3cret"),
            ("BCRYPT_COST", "2"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BCRYPT_COST"));
    }

    #[test]
    fn test_token_lifetimes_bounded() {
        let base = [("DATABASE_URL", "sqlite::memory:"), ("TOKEN_SECRET", "s3cret")];

        for (key, value) in [
            ("REFRESH_TOKEN_TTL_SECONDS", "100000000000000"),
            ("ACCESS_TOKEN_TTL_SECONDS", "18446744073709551615"),
            ("ACCESS_TOKEN_TTL_SECONDS", "0"),
        ] {
            let mut pairs = base.to_vec();
            pairs.push((key, value));
            let err = Config::from_lookup(lookup_from(&pairs)).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={value} should be rejected");
        }

        let mut pairs = base.to_vec();
        pairs.push(("REFRESH_TOKEN_TTL_SECONDS", "315360000"));
        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.refresh_token_ttl_seconds, MAX_TOKEN_TTL_SECONDS);
    }
}
