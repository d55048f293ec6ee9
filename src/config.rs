//! Environment configuration.
//!
//! Values come from the process environment (after loading `.env`). `DUO_CONFIG`
//! may hold a JSON blob whose keys take precedence over the individual variables.

use std::str::FromStr;

use serde::Deserialize;

use crate::AppResult;

pub const DEFAULT_NAMESPACE: &str = "private-duo-app";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://duo.db?mode=rwc";
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_SESSION_MINUTES: i64 = 60;
pub const DEFAULT_FEED_CAPACITY: usize = 256;
pub const MAX_FEED_CAPACITY: usize = 1 << 16;

#[derive(Debug, Default, Deserialize)]
struct ConfigBlob {
    namespace: Option<String>,
    #[serde(default)]
    allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub namespace: String,
    pub session_minutes: i64,
    pub feed_capacity: usize,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> AppResult<Config> {
        dotenv::dotenv().ok();
        Config::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Config> {
        let blob: ConfigBlob = match get("DUO_CONFIG") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => ConfigBlob::default(),
        };

        let namespace = blob
            .namespace
            .or_else(|| get("DUO_NAMESPACE"))
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());
        if namespace.trim().is_empty() {
            return Err("namespace must not be empty".into());
        }

        let session_minutes = parse_or(&get, "DUO_SESSION_MINUTES", DEFAULT_SESSION_MINUTES)?;
        if session_minutes < 1 {
            return Err(format!("DUO_SESSION_MINUTES must be at least 1, got {session_minutes}").into());
        }

        let feed_capacity = parse_or(&get, "DUO_FEED_CAPACITY", DEFAULT_FEED_CAPACITY)?;
        if !(1..=MAX_FEED_CAPACITY).contains(&feed_capacity) {
            return Err(format!("DUO_FEED_CAPACITY must be between 1 and {MAX_FEED_CAPACITY}, got {feed_capacity}").into());
        }

        Ok(Config {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            bind_addr: get("DUO_BIND").unwrap_or_else(|| DEFAULT_BIND.to_owned()),
            namespace,
            session_minutes,
            feed_capacity,
            allowed_origins: blob.allowed_origins,
        })
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> AppResult<T> {
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} must be a number, got {raw:?}").into()),
        None => Ok(default),
    }
}
