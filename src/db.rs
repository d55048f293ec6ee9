use std::sync::Arc;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{config::Config, feed::Hub, AppResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS profiles (
        namespace TEXT NOT NULL,
        id TEXT NOT NULL,
        email TEXT NOT NULL,
        display_name TEXT NOT NULL,
        avatar_url TEXT NOT NULL,
        partner_id TEXT,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (namespace, id)
    )",
    "CREATE INDEX IF NOT EXISTS profiles_email ON profiles (namespace, email)",
    "CREATE TABLE IF NOT EXISTS connections (
        namespace TEXT NOT NULL,
        id TEXT NOT NULL,
        initiator_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
        created_at INTEGER NOT NULL,
        PRIMARY KEY (namespace, id)
    )",
    // one row per identity while it has a pending or accepted connection
    "CREATE TABLE IF NOT EXISTS connection_slots (
        namespace TEXT NOT NULL,
        identity_id TEXT NOT NULL,
        connection_id TEXT NOT NULL,
        PRIMARY KEY (namespace, identity_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        namespace TEXT NOT NULL,
        connection_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_by_connection ON messages (namespace, connection_id, created_at, seq)",
];

/// Everything that talks to storage receives one of these. Cloning is cheap.
#[derive(Clone)]
pub struct Store {
    pub pool: SqlitePool,
    pub namespace: String,
    pub hub: Hub,
    pub(crate) append_lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new(pool: SqlitePool, namespace: impl Into<String>, hub: Hub) -> Store {
        Store {
            pool,
            namespace: namespace.into(),
            hub,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn connect(config: &Config) -> AppResult<Store> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(&config.database_url)
            .await?;
        init_schema(&pool).await?;

        tracing::info!(url = %config.database_url, namespace = %config.namespace, "store ready");
        Ok(Store::new(pool, &config.namespace, Hub::new(config.feed_capacity)))
    }

    /// A private database that lives as long as the returned store.
    pub async fn in_memory(namespace: &str) -> AppResult<Store> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        init_schema(&pool).await?;

        Ok(Store::new(pool, namespace, Hub::new(crate::config::DEFAULT_FEED_CAPACITY)))
    }
}

pub async fn init_schema(pool: &SqlitePool) -> AppResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Server-assigned timestamp, milliseconds since the unix epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
