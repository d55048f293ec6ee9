#![allow(dead_code)]

use std::time::Duration;

use duo::{
    config::Config,
    connections::{self, Connection},
    db::Store,
    profiles::{self, Profile},
};
use tempfile::TempDir;

pub const WAIT: Duration = Duration::from_secs(2);

pub async fn store() -> Store {
    Store::in_memory("duo-test").await.unwrap()
}

/// A file-backed store with the production pool settings.
pub async fn file_store(dir: &TempDir) -> Store {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("duo.db").display());
    let config = Config::from_lookup(|key| (key == "DATABASE_URL").then(|| url.clone())).unwrap();
    Store::connect(&config).await.unwrap()
}

pub async fn user(store: &Store, id: &str, email: &str) -> Profile {
    profiles::ensure_profile(store, id, Some(email)).await.unwrap()
}

/// alice@x and bob@x, connected and accepted.
pub async fn paired(store: &Store) -> (Profile, Profile, Connection) {
    let alice = user(store, "alice", "alice@x").await;
    let bob = user(store, "bob", "bob@x").await;

    let pending = connections::create(store, &alice.id, &bob.email).await.unwrap();
    let accepted = connections::accept(store, &bob.id, &pending.id).await.unwrap();

    (alice, bob, accepted)
}

/// Every stored connection between the two identities, oldest first.
pub async fn connections_between(store: &Store, a: &str, b: &str) -> Vec<Connection> {
    sqlx::query_as::<_, Connection>(
        "SELECT id,initiator_id,target_id,status,created_at FROM connections
        WHERE namespace=?
        AND ((initiator_id=? AND target_id=?) OR (initiator_id=? AND target_id=?))
        ORDER BY created_at, rowid",
    )
        .bind(&store.namespace)
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&store.pool)
        .await
        .unwrap()
}
