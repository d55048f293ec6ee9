//! Pairing between two identities.
//!
//! A connection starts `pending`, and the target moves it exactly once to
//! `accepted` or `rejected`. While a connection is pending or accepted both
//! participants hold a row in `connection_slots`; the primary key on that table
//! is what keeps every identity in at most one live connection.

mod respond;
mod search;
mod watch;

use std::fmt;

use axum::{routing::{get, post}, Router};
use serde::Serialize;
use sqlx::SqliteConnection;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    db::{now_millis, Store},
    feed::Event,
    profiles::{self, Profile},
    AppError, AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(watch::current))
        .route("/ws", get(watch::view_ws))
        .route("/search", post(search::search))
        .route("/{id}/accept", post(respond::accept))
        .route("/{id}/reject", post(respond::reject))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ConnectionStatus::*;
        f.write_str(match self {
            Pending => "pending",
            Accepted => "accepted",
            Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Connection {
    pub id: String,
    pub initiator_id: String,
    pub target_id: String,
    pub status: ConnectionStatus,
    pub created_at: i64,
}

/// How the current identity sees its live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    PendingSender,
    PendingReceiver,
    Paired,
}

impl Connection {
    pub fn involves(&self, identity: &str) -> bool {
        self.initiator_id == identity || self.target_id == identity
    }

    pub fn role_for(&self, identity: &str) -> Option<Role> {
        match self.status {
            ConnectionStatus::Accepted if self.involves(identity) => Some(Role::Paired),
            ConnectionStatus::Pending if self.initiator_id == identity => Some(Role::PendingSender),
            ConnectionStatus::Pending if self.target_id == identity => Some(Role::PendingReceiver),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionView {
    pub connection: Option<Connection>,
    pub role: Option<Role>,
    pub partner: Option<Profile>,
}

/// Sends a pairing request from `me` to whoever owns `target_email`.
pub async fn create(store: &Store, me: &str, target_email: &str) -> AppResult<Connection> {
    let email = profiles::normalize_email(target_email);
    if email.is_empty() {
        return Err(AppError::ValidationFailure("email must not be empty".to_owned()));
    }

    let own = profiles::get_profile(store, me)
        .await?
        .ok_or_else(|| AppError::NotFound("profile".to_owned()))?;
    if own.email == email {
        return Err(AppError::SelfReference);
    }

    let target = profiles::find_by_email(store, &email)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user with email {email}")))?;
    if target.id == own.id {
        return Err(AppError::SelfReference);
    }

    let connection = Connection {
        id: Uuid::now_v7().to_string(),
        initiator_id: own.id,
        target_id: target.id,
        status: ConnectionStatus::Pending,
        created_at: now_millis(),
    };

    let mut tx = store.pool.begin().await?;
    claim_slot(&mut tx, &store.namespace, &connection.initiator_id, &connection.id).await?;
    claim_slot(&mut tx, &store.namespace, &connection.target_id, &connection.id).await?;
    sqlx::query("INSERT INTO connections (namespace,id,initiator_id,target_id,status,created_at) VALUES (?,?,?,?,?,?)")
        .bind(&store.namespace)
        .bind(&connection.id)
        .bind(&connection.initiator_id)
        .bind(&connection.target_id)
        .bind(connection.status)
        .bind(connection.created_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(
        connection_id = %connection.id,
        from = %connection.initiator_id,
        to = %connection.target_id,
        "connection requested"
    );
    store.hub.publish(Event::Connection(connection.clone()));

    Ok(connection)
}

/// Accepts a pending request addressed to `me`. The status change and both
/// partner links commit together or not at all.
pub async fn accept(store: &Store, me: &str, connection_id: &str) -> AppResult<Connection> {
    let mut tx = store.pool.begin().await?;

    // must stay the first statement: the transaction starts as a writer
    if !respond_to_pending(&mut tx, &store.namespace, me, connection_id, ConnectionStatus::Accepted).await? {
        drop(tx);
        return Err(refusal(store, me, connection_id).await);
    }

    let connection = fetch_connection(&mut tx, &store.namespace, connection_id).await?;
    link_partner(&mut tx, &store.namespace, &connection.initiator_id, &connection.target_id).await?;
    link_partner(&mut tx, &store.namespace, &connection.target_id, &connection.initiator_id).await?;

    tx.commit().await?;

    tracing::info!(connection_id = %connection.id, "connection accepted");
    store.hub.publish(Event::Connection(connection.clone()));
    for id in [&connection.initiator_id, &connection.target_id] {
        if let Some(profile) = profiles::get_profile(store, id).await? {
            store.hub.publish(Event::Profile(profile));
        }
    }

    Ok(connection)
}

/// Rejects a pending request addressed to `me` and frees both participants.
pub async fn reject(store: &Store, me: &str, connection_id: &str) -> AppResult<Connection> {
    let mut tx = store.pool.begin().await?;

    if !respond_to_pending(&mut tx, &store.namespace, me, connection_id, ConnectionStatus::Rejected).await? {
        drop(tx);
        return Err(refusal(store, me, connection_id).await);
    }

    sqlx::query("DELETE FROM connection_slots WHERE namespace=? AND connection_id=?")
        .bind(&store.namespace)
        .bind(connection_id)
        .execute(&mut *tx)
        .await?;
    let connection = fetch_connection(&mut tx, &store.namespace, connection_id).await?;

    tx.commit().await?;

    tracing::info!(connection_id = %connection.id, "connection rejected");
    store.hub.publish(Event::Connection(connection.clone()));

    Ok(connection)
}

pub async fn get_connection(store: &Store, connection_id: &str) -> AppResult<Option<Connection>> {
    Ok(
        sqlx::query_as::<_, Connection>(
            "SELECT id,initiator_id,target_id,status,created_at FROM connections WHERE namespace=? AND id=?",
        )
            .bind(&store.namespace)
            .bind(connection_id)
            .fetch_optional(&store.pool)
            .await?
    )
}

/// The single pending or accepted connection `me` takes part in, if any.
pub async fn active_connection(store: &Store, me: &str) -> AppResult<Option<Connection>> {
    Ok(
        sqlx::query_as::<_, Connection>(
            "SELECT c.id,c.initiator_id,c.target_id,c.status,c.created_at
            FROM connection_slots s
            JOIN connections c ON c.namespace=s.namespace AND c.id=s.connection_id
            WHERE s.namespace=? AND s.identity_id=?",
        )
            .bind(&store.namespace)
            .bind(me)
            .fetch_optional(&store.pool)
            .await?
    )
}

pub async fn view(store: &Store, me: &str) -> AppResult<ConnectionView> {
    let Some(connection) = active_connection(store, me).await? else {
        return Ok(ConnectionView::default());
    };

    let role = connection.role_for(me);
    let partner = match role {
        Some(Role::Paired) => match profiles::get_profile(store, me).await? {
            Some(profile) => profiles::partner_of(store, &profile).await?,
            None => None,
        },
        _ => None,
    };

    Ok(ConnectionView {
        connection: Some(connection),
        role,
        partner,
    })
}

/// Requires `me` to be a participant of an accepted connection.
pub async fn require_paired(store: &Store, me: &str, connection_id: &str) -> AppResult<Connection> {
    let connection = get_connection(store, connection_id)
        .await?
        .filter(|connection| connection.involves(me))
        .ok_or_else(|| AppError::NotFound("connection".to_owned()))?;

    if connection.status != ConnectionStatus::Accepted {
        return Err(AppError::InvalidTransition(format!("connection is {}", connection.status)));
    }

    Ok(connection)
}

/// Live view of `me`'s connection. The current view is delivered first.
pub async fn watch(store: &Store, me: &str) -> AppResult<ViewSubscription> {
    let rx = store.hub.subscribe();
    let initial = view(store, me).await?;

    tracing::debug!(user_id = %me, "connection view subscribed");
    Ok(ViewSubscription {
        store: store.clone(),
        identity: me.to_owned(),
        rx,
        initial: Some(initial.clone()),
        last: initial,
    })
}

pub struct ViewSubscription {
    store: Store,
    identity: String,
    rx: broadcast::Receiver<Event>,
    initial: Option<ConnectionView>,
    last: ConnectionView,
}

impl ViewSubscription {
    /// Waits for the next distinct view. `None` once the feed has shut down.
    pub async fn next(&mut self) -> AppResult<Option<ConnectionView>> {
        if let Some(initial) = self.initial.take() {
            return Ok(Some(initial));
        }

        loop {
            let relevant = match self.rx.recv().await {
                Ok(Event::Connection(connection)) => connection.involves(&self.identity),
                Ok(Event::Profile(profile)) => {
                    profile.id == self.identity
                        || profile.partner_id.as_deref() == Some(self.identity.as_str())
                }
                Ok(Event::Message(_)) => false,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.identity, skipped, "connection view lagged, refreshing");
                    true
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            };
            if !relevant {
                continue;
            }

            let current = view(&self.store, &self.identity).await?;
            if current != self.last {
                self.last = current.clone();
                return Ok(Some(current));
            }
        }
    }
}

async fn claim_slot(conn: &mut SqliteConnection, namespace: &str, identity: &str, connection_id: &str) -> AppResult<()> {
    let result = sqlx::query("INSERT INTO connection_slots (namespace,identity_id,connection_id) VALUES (?,?,?)")
        .bind(namespace)
        .bind(identity)
        .bind(connection_id)
        .execute(conn)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(AppError::AlreadyConnected),
        Err(err) => Err(err.into()),
    }
}

/// Moves a pending connection addressed to `me` to `status`. `false` when
/// nothing matched.
async fn respond_to_pending(
    conn: &mut SqliteConnection,
    namespace: &str,
    me: &str,
    connection_id: &str,
    status: ConnectionStatus,
) -> AppResult<bool> {
    let updated = sqlx::query(
        "UPDATE connections SET status=? WHERE namespace=? AND id=? AND status=? AND target_id=?",
    )
        .bind(status)
        .bind(namespace)
        .bind(connection_id)
        .bind(ConnectionStatus::Pending)
        .bind(me)
        .execute(conn)
        .await?;

    Ok(updated.rows_affected() == 1)
}

async fn fetch_connection(conn: &mut SqliteConnection, namespace: &str, connection_id: &str) -> AppResult<Connection> {
    sqlx::query_as::<_, Connection>(
        "SELECT id,initiator_id,target_id,status,created_at FROM connections WHERE namespace=? AND id=?",
    )
        .bind(namespace)
        .bind(connection_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::NotFound("connection".to_owned()))
}

/// Why `me` could not respond to the connection.
async fn refusal(store: &Store, me: &str, connection_id: &str) -> AppError {
    let connection = match get_connection(store, connection_id).await {
        Ok(Some(connection)) if connection.involves(me) => connection,
        Ok(_) => return AppError::NotFound("connection".to_owned()),
        Err(err) => return err,
    };

    if connection.target_id != me {
        AppError::InvalidTransition("only the requested user can respond".to_owned())
    } else {
        AppError::InvalidTransition(format!("connection is {}", connection.status))
    }
}

async fn link_partner(conn: &mut SqliteConnection, namespace: &str, id: &str, partner_id: &str) -> AppResult<()> {
    let updated = sqlx::query("UPDATE profiles SET partner_id=? WHERE namespace=? AND id=?")
        .bind(partner_id)
        .bind(namespace)
        .bind(id)
        .execute(conn)
        .await?;

    if updated.rows_affected() != 1 {
        return Err(AppError::NotFound(format!("profile {id}")));
    }
    Ok(())
}
