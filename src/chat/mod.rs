//! Per-connection chat log.
//!
//! Messages are append-only and ordered by `(created_at, seq)`. Appends are
//! serialized through the store's append lock and timestamps never go
//! backwards within a connection, so live delivery order matches replay order.

mod msg;
mod ws;

use std::collections::VecDeque;

use axum::{routing::get, Router};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{connections, db::{now_millis, Store}, feed::Event, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{connection_id}", get(msg::history).post(msg::post))
        .route("/{connection_id}/ws", get(ws::chat_ws))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Message {
    pub seq: i64,
    pub id: String,
    pub connection_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: i64,
}

/// Appends `text` to an accepted connection the sender belongs to.
/// Empty or whitespace-only text is refused before anything is written.
pub async fn send(store: &Store, connection_id: &str, sender_id: &str, text: &str) -> AppResult<Message> {
    if text.trim().is_empty() {
        return Err(AppError::ValidationFailure("message text must not be empty".to_owned()));
    }

    connections::require_paired(store, sender_id, connection_id).await?;

    let _append = store.append_lock.lock().await;

    let (latest,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(created_at) FROM messages WHERE namespace=? AND connection_id=?")
            .bind(&store.namespace)
            .bind(connection_id)
            .fetch_one(&store.pool)
            .await?;
    let created_at = latest.map_or(now_millis(), |latest| latest.max(now_millis()));

    let id = Uuid::now_v7().to_string();
    let result = sqlx::query("INSERT INTO messages (id,namespace,connection_id,sender_id,text,created_at) VALUES (?,?,?,?,?,?)")
        .bind(&id)
        .bind(&store.namespace)
        .bind(connection_id)
        .bind(sender_id)
        .bind(text)
        .bind(created_at)
        .execute(&store.pool)
        .await?;

    let message = Message {
        seq: result.last_insert_rowid(),
        id,
        connection_id: connection_id.to_owned(),
        sender_id: sender_id.to_owned(),
        text: text.to_owned(),
        created_at,
    };
    store.hub.publish(Event::Message(message.clone()));

    Ok(message)
}

/// The whole log, or only its newest `limit` entries. Always ascending.
pub async fn history(store: &Store, connection_id: &str, limit: Option<u32>) -> AppResult<Vec<Message>> {
    let messages = match limit {
        None => sqlx::query_as::<_, Message>(
            "SELECT seq,id,connection_id,sender_id,text,created_at FROM messages
            WHERE namespace=? AND connection_id=?
            ORDER BY created_at, seq",
        )
            .bind(&store.namespace)
            .bind(connection_id)
            .fetch_all(&store.pool)
            .await?,
        Some(limit) => sqlx::query_as::<_, Message>(
            "SELECT * FROM (
                SELECT seq,id,connection_id,sender_id,text,created_at FROM messages
                WHERE namespace=? AND connection_id=?
                ORDER BY created_at DESC, seq DESC LIMIT ?
            ) ORDER BY created_at, seq",
        )
            .bind(&store.namespace)
            .bind(connection_id)
            .bind(i64::from(limit))
            .fetch_all(&store.pool)
            .await?,
    };

    Ok(messages)
}

/// Replays the full history, then follows new appends. Dropping the
/// subscription stops delivery.
pub async fn subscribe(store: &Store, connection_id: &str) -> AppResult<MessageSubscription> {
    // subscribe before reading so nothing committed in between is missed
    let rx = store.hub.subscribe();
    let backlog: VecDeque<Message> = history(store, connection_id, None).await?.into();
    let last_seq = backlog.back().map_or(0, |message| message.seq);

    tracing::debug!(
        connection_id,
        replayed = backlog.len(),
        subscribers = store.hub.subscriber_count(),
        "message stream subscribed"
    );
    Ok(MessageSubscription {
        connection_id: connection_id.to_owned(),
        backlog,
        rx,
        last_seq,
    })
}

pub struct MessageSubscription {
    connection_id: String,
    backlog: VecDeque<Message>,
    rx: broadcast::Receiver<Event>,
    last_seq: i64,
}

impl MessageSubscription {
    /// Next message in order. `Err(Lagged)` means live delivery skipped
    /// messages; resubscribe to replay from scratch.
    pub async fn next(&mut self) -> AppResult<Option<Message>> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(Some(message));
        }

        loop {
            match self.rx.recv().await {
                Ok(Event::Message(message)) => {
                    if message.connection_id != self.connection_id || message.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = message.seq;
                    return Ok(Some(message));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(connection_id = %self.connection_id, skipped, "message stream lagged");
                    return Err(AppError::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

/// Like [`subscribe`], but a lagging stream resubscribes on its own and
/// skips whatever it already yielded.
pub async fn follow(store: &Store, connection_id: &str) -> AppResult<MessageFollower> {
    Ok(MessageFollower {
        store: store.clone(),
        subscription: subscribe(store, connection_id).await?,
        connection_id: connection_id.to_owned(),
        delivered: 0,
    })
}

pub struct MessageFollower {
    store: Store,
    subscription: MessageSubscription,
    connection_id: String,
    delivered: i64,
}

impl MessageFollower {
    pub async fn next(&mut self) -> AppResult<Option<Message>> {
        loop {
            let message = match self.subscription.next().await {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(None),
                Err(AppError::Lagged(_)) => {
                    self.subscription = subscribe(&self.store, &self.connection_id).await?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            // a resubscribe replays messages already yielded
            if message.seq <= self.delivered {
                continue;
            }
            self.delivered = message.seq;
            return Ok(Some(message));
        }
    }
}
