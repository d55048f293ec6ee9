mod live;
mod page;

use axum::{routing::get, Router};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{db::{now_millis, Store}, feed::Event, AppError, AppResult, AppState};

pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous User";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(page::me))
        .route("/ws", get(live::me_ws))
        .route("/{id}", get(page::profile))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub partner_id: Option<String>,
    pub created_at: i64,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn placeholder_email(id: &str) -> String {
    let prefix: String = id.chars().take(5).collect();
    format!("user_{prefix}@private.app").to_lowercase()
}

pub fn avatar_url(id: &str) -> String {
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={id}")
}

/// Creates the profile on first sign-in and returns it either way.
pub async fn ensure_profile(store: &Store, id: &str, provider_email: Option<&str>) -> AppResult<Profile> {
    let email = provider_email
        .map(normalize_email)
        .filter(|email| !email.is_empty())
        .unwrap_or_else(|| placeholder_email(id));

    let result = sqlx::query(
        "INSERT INTO profiles (namespace,id,email,display_name,avatar_url,partner_id,created_at)
        VALUES (?,?,?,?,?,NULL,?)
        ON CONFLICT (namespace,id) DO NOTHING",
    )
        .bind(&store.namespace)
        .bind(id)
        .bind(&email)
        .bind(DEFAULT_DISPLAY_NAME)
        .bind(avatar_url(id))
        .bind(now_millis())
        .execute(&store.pool)
        .await?;

    let profile = get_profile(store, id)
        .await?
        .ok_or_else(|| AppError::NotFound("profile".to_owned()))?;

    if result.rows_affected() == 1 {
        tracing::info!(user_id = %id, email = %profile.email, "created profile");
        store.hub.publish(Event::Profile(profile.clone()));
    }

    Ok(profile)
}

pub async fn get_profile(store: &Store, id: &str) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as::<_, Profile>(
            "SELECT id,email,display_name,avatar_url,partner_id,created_at
            FROM profiles WHERE namespace=? AND id=?",
        )
            .bind(&store.namespace)
            .bind(id)
            .fetch_optional(&store.pool)
            .await?
    )
}

/// Exact, case-insensitive match. Duplicate emails resolve to the oldest profile.
pub async fn find_by_email(store: &Store, email: &str) -> AppResult<Option<Profile>> {
    Ok(
        sqlx::query_as::<_, Profile>(
            "SELECT id,email,display_name,avatar_url,partner_id,created_at
            FROM profiles WHERE namespace=? AND email=?
            ORDER BY created_at, rowid LIMIT 1",
        )
            .bind(&store.namespace)
            .bind(normalize_email(email))
            .fetch_optional(&store.pool)
            .await?
    )
}

pub async fn partner_of(store: &Store, profile: &Profile) -> AppResult<Option<Profile>> {
    match &profile.partner_id {
        Some(partner_id) => get_profile(store, partner_id).await,
        None => Ok(None),
    }
}

/// Live copy of one profile, starting with what is stored now. A profile that
/// does not exist yet is delivered once it is created.
pub async fn watch(store: &Store, id: &str) -> AppResult<ProfileSubscription> {
    let rx = store.hub.subscribe();
    let initial = get_profile(store, id).await?;

    tracing::debug!(user_id = %id, "profile subscribed");
    Ok(ProfileSubscription {
        store: store.clone(),
        id: id.to_owned(),
        rx,
        initial: initial.clone(),
        last: initial,
    })
}

pub struct ProfileSubscription {
    store: Store,
    id: String,
    rx: broadcast::Receiver<Event>,
    initial: Option<Profile>,
    last: Option<Profile>,
}

impl ProfileSubscription {
    /// Next changed version of the profile. `None` once the feed has shut down.
    pub async fn next(&mut self) -> AppResult<Option<Profile>> {
        if let Some(initial) = self.initial.take() {
            return Ok(Some(initial));
        }

        loop {
            let current = match self.rx.recv().await {
                Ok(Event::Profile(profile)) if profile.id == self.id => Some(profile),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.id, skipped, "profile stream lagged, refreshing");
                    get_profile(&self.store, &self.id).await?
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            };

            if current.is_some() && current != self.last {
                self.last = current.clone();
                return Ok(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_first_five_characters() {
        assert_eq!(placeholder_email("AbCdEfGh"), "user_abcde@private.app");
        assert_eq!(placeholder_email("xy"), "user_xy@private.app");
    }

    #[test]
    fn emails_are_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Bob@Example.COM "), "bob@example.com");
    }
}
