//! Anonymous identities.
//!
//! An identity is an opaque random id kept in the session cookie. Signing in
//! again from the same session keeps the same identity.

mod login;
mod logout;

use axum::{routing::post, Router};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db::Store, profiles::{self, Profile}, session::USER_ID, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
}

pub fn new_identity() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns the session's identity, minting one on first use, and makes sure
/// it has a profile.
pub async fn sign_in_anonymous(store: &Store, session: &Session, email: Option<&str>) -> AppResult<Profile> {
    let user_id = match session.get::<String>(USER_ID).await? {
        Some(user_id) => user_id,
        None => {
            let user_id = new_identity();
            session.insert(USER_ID, &user_id).await?;
            tracing::info!(user_id = %user_id, "new anonymous identity");
            user_id
        }
    };

    profiles::ensure_profile(store, &user_id, email).await
}
