use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{db::Store, profiles::Profile, AppResult, AppState};

/// `{}` signs in without an email; a placeholder address is assigned.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginQuery {
    #[serde(default)]
    pub(crate) email: Option<String>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(store): State<Store>,
    session: Session,
    Json(LoginQuery { email }): Json<LoginQuery>,
) -> AppResult<Json<Profile>> {
    let profile = super::sign_in_anonymous(&store, &session, email.as_deref()).await?;
    Ok(Json(profile))
}
