use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use tower_sessions::Session;

use crate::{db::Store, session::current_identity, AppError, AppResult, AppState};

use super::{get_profile, partner_of, Profile};

#[derive(Debug, Serialize)]
pub(crate) struct ProfileView {
    profile: Profile,
    partner: Option<Profile>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<ProfileView>> {
    let user_id = current_identity(&session).await?;

    let profile = get_profile(&store, &user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("profile".to_owned()))?;
    let partner = partner_of(&store, &profile).await?;

    Ok(Json(ProfileView { profile, partner }))
}

/// Only your own profile and your partner's are visible.
#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    Path(profile_id): Path<String>,
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<Profile>> {
    let user_id = current_identity(&session).await?;
    let not_found = || AppError::NotFound("profile".to_owned());

    if profile_id != user_id {
        let own = get_profile(&store, &user_id).await?.ok_or_else(not_found)?;
        if own.partner_id.as_deref() != Some(profile_id.as_str()) {
            return Err(not_found());
        }
    }

    let profile = get_profile(&store, &profile_id).await?.ok_or_else(not_found)?;
    Ok(Json(profile))
}
