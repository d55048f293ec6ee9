use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{db::Store, session::current_identity, AppResult, AppState};

use super::Connection;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchQuery {
    email: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn search(
    State(store): State<Store>,
    session: Session,
    Json(SearchQuery { email }): Json<SearchQuery>,
) -> AppResult<(StatusCode, Json<Connection>)> {
    let user_id = current_identity(&session).await?;

    let connection = super::create(&store, &user_id, &email).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}
