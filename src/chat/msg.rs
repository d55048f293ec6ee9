use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{connections, db::Store, session::current_identity, AppResult, AppState};

use super::Message;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) text: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn history(
    Path(connection_id): Path<String>,
    Query(HistoryQuery { limit }): Query<HistoryQuery>,
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<Vec<Message>>> {
    let user_id = current_identity(&session).await?;
    connections::require_paired(&store, &user_id, &connection_id).await?;

    Ok(Json(super::history(&store, &connection_id, limit).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn post(
    Path(connection_id): Path<String>,
    State(store): State<Store>,
    session: Session,

    Json(SendMessageQuery { text }): Json<SendMessageQuery>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let user_id = current_identity(&session).await?;

    let message = super::send(&store, &connection_id, &user_id, &text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
