use axum::{debug_handler, extract::{Path, State}, Json};
use tower_sessions::Session;

use crate::{db::Store, session::current_identity, AppResult, AppState};

use super::Connection;

#[debug_handler(state = AppState)]
pub(crate) async fn accept(
    Path(connection_id): Path<String>,
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<Connection>> {
    let user_id = current_identity(&session).await?;
    Ok(Json(super::accept(&store, &user_id, &connection_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn reject(
    Path(connection_id): Path<String>,
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<Connection>> {
    let user_id = current_identity(&session).await?;
    Ok(Json(super::reject(&store, &user_id, &connection_id).await?))
}
