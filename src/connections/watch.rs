use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocketUpgrade}, State},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;

use crate::{db::Store, session::current_identity, AppResult, AppState};

use super::ConnectionView;

#[debug_handler(state = AppState)]
pub(crate) async fn current(
    State(store): State<Store>,
    session: Session,
) -> AppResult<Json<ConnectionView>> {
    let user_id = current_identity(&session).await?;
    Ok(Json(super::view(&store, &user_id).await?))
}

/// Pushes a fresh [`ConnectionView`] as JSON whenever it changes.
#[debug_handler(state = AppState)]
pub(crate) async fn view_ws(
    State(store): State<Store>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = current_identity(&session).await?;
    let mut views = super::watch(&store, &user_id).await?;

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut view_task = tokio::spawn(async move {
            loop {
                let view = match views.next().await {
                    Ok(Some(view)) => view,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "connection view stream failed");
                        break;
                    }
                };

                let Ok(json) = serde_json::to_string(&view) else {
                    break;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = &mut view_task => break,
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        view_task.abort();
        tracing::debug!(user_id = %user_id, "connection view socket closed");
    }).into_response())
}
