use axum::{
    debug_handler,
    extract::{ws::{Message as WsMessage, WebSocketUpgrade}, Path, State},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;

use crate::{chat, connections, db::Store, session::current_identity, AppError, AppResult, AppState};

use super::msg::SendMessageQuery;

/// Replays the log, then streams new messages. Inbound text frames are
/// `{"text": ...}` sends; blank ones are dropped.
#[debug_handler(state = AppState)]
pub(crate) async fn chat_ws(
    Path(connection_id): Path<String>,
    State(store): State<Store>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = current_identity(&session).await?;
    connections::require_paired(&store, &user_id, &connection_id).await?;

    let mut follower = chat::follow(&store, &connection_id).await?;

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut feed_task = tokio::spawn(async move {
            loop {
                let message = match follower.next().await {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(error = %err, "message stream failed");
                        break;
                    }
                };

                let Ok(json) = serde_json::to_string(&message) else {
                    break;
                };
                if sender.send(WsMessage::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = &mut feed_task => break,
                msg = receiver.next() => {
                    let msg = match msg {
                        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(msg)) => msg,
                    };
                    let Ok(SendMessageQuery { text }) = serde_json::from_slice(&msg.into_data()) else {
                        continue;
                    };

                    match chat::send(&store, &connection_id, &user_id, &text).await {
                        Ok(_) | Err(AppError::ValidationFailure(_)) => {}
                        Err(err) => tracing::warn!(error = %err, "dropping message from socket"),
                    }
                }
            }
        }

        feed_task.abort();
        tracing::debug!(connection_id = %connection_id, "chat socket closed");
    }).into_response())
}
