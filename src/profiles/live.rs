use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocketUpgrade}, State},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;

use crate::{db::Store, session::current_identity, AppResult, AppState};

/// Streams the caller's own profile, including `partner_id` changes.
#[debug_handler(state = AppState)]
pub(crate) async fn me_ws(
    State(store): State<Store>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = current_identity(&session).await?;
    let mut profiles = super::watch(&store, &user_id).await?;

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut profile_task = tokio::spawn(async move {
            while let Ok(Some(profile)) = profiles.next().await {
                let Ok(json) = serde_json::to_string(&profile) else {
                    break;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                _ = &mut profile_task => break,
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        profile_task.abort();
        tracing::debug!(user_id = %user_id, "profile socket closed");
    }).into_response())
}
