use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::debug_handler;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::responder::ResponsePolicy;
use crate::chat::{channel, responder};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::session::CurrentUser;
use crate::sessions::coordinator;
use crate::{AppState, Event};

#[derive(Deserialize)]
struct InboundFrame {
    content: String,
}

/// Live channel for one session: outbound frames are serialized
/// [`Event`]s for that session (plus global presence counts), inbound
/// text frames are message sends.
#[debug_handler(state = AppState)]
pub async fn session_ws(
    Path(session_id): Path<String>,
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    State(events): State<broadcast::Sender<Event>>,
    State(policy): State<Arc<dyn ResponsePolicy>>,
    user: CurrentUser,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    // Gate before upgrading; outsiders never get a socket.
    let session = coordinator::find_session(&db_pool, &session_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !session.has_participant(&user.id) {
        return Err(AppError::Forbidden);
    }

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, db_pool, config, events, policy, session_id, user.id)
    }))
}

async fn handle_socket(
    socket: WebSocket,
    db_pool: SqlitePool,
    config: Config,
    events: broadcast::Sender<Event>,
    policy: Arc<dyn ResponsePolicy>,
    session_id: String,
    user_id: String,
) {
    let mut rx = events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let forward_session = session_id.clone();
    let forward = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                // A lagged subscriber just misses a burst; history
                // backfills, ids dedup.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if event
                .session_id()
                .is_some_and(|sid| sid != forward_session)
            {
                continue;
            }
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(InboundFrame { content }) = serde_json::from_slice(&frame.into_data()) else {
            continue;
        };

        match channel::send(&db_pool, &events, &session_id, &user_id, &content).await {
            Ok(_) => {
                if config.responder_enabled {
                    if let Ok(Some(session)) =
                        coordinator::find_session(&db_pool, &session_id).await
                    {
                        responder::schedule_reply(
                            db_pool.clone(),
                            events.clone(),
                            policy.clone(),
                            session,
                            user_id.clone(),
                            Duration::from_millis(config.responder_delay_ms),
                        );
                    }
                }
            }
            Err(e) => debug!(session = %session_id, error = %e, "ws send rejected"),
        }
    }

    // Client is gone; stop the fan-out so no further frames fire.
    forward.abort();
}
