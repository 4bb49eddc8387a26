pub mod channel;
pub mod responder;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router, debug_handler};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::Message;
use crate::error::{AppError, AppResult};
use crate::session::CurrentUser;
use crate::sessions::coordinator;
use crate::{AppState, Event};

use responder::ResponsePolicy;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{session_id}/messages", get(messages).post(post_message))
        .route("/{session_id}/ws", get(ws::session_ws))
}

#[debug_handler(state = AppState)]
pub async fn messages(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<Vec<Message>>> {
    let session = coordinator::find_session(&db_pool, &session_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !session.has_participant(&user.id) {
        return Err(AppError::Forbidden);
    }

    let history = channel::history(&db_pool, &session_id).await?;
    Ok(Json(history))
}

#[derive(Deserialize)]
pub struct SendBody {
    pub content: String,
}

#[debug_handler(state = AppState)]
pub async fn post_message(
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    State(events): State<broadcast::Sender<Event>>,
    State(policy): State<Arc<dyn ResponsePolicy>>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(SendBody { content }): Json<SendBody>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let message = channel::send(&db_pool, &events, &session_id, &user.id, &content).await?;

    if config.responder_enabled {
        if let Some(session) = coordinator::find_session(&db_pool, &session_id).await? {
            responder::schedule_reply(
                db_pool.clone(),
                events.clone(),
                policy,
                session,
                user.id.clone(),
                Duration::from_millis(config.responder_delay_ms),
            );
        }
    }

    Ok((StatusCode::CREATED, Json(message)))
}
