pub mod coordinator;

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router, debug_handler};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::Config;
use crate::db::ChatSession;
use crate::error::{AppError, AppResult};
use crate::session::CurrentUser;
use crate::{AppState, Event, auth};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(open))
        .route("/{id}/end", post(end))
        .route("/{id}/rate", post(rate))
}

#[derive(Deserialize)]
pub struct OpenBody {
    pub counterpart_id: String,
}

/// Open a session with a counterpart the Matchmaker handed out. The
/// warm-up script is seeded in the background so the response returns
/// before the pacing delays run.
#[debug_handler(state = AppState)]
pub async fn open(
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    State(events): State<broadcast::Sender<Event>>,
    user: CurrentUser,
    Json(OpenBody { counterpart_id }): Json<OpenBody>,
) -> AppResult<(StatusCode, Json<ChatSession>)> {
    let counterpart = auth::find_user(&db_pool, &counterpart_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let session = coordinator::open_session(&db_pool, &user.id, &counterpart.id).await?;

    let pacing = Duration::from_millis(config.warmup_pacing_ms);
    let session_id = session.id.clone();
    tokio::spawn(async move {
        let result = coordinator::seed_warmup(
            &db_pool,
            &events,
            &session_id,
            (&user.id, &user.alias),
            (&counterpart.id, &counterpart.alias),
            pacing,
        )
        .await;
        if let Err(e) = result {
            warn!(session = %session_id, error = %e, "warm-up seeding failed");
        }
    });

    Ok((StatusCode::CREATED, Json(session)))
}

/// A cancelled search that already produced a session cannot be
/// retracted; it lands here instead.
#[debug_handler(state = AppState)]
pub async fn end(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    require_participant(&db_pool, &session_id, &user.id).await?;
    coordinator::advance_to_ended(&db_pool, &session_id).await?;
    Ok(())
}

#[derive(Deserialize)]
pub struct RateBody {
    pub rating: i64,
}

#[debug_handler(state = AppState)]
pub async fn rate(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(RateBody { rating }): Json<RateBody>,
) -> AppResult<impl IntoResponse> {
    require_participant(&db_pool, &session_id, &user.id).await?;
    coordinator::advance_to_rated(&db_pool, &session_id, &user.id, rating).await?;
    Ok(())
}

async fn require_participant(
    db_pool: &SqlitePool,
    session_id: &str,
    user_id: &str,
) -> AppResult<ChatSession> {
    let session = coordinator::find_session(db_pool, session_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !session.has_participant(user_id) {
        return Err(AppError::Forbidden);
    }
    Ok(session)
}
