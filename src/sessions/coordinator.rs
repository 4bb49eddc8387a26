use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::chat::channel;
use crate::db::{self, ChatSession, SessionStatus};
use crate::error::{AppError, AppResult};
use crate::Event;

pub async fn find_session(
    db_pool: &SqlitePool,
    session_id: &str,
) -> AppResult<Option<ChatSession>> {
    let session = sqlx::query_as::<_, ChatSession>(
        "SELECT id,user1_id,user2_id,status,started_at,ended_at FROM chat_sessions WHERE id=?",
    )
    .bind(session_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(session)
}

/// Create the session for a matched pair. The insert is conditional on
/// neither participant holding an Active session, which is what arbitrates
/// two requesters drawing the same counterpart at once.
pub async fn open_session(
    db_pool: &SqlitePool,
    requester_id: &str,
    counterpart_id: &str,
) -> AppResult<ChatSession> {
    if requester_id == counterpart_id {
        return Err(AppError::Validation("cannot chat with yourself".into()));
    }

    let id = Uuid::now_v7().to_string();
    let inserted = sqlx::query(
        "INSERT INTO chat_sessions (id,user1_id,user2_id,status,started_at)
         SELECT ?,?,?,?,?
         WHERE NOT EXISTS (
             SELECT 1 FROM chat_sessions
             WHERE status=? AND (user1_id IN (?,?) OR user2_id IN (?,?))
         )",
    )
    .bind(&id)
    .bind(requester_id)
    .bind(counterpart_id)
    .bind(SessionStatus::Active)
    .bind(db::now_ms())
    .bind(SessionStatus::Active)
    .bind(requester_id)
    .bind(counterpart_id)
    .bind(requester_id)
    .bind(counterpart_id)
    .execute(db_pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(AppError::CounterpartBusy);
    }

    info!(session = %id, "opened chat session");
    find_session(db_pool, &id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("session vanished right after insert").into())
}

/// Scripted opening lines, alternating counterpart / requester /
/// counterpart, paced to fake a human cadence. Purely cosmetic.
pub async fn seed_warmup(
    db_pool: &SqlitePool,
    events: &broadcast::Sender<Event>,
    session_id: &str,
    requester: (&str, &str),
    counterpart: (&str, &str),
    pacing: Duration,
) -> AppResult<()> {
    let (requester_id, requester_alias) = requester;
    let (counterpart_id, counterpart_alias) = counterpart;

    let script = [
        (
            counterpart_id,
            format!(
                "{counterpart_alias} here. Call me {counterpart_alias}. \
                 What's your chaos level tonight?"
            ),
        ),
        (
            requester_id,
            format!("{requester_alias} reporting for duty. Ready to unleash maximum feral energy. 😈"),
        ),
        (
            counterpart_id,
            "Say less. The void has been craving this energy.".to_string(),
        ),
    ];

    for (i, (sender_id, content)) in script.into_iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
        channel::send(db_pool, events, session_id, sender_id, &content).await?;
    }
    Ok(())
}

/// Active → Ended. Anything else is an illegal transition.
pub async fn advance_to_ended(db_pool: &SqlitePool, session_id: &str) -> AppResult<()> {
    advance(db_pool, session_id, SessionStatus::Ended).await
}

/// Active → Rated, recording the rater's verdict (1–4) on the way out.
pub async fn advance_to_rated(
    db_pool: &SqlitePool,
    session_id: &str,
    rater_id: &str,
    rating: i64,
) -> AppResult<()> {
    if !(1..=4).contains(&rating) {
        return Err(AppError::Validation("rating must be between 1 and 4".into()));
    }

    advance(db_pool, session_id, SessionStatus::Rated).await?;

    sqlx::query("INSERT INTO ratings (id,session_id,rater_id,rating,created_at) VALUES (?,?,?,?,?)")
        .bind(Uuid::now_v7().to_string())
        .bind(session_id)
        .bind(rater_id)
        .bind(rating)
        .bind(db::now_ms())
        .execute(db_pool)
        .await?;
    Ok(())
}

async fn advance(db_pool: &SqlitePool, session_id: &str, to: SessionStatus) -> AppResult<()> {
    let updated = sqlx::query(
        "UPDATE chat_sessions SET status=?, ended_at=? WHERE id=? AND status=?",
    )
    .bind(to)
    .bind(db::now_ms())
    .bind(session_id)
    .bind(SessionStatus::Active)
    .execute(db_pool)
    .await?;

    if updated.rows_affected() == 0 {
        return match find_session(db_pool, session_id).await? {
            // Ended and Rated are terminal; status never regresses.
            Some(_) => Err(AppError::InvalidTransition),
            None => Err(AppError::NotFound),
        };
    }
    Ok(())
}
