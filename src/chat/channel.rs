use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{self, Message, SessionStatus};
use crate::error::{AppError, AppResult};
use crate::sessions::coordinator;
use crate::Event;

/// Append a message to an active session and fan it out to live
/// subscribers. Rejected locally before any write when the content is
/// blank or the session is closed.
pub async fn send(
    db_pool: &SqlitePool,
    events: &broadcast::Sender<Event>,
    session_id: &str,
    sender_id: &str,
    content: &str,
) -> AppResult<Message> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::EmptyContent);
    }

    let session = coordinator::find_session(db_pool, session_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if session.status != SessionStatus::Active {
        return Err(AppError::SessionNotActive);
    }
    if !session.has_participant(sender_id) {
        return Err(AppError::Forbidden);
    }

    let message = Message {
        id: Uuid::now_v7().to_string(),
        session_id: session_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        created_at: db::now_ms(),
    };

    sqlx::query("INSERT INTO messages (id,session_id,sender_id,content,created_at) VALUES (?,?,?,?,?)")
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(db_pool)
        .await?;

    // Nobody listening is fine.
    let _ = events.send(Event::Message {
        session_id: session_id.to_string(),
        message: message.clone(),
    });

    Ok(message)
}

/// The authoritative ordering consumers render: ascending creation time,
/// message id as tiebreak (v7 ids sort by creation), so the sequence is
/// total and stable across calls.
pub async fn history(db_pool: &SqlitePool, session_id: &str) -> AppResult<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        "SELECT id,session_id,sender_id,content,created_at FROM messages
         WHERE session_id=? ORDER BY created_at ASC, id ASC",
    )
    .bind(session_id)
    .fetch_all(db_pool)
    .await?;
    Ok(messages)
}
