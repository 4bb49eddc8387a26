use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router, debug_handler};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::db;
use crate::error::AppResult;
use crate::session::CurrentUser;
use crate::{AppState, Event};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/count", get(count))
        .route("/heartbeat", post(heartbeat))
}

/// Flip the online flag and tell everyone the count moved. Also bumps
/// last-active, which feeds the matchmaking recency weights.
pub async fn mark_online(
    db_pool: &SqlitePool,
    events: &broadcast::Sender<Event>,
    user_id: &str,
    online: bool,
) -> AppResult<()> {
    sqlx::query("UPDATE users SET is_online=?, last_active=? WHERE id=?")
        .bind(online)
        .bind(db::now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await?;

    let online = count_online(db_pool).await?;
    let _ = events.send(Event::Presence { online });
    Ok(())
}

/// Keep a signed-in user fresh; the client pings this on its refresh loop.
pub async fn touch(db_pool: &SqlitePool, user_id: &str) -> AppResult<()> {
    sqlx::query("UPDATE users SET is_online=1, last_active=? WHERE id=?")
        .bind(db::now_ms())
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn count_online(db_pool: &SqlitePool) -> AppResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_online=1")
        .fetch_one(db_pool)
        .await?;
    Ok(count)
}

#[debug_handler(state = AppState)]
pub async fn count(State(db_pool): State<SqlitePool>) -> AppResult<Json<serde_json::Value>> {
    let online = count_online(&db_pool).await?;
    Ok(Json(serde_json::json!({ "online": online })))
}

#[debug_handler(state = AppState)]
pub async fn heartbeat(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    touch(&db_pool, &user.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Gender;
    use crate::testutil;

    #[tokio::test]
    async fn count_tracks_online_flags() {
        let pool = testutil::test_pool().await;
        let (events, _rx) = broadcast::channel(8);

        let u1 = testutil::insert_user(&pool, "a@rguktn.ac.in", "CosmicTaco", Gender::Dude).await;
        let u2 = testutil::insert_user(&pool, "b@rguktn.ac.in", "NeonMango", Gender::Girl).await;
        assert_eq!(count_online(&pool).await.unwrap(), 0);

        mark_online(&pool, &events, &u1, true).await.unwrap();
        mark_online(&pool, &events, &u2, true).await.unwrap();
        assert_eq!(count_online(&pool).await.unwrap(), 2);

        mark_online(&pool, &events, &u1, false).await.unwrap();
        assert_eq!(count_online(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_online_broadcasts_the_new_count() {
        let pool = testutil::test_pool().await;
        let (events, mut rx) = broadcast::channel(8);

        let u1 = testutil::insert_user(&pool, "a@rguktn.ac.in", "CosmicTaco", Gender::Dude).await;
        mark_online(&pool, &events, &u1, true).await.unwrap();

        match rx.try_recv().unwrap() {
            Event::Presence { online } => assert_eq!(online, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn touch_bumps_last_active() {
        let pool = testutil::test_pool().await;
        let u1 = testutil::insert_user(&pool, "a@rguktn.ac.in", "CosmicTaco", Gender::Dude).await;
        testutil::set_last_active(&pool, &u1, 0).await;

        touch(&pool, &u1).await.unwrap();

        let user = crate::auth::find_user(&pool, &u1).await.unwrap().unwrap();
        assert!(user.is_online);
        assert!(user.last_active > 0);
    }
}
