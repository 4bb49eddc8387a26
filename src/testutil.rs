//! Shared fixtures for the in-crate tests.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::db::{self, Gender};

/// Fresh in-memory database. One connection, or every acquire would see
/// its own empty `:memory:` instance.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn insert_user(pool: &SqlitePool, email: &str, alias: &str, gender: Gender) -> String {
    let id = Uuid::now_v7().to_string();
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO users (id,email,alias,gender,is_online,last_active,created_at)
         VALUES (?,?,?,?,0,?,?)",
    )
    .bind(&id)
    .bind(email)
    .bind(alias)
    .bind(gender)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert user");
    id
}

pub async fn online_user(pool: &SqlitePool, email: &str, alias: &str, gender: Gender) -> String {
    let id = insert_user(pool, email, alias, gender).await;
    sqlx::query("UPDATE users SET is_online=1 WHERE id=?")
        .bind(&id)
        .execute(pool)
        .await
        .expect("set online");
    id
}

pub async fn set_last_active(pool: &SqlitePool, user_id: &str, last_active_ms: i64) {
    sqlx::query("UPDATE users SET last_active=? WHERE id=?")
        .bind(last_active_ms)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("set last_active");
}

/// Raw session row, for shaping matchmaking history without going
/// through the coordinator.
pub async fn insert_session(
    pool: &SqlitePool,
    user1_id: &str,
    user2_id: &str,
    status: &str,
    started_at_ms: i64,
) -> String {
    let id = Uuid::now_v7().to_string();
    sqlx::query(
        "INSERT INTO chat_sessions (id,user1_id,user2_id,status,started_at) VALUES (?,?,?,?,?)",
    )
    .bind(&id)
    .bind(user1_id)
    .bind(user2_id)
    .bind(status)
    .bind(started_at_ms)
    .execute(pool)
    .await
    .expect("insert session");
    id
}
