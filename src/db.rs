use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Schema setup, idempotent so it can run on every boot.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            email        TEXT NOT NULL UNIQUE,
            alias        TEXT NOT NULL,
            gender       TEXT NOT NULL,
            display_name TEXT,
            details      TEXT,
            is_online    INTEGER NOT NULL DEFAULT 0,
            last_active  INTEGER NOT NULL,
            created_at   INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_sessions (
            id         TEXT PRIMARY KEY,
            user1_id   TEXT NOT NULL REFERENCES users(id),
            user2_id   TEXT NOT NULL REFERENCES users(id),
            status     TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at   INTEGER,
            CHECK (user1_id <> user2_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id         TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES chat_sessions(id),
            sender_id  TEXT NOT NULL REFERENCES users(id),
            content    TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ratings (
            id         TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES chat_sessions(id),
            rater_id   TEXT NOT NULL REFERENCES users(id),
            rating     INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (session_id, rater_id)
        );

        CREATE TABLE IF NOT EXISTS reveal_consents (
            session_id    TEXT PRIMARY KEY REFERENCES chat_sessions(id),
            proposer_id   TEXT NOT NULL REFERENCES users(id),
            user1_consent INTEGER,
            user2_consent INTEGER,
            created_at    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_users_online ON users (is_online, gender);
        CREATE INDEX IF NOT EXISTS idx_sessions_started ON chat_sessions (started_at);
        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, created_at);
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Current wall-clock time as unix milliseconds, the timestamp unit every
/// table uses. Integers keep recency weights exact.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Gender {
    Dude,
    Girl,
}

impl Gender {
    /// The attribute a requester is matched against.
    pub fn opposite(self) -> Gender {
        match self {
            Gender::Dude => Gender::Girl,
            Gender::Girl => Gender::Dude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
    Rated,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub alias: String,
    pub gender: Gender,
    /// Real-identity fields, disclosed only through an accepted reveal.
    pub display_name: Option<String>,
    pub details: Option<String>,
    pub is_online: bool,
    pub last_active: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatSession {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub status: SessionStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

impl ChatSession {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other side of the pair, None if `user_id` is not in it.
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        if self.user1_id == user_id {
            Some(&self.user2_id)
        } else if self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Rating {
    pub id: String,
    pub session_id: String,
    pub rater_id: String,
    pub rating: i64,
    pub created_at: i64,
}
