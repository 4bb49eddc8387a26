pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod matchmaking;
pub mod presence;
pub mod reveal;
pub mod session;
pub mod sessions;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use axum::extract::FromRef;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use chat::responder::{CannedReplies, ResponsePolicy};
use config::Config;
use db::Message;

pub use error::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub events: broadcast::Sender<Event>,
    pub responder: Arc<dyn ResponsePolicy>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        Self {
            db_pool,
            config,
            events: broadcast::channel(64).0,
            responder: Arc::new(CannedReplies::default()),
        }
    }
}

/// Everything the live channel can tell a subscribed client. Messages and
/// reveal updates are scoped to one session; presence counts are global.
/// Delivery is at-least-once, consumers dedup by message id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message {
        session_id: String,
        message: Message,
    },
    Reveal {
        session_id: String,
        decided_by: String,
        state: reveal::RevealState,
    },
    Presence {
        online: i64,
    },
}

impl Event {
    /// Session this event belongs to, if it is session-scoped.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Event::Message { session_id, .. } | Event::Reveal { session_id, .. } => {
                Some(session_id)
            }
            Event::Presence { .. } => None,
        }
    }
}
