use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::channel;
use crate::db::{ChatSession, Message};
use crate::Event;

/// Seam for the counterpart simulation: given the conversation tail,
/// produce the counterpart's next line, or stay silent. A real-human or
/// smarter backend slots in here without touching the channel.
pub trait ResponsePolicy: Send + Sync {
    fn respond_to(&self, tail: &[Message], counterpart_id: &str) -> Option<String>;
}

/// Fixed-pool one-liners, the fallback when the counterpart is not
/// actually typing.
pub struct CannedReplies {
    lines: Vec<String>,
}

impl Default for CannedReplies {
    fn default() -> Self {
        Self {
            lines: [
                "Okay but that's kinda iconic.",
                "MysticPotato approves this chaos.",
                "I'm saving that line for my future TED talk.",
                "Bold of you to assume I'm normal.",
                "Pause. Rewind. Say that again for the void.",
            ]
            .map(str::to_string)
            .to_vec(),
        }
    }
}

impl ResponsePolicy for CannedReplies {
    fn respond_to(&self, tail: &[Message], counterpart_id: &str) -> Option<String> {
        // Nothing to react to, or the counterpart already spoke last.
        let last = tail.last()?;
        if last.sender_id == counterpart_id {
            return None;
        }
        self.lines.choose(&mut rand::rng()).cloned()
    }
}

/// How much context the policy sees.
const TAIL_LEN: usize = 8;

/// Queue a simulated counterpart reply after a fixed pause. The tail is
/// re-read after the delay, so a session that ended or a counterpart that
/// already answered drops the reply on the floor.
pub fn schedule_reply(
    db_pool: SqlitePool,
    events: broadcast::Sender<Event>,
    policy: Arc<dyn ResponsePolicy>,
    session: ChatSession,
    user_id: String,
    delay: Duration,
) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(counterpart_id) = session.counterpart_of(&user_id) else {
            return;
        };
        let tail = match channel::history(&db_pool, &session.id).await {
            Ok(mut messages) => {
                let skip = messages.len().saturating_sub(TAIL_LEN);
                messages.split_off(skip)
            }
            Err(e) => {
                debug!(session = %session.id, error = %e, "skipping simulated reply");
                return;
            }
        };

        let Some(reply) = policy.respond_to(&tail, counterpart_id) else {
            return;
        };
        if let Err(e) = channel::send(&db_pool, &events, &session.id, counterpart_id, &reply).await
        {
            debug!(session = %session.id, error = %e, "simulated reply dropped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Gender;
    use crate::sessions::coordinator::open_session;
    use crate::testutil;

    fn msg(sender: &str, content: &str) -> Message {
        Message {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: "s".into(),
            sender_id: sender.into(),
            content: content.into(),
            created_at: 0,
        }
    }

    #[test]
    fn stays_silent_without_context() {
        let policy = CannedReplies::default();
        assert!(policy.respond_to(&[], "them").is_none());
    }

    #[test]
    fn stays_silent_when_counterpart_spoke_last() {
        let policy = CannedReplies::default();
        let tail = [msg("me", "hi"), msg("them", "hello")];
        assert!(policy.respond_to(&tail, "them").is_none());
    }

    #[test]
    fn replies_from_the_canned_pool() {
        let policy = CannedReplies::default();
        let tail = [msg("me", "say something")];
        let reply = policy.respond_to(&tail, "them").unwrap();
        assert!(policy.lines.contains(&reply));
    }

    #[tokio::test]
    async fn scheduled_reply_lands_as_the_counterpart() {
        let pool = testutil::test_pool().await;
        let (events, _rx) = broadcast::channel(16);
        let u1 = testutil::online_user(&pool, "u1@rguktn.ac.in", "CosmicTaco", Gender::Dude).await;
        let u2 = testutil::online_user(&pool, "u2@rguktn.ac.in", "NeonMango", Gender::Girl).await;
        let session = open_session(&pool, &u1, &u2).await.unwrap();

        channel::send(&pool, &events, &session.id, &u1, "anyone there?")
            .await
            .unwrap();

        schedule_reply(
            pool.clone(),
            events.clone(),
            Arc::new(CannedReplies::default()),
            session.clone(),
            u1.clone(),
            Duration::ZERO,
        );

        // The reply task runs on the same runtime; give it a beat.
        tokio::task::yield_now().await;
        let mut tries = 0;
        loop {
            let history = channel::history(&pool, &session.id).await.unwrap();
            if history.len() == 2 {
                assert_eq!(history[1].sender_id, u2);
                break;
            }
            tries += 1;
            assert!(tries < 100, "simulated reply never landed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
