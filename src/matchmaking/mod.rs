use std::collections::HashSet;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router, debug_handler};
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::Config;
use crate::db::{self, Gender};
use crate::error::{AppError, AppResult};
use crate::session::CurrentUser;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/find", post(find))
}

/// Recent-pairing scan is itself bounded.
const RECENT_SESSION_SCAN: i64 = 50;

/// Weight cap: 5.0 in hundredths, so one stale always-on account cannot
/// dominate the draw.
const WEIGHT_CAP: i64 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: String,
    pub alias: String,
}

/// Idle-time weight in integer hundredths: one unit per 72 seconds idle
/// (0.5/hour), capped, floored at 1 so a pool of just-active users
/// degrades to a uniform draw.
pub(crate) fn recency_weight(now_ms: i64, last_active_ms: i64) -> i64 {
    let idle_ms = (now_ms - last_active_ms).max(0);
    (idle_ms / 72_000).clamp(1, WEIGHT_CAP)
}

/// Weighted draw: uniform roll in [0, total), then walk the pool
/// subtracting weights; the candidate where the roll goes negative wins.
/// Ties break in encounter order. A degenerate all-zero pool yields the
/// first entry.
pub(crate) fn pick_weighted<'a, T>(pool: &'a [(T, i64)], rng: &mut impl Rng) -> Option<&'a T> {
    if pool.is_empty() {
        return None;
    }
    let total: i64 = pool.iter().map(|(_, w)| (*w).max(0)).sum();
    if total <= 0 {
        return pool.first().map(|(item, _)| item);
    }

    let mut roll = rng.random_range(0..total);
    for (item, weight) in pool {
        let weight = (*weight).max(0);
        if roll < weight {
            return Some(item);
        }
        roll -= weight;
    }
    pool.last().map(|(item, _)| item)
}

/// Online opposite-gender users, weighted by idle recency, minus anyone
/// the requester was paired with inside the rematch window.
async fn eligible_candidates(
    db_pool: &SqlitePool,
    requester_id: &str,
    requester_gender: Gender,
    config: &Config,
) -> AppResult<Vec<(Candidate, i64)>> {
    let now = db::now_ms();

    let scanned: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT id,alias,last_active FROM users
         WHERE is_online=1 AND gender=? AND id<>?
         ORDER BY last_active DESC LIMIT ?",
    )
    .bind(requester_gender.opposite())
    .bind(requester_id)
    .bind(config.candidate_scan_limit)
    .fetch_all(db_pool)
    .await?;

    if scanned.is_empty() {
        return Err(AppError::NoCandidates);
    }

    let cutoff = now - config.rematch_window_secs * 1000;
    let recent: Vec<(String, String)> = sqlx::query_as(
        "SELECT user1_id,user2_id FROM chat_sessions
         WHERE (user1_id=? OR user2_id=?) AND started_at>=? LIMIT ?",
    )
    .bind(requester_id)
    .bind(requester_id)
    .bind(cutoff)
    .bind(RECENT_SESSION_SCAN)
    .fetch_all(db_pool)
    .await?;

    let mut already_met = HashSet::new();
    for (user1, user2) in recent {
        if user1 != requester_id {
            already_met.insert(user1);
        }
        if user2 != requester_id {
            already_met.insert(user2);
        }
    }

    let weighted: Vec<(Candidate, i64)> = scanned
        .into_iter()
        .filter(|(id, _, _)| !already_met.contains(id))
        .map(|(id, alias, last_active)| {
            let weight = recency_weight(now, last_active);
            (Candidate { id, alias }, weight)
        })
        .collect();

    if weighted.is_empty() {
        return Err(AppError::NoFreshCandidates);
    }
    Ok(weighted)
}

/// Select a counterpart for the requester. Pure read: nothing is reserved
/// here, the conditional write at session creation arbitrates races.
pub async fn find_match(
    db_pool: &SqlitePool,
    requester_id: &str,
    requester_gender: Gender,
    config: &Config,
) -> AppResult<Candidate> {
    let weighted = eligible_candidates(db_pool, requester_id, requester_gender, config).await?;
    debug!(pool = weighted.len(), "drawing a counterpart");

    let mut rng = rand::rng();
    pick_weighted(&weighted, &mut rng)
        .cloned()
        .ok_or(AppError::NoCandidates)
}

#[debug_handler(state = AppState)]
pub async fn find(
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    user: CurrentUser,
) -> AppResult<Json<Candidate>> {
    let candidate = find_match(&db_pool, &user.id, user.gender, &config).await?;
    Ok(Json(candidate))
}
