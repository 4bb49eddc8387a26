use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router, debug_handler};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_sessions::Session;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Gender, UserProfile};
use crate::error::{AppError, AppResult};
use crate::session::{CurrentUser, USER_ID};
use crate::{AppState, Event, presence};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/alias", put(update_alias))
}

const ADJECTIVES: &[&str] = &[
    "Cosmic", "Mystic", "Chaotic", "Neon", "Quantum", "Glitchy", "Cursed", "Electric", "Rogue",
    "Midnight", "Savage", "Turbo", "Stellar", "Velvet", "Reckless",
];

const NOUNS: &[&str] = &[
    "Taco", "Potato", "Mango", "Penguin", "Wizard", "Ninja", "Donut", "Cactus", "Raccoon",
    "Goblin", "Slayer", "Comet", "Bandit", "Sprite", "Cyclone",
];

/// A fresh throwaway alias, e.g. "MysticPotato".
pub fn generate_alias() -> String {
    let mut rng = rand::rng();
    format!(
        "{}{}",
        ADJECTIVES.choose(&mut rng).unwrap(),
        NOUNS.choose(&mut rng).unwrap()
    )
}

pub async fn find_user(db_pool: &SqlitePool, user_id: &str) -> AppResult<Option<UserProfile>> {
    let user = sqlx::query_as::<_, UserProfile>(
        "SELECT id,email,alias,gender,display_name,details,is_online,last_active,created_at
         FROM users WHERE id=?",
    )
    .bind(user_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_email(
    db_pool: &SqlitePool,
    email: &str,
) -> AppResult<Option<UserProfile>> {
    let user = sqlx::query_as::<_, UserProfile>(
        "SELECT id,email,alias,gender,display_name,details,is_online,last_active,created_at
         FROM users WHERE email=?",
    )
    .bind(email)
    .fetch_optional(db_pool)
    .await?;
    Ok(user)
}

pub async fn create_user(
    db_pool: &SqlitePool,
    email: &str,
    gender: Gender,
) -> AppResult<UserProfile> {
    let id = Uuid::now_v7().to_string();
    let alias = generate_alias();
    let now = db::now_ms();

    sqlx::query(
        "INSERT INTO users (id,email,alias,gender,is_online,last_active,created_at)
         VALUES (?,?,?,?,0,?,?)",
    )
    .bind(&id)
    .bind(email)
    .bind(&alias)
    .bind(gender)
    .bind(now)
    .bind(now)
    .execute(db_pool)
    .await?;

    info!(%alias, "created user");

    find_user(db_pool, &id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user vanished right after insert").into())
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub gender: Gender,
}

/// Sign in with a campus email. First login creates the profile with a
/// generated alias; email verification itself lives outside this service.
#[debug_handler(state = AppState)]
pub async fn login(
    State(db_pool): State<SqlitePool>,
    State(config): State<Config>,
    State(events): State<broadcast::Sender<Event>>,
    session: Session,
    Json(LoginBody { email, gender }): Json<LoginBody>,
) -> AppResult<Json<UserProfile>> {
    let email = email.trim().to_ascii_lowercase();
    if !email.ends_with(&config.email_domain) || email.len() <= config.email_domain.len() {
        return Err(AppError::Validation(format!(
            "a {} email is required",
            config.email_domain
        )));
    }

    let profile = match find_user_by_email(&db_pool, &email).await? {
        Some(existing) => {
            // Gender is locked after first set.
            if existing.gender != gender {
                return Err(AppError::Validation("gender is locked in".into()));
            }
            existing
        }
        None => create_user(&db_pool, &email, gender).await?,
    };

    session.insert(USER_ID, &profile.id).await?;
    presence::mark_online(&db_pool, &events, &profile.id, true).await?;

    // Return the fresh online state.
    let profile = find_user(&db_pool, &profile.id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[debug_handler(state = AppState)]
pub async fn logout(
    State(db_pool): State<SqlitePool>,
    State(events): State<broadcast::Sender<Event>>,
    session: Session,
) -> AppResult<impl IntoResponse> {
    if let Some(user_id) = session.get::<String>(USER_ID).await? {
        presence::mark_online(&db_pool, &events, &user_id, false).await?;
    }
    session.clear().await;
    Ok(())
}

#[debug_handler(state = AppState)]
pub async fn me(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
) -> AppResult<Json<UserProfile>> {
    let profile = find_user(&db_pool, &user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct AliasBody {
    pub alias: String,
}

/// Re-roll or hand-pick the alias. Allowed only until the user has shown
/// up in a chat session; past counterparts knew them under it.
#[debug_handler(state = AppState)]
pub async fn update_alias(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Json(AliasBody { alias }): Json<AliasBody>,
) -> AppResult<Json<UserProfile>> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(AppError::Validation("alias cannot be empty".into()));
    }

    let has_chatted = sqlx::query_as::<_, (i64,)>(
        "SELECT 1 FROM chat_sessions WHERE user1_id=? OR user2_id=? LIMIT 1",
    )
    .bind(&user.id)
    .bind(&user.id)
    .fetch_optional(&db_pool)
    .await?
    .is_some();
    if has_chatted {
        return Err(AppError::Validation(
            "alias is locked after your first chat".into(),
        ));
    }

    sqlx::query("UPDATE users SET alias=? WHERE id=?")
        .bind(alias)
        .bind(&user.id)
        .execute(&db_pool)
        .await?;

    let profile = find_user(&db_pool, &user.id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn alias_is_adjective_plus_noun() {
        for _ in 0..32 {
            let alias = generate_alias();
            assert!(ADJECTIVES.iter().any(|a| alias.starts_with(a)));
            assert!(NOUNS.iter().any(|n| alias.ends_with(n)));
        }
    }

    #[tokio::test]
    async fn create_user_sets_alias_and_offline() {
        let pool = testutil::test_pool().await;
        let user = create_user(&pool, "someone@rguktn.ac.in", Gender::Dude)
            .await
            .unwrap();
        assert!(!user.alias.is_empty());
        assert!(!user.is_online);
        assert_eq!(user.gender, Gender::Dude);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let pool = testutil::test_pool().await;
        create_user(&pool, "dup@rguktn.ac.in", Gender::Girl)
            .await
            .unwrap();
        let err = create_user(&pool, "dup@rguktn.ac.in", Gender::Girl).await;
        assert!(err.is_err());
    }
}
