use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::db::{Gender, UserProfile};
use crate::error::AppError;

pub const USER_ID: &str = "user_id";

/// The signed-in user, loaded once per request and threaded into handlers
/// explicitly instead of each of them re-querying the cookie session.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub alias: String,
    pub gender: Gender,
}

impl From<&UserProfile> for CurrentUser {
    fn from(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            alias: profile.alias.clone(),
            gender: profile.gender,
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::AuthRequired)?;

        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::AuthRequired);
        };

        let db_pool = SqlitePool::from_ref(state);
        let profile = crate::auth::find_user(&db_pool, &user_id)
            .await?
            // Session outlived the account; force a fresh login.
            .ok_or(AppError::AuthRequired)?;

        Ok(CurrentUser::from(&profile))
    }
}
