use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Every way an operation can fail, translated at the boundary into a
/// status code plus a stable machine-readable code. Store failures never
/// leak details to the client; they are logged and surfaced as a retry
/// prompt.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required")]
    AuthRequired,
    #[error("nobody eligible is online right now")]
    NoCandidates,
    #[error("no new people to meet right now, try again later")]
    NoFreshCandidates,
    #[error("that person is already in a chat")]
    CounterpartBusy,
    #[error("session is not in a state that allows this")]
    InvalidTransition,
    #[error("message content is empty")]
    EmptyContent,
    #[error("session is not active")]
    SessionNotActive,
    #[error("not found")]
    NotFound,
    #[error("access denied")]
    Forbidden,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::AuthRequired => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED"),
            Self::NoCandidates => (StatusCode::NOT_FOUND, "NO_CANDIDATES"),
            Self::NoFreshCandidates => (StatusCode::NOT_FOUND, "NO_FRESH_CANDIDATES"),
            Self::CounterpartBusy => (StatusCode::CONFLICT, "COUNTERPART_BUSY"),
            Self::InvalidTransition => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            Self::EmptyContent => (StatusCode::BAD_REQUEST, "EMPTY_CONTENT"),
            Self::SessionNotActive => (StatusCode::CONFLICT, "SESSION_NOT_ACTIVE"),
            Self::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::Database(_) | Self::Session(_) | Self::Other(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            // Never echo store internals back to the client.
            Self::Database(e) => {
                tracing::error!(error = %e, "database error");
                "something went wrong, try again".to_string()
            }
            Self::Session(e) => {
                tracing::error!(error = %e, "session store error");
                "something went wrong, try again".to_string()
            }
            Self::Other(e) => {
                tracing::error!(error = %e, "internal error");
                "something went wrong, try again".to_string()
            }
            // An illegal transition is a logic bug somewhere; fail closed
            // and leave a trace.
            Self::InvalidTransition => {
                tracing::error!("rejected illegal session transition");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}
