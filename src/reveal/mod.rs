use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router, debug_handler};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::db::{self, ChatSession, SessionStatus, UserProfile};
use crate::error::{AppError, AppResult};
use crate::session::CurrentUser;
use crate::sessions::coordinator;
use crate::{AppState, Event, auth};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{session_id}", get(state))
        .route("/{session_id}/propose", post(propose_handler))
        .route("/{session_id}/respond", post(respond_handler))
        .route("/{session_id}/dismiss", post(dismiss_handler))
        .route("/{session_id}/identity", get(identity))
}

/// Where the two-party agreement stands, as seen by either party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealState {
    Idle,
    Pending,
    Accepted,
    Declined,
}

/// Persisted consent record: one slot per participant, NULL = undecided,
/// 0 = declined, 1 = accepted. Survives reloads and second devices.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ConsentRow {
    proposer_id: String,
    user1_consent: Option<i64>,
    user2_consent: Option<i64>,
}

impl ConsentRow {
    fn state(&self) -> RevealState {
        match (self.user1_consent, self.user2_consent) {
            (Some(0), _) | (_, Some(0)) => RevealState::Declined,
            (Some(1), Some(1)) => RevealState::Accepted,
            _ => RevealState::Pending,
        }
    }
}

async fn find_consent(db_pool: &SqlitePool, session_id: &str) -> AppResult<Option<ConsentRow>> {
    let row = sqlx::query_as::<_, ConsentRow>(
        "SELECT proposer_id,user1_consent,user2_consent FROM reveal_consents WHERE session_id=?",
    )
    .bind(session_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(row)
}

fn consent_column(session: &ChatSession, user_id: &str) -> AppResult<&'static str> {
    if session.user1_id == user_id {
        Ok("user1_consent")
    } else if session.user2_id == user_id {
        Ok("user2_consent")
    } else {
        Err(AppError::Forbidden)
    }
}

/// Start the handshake. Only legal while nothing is in flight; the
/// proposer's own consent is recorded affirmative on the spot.
pub async fn propose(
    db_pool: &SqlitePool,
    events: &broadcast::Sender<Event>,
    session: &ChatSession,
    proposer_id: &str,
) -> AppResult<RevealState> {
    if session.status != SessionStatus::Active {
        return Err(AppError::SessionNotActive);
    }
    let column = consent_column(session, proposer_id)?;
    if find_consent(db_pool, &session.id).await?.is_some() {
        return Err(AppError::InvalidTransition);
    }

    sqlx::query(&format!(
        "INSERT INTO reveal_consents (session_id,proposer_id,{column},created_at) VALUES (?,?,1,?)"
    ))
    .bind(&session.id)
    .bind(proposer_id)
    .bind(db::now_ms())
    .execute(db_pool)
    .await?;

    broadcast(events, session, proposer_id, RevealState::Pending);
    Ok(RevealState::Pending)
}

/// The counterpart's answer. Must come from the non-proposing side; the
/// proposer cannot resolve their own request.
pub async fn respond(
    db_pool: &SqlitePool,
    events: &broadcast::Sender<Event>,
    session: &ChatSession,
    responder_id: &str,
    accept: bool,
) -> AppResult<RevealState> {
    if session.status != SessionStatus::Active {
        return Err(AppError::SessionNotActive);
    }
    let column = consent_column(session, responder_id)?;

    let row = find_consent(db_pool, &session.id)
        .await?
        .ok_or(AppError::InvalidTransition)?;
    if row.proposer_id == responder_id || row.state() != RevealState::Pending {
        return Err(AppError::InvalidTransition);
    }

    sqlx::query(&format!(
        "UPDATE reveal_consents SET {column}=? WHERE session_id=?"
    ))
    .bind(i64::from(accept))
    .bind(&session.id)
    .execute(db_pool)
    .await?;

    let state = if accept {
        RevealState::Accepted
    } else {
        RevealState::Declined
    };
    broadcast(events, session, responder_id, state);
    Ok(state)
}

/// Clear a declined handshake so both sides return to Idle. An accepted
/// one stays put: identities remain visible for the rest of the session.
pub async fn dismiss(
    db_pool: &SqlitePool,
    session: &ChatSession,
    user_id: &str,
) -> AppResult<RevealState> {
    consent_column(session, user_id)?;

    let Some(row) = find_consent(db_pool, &session.id).await? else {
        return Ok(RevealState::Idle);
    };
    match row.state() {
        RevealState::Declined => {
            sqlx::query("DELETE FROM reveal_consents WHERE session_id=?")
                .bind(&session.id)
                .execute(db_pool)
                .await?;
            Ok(RevealState::Idle)
        }
        RevealState::Accepted => Ok(RevealState::Accepted),
        // A pending request resolves only through the counterpart.
        _ => Err(AppError::InvalidTransition),
    }
}

/// Current state as seen by one party. A closed session always reads
/// Idle; in-flight consent dies with the session.
pub async fn state_for(
    db_pool: &SqlitePool,
    session: &ChatSession,
    user_id: &str,
) -> AppResult<RevealState> {
    consent_column(session, user_id)?;
    if session.status != SessionStatus::Active {
        return Ok(RevealState::Idle);
    }
    Ok(find_consent(db_pool, &session.id)
        .await?
        .map_or(RevealState::Idle, |row| row.state()))
}

/// Real-identity card, unlocked only by mutual consent.
#[derive(Debug, Serialize)]
pub struct IdentityCard {
    pub alias: String,
    pub name: Option<String>,
    pub email: String,
    pub details: Option<String>,
}

impl From<&UserProfile> for IdentityCard {
    fn from(profile: &UserProfile) -> Self {
        Self {
            alias: profile.alias.clone(),
            name: profile.display_name.clone(),
            email: profile.email.clone(),
            details: profile.details.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IdentityPair {
    pub you: IdentityCard,
    pub counterpart: IdentityCard,
}

/// Both identity cards, strictly gated: the session must still be active
/// and both parties must have independently accepted. Anything less is a
/// refusal, unilateral disclosure is a correctness violation.
pub async fn identities(
    db_pool: &SqlitePool,
    session: &ChatSession,
    viewer_id: &str,
) -> AppResult<IdentityPair> {
    let counterpart_id = session
        .counterpart_of(viewer_id)
        .ok_or(AppError::Forbidden)?;
    if session.status != SessionStatus::Active {
        return Err(AppError::SessionNotActive);
    }

    let accepted = find_consent(db_pool, &session.id)
        .await?
        .is_some_and(|row| row.state() == RevealState::Accepted);
    if !accepted {
        return Err(AppError::Forbidden);
    }

    let viewer = auth::find_user(db_pool, viewer_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let counterpart = auth::find_user(db_pool, counterpart_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(IdentityPair {
        you: IdentityCard::from(&viewer),
        counterpart: IdentityCard::from(&counterpart),
    })
}

fn broadcast(
    events: &broadcast::Sender<Event>,
    session: &ChatSession,
    decided_by: &str,
    state: RevealState,
) {
    let _ = events.send(Event::Reveal {
        session_id: session.id.clone(),
        decided_by: decided_by.to_string(),
        state,
    });
}

async fn load_for(
    db_pool: &SqlitePool,
    session_id: &str,
    user_id: &str,
) -> AppResult<ChatSession> {
    let session = coordinator::find_session(db_pool, session_id)
        .await?
        .ok_or(AppError::NotFound)?;
    if !session.has_participant(user_id) {
        return Err(AppError::Forbidden);
    }
    Ok(session)
}

#[derive(Serialize)]
struct StateBody {
    state: RevealState,
}

#[debug_handler(state = AppState)]
async fn state(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<StateBody>> {
    let session = load_for(&db_pool, &session_id, &user.id).await?;
    let state = state_for(&db_pool, &session, &user.id).await?;
    Ok(Json(StateBody { state }))
}

#[debug_handler(state = AppState)]
async fn propose_handler(
    State(db_pool): State<SqlitePool>,
    State(events): State<broadcast::Sender<Event>>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<StateBody>> {
    let session = load_for(&db_pool, &session_id, &user.id).await?;
    let state = propose(&db_pool, &events, &session, &user.id).await?;
    Ok(Json(StateBody { state }))
}

#[derive(Deserialize)]
struct RespondBody {
    accept: bool,
}

#[debug_handler(state = AppState)]
async fn respond_handler(
    State(db_pool): State<SqlitePool>,
    State(events): State<broadcast::Sender<Event>>,
    user: CurrentUser,
    Path(session_id): Path<String>,
    Json(RespondBody { accept }): Json<RespondBody>,
) -> AppResult<Json<StateBody>> {
    let session = load_for(&db_pool, &session_id, &user.id).await?;
    let state = respond(&db_pool, &events, &session, &user.id, accept).await?;
    Ok(Json(StateBody { state }))
}

#[debug_handler(state = AppState)]
async fn dismiss_handler(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<StateBody>> {
    let session = load_for(&db_pool, &session_id, &user.id).await?;
    let state = dismiss(&db_pool, &session, &user.id).await?;
    Ok(Json(StateBody { state }))
}

#[debug_handler(state = AppState)]
async fn identity(
    State(db_pool): State<SqlitePool>,
    user: CurrentUser,
    Path(session_id): Path<String>,
) -> AppResult<Json<IdentityPair>> {
    let session = load_for(&db_pool, &session_id, &user.id).await?;
    let pair = identities(&db_pool, &session, &user.id).await?;
    Ok(Json(pair))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Gender;
    use crate::sessions::coordinator::{advance_to_ended, open_session};
    use crate::testutil;

    struct Fixture {
        pool: SqlitePool,
        events: broadcast::Sender<Event>,
        session: ChatSession,
        u1: String,
        u2: String,
    }

    async fn fixture() -> Fixture {
        let pool = testutil::test_pool().await;
        let (events, _rx) = broadcast::channel(16);
        let u1 = testutil::online_user(&pool, "u1@rguktn.ac.in", "CosmicTaco", Gender::Dude).await;
        let u2 = testutil::online_user(&pool, "u2@rguktn.ac.in", "NeonMango", Gender::Girl).await;
        let session = open_session(&pool, &u1, &u2).await.unwrap();
        Fixture {
            pool,
            events,
            session,
            u1,
            u2,
        }
    }

    #[tokio::test]
    async fn propose_moves_both_parties_to_pending() {
        let f = fixture().await;
        assert_eq!(
            state_for(&f.pool, &f.session, &f.u1).await.unwrap(),
            RevealState::Idle
        );

        let state = propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();
        assert_eq!(state, RevealState::Pending);
        assert_eq!(
            state_for(&f.pool, &f.session, &f.u2).await.unwrap(),
            RevealState::Pending
        );
    }

    #[tokio::test]
    async fn propose_is_only_legal_from_idle() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();

        for who in [&f.u1, &f.u2] {
            let err = propose(&f.pool, &f.events, &f.session, who).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition));
        }
    }

    #[tokio::test]
    async fn proposer_cannot_answer_their_own_request() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();

        let err = respond(&f.pool, &f.events, &f.session, &f.u1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition));
    }

    #[tokio::test]
    async fn mutual_acceptance_unlocks_identities() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();
        let state = respond(&f.pool, &f.events, &f.session, &f.u2, true)
            .await
            .unwrap();
        assert_eq!(state, RevealState::Accepted);

        let pair = identities(&f.pool, &f.session, &f.u1).await.unwrap();
        assert_eq!(pair.you.alias, "CosmicTaco");
        assert_eq!(pair.counterpart.alias, "NeonMango");
        assert_eq!(pair.counterpart.email, "u2@rguktn.ac.in");

        // Visible from the other side too, and dismiss does not revoke it.
        identities(&f.pool, &f.session, &f.u2).await.unwrap();
        assert_eq!(
            dismiss(&f.pool, &f.session, &f.u2).await.unwrap(),
            RevealState::Accepted
        );
        identities(&f.pool, &f.session, &f.u2).await.unwrap();
    }

    #[tokio::test]
    async fn one_sided_acceptance_discloses_nothing() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();

        for who in [&f.u1, &f.u2] {
            let err = identities(&f.pool, &f.session, who).await.unwrap_err();
            assert!(matches!(err, AppError::Forbidden));
        }
    }

    #[tokio::test]
    async fn decline_returns_both_to_idle_after_dismiss() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();
        let state = respond(&f.pool, &f.events, &f.session, &f.u2, false)
            .await
            .unwrap();
        assert_eq!(state, RevealState::Declined);

        // Both parties observe the decline, nothing is disclosed.
        for who in [&f.u1, &f.u2] {
            assert_eq!(
                state_for(&f.pool, &f.session, who).await.unwrap(),
                RevealState::Declined
            );
            assert!(matches!(
                identities(&f.pool, &f.session, who).await.unwrap_err(),
                AppError::Forbidden
            ));
        }

        assert_eq!(
            dismiss(&f.pool, &f.session, &f.u1).await.unwrap(),
            RevealState::Idle
        );
        for who in [&f.u1, &f.u2] {
            assert_eq!(
                state_for(&f.pool, &f.session, who).await.unwrap(),
                RevealState::Idle
            );
        }

        // A fresh proposal is legal again.
        propose(&f.pool, &f.events, &f.session, &f.u2).await.unwrap();
    }

    #[tokio::test]
    async fn outsiders_are_shut_out() {
        let f = fixture().await;
        let outsider =
            testutil::online_user(&f.pool, "u3@rguktn.ac.in", "TurboDonut", Gender::Girl).await;

        let err = propose(&f.pool, &f.events, &f.session, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        let err = identities(&f.pool, &f.session, &outsider).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }

    #[tokio::test]
    async fn session_end_resets_and_locks_the_gate() {
        let f = fixture().await;
        propose(&f.pool, &f.events, &f.session, &f.u1).await.unwrap();
        respond(&f.pool, &f.events, &f.session, &f.u2, true)
            .await
            .unwrap();

        advance_to_ended(&f.pool, &f.session.id).await.unwrap();
        let session = crate::sessions::coordinator::find_session(&f.pool, &f.session.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            state_for(&f.pool, &session, &f.u1).await.unwrap(),
            RevealState::Idle
        );
        assert!(matches!(
            identities(&f.pool, &session, &f.u1).await.unwrap_err(),
            AppError::SessionNotActive
        ));
        assert!(matches!(
            propose(&f.pool, &f.events, &session, &f.u1).await.unwrap_err(),
            AppError::SessionNotActive
        ));
    }
}
