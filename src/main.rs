use masquerade::{AppState, auth, chat, config, db, matchmaking, presence, reveal, sessions};

use anyhow::Result;
use tower_http::cors::CorsLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "masquerade=debug,tower_http=debug".into()),
        )
        .init();

    dotenv::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting masquerade");

    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(30)));

    let bind_address = config.bind_address.clone();
    let app_state = AppState::new(db_pool, config);

    let app = axum::Router::new()
        .nest("/auth", auth::router())
        .nest("/presence", presence::router())
        .nest("/match", matchmaking::router())
        .nest("/s", sessions::router())
        .nest("/c", chat::router())
        .nest("/reveal", reveal::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
