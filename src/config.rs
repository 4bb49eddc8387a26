use anyhow::{Context, Result};

fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime knobs, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, e.g. "0.0.0.0:8080".
    pub bind_address: String,
    /// SQLite connection URL.
    pub database_url: String,
    /// Email suffix a login address must carry (the campus domain).
    pub email_domain: String,
    /// Bounded candidate scan size for matchmaking.
    pub candidate_scan_limit: i64,
    /// Trailing window within which a previous pairing blocks a rematch.
    pub rematch_window_secs: i64,
    /// Pause between seeded warm-up messages.
    pub warmup_pacing_ms: u64,
    /// Whether the simulated counterpart replies to user messages.
    pub responder_enabled: bool,
    /// Pause before a simulated reply lands.
    pub responder_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: dotenv::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            email_domain: dotenv::var("EMAIL_DOMAIN").unwrap_or_else(|_| "@rguktn.ac.in".into()),
            candidate_scan_limit: var_or("CANDIDATE_SCAN_LIMIT", 10),
            rematch_window_secs: var_or("REMATCH_WINDOW_SECS", 24 * 60 * 60),
            warmup_pacing_ms: var_or("WARMUP_PACING_MS", 800),
            responder_enabled: var_or("RESPONDER_ENABLED", true),
            responder_delay_ms: var_or("RESPONDER_DELAY_MS", 2000),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            email_domain: "@rguktn.ac.in".into(),
            candidate_scan_limit: 10,
            rematch_window_secs: 24 * 60 * 60,
            warmup_pacing_ms: 0,
            responder_enabled: false,
            responder_delay_ms: 0,
        }
    }
}
