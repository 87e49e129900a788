use std::str::FromStr;

use axum::http::HeaderName;

use crate::error::{AppError, Result};
use crate::types::{DeadlinePolicy, ResolverPolicy};

/// Header the upstream identity provider uses to forward the authenticated user id.
pub const AUTH_HEADER: &str = "x-user-id";

/// Number of newest questions shown on the dashboard.
pub const DASHBOARD_RECENT_QUESTIONS: i64 = 5;

/// Number of upcoming-deadline questions shown on the dashboard.
pub const DASHBOARD_UPCOMING_QUESTIONS: i64 = 5;

/// Display name used when a user never set one.
pub const UNKNOWN_USER_NAME: &str = "Unknown";

/// Latency histogram bounds in microseconds: 1us to 100s, 3 significant figures.
pub mod latency_bounds {
    pub const LOW_US: u64 = 1;
    pub const HIGH_US: u64 = 100_000_000;
    pub const SIGFIG: u8 = 3;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Lower-cased header name carrying the caller's user id (AUTH_HEADER)
    pub auth_header: String,
    /// Who may resolve a question (RESOLVER_POLICY = any | creator)
    pub resolver_policy: ResolverPolicy,
    /// Whether deadlines gate predictions and resolution (DEADLINE_POLICY = advisory | enforced)
    pub deadline_policy: DeadlinePolicy,
    /// Recent resolved predictions shown per leaderboard entry (LEADERBOARD_PREVIEW)
    pub leaderboard_preview: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "tracker.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            auth_header: parse_auth_header(
                &std::env::var("AUTH_HEADER").unwrap_or_else(|_| AUTH_HEADER.to_string()),
            )?,
            resolver_policy: std::env::var("RESOLVER_POLICY")
                .unwrap_or_else(|_| "any".to_string())
                .parse::<ResolverPolicy>()
                .map_err(AppError::Config)?,
            deadline_policy: std::env::var("DEADLINE_POLICY")
                .unwrap_or_else(|_| "advisory".to_string())
                .parse::<DeadlinePolicy>()
                .map_err(AppError::Config)?,
            leaderboard_preview: parse_leaderboard_preview(
                &std::env::var("LEADERBOARD_PREVIEW").unwrap_or_else(|_| "3".to_string()),
            )?,
        })
    }
}

/// Lower-cases and validates the identity header name so a typo fails startup
/// instead of rejecting every request with 401.
fn parse_auth_header(raw: &str) -> Result<String> {
    let name = raw.trim().to_ascii_lowercase();
    HeaderName::from_str(&name)
        .map(|h| h.as_str().to_string())
        .map_err(|_| AppError::Config(format!("AUTH_HEADER '{raw}' is not a valid header name")))
}

fn parse_leaderboard_preview(raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        AppError::Config(format!("LEADERBOARD_PREVIEW must be a non-negative integer, got '{raw}'"))
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "tracker.db".to_string(),
            api_port: 3000,
            auth_header: AUTH_HEADER.to_string(),
            resolver_policy: ResolverPolicy::Any,
            deadline_policy: DeadlinePolicy::Advisory,
            leaderboard_preview: 3,
        }
    }
}
