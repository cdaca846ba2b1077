// ABOUTME: Error types for the CherryIN OAuth flow, token storage, and authenticated requests
// ABOUTME: Distinguishes protocol failures, expired sessions, and transport or storage errors

use cherryin_security::EncryptionError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth authentication failed: {0}")]
    OAuthFailed(String),

    #[error("Not logged in to CherryIN")]
    NotAuthenticated,

    #[error("Session expired, please log in again")]
    TokenExpired,

    #[error("Request rejected as unauthorized after token refresh")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("PKCE error: {0}")]
    Pkce(String),

    #[error("Callback server error: {0}")]
    CallbackServer(String),

    #[error("State mismatch: CSRF protection failed")]
    StateMismatch,

    #[error("Unknown or already used authorization state")]
    UnknownState,

    #[error("Authorization flow timed out")]
    FlowTimedOut,

    #[error("Failed to open browser: {0}")]
    BrowserOpen(String),

    #[error("Token endpoint returned {error}{}", describe(.description))]
    TokenEndpoint {
        error: String,
        description: Option<String>,
    },

    #[error("No refresh token stored, please log in again")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("API request failed with status {status}")]
    Api { status: u16 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

impl AuthError {
    /// Whether the stored session is unusable and the user has to log in again
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated | Self::TokenExpired | Self::Unauthorized | Self::NoRefreshToken
        )
    }
}
