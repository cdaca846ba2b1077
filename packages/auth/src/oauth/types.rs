// ABOUTME: Core type definitions for the CherryIN OAuth flow
// ABOUTME: Tokens, token endpoint payloads, PKCE challenges, and redirect callback parameters

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Refresh this long before the server-reported expiry
pub const REFRESH_BUFFER_MINUTES: i64 = 5;

/// OAuth token as held in memory; encrypted columns are decrypted by storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp; `None` when the server did not report `expires_in`
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub scope: Option<String>,
    pub created_at: i64,
}

impl OAuthToken {
    /// Expired, or inside the 5-minute refresh buffer
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = Duration::minutes(REFRESH_BUFFER_MINUTES).num_seconds();
                expires_at < Utc::now().timestamp() + buffer
            }
            None => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    /// Past the server-reported expiry itself, ignoring the buffer
    pub fn has_lapsed(&self) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= Utc::now().timestamp())
            .unwrap_or(false)
    }

    /// Refresh is worthwhile only when it is due and a refresh token exists
    pub fn needs_refresh(&self) -> bool {
        self.is_expired() && self.refresh_token.is_some()
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        let token_type =
            if self.token_type.is_empty() || self.token_type.eq_ignore_ascii_case("bearer") {
                "Bearer"
            } else {
                self.token_type.as_str()
            };
        format!("{} {}", token_type, self.access_token)
    }
}

/// PKCE challenge for OAuth flow
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Successful token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Build a stored token; servers that do not rotate refresh tokens keep the previous one
    pub fn into_token(self, user_id: &str, previous_refresh_token: Option<String>) -> OAuthToken {
        let now = Utc::now().timestamp();
        OAuthToken {
            user_id: user_id.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            expires_at: self.expires_in.map(|secs| now + secs),
            token_type: self.token_type,
            scope: self.scope,
            created_at: now,
        }
    }
}

/// Error response from the token or revocation endpoint (RFC 6749 §5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl From<OAuthErrorResponse> for AuthError {
    fn from(response: OAuthErrorResponse) -> Self {
        AuthError::TokenEndpoint {
            error: response.error,
            description: response.error_description,
        }
    }
}

/// Authorization code grant form body
#[derive(Debug, Serialize)]
pub struct TokenExchangeRequest<'a> {
    pub grant_type: &'static str,
    pub code: &'a str,
    pub code_verifier: &'a str,
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
}

/// Refresh token grant form body
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
    pub client_id: &'a str,
}

/// Token revocation form body (RFC 7009 §2.1)
#[derive(Debug, Serialize)]
pub struct RevokeTokenRequest<'a> {
    pub token: &'a str,
    pub token_type_hint: &'static str,
    pub client_id: &'a str,
}

/// Authorization URL handed to the browser, keyed by its state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub redirect_uri: String,
    /// Unix timestamp after which the pending flow is discarded
    pub expires_at: i64,
}

/// Query parameters delivered to the redirect URI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a full redirect URL (deep link or loopback)
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {}
            }
        }
        params
    }

    pub fn parse(redirect: &str) -> AuthResult<Self> {
        let url = Url::parse(redirect)?;
        Ok(Self::from_url(&url))
    }
}

/// Authentication state reported to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
    pub needs_refresh: bool,
    /// A browser login for this user is waiting for its redirect
    pub login_pending: bool,
}
