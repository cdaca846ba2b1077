// ABOUTME: CherryIN authentication library providing the OAuth 2.0 PKCE login flow
// ABOUTME: Stores tokens encrypted in SQLite and keeps them fresh for API requests

pub mod error;
pub mod oauth;

// Re-export main types
pub use error::{AuthError, AuthResult};
pub use oauth::{
    AuthStatus, AuthenticatedClient, AuthorizationRequest, Balance, CallbackParams,
    CallbackServer, CherryInProvider, OAuthManager, OAuthStorage, OAuthToken, PkceChallenge,
    TokenResponse, UserInfo,
};
