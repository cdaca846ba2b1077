// ABOUTME: OAuth module for signing in to CherryIN
// ABOUTME: Includes PKCE, the loopback callback server, pending flows, token storage, and the API client

pub mod account;
pub mod client;
pub mod manager;
pub mod pending;
pub mod pkce;
pub mod provider;
pub mod server;
pub mod storage;
pub mod types;

pub use account::{Balance, UserInfo};
pub use client::AuthenticatedClient;
pub use manager::OAuthManager;
pub use pending::{FlowFailure, PendingFlows};
pub use provider::CherryInProvider;
pub use server::CallbackServer;
pub use storage::OAuthStorage;
pub use types::{
    AuthStatus, AuthorizationRequest, CallbackParams, OAuthToken, PkceChallenge, TokenResponse,
};
