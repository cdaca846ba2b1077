// ABOUTME: OAuth manager orchestrating the CherryIN login, refresh, and logout lifecycle
// ABOUTME: Owns the HTTP client, token storage, pending flows, and the single-flight refresh lock

use std::sync::Arc;
use std::time::Duration;

use cherryin_config::CherryInConfig;
use chrono::Utc;
use reqwest::{header::ACCEPT, Client};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::{AuthError, AuthResult},
    oauth::{
        pending::{FlowFailure, FlowOutcome, PendingFlow, PendingFlows},
        pkce::{generate_pkce_challenge, generate_state},
        provider::CherryInProvider,
        server::CallbackServer,
        storage::OAuthStorage,
        types::{
            AuthStatus, AuthorizationRequest, CallbackParams, OAuthErrorResponse, OAuthToken,
            RefreshTokenRequest, RevokeTokenRequest, TokenExchangeRequest, TokenResponse,
        },
    },
};

/// Token endpoint error codes meaning the refresh token is gone for good
const DEAD_SESSION_ERRORS: &[&str] = &["invalid_grant", "invalid_token", "http_400", "http_401"];

/// OAuth manager for the CherryIN authorization server
pub struct OAuthManager {
    config: CherryInConfig,
    provider: CherryInProvider,
    client: Client,
    storage: OAuthStorage,
    pending: Arc<PendingFlows>,
    refresh_lock: Mutex<()>,
}

impl OAuthManager {
    pub fn new(config: CherryInConfig, storage: OAuthStorage) -> AuthResult<Self> {
        let provider = CherryInProvider::from_config(&config)?;
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            config,
            provider,
            client,
            storage,
            pending: Arc::new(PendingFlows::new()),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Open the token database under the configured data directory
    pub async fn new_default(config: CherryInConfig, password: Option<&str>) -> AuthResult<Self> {
        let storage = OAuthStorage::connect(&config.database_path(), password).await?;
        Self::new(config, storage)
    }

    pub fn config(&self) -> &CherryInConfig {
        &self.config
    }

    pub fn provider(&self) -> &CherryInProvider {
        &self.provider
    }

    pub fn storage(&self) -> &OAuthStorage {
        &self.storage
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    /// Start an authorization flow for `user_id`.
    ///
    /// When the user already has a live flow, that flow's request is returned
    /// instead of opening a second one.
    pub async fn begin_authorization(
        &self,
        user_id: &str,
        redirect_uri: &str,
    ) -> AuthResult<AuthorizationRequest> {
        let now = Utc::now().timestamp();
        self.pending.purge_expired(now).await;

        let pkce = generate_pkce_challenge()?;
        let state = generate_state();
        let url = self.provider.authorization_url(&pkce, &state, redirect_uri)?;
        let ttl = self.flow_ttl();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        let request = AuthorizationRequest {
            url,
            state,
            redirect_uri: redirect_uri.to_string(),
            expires_at: now.saturating_add(ttl_secs),
        };

        let flow = PendingFlow::new(user_id, pkce.code_verifier, request.clone());
        if let Some(existing) = self.pending.register(flow, now).await {
            return Ok(existing);
        }

        self.schedule_cleanup(ttl);
        debug!("Started authorization flow for user {}", user_id);
        Ok(request)
    }

    /// Lifetime of a pending flow, never shorter than one second
    fn flow_ttl(&self) -> Duration {
        self.config.flow_timeout.max(Duration::from_secs(1))
    }

    /// Purge the flow once its deadline has passed, even if no one calls back
    fn schedule_cleanup(&self, ttl: Duration) {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            pending.purge_expired(Utc::now().timestamp()).await;
        });
    }

    /// The authorization request still waiting for a redirect, if any
    pub async fn pending_authorization(&self, user_id: &str) -> Option<AuthorizationRequest> {
        self.pending
            .find_active_for_user(user_id, Utc::now().timestamp())
            .await
    }

    /// Finish a flow from the parameters of its redirect
    pub async fn complete_authorization(&self, params: CallbackParams) -> AuthResult<OAuthToken> {
        let Some(state) = params.state else {
            return Err(match params.error {
                Some(error) => AuthError::OAuthFailed(error),
                None => AuthError::StateMismatch,
            });
        };

        let message = params.error.map(|error| match params.error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        });

        let Some(flow) = self.pending.take(&state, Utc::now().timestamp()).await else {
            // The provider's error is more useful than the missing flow
            return Err(match message {
                Some(message) => AuthError::OAuthFailed(message),
                None => AuthError::UnknownState,
            });
        };

        if let Some(message) = message {
            error!("Authorization server returned an error: {}", message);
            flow.resolve(&Err(FlowFailure::Failed(message.clone())));
            return Err(AuthError::OAuthFailed(message));
        }

        let Some(code) = params.code else {
            let message = "No authorization code in callback".to_string();
            flow.resolve(&Err(FlowFailure::Failed(message.clone())));
            return Err(AuthError::OAuthFailed(message));
        };

        info!("Received authorization code, exchanging for token");
        match self.exchange_code(&flow, &code).await {
            Ok(token) => {
                flow.resolve(&Ok(token.clone()));
                info!("Logged in to CherryIN as {}", token.user_id);
                Ok(token)
            }
            Err(e) => {
                flow.resolve(&Err(FlowFailure::Failed(e.to_string())));
                Err(e)
            }
        }
    }

    /// Finish a flow from a full redirect URL, e.g. a custom-scheme deep link
    pub async fn complete_authorization_url(&self, redirect: &str) -> AuthResult<OAuthToken> {
        self.complete_authorization(CallbackParams::parse(redirect)?)
            .await
    }

    /// Log in through the system browser and a loopback redirect
    pub async fn login(&self, user_id: &str) -> AuthResult<OAuthToken> {
        self.login_with(user_id, |url| {
            open::that(url.as_str()).map_err(|e| {
                AuthError::BrowserOpen(format!("{}. Please manually visit: {}", e, url))
            })
        })
        .await
    }

    /// Log in, handing the authorization URL to `open_url` instead of the system browser.
    ///
    /// Concurrent calls for the same user share one flow and one result.
    pub async fn login_with<F>(&self, user_id: &str, open_url: F) -> AuthResult<OAuthToken>
    where
        F: FnOnce(&Url) -> AuthResult<()>,
    {
        if let Some(rx) = self
            .pending
            .subscribe_user(user_id, Utc::now().timestamp())
            .await
        {
            info!("Login already in progress for {}, waiting for it", user_id);
            return await_outcome(rx).await;
        }

        let server = CallbackServer::bind(self.config.callback_port, &self.config.redirect_path).await?;
        let redirect_uri = server.callback_url();
        let request = self.begin_authorization(user_id, &redirect_uri).await?;

        let outcome = self
            .pending
            .subscribe(&request.state)
            .await
            .ok_or(AuthError::UnknownState)?;

        if request.redirect_uri != redirect_uri {
            // Another caller registered first; its redirect goes to its own server
            drop(server);
            return await_outcome(outcome).await;
        }

        info!("Opening browser for CherryIN login");
        if let Err(e) = open_url(&request.url) {
            error!("Failed to open browser: {}", e);
            self.pending
                .fail(&request.state, FlowFailure::Failed(e.to_string()))
                .await;
            return Err(e);
        }

        tokio::select! {
            // Completed elsewhere (deep link) or expired by the cleanup task
            result = outcome => flatten_outcome(result),
            received = tokio::time::timeout(self.flow_ttl(), server.wait_for_callback()) => {
                let params = match received {
                    Ok(Ok(params)) => params,
                    Ok(Err(e)) => {
                        self.pending
                            .fail(&request.state, FlowFailure::Failed(e.to_string()))
                            .await;
                        return Err(e);
                    }
                    Err(_) => {
                        warn!("Timed out waiting for OAuth callback");
                        self.pending.fail(&request.state, FlowFailure::TimedOut).await;
                        return Err(AuthError::FlowTimedOut);
                    }
                };

                if params.state.as_deref() != Some(request.state.as_str()) {
                    error!("State mismatch in OAuth callback");
                    let err = match params.error {
                        Some(error) if params.state.is_none() => AuthError::OAuthFailed(error),
                        _ => AuthError::StateMismatch,
                    };
                    self.pending
                        .fail(&request.state, FlowFailure::Failed(err.to_string()))
                        .await;
                    return Err(err);
                }

                self.complete_authorization(params).await
            }
        }
    }

    async fn exchange_code(&self, flow: &PendingFlow, code: &str) -> AuthResult<OAuthToken> {
        let form = TokenExchangeRequest {
            grant_type: "authorization_code",
            code,
            code_verifier: &flow.code_verifier,
            redirect_uri: flow.redirect_uri(),
            client_id: &self.provider.client_id,
        };

        let response = self.post_token_form(&form).await?;
        let token = response.into_token(&flow.user_id, None);
        self.storage.store_token(&token).await?;
        Ok(token)
    }

    async fn post_token_form<T: Serialize + ?Sized>(&self, form: &T) -> AuthResult<TokenResponse> {
        let response = self
            .client
            .post(self.provider.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        // Only the status and error code are logged; the body may echo credentials
        error!("Token endpoint returned status {}", status);
        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<OAuthErrorResponse>(&body) {
            Ok(oauth_error) => Err(oauth_error.into()),
            Err(_) => Err(AuthError::TokenEndpoint {
                error: format!("http_{}", status.as_u16()),
                description: None,
            }),
        }
    }

    /// Stored token for `user_id`, refreshed first when it is inside the expiry buffer.
    ///
    /// A failed refresh yields `None` once the session is dead; after a transient
    /// failure the old token is still returned while it has not lapsed.
    pub async fn get_token(&self, user_id: &str) -> AuthResult<Option<OAuthToken>> {
        let Some(token) = self.storage.get_token(user_id).await? else {
            return Ok(None);
        };

        if token.needs_refresh() {
            debug!("Token for {} is due for refresh", user_id);
            let refreshed = self
                .refresh_unless_changed(user_id, Some(&token.access_token))
                .await;
            return match refreshed {
                Ok(refreshed) => Ok(Some(refreshed)),
                Err(e) if !e.requires_login() && !token.has_lapsed() => {
                    warn!("Token refresh failed, using current token: {}", e);
                    Ok(Some(token))
                }
                Err(e) => {
                    error!("Failed to refresh token: {}", e);
                    Ok(None)
                }
            };
        }

        if token.has_lapsed() {
            debug!("Token for {} has expired and cannot be refreshed", user_id);
            return Ok(None);
        }

        Ok(Some(token))
    }

    /// Force a refresh with the stored refresh token
    pub async fn refresh_token(&self, user_id: &str) -> AuthResult<OAuthToken> {
        self.refresh_unless_changed(user_id, None).await
    }

    /// Refresh after the API rejected `rejected_access_token`.
    /// If another caller already replaced that token, the replacement is returned.
    pub async fn refresh_rejected(
        &self,
        user_id: &str,
        rejected_access_token: &str,
    ) -> AuthResult<OAuthToken> {
        self.refresh_unless_changed(user_id, Some(rejected_access_token))
            .await
    }

    async fn refresh_unless_changed(
        &self,
        user_id: &str,
        stale_access_token: Option<&str>,
    ) -> AuthResult<OAuthToken> {
        let _guard = self.refresh_lock.lock().await;

        let existing = self
            .storage
            .get_token(user_id)
            .await?
            .ok_or(AuthError::NotAuthenticated)?;

        if let Some(stale) = stale_access_token {
            if existing.access_token != stale {
                debug!("Token was refreshed by a concurrent caller");
                return Ok(existing);
            }
        }

        let refresh_token = existing
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        info!("Refreshing CherryIN token for {}", user_id);
        let form = RefreshTokenRequest {
            grant_type: "refresh_token",
            refresh_token: &refresh_token,
            client_id: &self.provider.client_id,
        };

        match self.post_token_form(&form).await {
            Ok(response) => {
                let mut token = response.into_token(user_id, Some(refresh_token));
                if token.scope.is_none() {
                    token.scope = existing.scope;
                }
                self.storage.store_token(&token).await?;
                info!("Refreshed token for {}", user_id);
                Ok(token)
            }
            Err(AuthError::TokenEndpoint { error, .. })
                if DEAD_SESSION_ERRORS.contains(&error.as_str()) =>
            {
                warn!("Refresh token rejected ({}), clearing stored session", error);
                self.storage.delete_token(user_id).await?;
                Err(AuthError::TokenExpired)
            }
            Err(e @ AuthError::TokenEndpoint { .. }) => Err(e),
            Err(e) => Err(AuthError::RefreshFailed(e.to_string())),
        }
    }

    /// Revoke tokens server-side (best effort) and delete them locally
    pub async fn logout(&self, user_id: &str) -> AuthResult<()> {
        info!("Logging out {}", user_id);

        match self.storage.get_token(user_id).await {
            Ok(Some(token)) => {
                if let Some(refresh_token) = token.refresh_token.as_deref() {
                    self.revoke(refresh_token, "refresh_token").await;
                }
                self.revoke(&token.access_token, "access_token").await;
            }
            Ok(None) => debug!("No stored token for {}", user_id),
            Err(e) => warn!("Could not read token for revocation: {}", e),
        }

        self.storage.delete_token(user_id).await?;
        info!("Logged out {}", user_id);
        Ok(())
    }

    async fn revoke(&self, token: &str, token_type_hint: &'static str) {
        let form = RevokeTokenRequest {
            token,
            token_type_hint,
            client_id: &self.provider.client_id,
        };

        let result = self
            .client
            .post(self.provider.revoke_url.clone())
            .form(&form)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Revoked {}", token_type_hint);
            }
            Ok(response) => warn!(
                "Revocation of {} returned status {}",
                token_type_hint,
                response.status()
            ),
            Err(e) => warn!("Revocation of {} failed: {}", token_type_hint, e),
        }
    }

    pub async fn status(&self, user_id: &str) -> AuthResult<AuthStatus> {
        let login_pending = self.pending_authorization(user_id).await.is_some();

        let status = match self.storage.get_token(user_id).await? {
            Some(token) => AuthStatus {
                authenticated: !token.has_lapsed() || token.refresh_token.is_some(),
                expires_at: token.expires_at,
                scope: token.scope.clone(),
                needs_refresh: token.needs_refresh(),
                login_pending,
            },
            None => AuthStatus {
                authenticated: false,
                expires_at: None,
                scope: None,
                needs_refresh: false,
                login_pending,
            },
        };

        Ok(status)
    }

    /// Store a token obtained outside the browser flow
    pub async fn import_token(&self, token: OAuthToken) -> AuthResult<()> {
        if token.access_token.is_empty() {
            return Err(AuthError::OAuthFailed("Access token is empty".to_string()));
        }
        self.storage.store_token(&token).await?;
        info!("Imported token for {}", token.user_id);
        Ok(())
    }
}

async fn await_outcome(rx: oneshot::Receiver<FlowOutcome>) -> AuthResult<OAuthToken> {
    flatten_outcome(rx.await)
}

fn flatten_outcome(
    result: Result<FlowOutcome, oneshot::error::RecvError>,
) -> AuthResult<OAuthToken> {
    match result {
        Ok(Ok(token)) => Ok(token),
        Ok(Err(failure)) => Err(failure.into()),
        Err(_) => Err(AuthError::OAuthFailed(
            "Login flow ended without a result".to_string(),
        )),
    }
}
