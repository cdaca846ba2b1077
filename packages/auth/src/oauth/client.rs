// ABOUTME: HTTP client for CherryIN APIs that attaches the stored OAuth token
// ABOUTME: Retries once with a refreshed token when the API answers 401

use std::sync::Arc;

use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    Method, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{AuthError, AuthResult},
    oauth::{
        account::{Balance, Envelope, UserInfo, BALANCE_PATH, USER_INFO_PATH},
        manager::OAuthManager,
    },
};

/// Token-carrying client scoped to one user
#[derive(Clone)]
pub struct AuthenticatedClient {
    manager: Arc<OAuthManager>,
    user_id: String,
}

impl AuthenticatedClient {
    pub fn new(manager: Arc<OAuthManager>, user_id: impl Into<String>) -> Self {
        Self {
            manager,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Send a request to `path` under the API base.
    ///
    /// A 401 triggers one refresh and one retry; a second 401 is returned as
    /// `AuthError::Unauthorized`. Other statuses are left to the caller.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> AuthResult<Response> {
        let token = self
            .manager
            .get_token(&self.user_id)
            .await?
            .ok_or(AuthError::NotAuthenticated)?;

        let response = self.send(&method, path, body, &token.authorization_header()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("{} {} returned 401, refreshing token", method, path);
        let refreshed = self
            .manager
            .refresh_rejected(&self.user_id, &token.access_token)
            .await?;

        let response = self
            .send(&method, path, body, &refreshed.authorization_header())
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("{} {} still unauthorized after refresh", method, path);
            return Err(AuthError::Unauthorized);
        }

        Ok(response)
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        authorization: &str,
    ) -> AuthResult<Response> {
        let url = self.manager.provider().api_url(path)?;
        let mut builder = self
            .manager
            .http()
            .request(method.clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json");

        if let Some(body) = body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self.request(Method::GET, path, None).await?;
        decode(response).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> AuthResult<T> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        decode(response).await
    }

    pub async fn balance(&self) -> AuthResult<Balance> {
        self.get_json(BALANCE_PATH).await
    }

    pub async fn user_info(&self) -> AuthResult<UserInfo> {
        self.get_json(USER_INFO_PATH).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> AuthResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Api {
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    Ok(envelope.into_inner())
}
