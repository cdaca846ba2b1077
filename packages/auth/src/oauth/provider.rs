// ABOUTME: CherryIN authorization server endpoints and client registration
// ABOUTME: Builds authorize, token, revoke, and API URLs from the loaded configuration

use cherryin_config::CherryInConfig;
use url::Url;

use crate::{
    error::{AuthError, AuthResult},
    oauth::types::PkceChallenge,
};

const AUTHORIZE_PATH: &str = "oauth2/auth";
const TOKEN_PATH: &str = "oauth2/token";
const REVOKE_PATH: &str = "oauth2/revoke";

/// Endpoints and client identity for the CherryIN OAuth server
#[derive(Debug, Clone)]
pub struct CherryInProvider {
    pub authorize_url: Url,
    pub token_url: Url,
    pub revoke_url: Url,
    pub client_id: String,
    pub scopes: Vec<String>,
    api_base: Url,
}

impl CherryInProvider {
    pub fn from_config(config: &CherryInConfig) -> AuthResult<Self> {
        if config.client_id.is_empty() {
            return Err(AuthError::Configuration(
                "OAuth client id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            authorize_url: config.oauth_server.join(AUTHORIZE_PATH)?,
            token_url: config.oauth_server.join(TOKEN_PATH)?,
            revoke_url: config.oauth_server.join(REVOKE_PATH)?,
            client_id: config.client_id.clone(),
            scopes: config.scopes.clone(),
            api_base: config.api_base.clone(),
        })
    }

    /// Resolve an API path (leading slash optional) against the API base
    pub fn api_url(&self, path: &str) -> AuthResult<Url> {
        Ok(self.api_base.join(path.trim_start_matches('/'))?)
    }

    /// Authorization URL with PKCE challenge and CSRF state
    pub fn authorization_url(
        &self,
        pkce: &PkceChallenge,
        state: &str,
        redirect_uri: &str,
    ) -> AuthResult<Url> {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", &pkce.code_challenge_method)
            .append_pair("state", state);

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(server: &str) -> CherryInProvider {
        let config = CherryInConfig::default_with_data_dir("/tmp")
            .with_server(server)
            .unwrap();
        CherryInProvider::from_config(&config).unwrap()
    }

    #[test]
    fn test_endpoints_join_under_base_path() {
        let provider = provider("https://auth.example.com/cherry");
        assert_eq!(
            provider.token_url.as_str(),
            "https://auth.example.com/cherry/oauth2/token"
        );
        assert_eq!(
            provider.revoke_url.as_str(),
            "https://auth.example.com/cherry/oauth2/revoke"
        );
        assert_eq!(
            provider.api_url("/api/v1/oauth/balance").unwrap().as_str(),
            "https://auth.example.com/cherry/api/v1/oauth/balance"
        );
    }

    #[test]
    fn test_authorization_url_parameters() {
        let provider = provider("https://open.cherryin.ai");
        let pkce = PkceChallenge {
            code_verifier: "verifier".to_string(),
            code_challenge: "challenge".to_string(),
            code_challenge_method: "S256".to_string(),
        };

        let url = provider
            .authorization_url(&pkce, "state-123", "http://127.0.0.1:5555/oauth/callback")
            .unwrap();
        assert_eq!(url.path(), "/oauth2/auth");

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "cherry-studio");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["code_challenge"], "challenge");
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["state"], "state-123");
        assert_eq!(query["redirect_uri"], "http://127.0.0.1:5555/oauth/callback");
        assert!(query["scope"].contains("offline_access"));
        assert!(!query.contains_key("code_verifier"));
    }
}
