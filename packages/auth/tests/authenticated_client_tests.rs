// ABOUTME: Integration tests for the token-carrying CherryIN API client
// ABOUTME: Tests header injection, refresh-and-retry on 401, and account endpoint decoding

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use cherryin_auth::{AuthError, AuthenticatedClient, OAuthManager, OAuthToken};
use cherryin_config::CherryInConfig;

async fn setup_client(server: &MockServer, token: Option<OAuthToken>) -> (AuthenticatedClient, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = CherryInConfig::default_with_data_dir(temp_dir.path())
        .with_server(&server.uri())
        .unwrap();
    config.request_timeout = Duration::from_secs(5);

    let manager = OAuthManager::new_default(config, None).await.unwrap();
    if let Some(token) = token {
        manager.import_token(token).await.unwrap();
    }
    (AuthenticatedClient::new(Arc::new(manager), "user-1"), temp_dir)
}

fn valid_token() -> OAuthToken {
    let now = Utc::now().timestamp();
    OAuthToken {
        user_id: "user-1".to_string(),
        access_token: "old-access".to_string(),
        refresh_token: Some("rt-1".to_string()),
        expires_at: Some(now + 3600),
        token_type: "bearer".to_string(),
        scope: None,
        created_at: now,
    }
}

async fn mount_refresh(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "new-access",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_balance_with_wrapped_response() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/balance"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "balance": 42.5, "currency": "CNY" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let balance = client.balance().await.unwrap();
    assert_eq!(balance.balance, 42.5);
    assert_eq!(balance.currency.as_deref(), Some("CNY"));
}

#[tokio::test]
async fn test_user_info_with_bare_response() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "acct-7",
            "name": "Cherry",
            "email": "cherry@example.com"
        })))
        .mount(&server)
        .await;

    let info = client.user_info().await.unwrap();
    assert_eq!(info.sub, "acct-7");
    assert_eq!(info.name.as_deref(), Some("Cherry"));
}

#[tokio::test]
async fn test_unauthorized_triggers_refresh_and_retry() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;
    mount_refresh(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/balance"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/balance"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "balance": 7 })))
        .expect(1)
        .mount(&server)
        .await;

    let balance = client.balance().await.unwrap();
    assert_eq!(balance.balance, 7.0);
}

#[tokio::test]
async fn test_second_unauthorized_is_reported() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;
    mount_refresh(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/balance"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let result = client.balance().await;
    assert!(matches!(result, Err(AuthError::Unauthorized)));
}

#[tokio::test]
async fn test_request_without_login() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, None).await;

    let result = client.balance().await;
    assert!(matches!(result, Err(AuthError::NotAuthenticated)));
}

#[tokio::test]
async fn test_api_error_status() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;

    Mock::given(method("GET"))
        .and(path("/api/v1/oauth/balance"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.balance().await;
    assert!(matches!(result, Err(AuthError::Api { status: 500 })));
}

#[tokio::test]
async fn test_post_json_sends_body() {
    let server = MockServer::start().await;
    let (client, _temp_dir) = setup_client(&server, Some(valid_token())).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/tokens"))
        .and(body_json(json!({ "name": "laptop" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": { "id": "tok-1" } })))
        .expect(1)
        .mount(&server)
        .await;

    let created: Value = client
        .post_json("/api/v1/tokens", &json!({ "name": "laptop" }))
        .await
        .unwrap();
    assert_eq!(created["id"], "tok-1");
}
