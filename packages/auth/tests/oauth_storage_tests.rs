// ABOUTME: Integration tests for encrypted OAuth token storage
// ABOUTME: Covers round trips, upserts, deletion, password protection, and re-keying

use chrono::Utc;
use nanoid::nanoid;
use sqlx::Row;
use tempfile::TempDir;

use cherryin_auth::{
    oauth::{storage::OAuthStorage, types::OAuthToken},
    AuthError,
};
use cherryin_security::{EncryptionError, EncryptionMode};

/// Helper to open a storage in a fresh temporary directory
async fn setup_storage(password: Option<&str>) -> (OAuthStorage, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let storage = OAuthStorage::connect(&temp_dir.path().join("cherryin.db"), password)
        .await
        .unwrap();
    (storage, temp_dir)
}

fn create_test_token(user_id: &str) -> OAuthToken {
    let now = Utc::now().timestamp();
    OAuthToken {
        user_id: user_id.to_string(),
        access_token: format!("access_{}", nanoid!()),
        refresh_token: Some(format!("refresh_{}", nanoid!())),
        expires_at: Some(now + 3600),
        token_type: "Bearer".to_string(),
        scope: Some("openid balance:read".to_string()),
        created_at: now,
    }
}

#[tokio::test]
async fn test_store_and_retrieve_token() {
    let (storage, _temp_dir) = setup_storage(None).await;
    let token = create_test_token("user-1");

    storage.store_token(&token).await.unwrap();
    let retrieved = storage.get_token("user-1").await.unwrap().unwrap();

    assert_eq!(retrieved, token);
    assert!(storage.has_token("user-1").await.unwrap());
    assert!(!storage.has_token("user-2").await.unwrap());
    assert_eq!(storage.encryption_mode().await, EncryptionMode::Machine);
}

#[tokio::test]
async fn test_tokens_are_encrypted_at_rest() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cherryin.db");
    let storage = OAuthStorage::connect(&db_path, None).await.unwrap();
    let token = create_test_token("user-1");
    storage.store_token(&token).await.unwrap();

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", db_path.display()))
        .await
        .unwrap();
    let row = sqlx::query("SELECT access_token, refresh_token FROM oauth_tokens WHERE user_id = ?")
        .bind("user-1")
        .fetch_one(&pool)
        .await
        .unwrap();

    let access: String = row.get("access_token");
    let refresh: Option<String> = row.get("refresh_token");
    assert_ne!(access, token.access_token);
    assert!(!access.contains(&token.access_token));
    assert_ne!(refresh, token.refresh_token);
}

#[tokio::test]
async fn test_store_replaces_existing_token() {
    let (storage, _temp_dir) = setup_storage(None).await;

    let first = create_test_token("user-1");
    storage.store_token(&first).await.unwrap();

    let mut second = create_test_token("user-1");
    second.refresh_token = None;
    second.expires_at = None;
    storage.store_token(&second).await.unwrap();

    let retrieved = storage.get_token("user-1").await.unwrap().unwrap();
    assert_eq!(retrieved.access_token, second.access_token);
    assert_eq!(retrieved.refresh_token, None);
    assert_eq!(retrieved.expires_at, None);
}

#[tokio::test]
async fn test_delete_token() {
    let (storage, _temp_dir) = setup_storage(None).await;
    storage.store_token(&create_test_token("user-1")).await.unwrap();
    storage.store_token(&create_test_token("user-2")).await.unwrap();

    assert!(storage.delete_token("user-1").await.unwrap());
    assert!(!storage.delete_token("user-1").await.unwrap());

    assert!(storage.get_token("user-1").await.unwrap().is_none());
    assert!(storage.get_token("user-2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_password_protected_storage_requires_password() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cherryin.db");

    {
        let storage = OAuthStorage::connect(&db_path, Some("correct horse"))
            .await
            .unwrap();
        assert_eq!(storage.encryption_mode().await, EncryptionMode::Password);
        storage.store_token(&create_test_token("user-1")).await.unwrap();
    }

    let missing = OAuthStorage::connect(&db_path, None).await;
    assert!(matches!(
        missing,
        Err(AuthError::Encryption(EncryptionError::PasswordRequired))
    ));

    let wrong = OAuthStorage::connect(&db_path, Some("battery staple")).await;
    assert!(matches!(
        wrong,
        Err(AuthError::Encryption(EncryptionError::InvalidPassword))
    ));

    let storage = OAuthStorage::connect(&db_path, Some("correct horse"))
        .await
        .unwrap();
    assert!(storage.get_token("user-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_change_encryption_rekeys_existing_tokens() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cherryin.db");
    let token = create_test_token("user-1");

    {
        let storage = OAuthStorage::connect(&db_path, None).await.unwrap();
        storage.store_token(&token).await.unwrap();

        let mode = storage.change_encryption(Some("s3cret-pass")).await.unwrap();
        assert_eq!(mode, EncryptionMode::Password);
        assert_eq!(storage.get_token("user-1").await.unwrap().unwrap(), token);
    }

    let storage = OAuthStorage::connect(&db_path, Some("s3cret-pass"))
        .await
        .unwrap();
    assert_eq!(storage.get_token("user-1").await.unwrap().unwrap(), token);

    let mode = storage.change_encryption(None).await.unwrap();
    assert_eq!(mode, EncryptionMode::Machine);
    drop(storage);

    let storage = OAuthStorage::connect(&db_path, None).await.unwrap();
    assert_eq!(storage.encryption_mode().await, EncryptionMode::Machine);
    assert_eq!(storage.get_token("user-1").await.unwrap().unwrap(), token);
}

#[tokio::test]
async fn test_reads_during_rekey_always_decrypt() {
    let (storage, _temp_dir) = setup_storage(None).await;
    let token = create_test_token("user-1");
    storage.store_token(&token).await.unwrap();

    let reads = async {
        for _ in 0..50 {
            let retrieved = storage.get_token("user-1").await.unwrap().unwrap();
            assert_eq!(retrieved, token);
            tokio::task::yield_now().await;
        }
    };
    let rekeys = async {
        for round in 0..4 {
            let password = (round % 2 == 0).then_some("s3cret-pass");
            storage.change_encryption(password).await.unwrap();
        }
    };

    tokio::join!(reads, rekeys);
    assert_eq!(storage.encryption_mode().await, EncryptionMode::Machine);
}
