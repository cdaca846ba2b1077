// ABOUTME: SQLite storage for CherryIN OAuth tokens with encryption at rest
// ABOUTME: Runs migrations, manages the encryption mode row, and re-keys tokens on password changes

use std::path::Path;
use std::sync::Arc;

use cherryin_security::{EncryptionError, EncryptionMode, TokenEncryption};
use chrono::Utc;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    error::{AuthError, AuthResult},
    oauth::types::OAuthToken,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ACCESS_TOKEN_COLUMN: &str = "oauth_tokens.access_token";
const REFRESH_TOKEN_COLUMN: &str = "oauth_tokens.refresh_token";

/// Token store backed by SQLite; token columns are sealed with `TokenEncryption`
pub struct OAuthStorage {
    pool: SqlitePool,
    encryption: RwLock<Arc<TokenEncryption>>,
}

impl OAuthStorage {
    /// Open (creating if needed) the database file at `path`
    pub async fn connect(path: &Path, password: Option<&str>) -> AuthResult<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| AuthError::Storage(format!("Failed to connect to database: {}", e)))?;

        Self::open(pool, password).await
    }

    /// Migrate `pool` and load the encryption key described by `encryption_settings`.
    ///
    /// A fresh database uses machine encryption, or password encryption when a
    /// password is supplied. A password-protected database rejects a missing or
    /// wrong password.
    pub async fn open(pool: SqlitePool, password: Option<&str>) -> AuthResult<Self> {
        MIGRATOR.run(&pool).await?;

        let encryption = load_encryption(&pool, password).await?;
        debug!("Token storage ready ({} encryption)", encryption.mode());

        Ok(Self {
            pool,
            encryption: RwLock::new(Arc::new(encryption)),
        })
    }

    pub async fn encryption_mode(&self) -> EncryptionMode {
        self.encryption.read().await.mode()
    }

    /// Insert or replace the token for `token.user_id`
    pub async fn store_token(&self, token: &OAuthToken) -> AuthResult<()> {
        debug!("Storing OAuth token for user {}", token.user_id);
        let encryption = self.encryption.read().await;

        let access_token = encryption
            .encrypt_for(&token.access_token, &column_context(ACCESS_TOKEN_COLUMN, &token.user_id))
            .map_err(|e| {
                error!("Failed to encrypt access token: {}", e);
                AuthError::Encryption(e)
            })?;

        let refresh_token = token
            .refresh_token
            .as_deref()
            .map(|rt| {
                encryption.encrypt_for(rt, &column_context(REFRESH_TOKEN_COLUMN, &token.user_id))
            })
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (
                user_id, access_token, refresh_token, expires_at, token_type, scope,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, unixepoch())
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                token_type = excluded.token_type,
                scope = excluded.scope,
                created_at = excluded.created_at,
                updated_at = unixepoch()
            "#,
        )
        .bind(&token.user_id)
        .bind(&access_token)
        .bind(&refresh_token)
        .bind(token.expires_at)
        .bind(&token.token_type)
        .bind(&token.scope)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store OAuth token: {}", e);
            AuthError::Storage(format!("Failed to store token: {}", e))
        })?;

        Ok(())
    }

    pub async fn get_token(&self, user_id: &str) -> AuthResult<Option<OAuthToken>> {
        debug!("Fetching OAuth token for user {}", user_id);

        // Held across the read so a concurrent re-encryption cannot swap keys mid-row
        let encryption = self.encryption.read().await;

        let row = sqlx::query(
            r#"
            SELECT user_id, access_token, refresh_token, expires_at, token_type, scope, created_at
            FROM oauth_tokens
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_token(&row, &encryption)).transpose()
    }

    pub async fn has_token(&self, user_id: &str) -> AuthResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oauth_tokens WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Returns whether a token was removed
    pub async fn delete_token(&self, user_id: &str) -> AuthResult<bool> {
        debug!("Deleting OAuth token for user {}", user_id);

        let result = sqlx::query("DELETE FROM oauth_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Re-encrypt every stored token under a new key.
    ///
    /// `Some(password)` switches to (or re-keys) password encryption, `None`
    /// switches back to the machine key. All rows and the settings row change in
    /// one transaction; nothing is rewritten if any token fails to decrypt.
    pub async fn change_encryption(&self, new_password: Option<&str>) -> AuthResult<EncryptionMode> {
        let mut current = self.encryption.write().await;

        let (next, salt, password_hash) = match new_password {
            Some(password) => {
                let salt = TokenEncryption::generate_salt()?;
                let hash = TokenEncryption::hash_password_for_verification(password, &salt)?;
                (TokenEncryption::with_password(password, &salt)?, Some(salt), Some(hash))
            }
            None => (TokenEncryption::with_machine_key()?, None, None),
        };

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT user_id, access_token, refresh_token, expires_at, token_type, scope, created_at
            FROM oauth_tokens
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        for row in &rows {
            let token = decode_token(row, &current)?;
            let access_token = next
                .encrypt_for(&token.access_token, &column_context(ACCESS_TOKEN_COLUMN, &token.user_id))?;
            let refresh_token = token
                .refresh_token
                .as_deref()
                .map(|rt| next.encrypt_for(rt, &column_context(REFRESH_TOKEN_COLUMN, &token.user_id)))
                .transpose()?;

            sqlx::query(
                "UPDATE oauth_tokens SET access_token = ?, refresh_token = ?, updated_at = unixepoch() WHERE user_id = ?",
            )
            .bind(&access_token)
            .bind(&refresh_token)
            .bind(&token.user_id)
            .execute(&mut *tx)
            .await?;
        }

        write_settings(&mut tx, next.mode(), salt.as_deref(), password_hash.as_deref()).await?;
        tx.commit().await?;

        let mode = next.mode();
        *current = Arc::new(next);
        info!("Re-encrypted {} token(s) with {} encryption", rows.len(), mode);
        Ok(mode)
    }
}

fn column_context(column: &str, user_id: &str) -> String {
    format!("{}:{}", column, user_id)
}

fn decode_token(row: &SqliteRow, encryption: &TokenEncryption) -> AuthResult<OAuthToken> {
    let user_id: String = row.try_get("user_id")?;

    let sealed_access: String = row.try_get("access_token")?;
    let access_token = encryption
        .decrypt_for(&sealed_access, &column_context(ACCESS_TOKEN_COLUMN, &user_id))
        .map_err(|e| {
            error!("Failed to decrypt access token: {}", e);
            AuthError::Encryption(e)
        })?;

    let sealed_refresh: Option<String> = row.try_get("refresh_token")?;
    let refresh_token = sealed_refresh
        .map(|sealed| {
            encryption.decrypt_for(&sealed, &column_context(REFRESH_TOKEN_COLUMN, &user_id))
        })
        .transpose()
        .map_err(|e| {
            error!("Failed to decrypt refresh token: {}", e);
            AuthError::Encryption(e)
        })?;

    Ok(OAuthToken {
        user_id,
        access_token,
        refresh_token,
        expires_at: row.try_get("expires_at")?,
        token_type: row.try_get("token_type")?,
        scope: row.try_get("scope")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn load_encryption(pool: &SqlitePool, password: Option<&str>) -> AuthResult<TokenEncryption> {
    let row = sqlx::query("SELECT mode, salt, password_hash FROM encryption_settings WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        let mut tx = pool.begin().await?;
        let encryption = match password {
            Some(password) => {
                let salt = TokenEncryption::generate_salt()?;
                let hash = TokenEncryption::hash_password_for_verification(password, &salt)?;
                write_settings(&mut tx, EncryptionMode::Password, Some(&salt), Some(&hash)).await?;
                TokenEncryption::with_password(password, &salt)?
            }
            None => {
                write_settings(&mut tx, EncryptionMode::Machine, None, None).await?;
                TokenEncryption::with_machine_key()?
            }
        };
        tx.commit().await?;
        info!("Initialized token encryption ({})", encryption.mode());
        return Ok(encryption);
    };

    let mode: String = row.try_get("mode")?;
    match mode.parse::<EncryptionMode>()? {
        EncryptionMode::Machine => {
            if password.is_some() {
                warn!("Password supplied but token storage uses machine encryption; ignoring it");
            }
            Ok(TokenEncryption::with_machine_key()?)
        }
        EncryptionMode::Password => {
            let password = password.ok_or(EncryptionError::PasswordRequired)?;
            let salt: Option<Vec<u8>> = row.try_get("salt")?;
            let stored_hash: Option<Vec<u8>> = row.try_get("password_hash")?;
            let (salt, stored_hash) = salt.zip(stored_hash).ok_or_else(|| {
                AuthError::Storage("Password encryption settings are incomplete".to_string())
            })?;

            if !TokenEncryption::verify_password(password, &salt, &stored_hash)? {
                return Err(EncryptionError::InvalidPassword.into());
            }
            Ok(TokenEncryption::with_password(password, &salt)?)
        }
    }
}

async fn write_settings(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    mode: EncryptionMode,
    salt: Option<&[u8]>,
    password_hash: Option<&[u8]>,
) -> AuthResult<()> {
    sqlx::query(
        r#"
        INSERT INTO encryption_settings (id, mode, salt, password_hash, created_at, updated_at)
        VALUES (1, ?, ?, ?, ?, unixepoch())
        ON CONFLICT(id) DO UPDATE SET
            mode = excluded.mode,
            salt = excluded.salt,
            password_hash = excluded.password_hash,
            updated_at = unixepoch()
        "#,
    )
    .bind(mode.to_string())
    .bind(salt)
    .bind(password_hash)
    .bind(Utc::now().timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
