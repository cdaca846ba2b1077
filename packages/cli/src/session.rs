// ABOUTME: Loads configuration and opens the OAuth manager for CLI commands
// ABOUTME: Resolves the storage password from the environment or an interactive prompt

use std::env;

use anyhow::{anyhow, Context, Result};
use cherryin_auth::{AuthError, OAuthManager};
use cherryin_config::{constants::CHERRYIN_ENCRYPTION_PASSWORD, CherryInConfig};
use cherryin_security::EncryptionError;
use inquire::{Password, PasswordDisplayMode};
use tracing::debug;

pub const DEFAULT_USER: &str = "default-user";

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Read `.env` (if present) and then the process environment
pub fn load_config() -> Result<CherryInConfig> {
    dotenvy::dotenv().ok();
    CherryInConfig::from_env().context("Failed to load configuration")
}

pub fn password_from_env() -> Option<String> {
    env::var(CHERRYIN_ENCRYPTION_PASSWORD)
        .ok()
        .filter(|password| !password.is_empty())
}

/// Open the token store, asking for the password when the store is protected
/// and `CHERRYIN_ENCRYPTION_PASSWORD` is unset.
pub async fn open_manager(config: &CherryInConfig) -> Result<OAuthManager> {
    let password = password_from_env();
    match OAuthManager::new_default(config.clone(), password.as_deref()).await {
        Ok(manager) => Ok(manager),
        Err(AuthError::Encryption(EncryptionError::PasswordRequired)) => {
            debug!("Token storage is password protected, prompting");
            let password = prompt_password("Encryption password:")?;
            OAuthManager::new_default(config.clone(), Some(&password))
                .await
                .context("Failed to open token storage")
        }
        Err(e) => Err(e).context("Failed to open token storage"),
    }
}

pub fn prompt_password(message: &str) -> Result<String> {
    Password::new(message)
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .map_err(|_| anyhow!("Password input cancelled"))
}

/// Check a new password and its confirmation
pub fn validate_new_password(password: &str, confirmation: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if password != confirmation {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("long enough", "long enough").is_ok());
        assert_eq!(
            validate_new_password("short", "short"),
            Err("Password must be at least 8 characters".to_string())
        );
        assert_eq!(
            validate_new_password("long enough", "long enougH"),
            Err("Passwords do not match".to_string())
        );
    }

    #[test]
    #[serial]
    fn test_password_from_env_ignores_empty() {
        env::set_var(CHERRYIN_ENCRYPTION_PASSWORD, "");
        assert_eq!(password_from_env(), None);

        env::set_var(CHERRYIN_ENCRYPTION_PASSWORD, "hunter22");
        assert_eq!(password_from_env().as_deref(), Some("hunter22"));

        env::remove_var(CHERRYIN_ENCRYPTION_PASSWORD);
        assert_eq!(password_from_env(), None);
    }
}
