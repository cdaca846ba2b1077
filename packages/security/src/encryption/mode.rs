// ABOUTME: Encryption mode selector persisted alongside encrypted tokens
// ABOUTME: Distinguishes machine-derived keys from password-derived keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::EncryptionError;

/// How the token encryption key is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Key derived from machine identity; protects copies of the database, not the local account
    Machine,
    /// Key derived from a user password with Argon2id
    Password,
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine => write!(f, "machine"),
            Self::Password => write!(f, "password"),
        }
    }
}

impl FromStr for EncryptionMode {
    type Err = EncryptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "machine" => Ok(Self::Machine),
            "password" => Ok(Self::Password),
            other => Err(EncryptionError::InvalidMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        assert_eq!(EncryptionMode::Machine.to_string(), "machine");
        assert_eq!(EncryptionMode::Password.to_string(), "password");
        assert_eq!(
            "MACHINE".parse::<EncryptionMode>().unwrap(),
            EncryptionMode::Machine
        );
        assert_eq!(
            " Password ".parse::<EncryptionMode>().unwrap(),
            EncryptionMode::Password
        );
        assert!("keychain".parse::<EncryptionMode>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&EncryptionMode::Password).unwrap();
        assert_eq!(json, "\"password\"");
    }
}
