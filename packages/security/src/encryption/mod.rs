// ABOUTME: OAuth token encryption using ChaCha20-Poly1305 AEAD
// ABOUTME: Supports machine-based (default) and password-based key derivation
//
// SECURITY MODEL:
//
// Machine-Based Encryption (Default):
// - Key derived from machine ID + user name + hostname + application salt (HKDF-SHA256)
// - Protects tokens in backups and synced copies of the database
// - Anyone with local access to the same account can still decrypt
//
// Password-Based Encryption (Opt-in):
// - Key derived from a user password with Argon2id
// - Tokens cannot be decrypted without the password
//
// Every ciphertext may be bound to a context string (used as AEAD associated data),
// so a value copied into another row or column fails authentication.

mod mode;

pub use mode::EncryptionMode;

use argon2::{Argon2, ParamsBuilder, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ring::{
    aead::{self, Aad, LessSafeKey, Nonce, UnboundKey},
    error::Unspecified,
    hkdf,
    rand::{SecureRandom, SystemRandom},
};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Application salt for machine key derivation (constant, not secret)
const APP_SALT: &[u8] = b"cherryin-oauth-token-encryption-v1";

/// HKDF info label for the machine key
const MACHINE_KEY_INFO: &[u8] = b"cherryin-token-encryption";

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 32;

// Argon2id: 64 MiB, 3 iterations, 4 lanes
const ARGON2_M_COST: u32 = 65536;
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Failed to generate random data: {0}")]
    RandomGeneration(String),

    #[error("Failed to encrypt data: {0}")]
    Encryption(String),

    #[error("Failed to decrypt data: {0}")]
    Decryption(String),

    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Invalid encrypted data format")]
    InvalidFormat,

    #[error("Invalid encryption mode: {0}")]
    InvalidMode(String),

    #[error("Password required for password-based encryption")]
    PasswordRequired,

    #[error("Invalid password")]
    InvalidPassword,
}

impl From<Unspecified> for EncryptionError {
    fn from(_: Unspecified) -> Self {
        EncryptionError::Encryption("Cryptographic operation failed".to_string())
    }
}

/// Encrypts OAuth tokens before they touch disk
pub struct TokenEncryption {
    rng: SystemRandom,
    key: LessSafeKey,
    mode: EncryptionMode,
}

impl std::fmt::Debug for TokenEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEncryption")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl TokenEncryption {
    fn from_key(key_bytes: [u8; KEY_SIZE], mode: EncryptionMode) -> Result<Self, EncryptionError> {
        let unbound = UnboundKey::new(&aead::CHACHA20_POLY1305, &key_bytes)
            .map_err(|_| EncryptionError::KeyDerivation("Invalid key length".to_string()))?;
        Ok(Self {
            rng: SystemRandom::new(),
            key: LessSafeKey::new(unbound),
            mode,
        })
    }

    /// Create encryption with a key derived from this machine's identity
    pub fn with_machine_key() -> Result<Self, EncryptionError> {
        let machine_id = match machine_uid::get() {
            Ok(id) => id,
            Err(e) => {
                // Containers frequently lack /etc/machine-id
                warn!("Machine ID unavailable, deriving key from user and hostname only: {}", e);
                String::new()
            }
        };

        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());

        let hostname = hostname::get()
            .map_err(|e| EncryptionError::KeyDerivation(format!("Failed to get hostname: {}", e)))?
            .to_string_lossy()
            .to_string();

        let mut key_material = Vec::with_capacity(
            machine_id.len() + username.len() + hostname.len() + APP_SALT.len() + 2,
        );
        key_material.extend_from_slice(machine_id.as_bytes());
        key_material.push(0);
        key_material.extend_from_slice(username.as_bytes());
        key_material.push(0);
        key_material.extend_from_slice(hostname.as_bytes());
        key_material.extend_from_slice(APP_SALT);

        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, APP_SALT);
        let prk = salt.extract(&key_material);

        let mut key = [0u8; KEY_SIZE];
        prk.expand(&[MACHINE_KEY_INFO], hkdf::HKDF_SHA256)
            .map_err(|_| EncryptionError::KeyDerivation("HKDF expansion failed".to_string()))?
            .fill(&mut key)
            .map_err(|_| EncryptionError::KeyDerivation("Key fill failed".to_string()))?;

        Self::from_key(key, EncryptionMode::Machine)
    }

    /// Create encryption with a key derived from `password` and a stored 32-byte salt
    pub fn with_password(password: &str, salt: &[u8]) -> Result<Self, EncryptionError> {
        let key = argon2_derive(password.as_bytes(), password, salt)?;
        Self::from_key(key, EncryptionMode::Password)
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Random salt for password-based encryption
    pub fn generate_salt() -> Result<Vec<u8>, EncryptionError> {
        let mut salt = vec![0u8; SALT_SIZE];
        SystemRandom::new().fill(&mut salt).map_err(|_| {
            EncryptionError::RandomGeneration("Failed to generate salt".to_string())
        })?;
        Ok(salt)
    }

    /// Hash used to check a password later; never equal to the encryption key
    pub fn hash_password_for_verification(
        password: &str,
        salt: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let with_context = format!("{}|verification", password);
        Ok(argon2_derive(with_context.as_bytes(), password, salt)?.to_vec())
    }

    pub fn verify_password(
        password: &str,
        salt: &[u8],
        stored_hash: &[u8],
    ) -> Result<bool, EncryptionError> {
        let computed = Self::hash_password_for_verification(password, salt)?;
        Ok(computed.ct_eq(stored_hash).unwrap_u8() == 1)
    }

    /// Encrypt without a context binding
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        self.encrypt_for(plaintext, "")
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, EncryptionError> {
        self.decrypt_for(ciphertext, "")
    }

    /// Encrypt `plaintext` bound to `context`.
    /// Output is base64(nonce || ciphertext || tag); empty input stays empty.
    pub fn encrypt_for(&self, plaintext: &str, context: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            EncryptionError::RandomGeneration("Failed to generate nonce".to_string())
        })?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| EncryptionError::Encryption("Seal operation failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);

        Ok(BASE64.encode(&sealed))
    }

    pub fn decrypt_for(&self, ciphertext: &str, context: &str) -> Result<String, EncryptionError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let sealed = BASE64
            .decode(ciphertext)
            .map_err(|_| EncryptionError::InvalidFormat)?;

        if sealed.len() < NONCE_SIZE + aead::CHACHA20_POLY1305.tag_len() {
            return Err(EncryptionError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext_and_tag) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)?;

        let mut in_out = ciphertext_and_tag.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| EncryptionError::Decryption("Open operation failed".to_string()))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| EncryptionError::Decryption("Invalid UTF-8 in decrypted data".to_string()))
    }

    /// Check whether a value looks like our ciphertext (base64 with room for nonce and tag)
    pub fn is_encrypted(value: &str) -> bool {
        if value.is_empty() {
            return false;
        }

        match BASE64.decode(value) {
            Ok(decoded) => decoded.len() >= NONCE_SIZE + aead::CHACHA20_POLY1305.tag_len(),
            Err(_) => false,
        }
    }
}

fn argon2_derive(
    input: &[u8],
    password: &str,
    salt: &[u8],
) -> Result<[u8; KEY_SIZE], EncryptionError> {
    if password.is_empty() {
        return Err(EncryptionError::PasswordRequired);
    }
    if salt.len() != SALT_SIZE {
        return Err(EncryptionError::KeyDerivation(format!(
            "Salt must be {} bytes",
            SALT_SIZE
        )));
    }

    let params = ParamsBuilder::new()
        .m_cost(ARGON2_M_COST)
        .t_cost(ARGON2_T_COST)
        .p_cost(ARGON2_P_COST)
        .output_len(KEY_SIZE)
        .build()
        .map_err(|e| EncryptionError::KeyDerivation(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(input, salt, &mut out)
        .map_err(|e| EncryptionError::KeyDerivation(format!("Argon2 derivation failed: {}", e)))?;
    Ok(out)
}
