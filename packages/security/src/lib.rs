// ABOUTME: Encryption primitives for the CherryIN client
// ABOUTME: Seals OAuth tokens at rest with machine- or password-derived keys

pub mod encryption;

pub use encryption::{EncryptionError, EncryptionMode, TokenEncryption};
