// ABOUTME: Configuration crate for the CherryIN OAuth client
// ABOUTME: Exposes environment variable names and the typed CherryInConfig loader

pub mod constants;
pub mod settings;

pub use settings::{parse_base_url, parse_scopes, CherryInConfig, ConfigError};
