// ABOUTME: Typed client configuration loaded from environment variables
// ABOUTME: Validates OAuth server URLs, client id, ports, timeouts, and the data directory

use std::env;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::constants::*;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL in {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid number in {name}: {source}")]
    InvalidNumber {
        name: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("{name} must be between 1 and {max} seconds, got {value}")]
    TimeoutOutOfRange {
        name: &'static str,
        value: u64,
        max: u64,
    },
    #[error("Unsupported URL scheme in {name}: {scheme} (expected http or https)")]
    UnsupportedScheme { name: &'static str, scheme: String },
    #[error("Could not determine home directory")]
    MissingHomeDir,
    #[error("OAuth client id must not be empty")]
    EmptyClientId,
}

/// Settings for talking to the CherryIN OAuth server and API
#[derive(Debug, Clone)]
pub struct CherryInConfig {
    pub oauth_server: Url,
    pub api_base: Url,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Loopback callback port, 0 lets the OS choose
    pub callback_port: u16,
    pub redirect_path: String,
    pub flow_timeout: Duration,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
}

impl CherryInConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let oauth_server = parse_base_url(
            CHERRYIN_OAUTH_SERVER,
            &env::var(CHERRYIN_OAUTH_SERVER).unwrap_or_else(|_| DEFAULT_OAUTH_SERVER.to_string()),
        )?;

        // API calls go to the OAuth server unless overridden
        let api_base = match env::var(CHERRYIN_API_BASE) {
            Ok(value) if !value.trim().is_empty() => parse_base_url(CHERRYIN_API_BASE, &value)?,
            _ => oauth_server.clone(),
        };

        let client_id = env::var(CHERRYIN_CLIENT_ID)
            .unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_string())
            .trim()
            .to_string();
        if client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }

        let scopes = parse_scopes(
            &env::var(CHERRYIN_SCOPES).unwrap_or_else(|_| DEFAULT_SCOPES.to_string()),
        );

        let callback_port = env::var(CHERRYIN_CALLBACK_PORT)
            .unwrap_or_else(|_| "0".to_string())
            .trim()
            .parse::<u16>()
            .map_err(|source| ConfigError::InvalidNumber {
                name: CHERRYIN_CALLBACK_PORT,
                source,
            })?;

        let flow_timeout = parse_secs(CHERRYIN_FLOW_TIMEOUT_SECS, DEFAULT_FLOW_TIMEOUT_SECS)?;
        let request_timeout = parse_secs(
            CHERRYIN_HTTP_REQUEST_TIMEOUT_SECS,
            DEFAULT_HTTP_REQUEST_TIMEOUT_SECS,
        )?;

        let data_dir = match env::var(CHERRYIN_DATA_DIR) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => dirs::home_dir()
                .ok_or(ConfigError::MissingHomeDir)?
                .join(DATA_DIR_NAME),
        };

        let config = Self {
            oauth_server,
            api_base,
            client_id,
            scopes,
            callback_port,
            redirect_path: DEFAULT_CALLBACK_PATH.to_string(),
            flow_timeout,
            request_timeout,
            data_dir,
        };
        debug!(
            "Loaded CherryIN config: server={} api={} data_dir={}",
            config.oauth_server,
            config.api_base,
            config.data_dir.display()
        );
        Ok(config)
    }

    /// Default settings rooted at an explicit data directory (no env lookups)
    pub fn default_with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let server = Url::parse(DEFAULT_OAUTH_SERVER).expect("default OAuth server URL is valid");
        Self {
            oauth_server: server.clone(),
            api_base: server,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scopes: parse_scopes(DEFAULT_SCOPES),
            callback_port: 0,
            redirect_path: DEFAULT_CALLBACK_PATH.to_string(),
            flow_timeout: Duration::from_secs(DEFAULT_FLOW_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_HTTP_REQUEST_TIMEOUT_SECS),
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Point both the OAuth server and the API at `server`
    pub fn with_server(mut self, server: &str) -> Result<Self, ConfigError> {
        let url = parse_base_url(CHERRYIN_OAUTH_SERVER, server)?;
        self.oauth_server = url.clone();
        self.api_base = url;
        Ok(self)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}

/// Parse a base URL and make sure its path ends with `/` so relative joins append
pub fn parse_base_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { name, source })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::UnsupportedScheme {
            name,
            scheme: url.scheme().to_string(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Split a scope list on whitespace or commas, dropping empties and duplicates
pub fn parse_scopes(value: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for scope in value.split(|c: char| c.is_whitespace() || c == ',') {
        let scope = scope.trim();
        if !scope.is_empty() && !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

fn parse_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs = match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|source| ConfigError::InvalidNumber { name, source })?,
        Err(_) => default,
    };

    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::TimeoutOutOfRange {
            name,
            value: secs,
            max: MAX_TIMEOUT_SECS,
        });
    }
    Ok(Duration::from_secs(secs))
}
