// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used by the CherryIN client

// OAuth Server Configuration
pub const CHERRYIN_OAUTH_SERVER: &str = "CHERRYIN_OAUTH_SERVER";
pub const CHERRYIN_API_BASE: &str = "CHERRYIN_API_BASE";
pub const CHERRYIN_CLIENT_ID: &str = "CHERRYIN_CLIENT_ID";
pub const CHERRYIN_SCOPES: &str = "CHERRYIN_SCOPES";

// Authorization Flow
pub const CHERRYIN_CALLBACK_PORT: &str = "CHERRYIN_CALLBACK_PORT";
pub const CHERRYIN_FLOW_TIMEOUT_SECS: &str = "CHERRYIN_FLOW_TIMEOUT_SECS";

// HTTP Client
pub const CHERRYIN_HTTP_REQUEST_TIMEOUT_SECS: &str = "CHERRYIN_HTTP_REQUEST_TIMEOUT_SECS";

// Storage & Encryption
pub const CHERRYIN_DATA_DIR: &str = "CHERRYIN_DATA_DIR";
pub const CHERRYIN_ENCRYPTION_PASSWORD: &str = "CHERRYIN_ENCRYPTION_PASSWORD";

// Defaults
pub const DEFAULT_OAUTH_SERVER: &str = "https://open.cherryin.ai";
pub const DEFAULT_CLIENT_ID: &str = "cherry-studio";
pub const DEFAULT_SCOPES: &str =
    "openid profile email offline_access balance:read usage:read tokens:read tokens:write";
pub const DEFAULT_CALLBACK_PATH: &str = "/oauth/callback";
pub const DEFAULT_FLOW_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Upper bound for any timeout read from the environment (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
pub const DATA_DIR_NAME: &str = ".cherryin";
pub const DATABASE_FILE_NAME: &str = "cherryin.db";
