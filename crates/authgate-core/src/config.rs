use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::provider::ProviderKind;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tokens: TokensConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Public base URL of this gateway, used to build provider callback URLs.
    pub public_url: String,
    /// Callback route template; `{provider}` is replaced with the provider id.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Where the browser lands after a callback, with tokens or an error
    /// appended as query parameters.
    pub client_redirect_uri: String,
    #[serde(default = "default_cookie_prefix")]
    pub cookie_prefix: String,
    pub cookie_domain: Option<String>,
    /// Bind the signin state to the browser with a short-lived cookie and
    /// require it to match on callback.
    #[serde(default = "default_true")]
    pub bind_state_cookie: bool,
}

impl ServerConfig {
    /// Provider callback URL for `provider_id`.
    pub fn callback_url(&self, provider_id: &str) -> String {
        format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            self.callback_path.replace("{provider}", provider_id)
        )
    }
}

#[derive(Clone, Deserialize)]
pub struct TokensConfig {
    /// HMAC key for authorization tokens and identity ids.
    pub token_secret: ConfigValue,
    #[serde(default = "default_authorization_ttl")]
    pub authorization_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default)]
    pub refresh_rotation: RefreshRotation,
}

impl std::fmt::Debug for TokensConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokensConfig")
            .field("token_secret", &"[redacted]")
            .field("authorization_token_ttl_secs", &self.authorization_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .field("refresh_rotation", &self.refresh_rotation)
            .finish()
    }
}

/// What happens to a refresh token once it has been redeemed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshRotation {
    /// Consume the presented token and issue a replacement.
    #[default]
    Rotate,
    /// Keep the presented token valid until it expires.
    Reuse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    pub url: Option<ConfigValue>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Optional PostgreSQL schema. When set, each connection runs
    /// `SET search_path TO <schema>` on connect.
    pub schema: Option<String>,
    /// How often expired refresh tokens are deleted while serving.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            max_connections: default_max_connections(),
            schema: None,
            purge_interval_secs: default_purge_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Per-request timeout for calls to identity providers.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub entries: Vec<ProviderEntry>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            entries: Vec::new(),
        }
    }
}

/// One configured identity provider. Built-in ids (`google`,
/// `custom-google`, `github`, `facebook`) only need credentials; anything
/// else must spell out its endpoints and profile mapping.
#[derive(Clone, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub client_id: ConfigValue,
    pub client_secret: ConfigValue,
    pub scope: Option<String>,
    /// Overrides the callback URL derived from `server.public_url`.
    pub redirect_uri: Option<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub profile_url: Option<String>,
    pub token_in: Option<TokenTransport>,
    pub profile_mapping: Option<ProfileMapping>,
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("scope", &self.scope)
            .field("redirect_uri", &self.redirect_uri)
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("profile_url", &self.profile_url)
            .finish_non_exhaustive()
    }
}

/// How the access token is presented to the profile endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenTransport {
    /// `?access_token=...`
    Query,
    /// `Authorization: Bearer ...`
    Header,
}

/// JSON pointers (RFC 6901) into the provider's profile response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProfileMapping {
    pub id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

// --- ConfigValue: supports "env:VAR_NAME" syntax ---

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
}

impl ConfigValue {
    pub fn resolve(&self) -> Result<String> {
        let ConfigValue::Literal(s) = self;
        if let Some(var_name) = s.strip_prefix("env:") {
            std::env::var(var_name).map_err(|_| {
                Error::Config(format!("environment variable {var_name} not set"))
            })
        } else {
            Ok(s.clone())
        }
    }
}

// --- Config resolution ---

const CONFIG_FILENAME: &str = "authgate.toml";
const CONFIG_ENV_VAR: &str = "AUTHGATE_CONFIG";

/// Upper bound for token lifetimes: ten years.
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.token_secret.resolve()?.is_empty() {
            return Err(Error::Config("tokens.token_secret must not be empty".to_string()));
        }
        for (name, ttl) in [
            ("authorization_token_ttl_secs", self.tokens.authorization_token_ttl_secs),
            ("refresh_token_ttl_secs", self.tokens.refresh_token_ttl_secs),
        ] {
            if !(1..=MAX_TOKEN_TTL_SECS).contains(&ttl) {
                return Err(Error::Config(format!(
                    "tokens.{name} must be between 1 and {MAX_TOKEN_TTL_SECS}"
                )));
            }
        }
        url::Url::parse(&self.server.client_redirect_uri).map_err(|e| {
            Error::Config(format!("server.client_redirect_uri is not a valid URL: {e}"))
        })?;

        if self.store.backend == StoreBackend::Postgres && self.store.url.is_none() {
            return Err(Error::Config(
                "store.url is required when backend is \"postgres\"".to_string(),
            ));
        }
        if self.store.purge_interval_secs == 0 {
            return Err(Error::Config(
                "store.purge_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.providers.http_timeout_secs == 0 {
            return Err(Error::Config(
                "providers.http_timeout_secs must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.providers.entries {
            if entry.id.is_empty()
                || !entry.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(Error::Config(format!(
                    "invalid provider id '{}': must match [A-Za-z0-9_-]+",
                    entry.id
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::Config(format!("duplicate provider id '{}'", entry.id)));
            }
            if ProviderKind::from_id(&entry.id) == ProviderKind::Manual {
                let missing: Vec<&str> = [
                    ("auth_url", entry.auth_url.is_none()),
                    ("token_url", entry.token_url.is_none()),
                    ("profile_url", entry.profile_url.is_none()),
                    ("profile_mapping", entry.profile_mapping.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                if !missing.is_empty() {
                    return Err(Error::Config(format!(
                        "provider '{}': manual providers require {}",
                        entry.id,
                        missing.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolve config file location using the standard search order:
/// 1. Explicit path (CLI flag)
/// 2. AUTHGATE_CONFIG env var
/// 3. Current directory
/// 4. Walk up parent directories
/// 5. ~/.config/authgate/config.toml
/// 6. /etc/authgate/config.toml
pub fn resolve_config(explicit_path: Option<&Path>) -> Result<Config> {
    let mut searched = Vec::new();

    // 1. Explicit path: fail immediately if specified but missing
    if let Some(path) = explicit_path {
        if path.exists() {
            return Config::from_path(path);
        }
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Config::from_path(&path);
        }
        searched.push(path);
    }

    // 3 & 4. Current directory and walk up
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(d) = dir {
            let config_path = d.join(CONFIG_FILENAME);
            if config_path.exists() {
                return Config::from_path(&config_path);
            }
            searched.push(config_path);
            dir = d.parent();
        }
    }

    // 5. User config
    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("authgate").join("config.toml");
        if user_config.exists() {
            return Config::from_path(&user_config);
        }
        searched.push(user_config);
    }

    // 6. System config
    let system_config = PathBuf::from("/etc/authgate/config.toml");
    if system_config.exists() {
        return Config::from_path(&system_config);
    }
    searched.push(system_config);

    Err(Error::ConfigNotFound { searched })
}

// --- Defaults ---

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_callback_path() -> String { "/authentication/callback/{provider}".to_string() }
fn default_cookie_prefix() -> String { "authgate".to_string() }
fn default_true() -> bool { true }
fn default_authorization_ttl() -> u64 { 3600 }  // 1 hour
fn default_refresh_ttl() -> u64 { 2_592_000 }   // 30 days
fn default_max_connections() -> u32 { 10 }
fn default_purge_interval() -> u64 { 3600 }
fn default_http_timeout() -> u64 { 10 }
