use std::collections::HashMap;
use std::time::Duration;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ProfileMapping, ProviderEntry, TokenTransport};
use crate::error::{Error, Result};
use crate::token::TokenCodec;

/// Characters escaped in authorization URL query values. Spaces, `:` and `/`
/// are left as-is so scopes and redirect URIs read the way providers
/// document them.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'>')
    .add(b'=')
    .add(b'`');

/// Built-in provider families. Anything not listed is `Manual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    CustomGoogle,
    Github,
    Facebook,
    Manual,
}

impl ProviderKind {
    pub fn from_id(id: &str) -> Self {
        match id {
            "google" => Self::Google,
            "custom-google" => Self::CustomGoogle,
            "github" => Self::Github,
            "facebook" => Self::Facebook,
            _ => Self::Manual,
        }
    }

    fn preset(self) -> Option<PresetConfig> {
        match self {
            Self::Google => Some(google_preset()),
            Self::CustomGoogle => Some(custom_google_preset()),
            Self::Github => Some(github_preset()),
            Self::Facebook => Some(facebook_preset()),
            Self::Manual => None,
        }
    }
}

struct PresetConfig {
    auth_url: &'static str,
    token_url: &'static str,
    profile_url: &'static str,
    scope: &'static str,
    token_in: TokenTransport,
    profile_mapping: ProfileMapping,
}

fn mapping(id: &str, display_name: &str, email: &str, avatar_url: &str) -> ProfileMapping {
    ProfileMapping {
        id: id.to_string(),
        display_name: Some(display_name.to_string()),
        email: Some(email.to_string()),
        avatar_url: Some(avatar_url.to_string()),
    }
}

/// Google OAuth2 v2 userinfo.
fn google_preset() -> PresetConfig {
    PresetConfig {
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        profile_url: "https://www.googleapis.com/oauth2/v2/userinfo",
        scope: "openid email profile",
        token_in: TokenTransport::Header,
        profile_mapping: mapping("/id", "/name", "/email", "/picture"),
    }
}

/// Google with the people/me profile shape and query-string access token.
fn custom_google_preset() -> PresetConfig {
    PresetConfig {
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://www.googleapis.com/oauth2/v4/token",
        profile_url: "https://www.googleapis.com/plus/v1/people/me",
        scope: "profile email",
        token_in: TokenTransport::Query,
        profile_mapping: mapping("/id", "/displayName", "/emails/0/value", "/image/url"),
    }
}

fn github_preset() -> PresetConfig {
    PresetConfig {
        auth_url: "https://github.com/login/oauth/authorize",
        token_url: "https://github.com/login/oauth/access_token",
        profile_url: "https://api.github.com/user",
        scope: "read:user user:email",
        token_in: TokenTransport::Header,
        profile_mapping: mapping("/id", "/name", "/email", "/avatar_url"),
    }
}

fn facebook_preset() -> PresetConfig {
    PresetConfig {
        auth_url: "https://www.facebook.com/dialog/oauth",
        token_url: "https://graph.facebook.com/v2.3/oauth/access_token",
        profile_url: "https://graph.facebook.com/me?fields=id,name,picture,email",
        scope: "email",
        token_in: TokenTransport::Query,
        profile_mapping: mapping("/id", "/name", "/email", "/picture/data/url"),
    }
}

/// Per-provider OAuth client settings.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_id", &self.provider_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A fully resolved provider with all endpoints and configuration ready for use.
#[derive(Debug, Clone)]
pub struct Provider {
    pub kind: ProviderKind,
    pub config: ProviderConfig,
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub token_in: TokenTransport,
    pub profile_mapping: ProfileMapping,
}

/// Profile response exactly as the provider returned it.
#[derive(Debug, Clone)]
pub struct RawProfile(pub serde_json::Value);

/// Canonical user record derived from a provider profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

impl Provider {
    /// Resolve a config entry into a ready-to-use provider.
    pub fn resolve(entry: &ProviderEntry, config: &Config) -> Result<Self> {
        let kind = ProviderKind::from_id(&entry.id);
        let preset = kind.preset();

        let pick = |field: &Option<String>, name: &str, preset_value: Option<&str>| {
            field
                .clone()
                .or_else(|| preset_value.map(String::from))
                .ok_or_else(|| Error::Config(format!("provider '{}': {name} is required", entry.id)))
        };

        let auth_url = pick(&entry.auth_url, "auth_url", preset.as_ref().map(|p| p.auth_url))?;
        let token_url = pick(&entry.token_url, "token_url", preset.as_ref().map(|p| p.token_url))?;
        let profile_url =
            pick(&entry.profile_url, "profile_url", preset.as_ref().map(|p| p.profile_url))?;

        for (name, value) in [
            ("auth_url", &auth_url),
            ("token_url", &token_url),
            ("profile_url", &profile_url),
        ] {
            url::Url::parse(value).map_err(|e| {
                Error::Config(format!("provider '{}': invalid {name}: {e}", entry.id))
            })?;
        }

        let profile_mapping = entry
            .profile_mapping
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.profile_mapping.clone()))
            .ok_or_else(|| {
                Error::Config(format!("provider '{}': profile_mapping is required", entry.id))
            })?;

        let token_in = entry
            .token_in
            .or_else(|| preset.as_ref().map(|p| p.token_in))
            .unwrap_or(TokenTransport::Header);

        let scope = entry
            .scope
            .clone()
            .or_else(|| preset.as_ref().map(|p| p.scope.to_string()))
            .unwrap_or_default();

        let redirect_uri = entry
            .redirect_uri
            .clone()
            .unwrap_or_else(|| config.server.callback_url(&entry.id));

        Ok(Self {
            kind,
            config: ProviderConfig {
                provider_id: entry.id.clone(),
                client_id: entry.client_id.resolve()?,
                client_secret: entry.client_secret.resolve()?,
                redirect_uri,
                scope,
            },
            auth_url,
            token_url,
            profile_url,
            token_in,
            profile_mapping,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.provider_id
    }

    /// Build the authorization redirect URL for this provider.
    pub fn build_authorization_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", self.config.scope.as_str()),
            ("state", state),
        ];

        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if self.auth_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{query}", self.auth_url)
    }

    /// Exchange an authorization code for an access token. Not retried.
    pub async fn exchange_code(&self, client: &reqwest::Client, code: &str) -> Result<String> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];

        let response = client
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::ProviderExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderExchange(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderExchange(format!("malformed token response: {e}")))?;

        match body {
            TokenResponse { access_token: Some(token), .. } if !token.is_empty() => Ok(token),
            TokenResponse { error: Some(error), .. } => Err(Error::ProviderExchange(error)),
            _ => Err(Error::ProviderExchange("no access_token in response".to_string())),
        }
    }

    /// Fetch the user's profile from the provider using an access token.
    pub async fn fetch_profile(
        &self,
        client: &reqwest::Client,
        access_token: &str,
    ) -> Result<RawProfile> {
        let request = client.get(&self.profile_url);
        let request = match self.token_in {
            TokenTransport::Query => request.query(&[("access_token", access_token)]),
            TokenTransport::Header => request.bearer_auth(access_token),
        };

        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            // GitHub rejects requests without a user agent
            .header(reqwest::header::USER_AGENT, concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|e| Error::ProviderProfile(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderProfile(format!(
                "profile endpoint returned HTTP {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::ProviderProfile(format!("malformed profile response: {e}")))?;

        Ok(RawProfile(body))
    }

    /// Map a raw profile to the canonical identity. Only the native id is
    /// required; other fields fall back to the empty string.
    pub fn map_profile(&self, raw: &RawProfile, codec: &TokenCodec) -> Result<ProviderIdentity> {
        let body = &raw.0;
        let mapping = &self.profile_mapping;

        let native_id = body
            .pointer(&mapping.id)
            .and_then(|v| match v {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| Error::ProviderProfile("missing provider user ID in profile".to_string()))?;

        let text = |pointer: &Option<String>| {
            pointer
                .as_deref()
                .filter(|p| !p.is_empty())
                .and_then(|p| body.pointer(p))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(ProviderIdentity {
            id: codec.create_identity_id(self.id(), &native_id),
            provider: self.id().to_string(),
            display_name: text(&mapping.display_name),
            email: text(&mapping.email),
            avatar_url: text(&mapping.avatar_url),
        })
    }
}

/// All configured providers, keyed by provider id. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Provider>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut providers = HashMap::with_capacity(config.providers.entries.len());
        for entry in &config.providers.entries {
            let provider = Provider::resolve(entry, config)?;
            tracing::debug!(provider = %entry.id, kind = ?provider.kind, "resolved provider");
            providers.insert(entry.id.clone(), provider);
        }
        Ok(Self { providers })
    }

    pub fn get(&self, id: &str) -> Result<&Provider> {
        self.providers
            .get(id)
            .ok_or_else(|| Error::UnknownProvider(id.to_string()))
    }

    /// Provider ids in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// HTTP client for provider calls, with the configured request timeout.
pub fn http_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.providers.http_timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}
