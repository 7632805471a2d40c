//! The three request-scoped operations: signin, callback and refresh.
//!
//! Each call is independent; the only shared mutable resource is the
//! refresh token store behind [`Gateway::store`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{Config, RefreshRotation};
use crate::error::{Error, Result};
use crate::provider::{self, ProviderRegistry};
use crate::store::{RefreshTokenRecord, RefreshTokenStore};
use crate::token::{self, TokenCodec};

pub mod callback;
pub mod refresh;
pub mod signin;

/// Tokens handed to the client after a callback or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub authorization_token: String,
    pub refresh_token: String,
}

/// Everything a flow needs, resolved once at startup.
pub struct Gateway {
    pub providers: ProviderRegistry,
    pub codec: TokenCodec,
    pub store: Arc<dyn RefreshTokenStore>,
    pub http: reqwest::Client,
    pub client_redirect_uri: url::Url,
    pub refresh_ttl_secs: u64,
    pub rotation: RefreshRotation,
}

impl Gateway {
    pub fn new(config: &Config, store: Arc<dyn RefreshTokenStore>) -> Result<Self> {
        let client_redirect_uri = url::Url::parse(&config.server.client_redirect_uri)
            .map_err(|e| Error::Config(format!("invalid client_redirect_uri: {e}")))?;

        Ok(Self {
            providers: ProviderRegistry::from_config(config)?,
            codec: TokenCodec::from_config(&config.tokens)?,
            store,
            http: provider::http_client(config)?,
            client_redirect_uri,
            refresh_ttl_secs: config.tokens.refresh_token_ttl_secs,
            rotation: config.tokens.refresh_rotation,
        })
    }

    /// Mint an authorization token and a new persisted refresh token.
    /// Nothing is returned unless the refresh token was stored.
    pub(crate) async fn issue_tokens(&self, identity_id: &str, provider: &str) -> Result<TokenPair> {
        let authorization_token = self.codec.mint_authorization_token(identity_id, provider)?;
        let refresh_token = self.issue_refresh_token(identity_id, provider).await?;
        Ok(TokenPair {
            authorization_token,
            refresh_token,
        })
    }

    pub(crate) async fn issue_refresh_token(&self, identity_id: &str, provider: &str) -> Result<String> {
        let (raw, hash) = token::generate_refresh_token();
        let now = Utc::now();
        let expires_at = token::expiry_after(now, self.refresh_ttl_secs)?;
        self.store
            .store(RefreshTokenRecord {
                token_hash: hash,
                identity_id: identity_id.to_string(),
                provider: provider.to_string(),
                expires_at,
                created_at: now,
            })
            .await?;
        Ok(raw)
    }
}
