use serde::Deserialize;

use crate::config::RefreshRotation;
use crate::error::{Error, Result};
use crate::flow::{Gateway, TokenPair};
use crate::store::RefreshTokenStore;
use crate::token::{hash_token, is_refresh_token};

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    /// Deployment stage of the caller, carried for logging.
    #[serde(default)]
    pub stage: Option<String>,
}

/// Redeem a refresh token for a new authorization token. With
/// [`RefreshRotation::Rotate`] the presented token is consumed and replaced.
pub async fn handle(gateway: &Gateway, request: &RefreshRequest) -> Result<TokenPair> {
    let stage = request.stage.as_deref().unwrap_or("-");
    if !is_refresh_token(&request.refresh_token) {
        tracing::debug!(stage, "malformed refresh token");
        return Err(Error::UnknownRefreshToken);
    }
    let token_hash = hash_token(&request.refresh_token);

    // Under rotation the presented token is spent even if storing its
    // replacement fails below; the client has to sign in again.
    let record = match gateway.rotation {
        RefreshRotation::Rotate => gateway.store.consume(&token_hash).await?,
        RefreshRotation::Reuse => gateway.store.find(&token_hash).await?,
    }
    .ok_or(Error::UnknownRefreshToken)?;

    let tokens = match gateway.rotation {
        RefreshRotation::Rotate => {
            gateway
                .issue_tokens(&record.identity_id, &record.provider)
                .await?
        }
        RefreshRotation::Reuse => TokenPair {
            authorization_token: gateway
                .codec
                .mint_authorization_token(&record.identity_id, &record.provider)?,
            refresh_token: request.refresh_token.clone(),
        },
    };

    tracing::info!(
        provider = %record.provider,
        identity = %record.identity_id,
        stage,
        rotation = ?gateway.rotation,
        "authorization token refreshed"
    );
    Ok(tokens)
}
