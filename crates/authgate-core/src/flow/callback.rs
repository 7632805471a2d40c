use crate::error::{Error, Result};
use crate::flow::{Gateway, TokenPair};
use crate::provider::ProviderIdentity;
use crate::state::StateGuard;

/// Successful callback outcome.
#[derive(Debug, Clone)]
pub struct CallbackRedirect {
    pub location: String,
    pub identity: ProviderIdentity,
    pub tokens: TokenPair,
}

/// Finish a signin: validate state, exchange the code, map the profile and
/// mint tokens. Any failure aborts before a token is handed out.
pub async fn handle(
    gateway: &Gateway,
    provider_id: &str,
    code: &str,
    state: &str,
) -> Result<CallbackRedirect> {
    StateGuard::validate(state)?;
    let provider = gateway.providers.get(provider_id)?;

    let access_token = provider.exchange_code(&gateway.http, code).await?;
    let profile = provider.fetch_profile(&gateway.http, &access_token).await?;
    let identity = provider.map_profile(&profile, &gateway.codec)?;

    let tokens = gateway.issue_tokens(&identity.id, provider.id()).await?;

    let mut location = gateway.client_redirect_uri.clone();
    location
        .query_pairs_mut()
        .append_pair("authorization_token", &tokens.authorization_token)
        .append_pair("refresh_token", &tokens.refresh_token);

    tracing::info!(provider = %provider_id, identity = %identity.id, "signin completed");
    Ok(CallbackRedirect {
        location: location.to_string(),
        identity,
        tokens,
    })
}

/// Like [`handle`], but collapses every failure into
/// [`Error::AuthenticationFailed`]. The typed error is logged, never forwarded.
pub async fn respond(gateway: &Gateway, provider_id: &str, code: &str, state: &str) -> String {
    match handle(gateway, provider_id, code, state).await {
        Ok(redirect) => redirect.location,
        Err(e) => {
            tracing::warn!(provider = %provider_id, error = %e, "callback failed");
            failure_location(gateway)
        }
    }
}

/// Client URL carrying the [`Error::AuthenticationFailed`] code.
pub fn failure_location(gateway: &Gateway) -> String {
    let mut location = gateway.client_redirect_uri.clone();
    location
        .query_pairs_mut()
        .append_pair("error", Error::AuthenticationFailed.error_code());
    location.to_string()
}
