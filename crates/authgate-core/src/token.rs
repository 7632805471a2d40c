use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TokensConfig;
use crate::error::{Error, Result};
use crate::state::is_hex_token;

type HmacSha256 = Hmac<Sha256>;

/// `now + ttl_secs`, or an error when the sum leaves chrono's range.
pub fn expiry_after(now: DateTime<Utc>, ttl_secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("token lifetime of {ttl_secs}s is out of range"))
        })
}

/// Length of an encoded refresh token.
pub const REFRESH_TOKEN_LEN: usize = 64;

/// Claims carried by an authorization token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthorizationClaims {
    /// Stable identity id, see [`TokenCodec::create_identity_id`].
    pub id: String,
    pub provider: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and verifies HS256 authorization tokens, and derives identity ids
/// with the same secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenCodec {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn from_config(config: &TokensConfig) -> Result<Self> {
        let secret = config.token_secret.resolve()?;
        if secret.is_empty() {
            return Err(Error::Config("tokens.token_secret must not be empty".to_string()));
        }
        Ok(Self::new(&secret, config.authorization_token_ttl_secs))
    }

    /// Create a signed authorization token for an identity.
    pub fn mint_authorization_token(&self, id: &str, provider: &str) -> Result<String> {
        let now = Utc::now();
        let exp = expiry_after(now, self.ttl_secs)?;

        let claims = AuthorizationClaims {
            id: id.to_string(),
            provider: provider.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(anyhow::anyhow!("failed to sign token: {e}")))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify_authorization_token(&self, token: &str) -> Result<AuthorizationClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;

        decode::<AuthorizationClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidSignature,
            })
    }

    /// Stable internal id for an external account:
    /// `hex(HMAC-SHA256(secret, "{provider}-{native_id}"))`.
    pub fn create_identity_id(&self, provider: &str, native_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(format!("{provider}-{native_id}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Generate a random refresh token and return (raw_token, sha256_hash).
pub fn generate_refresh_token() -> (String, String) {
    let mut bytes = [0u8; REFRESH_TOKEN_LEN / 2];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
    let raw = hex::encode(bytes);
    let hash = hash_token(&raw);
    (raw, hash)
}

/// True when `raw` has the shape of a refresh token we could have issued.
pub fn is_refresh_token(raw: &str) -> bool {
    is_hex_token(raw, REFRESH_TOKEN_LEN)
}

/// SHA-256 hash a token string (for storage).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
