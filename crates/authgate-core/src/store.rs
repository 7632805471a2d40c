//! Refresh-token persistence.
//!
//! Only the SHA-256 hash of a refresh token is ever stored. `consume` must be
//! atomic: once it has returned a record for a hash, no later `consume` or
//! `find` may return it again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tokio::sync::Mutex;

use crate::config::{StoreBackend, StoreConfig};
use crate::db::PgTokenStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub identity_id: String,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist a freshly minted token.
    async fn store(&self, record: RefreshTokenRecord) -> Result<()>;

    /// Look up a live (unexpired, unconsumed) token without consuming it.
    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Atomically remove a live token and return it.
    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Revoke a single token. Returns true if it existed.
    async fn revoke(&self, token_hash: &str) -> Result<bool>;

    /// Revoke every token issued to an identity.
    async fn revoke_identity(&self, identity_id: &str) -> Result<u64>;

    /// Drop expired rows.
    async fn purge_expired(&self) -> Result<u64>;

    /// Backend name, for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Open the configured store backend.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn RefreshTokenStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory refresh token store; tokens are lost on restart");
            Ok(Arc::new(MemoryTokenStore::default()))
        }
        StoreBackend::Postgres => Ok(Arc::new(PgTokenStore::connect(config).await?)),
    }
}

/// Process-local store for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryTokenStore {
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.lock().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryTokenStore {
    async fn store(&self, record: RefreshTokenRecord) -> Result<()> {
        self.tokens
            .lock()
            .await
            .insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let now = Utc::now();
        let tokens = self.tokens.lock().await;
        Ok(tokens
            .get(token_hash)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let now = Utc::now();
        let mut tokens = self.tokens.lock().await;
        // Expired tokens are removed too, but reported as absent
        Ok(tokens
            .remove(token_hash)
            .filter(|record| !record.is_expired(now)))
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool> {
        Ok(self.tokens.lock().await.remove(token_hash).is_some())
    }

    async fn revoke_identity(&self, identity_id: &str) -> Result<u64> {
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, record| record.identity_id != identity_id);
        Ok((before - tokens.len()) as u64)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|_, record| !record.is_expired(now));
        Ok((before - tokens.len()) as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
