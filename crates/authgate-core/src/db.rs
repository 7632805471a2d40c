use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::{RefreshTokenRecord, RefreshTokenStore};

/// PostgreSQL-backed refresh token store.
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| Error::Config("store.url is required for postgres".to_string()))?
            .resolve()?;
        let mut opts = PgPoolOptions::new().max_connections(config.max_connections);

        if let Some(schema) = &config.schema {
            // Only plain identifiers are allowed in search_path.
            if schema.is_empty()
                || schema.starts_with(|c: char| c.is_ascii_digit())
                || !schema.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(Error::Config(format!(
                    "invalid schema name '{}': must match [a-zA-Z_][a-zA-Z0-9_]*",
                    schema
                )));
            }
            let schema = schema.clone();
            opts = opts.after_connect(move |conn, _meta| {
                let schema = schema.clone();
                Box::pin(async move {
                    conn.execute(format!("SET search_path TO \"{}\"", schema).as_str())
                        .await?;
                    Ok(())
                })
            });
        }

        let pool = opts.connect(&url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PgTokenStore {
    async fn store(&self, record: RefreshTokenRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, identity_id, provider, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5)"
        )
        .bind(&record.token_hash)
        .bind(&record.identity_id)
        .bind(&record.provider)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT token_hash, identity_id, provider, expires_at, created_at
             FROM refresh_tokens WHERE token_hash = $1 AND expires_at > now()"
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// `DELETE .. RETURNING` makes lookup and invalidation a single statement,
    /// so two concurrent refreshes cannot both win.
    async fn consume(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRecord>(
            "DELETE FROM refresh_tokens
             WHERE token_hash = $1 AND expires_at > now()
             RETURNING token_hash, identity_id, provider, expires_at, created_at"
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_identity(&self, identity_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE identity_id = $1")
            .bind(identity_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
