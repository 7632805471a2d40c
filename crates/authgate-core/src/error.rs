use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Config
    #[error("config not found (searched: {searched:?})")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("config parse error in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    // Store
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Signin / callback
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid OAuth state")]
    InvalidState,

    #[error("provider token exchange failed: {0}")]
    ProviderExchange(String),

    #[error("provider profile fetch failed: {0}")]
    ProviderProfile(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    // Tokens
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    TokenExpired,

    #[error("unknown refresh token")]
    UnknownRefreshToken,

    // General
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigParse { .. }
            | Self::Config(_)
            | Self::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,

            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // Upstream failures surface as a bad gateway without the upstream payload.
            Self::ProviderExchange(_) | Self::ProviderProfile(_) => StatusCode::BAD_GATEWAY,

            Self::UnknownProvider(_) => StatusCode::NOT_FOUND,

            Self::InvalidState | Self::BadRequest(_) => StatusCode::BAD_REQUEST,

            Self::AuthenticationFailed
            | Self::InvalidSignature
            | Self::TokenExpired
            | Self::UnknownRefreshToken => StatusCode::UNAUTHORIZED,
        }
    }

    /// User-facing error code (short, stable string).
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::ConfigParse { .. } => "config_parse_error",
            Self::Config(_) => "config_error",
            Self::Database(_) => "internal_error",
            Self::Migration(_) => "migration_error",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::InvalidState => "invalid_state",
            Self::ProviderExchange(_) | Self::ProviderProfile(_) => "authentication_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::InvalidSignature => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::UnknownRefreshToken => "unknown_refresh_token",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error message may be shown to the caller.
    fn exposes_detail(&self) -> bool {
        !matches!(
            self,
            Self::ProviderExchange(_) | Self::ProviderProfile(_)
        ) && !self.status_code().is_server_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal and upstream errors, don't expose details to client
        let detail = if self.exposes_detail() {
            Some(self.to_string())
        } else {
            tracing::error!(error = %self, "request failed");
            None
        };

        let body = ErrorBody {
            error: self.error_code().to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_hide_upstream_payload() {
        let err = Error::ProviderExchange("invalid_client: secret mismatch".to_string());
        assert_eq!(err.error_code(), "authentication_failed");
        assert!(!err.exposes_detail());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn refresh_errors_are_unauthorized() {
        assert_eq!(Error::UnknownRefreshToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::UnknownRefreshToken.error_code(), "unknown_refresh_token");
        assert!(Error::UnknownRefreshToken.exposes_detail());
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let err = Error::UnknownProvider("myspace".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "unknown provider: myspace");
    }
}
