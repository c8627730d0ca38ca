//! Client error types.

use calsync_providers::{ProviderError, ProviderErrorCode};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the `calsync` commands.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider error.
    #[error("{0}")]
    Provider(#[source] ProviderError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable token for the provider.
    #[error("authentication required: {0}")]
    AuthRequired(String),
}

impl From<ProviderError> for ClientError {
    fn from(err: ProviderError) -> Self {
        match err.code() {
            ProviderErrorCode::ConfigurationError => Self::Config(err.to_string()),
            ProviderErrorCode::AuthenticationFailed => Self::AuthRequired(format!(
                "{err}. Run `calsync auth {}` to reconnect",
                err.provider().unwrap_or("<provider>")
            )),
            _ => Self::Provider(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_become_config() {
        let err: ClientError = ProviderError::configuration("missing client id").into();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(err.to_string().contains("missing client id"));
    }

    #[test]
    fn authentication_errors_suggest_reconnecting() {
        let err: ClientError = ProviderError::authentication("token revoked")
            .with_provider("google")
            .into();
        assert!(matches!(err, ClientError::AuthRequired(_)));
        assert!(err.to_string().contains("calsync auth google"));
    }

    #[test]
    fn other_errors_keep_the_provider_error() {
        let err: ClientError = ProviderError::storage("disk full").into();
        match err {
            ClientError::Provider(inner) => {
                assert_eq!(inner.code(), ProviderErrorCode::StorageError)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
