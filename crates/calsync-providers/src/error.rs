//! Error types for authorization, token and calendar operations.
//!
//! Every fallible operation in this crate returns a [`ProviderError`]. The
//! [`ProviderErrorCode`] is the closed classification that retry logic and
//! the aggregator branch on; the message is for humans.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Missing or invalid configuration, e.g. no client id. Raised before any I/O.
    ConfigurationError,
    /// The authorization flow was rejected: state mismatch, missing code,
    /// consent denied or the callback never arrived.
    AuthorizationFailed,
    /// Credentials are invalid or expired (401), or re-authorization is required.
    AuthenticationFailed,
    /// The account may not read this resource (403).
    PermissionDenied,
    /// Resource not found (404).
    NotFound,
    /// Too many requests (429).
    RateLimited,
    /// Connection failure, timeout or DNS resolution error.
    NetworkError,
    /// The server returned a 5xx status.
    ServerError,
    /// The request was malformed (400).
    BadRequest,
    /// The response could not be parsed.
    InvalidResponse,
    /// The relay refused to exchange an authorization code.
    ExchangeFailed,
    /// A token refresh failed after all attempts.
    RefreshFailed,
    /// The key-value store failed to read or write.
    StorageError,
    /// The provider does not support the operation.
    Unsupported,
    /// Unexpected internal state.
    InternalError,
}

impl ProviderErrorCode {
    /// Returns a stable snake_case name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "configuration_error",
            Self::AuthorizationFailed => "authorization_failed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::BadRequest => "bad_request",
            Self::InvalidResponse => "invalid_response",
            Self::ExchangeFailed => "exchange_failed",
            Self::RefreshFailed => "refresh_failed",
            Self::StorageError => "storage_error",
            Self::Unsupported => "unsupported",
            Self::InternalError => "internal_error",
        }
    }

    /// Returns `true` for codes that mean "this calendar is not readable",
    /// which the aggregator treats as an empty result.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::NotFound)
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from an OAuth, token, storage or calendar operation.
///
/// Cloneable so a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Provider name, e.g. "google".
    provider: Option<String>,
    /// HTTP status that produced this error, if any.
    status: Option<u16>,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            status: None,
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthorizationFailed, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::BadRequest, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn exchange_failed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ExchangeFailed, message)
    }

    pub fn refresh_failed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RefreshFailed, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::StorageError, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InternalError, message)
    }

    /// Maps a non-success HTTP status to the matching error code.
    ///
    /// `body` is included in the message so provider diagnostics reach the user.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        let err = match status.as_u16() {
            400 => Self::bad_request(message),
            401 => Self::authentication(message),
            403 => Self::permission_denied(message),
            404 => Self::not_found(message),
            429 => Self::rate_limited(message),
            _ => Self::server(message),
        };
        err.with_status(status.as_u16())
    }

    /// Wraps a transport-level reqwest error.
    ///
    /// Only failures of the connection itself become [`NetworkError`], which
    /// retry logic treats as transient. A request that could not be built is
    /// a configuration problem and is never retried.
    ///
    /// [`NetworkError`]: ProviderErrorCode::NetworkError
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let message = err.to_string();
            return Self::from_status(status, &message).with_source(err);
        }
        let code = if err.is_builder() {
            ProviderErrorCode::ConfigurationError
        } else if err.is_decode() || err.is_redirect() {
            ProviderErrorCode::InvalidResponse
        } else if err.is_timeout() || err.is_connect() || is_transient_transport(&err) {
            ProviderErrorCode::NetworkError
        } else {
            ProviderErrorCode::InternalError
        };
        Self::new(code, err.to_string()).with_source(err)
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Re-labels the error with a new code and message prefix, keeping the
    /// original as its source.
    #[must_use]
    pub fn wrap(self, code: ProviderErrorCode, context: &str) -> Self {
        Self {
            code,
            message: format!("{context}: {}", self.message),
            provider: self.provider.clone(),
            status: self.status,
            source: Some(Arc::new(self)),
        }
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

const TRANSIENT_IO_KINDS: &[std::io::ErrorKind] = &[
    std::io::ErrorKind::ConnectionReset,
    std::io::ErrorKind::ConnectionAborted,
    std::io::ErrorKind::ConnectionRefused,
    std::io::ErrorKind::BrokenPipe,
    std::io::ErrorKind::TimedOut,
    std::io::ErrorKind::UnexpectedEof,
];

/// Walks the source chain for a dropped connection or a failed DNS lookup.
fn is_transient_transport(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>()
            && TRANSIENT_IO_KINDS.contains(&io.kind())
        {
            return true;
        }
        let message = current.to_string().to_ascii_lowercase();
        if message.contains("dns error") || message.contains("connection closed before message completed") {
            return true;
        }
        source = current.source();
    }
    false
}
