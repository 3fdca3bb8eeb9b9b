//! Error types for the credential and session layer.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure to obtain an SSO token from the local cache.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Neither AWS_CONFIG_FILE nor a home directory is available.
    #[error("failed to determine the AWS config directory")]
    NoHomeDirectory,

    #[error("cache directory {} does not exist", path.display())]
    CacheDirectoryMissing { path: PathBuf },

    #[error("no token files found in the cache directory {}", path.display())]
    NoTokenFiles { path: PathBuf },

    #[error("malformed token file {}: {reason}", path.display())]
    MalformedToken { path: PathBuf, reason: String },

    #[error("failed to read token cache {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Classification of a failed role credential exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    Unauthorized,
    InvalidRequest,
    ResourceNotFound,
    RateLimited,
    Unknown,
}

impl ExchangeErrorKind {
    /// Map an AWS error code onto an exchange failure kind.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some("UnauthorizedException") => Self::Unauthorized,
            Some("InvalidRequestException") => Self::InvalidRequest,
            Some("ResourceNotFoundException") => Self::ResourceNotFound,
            Some("TooManyRequestsException") => Self::RateLimited,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ExchangeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unauthorized => "unauthorized",
            Self::InvalidRequest => "invalid request",
            Self::ResourceNotFound => "resource not found",
            Self::RateLimited => "too many requests",
            Self::Unknown => "unexpected error",
        };
        f.write_str(label)
    }
}

/// A role credential exchange that did not yield credentials.
#[derive(Debug, Clone, Error)]
#[error("credential exchange failed ({kind}): {message}")]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Reason a scoped client could not be produced.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no SSO session: {0}")]
    Token(#[from] TokenError),

    #[error("the SSO access token expired at {expires_at}")]
    TokenExpired { expires_at: DateTime<Utc> },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("client scoped to service '{scoped}' cannot build a '{requested}' client")]
    ServiceMismatch { scoped: String, requested: String },
}

/// Failure reported by an AWS API call, reduced to its error code and message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }
}

/// Account enumeration failure.
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// The SSO listing stopped early; the accounts collected so far are still used.
    #[error("account enumeration via SSO stopped after {collected} accounts: {source}")]
    Partial {
        collected: usize,
        #[source]
        source: ApiError,
    },

    #[error("account enumeration via Organizations failed: {0}")]
    Failed(#[source] ApiError),
}
