use axum::http::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure while forwarding a single request. Never cached, never retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to read body: {0}")]
    Body(#[source] axum::Error),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
}

impl ProxyError {
    /// Status reported to the client when forwarding fails.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("origin must be specified when not clearing the cache")]
    MissingOrigin,

    #[error("invalid origin URL {url:?}: {reason}")]
    InvalidOrigin { url: String, reason: String },

    #[error("unsupported origin scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("invalid listen address {addr:?}: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },
}
