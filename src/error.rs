// src/error.rs

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Anything that ends a session early. Contained to the session that hit it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("failed to resolve upstream {endpoint}: {source}")]
    Resolve { endpoint: String, source: io::Error },
    #[error("upstream {0} resolved to no addresses")]
    NoAddress(String),
    #[error("failed to connect to upstream {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[error("upstream closed the connection during authentication")]
    UpstreamClosed,
    #[error("login to upstream did not finish within {0:?}")]
    LoginTimeout(Duration),
    #[error("upstream rejected AUTHINFO USER: {0}")]
    UserRejected(String),
    #[error("upstream rejected AUTHINFO PASS: {0}")]
    PassRejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}
