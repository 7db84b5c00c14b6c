//! Error types for the gateway

use std::io;
use thiserror::Error;

/// Gateway error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The serving layer cannot flush a handshake or hand over its transport.
    #[error("Unsupported connection: {0}")]
    Capability(String),

    /// Outbound dial failed. The detail is never shown to clients.
    #[error("gateway error")]
    Gateway,

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Request was refused without any response.
    #[error("Request dropped")]
    Dropped,
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Error::Parse(msg.into())
    }

    pub fn capability<S: Into<String>>(msg: S) -> Self {
        Error::Capability(msg.into())
    }

    pub fn tls<S: Into<String>>(msg: S) -> Self {
        Error::Tls(msg.into())
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        Error::Http(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e.to_string())
    }
}

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let e = Error::capability("no takeover");
        assert!(matches!(e, Error::Capability(_)));
    }

    #[test]
    fn test_error_display() {
        let e = Error::capability("no upgrade handle");
        assert_eq!(e.to_string(), "Unsupported connection: no upgrade handle");
    }

    #[test]
    fn test_gateway_error_hides_detail() {
        assert_eq!(Error::Gateway.to_string(), "gateway error");
    }
}
