//! Error types for the ipscan core library

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias for ipscan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared across the scanner crates
///
/// Probe outcomes (refused, unreachable, stealth, ...) are never errors;
/// they are classified into the result taxonomy. Only infrastructure
/// failures surface here.
#[derive(Error, Debug)]
pub enum Error {
    /// Network/socket setup errors
    #[error("Network error: {0}")]
    Network(String),

    /// I/O errors with automatic conversion
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parsing errors for addresses, ports, query strings
    #[error("Parse error: {0}")]
    Parse(String),

    /// Permission/capability errors (raw ICMPv6 socket)
    #[error("Insufficient privileges: {0}")]
    Privilege(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Result store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid port number or port key
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Parse(format!("Invalid IP address: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {}", err))
    }
}
