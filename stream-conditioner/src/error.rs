use thiserror::Error;

use crate::transport::ConnectionId;

/// Failure reported by the transport when a counter cannot be read
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum ConditionerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Config file not found at {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("No tokio runtime available to drive the polling ticker")]
    NoRuntime,
}
