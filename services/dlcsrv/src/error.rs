//! Error types for the DLC service

use thiserror::Error;

/// DLC service error type
#[derive(Error, Debug)]
pub enum DlcSrvError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Bus lock error: {0}")]
    LockError(String),

    #[error("Unit offline: {0}")]
    UnitOffline(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DlcSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        Self::LockError(msg.into())
    }

    pub fn offline(msg: impl Into<String>) -> Self {
        Self::UnitOffline(msg.into())
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::WriteFailed(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendError(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for DlcSrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for DlcSrvError {
    fn from(err: reqwest::Error) -> Self {
        Self::BackendError(err.to_string())
    }
}

impl From<tokio_serial::Error> for DlcSrvError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

/// Result type alias for DLC service operations
pub type Result<T> = std::result::Result<T, DlcSrvError>;
