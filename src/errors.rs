//! Error kinds for the connection layer and its external boundaries.

use thiserror::Error;

/// Client-facing errors. `Clone` so every attempt can hold its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no wallet provider found")]
    NoProviderFound,
    #[error("user rejected the request")]
    UserRejected,
    #[error("connector is required")]
    MissingConnector,
    #[error("`use_client` must be used within an App that installed ClientPlugin")]
    NotInitialized,
    #[error("provider: {0}")]
    Provider(String),
    #[error("storage: {0}")]
    Storage(String),
}

pub type Result<T, E = ConnectError> = std::result::Result<T, E>;

/// Errors reported by a wallet/RPC provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("method not supported: {0}")]
    Unsupported(String),
    #[error("provider unavailable")]
    Unavailable,
}

impl From<ProviderError> for ConnectError {
    fn from(e: ProviderError) -> Self {
        ConnectError::Provider(e.to_string())
    }
}

/// Errors reported by a storage backend. Never reach the consumer API.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage unavailable")]
    Unavailable,
}

impl From<StorageError> for ConnectError {
    fn from(e: StorageError) -> Self {
        ConnectError::Storage(e.to_string())
    }
}
