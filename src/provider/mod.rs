//! Provider - the external wallet/RPC boundary
//!
//! A [`Connector`] is a named strategy for reaching a [`Provider`]
//! (injected extension, QR bridge, hosted wallet). The provider answers
//! account, network and balance requests, hands out a [`Signer`] and, when
//! it can, emits [`ProviderEvent`]s.
//!
//! ```text
//! Connector ──provider()──▶ Provider ──events()──▶ ProviderEvents
//!                              │                        │
//!                              ├── request_accounts     └── on(listener) → Subscription
//!                              ├── get_network
//!                              ├── get_balance
//!                              └── signer(address)
//! ```

mod memory;

pub use memory::{MemoryConnector, MemoryProvider, MemorySigner};

use crate::core::Subscription;
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Network as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "chainId")]
    pub chain_id: u64,
}

/// Connectivity events emitted by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged,
    Close,
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderEvent::AccountsChanged(_) => "accountsChanged",
            ProviderEvent::ChainChanged => "chainChanged",
            ProviderEvent::Close => "close",
        }
    }
}

pub type EventListener = Arc<dyn Fn(ProviderEvent) + Send + Sync>;

/// Event emitter capability of a provider.
pub trait ProviderEvents: Send + Sync {
    /// Register a listener for every provider event. Dropping or
    /// unsubscribing the returned handle removes it.
    fn on(&self, listener: EventListener) -> Subscription;
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Prompt for account authorization.
    async fn request_accounts(&self) -> ProviderResult<Vec<String>>;
    async fn get_network(&self) -> ProviderResult<Network>;
    /// Balance in base units (wei).
    async fn get_balance(&self, address: &str) -> ProviderResult<u128>;
    fn signer(&self, address: &str) -> Arc<dyn Signer>;

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<Network> {
        Err(ProviderError::Unsupported(format!("wallet_switchEthereumChain({})", chain_id)))
    }

    /// `None` when the provider cannot emit events.
    fn events(&self) -> Option<&dyn ProviderEvents> {
        None
    }
}

/// Opaque capability used to authorize future requests.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;
    /// Hex-encoded signature over `message`.
    async fn sign_message(&self, message: &[u8]) -> ProviderResult<String>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    /// Detect the provider this connector drives.
    async fn provider(&self) -> Option<Arc<dyn Provider>>;
    /// True when a session can be re-established without prompting.
    async fn is_authorized(&self) -> bool {
        false
    }
    async fn disconnect(&self) -> ProviderResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").field("id", &self.id()).field("name", &self.name()).finish()
    }
}
