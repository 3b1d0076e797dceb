//! Session - the canonical record of the current wallet connection
//!
//! One [`Session`] is live per client. It is created by the
//! [`SessionManager`] on successful authorization and only ever changed
//! through the client store.

mod manager;

pub use manager::{AcquiredSession, SessionManager};

use crate::core::keys::DEFAULT_CHAIN_ID;
use crate::provider::Signer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Shared signer capability. Equality is identity.
#[derive(Clone)]
pub struct SignerHandle(Arc<dyn Signer>);

impl SignerHandle {
    pub fn new(signer: Arc<dyn Signer>) -> Self { Self(signer) }
    pub fn signer(&self) -> &Arc<dyn Signer> { &self.0 }
    pub fn address(&self) -> &str { self.0.address() }
}

impl PartialEq for SignerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl std::fmt::Debug for SignerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SignerHandle").field(&self.0.address()).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub address: Option<String>,
    pub chain_id: u64,
    pub connector: Option<String>,
    pub signer: Option<SignerHandle>,
    pub status: SessionStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self { address: None, chain_id: DEFAULT_CHAIN_ID, connector: None, signer: None, status: SessionStatus::Disconnected }
    }
}

impl Session {
    pub fn is_connected(&self) -> bool { self.status == SessionStatus::Connected }
    pub fn is_disconnected(&self) -> bool { self.status == SessionStatus::Disconnected }
}

/// Accounts are compared lowercase.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
