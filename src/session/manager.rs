//! Provider session acquisition

use super::{normalize_address, SignerHandle};
use crate::errors::{ConnectError, Result};
use crate::provider::{Connector, Provider};
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a successful authorization produced, not yet committed to the store.
#[derive(Clone)]
pub struct AcquiredSession {
    pub connector: Arc<dyn Connector>,
    pub provider: Arc<dyn Provider>,
    pub address: String,
    pub chain_id: u64,
    pub signer: SignerHandle,
}

impl std::fmt::Debug for AcquiredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredSession")
            .field("connector", &self.connector.id())
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Acquires a provider handle from a connector and requests authorization.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionManager;

impl SessionManager {
    pub fn new() -> Self { Self }

    /// Every call prompts the provider again.
    pub async fn acquire(&self, connector: Arc<dyn Connector>, chain_id: Option<u64>) -> Result<AcquiredSession> {
        let provider = connector.provider().await.ok_or(ConnectError::NoProviderFound)?;

        let accounts = match provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                debug!(connector = connector.id(), error = %e, "authorization declined");
                return Err(ConnectError::UserRejected);
            }
        };
        let address = accounts
            .first()
            .map(|a| normalize_address(a))
            .ok_or(ConnectError::UserRejected)?;

        let mut network = provider.get_network().await?;
        if let Some(requested) = chain_id {
            if requested != network.chain_id {
                match provider.switch_chain(requested).await {
                    Ok(switched) => network = switched,
                    Err(e) => warn!(requested, current = network.chain_id, error = %e, "chain switch failed, keeping provider chain"),
                }
            }
        }

        let signer = SignerHandle::new(provider.signer(&address));
        Ok(AcquiredSession { connector, provider, address, chain_id: network.chain_id, signer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryConnector, MemoryProvider};

    #[tokio::test]
    async fn missing_provider_fails_with_no_provider_found() {
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", None));
        let err = SessionManager::new().acquire(connector, None).await.unwrap_err();
        assert_eq!(err, ConnectError::NoProviderFound);
    }

    #[tokio::test]
    async fn rejection_discards_cause() {
        let provider = Arc::new(MemoryProvider::with_account("0xABC", 1));
        provider.reject_requests(true);
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider)));
        let err = SessionManager::new().acquire(connector, None).await.unwrap_err();
        assert_eq!(err, ConnectError::UserRejected);
    }

    #[tokio::test]
    async fn acquires_normalized_address_and_requested_chain() {
        let provider = Arc::new(MemoryProvider::with_account("0xABCdef", 1));
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
        let acquired = SessionManager::new().acquire(connector, Some(97)).await.unwrap();
        assert_eq!(acquired.address, "0xabcdef");
        assert_eq!(acquired.chain_id, 97);
        assert_eq!(acquired.signer.address(), "0xabcdef");
        assert_eq!(provider.prompt_count(), 1);
    }
}
