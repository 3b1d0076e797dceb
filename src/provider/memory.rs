//! In-process provider and connector
//!
//! Implements the provider boundary without a transport: accounts, chain and
//! balances live in memory, authorization can be held open or rejected, and
//! events are emitted on demand.

use super::{Connector, EventListener, Network, Provider, ProviderEvent, ProviderEvents, ProviderResult, Signer};
use crate::core::{ListenerSet, Subscription};
use crate::errors::ProviderError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: Vec<String>,
    chain_id: u64,
    balances: HashMap<(String, u64), u128>,
    reject: bool,
    authorized: bool,
    network_error: Option<String>,
}

pub struct MemoryProvider {
    state: Mutex<MemoryState>,
    listeners: ListenerSet<ProviderEvent>,
    emits_events: bool,
    gate: watch::Sender<bool>,
    prompts: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(accounts: Vec<String>, chain_id: u64) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(MemoryState { accounts, chain_id, ..Default::default() }),
            listeners: ListenerSet::new(),
            emits_events: true,
            gate,
            prompts: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
        }
    }

    /// Single-account provider on `chain_id`.
    pub fn with_account(address: impl Into<String>, chain_id: u64) -> Self {
        Self::new(vec![address.into()], chain_id)
    }

    /// A provider with no event emitter.
    pub fn without_events(mut self) -> Self { self.emits_events = false; self }
    pub fn with_balance(self, address: &str, chain_id: u64, wei: u128) -> Self { self.set_balance(address, chain_id, wei); self }
    pub fn authorized(self) -> Self { self.lock().authorized = true; self }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_balance(&self, address: &str, chain_id: u64, wei: u128) {
        self.lock().balances.insert((address.to_ascii_lowercase(), chain_id), wei);
    }

    /// Decline every authorization request from now on.
    pub fn reject_requests(&self, reject: bool) { self.lock().reject = reject; }

    /// Make `get_network` fail with `message`, or succeed again with `None`.
    pub fn fail_network(&self, message: Option<&str>) { self.lock().network_error = message.map(String::from); }

    /// Park authorization requests until [`MemoryProvider::release_requests`].
    pub fn hold_requests(&self) { self.gate.send_replace(false); }
    pub fn release_requests(&self) { self.gate.send_replace(true); }

    pub fn is_authorized(&self) -> bool { self.lock().authorized }
    pub fn chain_id(&self) -> u64 { self.lock().chain_id }

    /// Number of authorization prompts shown so far.
    pub fn prompt_count(&self) -> usize { self.prompts.load(Ordering::SeqCst) }
    pub fn balance_calls(&self) -> usize { self.balance_calls.load(Ordering::SeqCst) }
    pub fn listener_count(&self) -> usize { self.listeners.len() }

    pub fn emit(&self, event: ProviderEvent) {
        if self.emits_events {
            self.listeners.emit(&event);
        }
    }

    /// Switch the active account list and emit `accountsChanged`.
    pub fn set_accounts(&self, accounts: Vec<String>) {
        self.lock().accounts = accounts.clone();
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// Switch chain and emit `chainChanged`.
    pub fn set_chain(&self, chain_id: u64) {
        self.lock().chain_id = chain_id;
        self.emit(ProviderEvent::ChainChanged);
    }

    pub fn close(&self) { self.emit(ProviderEvent::Close); }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn request_accounts(&self) -> ProviderResult<Vec<String>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open).await.map_err(|_| ProviderError::Unavailable)?;
        let mut state = self.lock();
        if state.reject {
            return Err(ProviderError::Rejected("User rejected the request.".into()));
        }
        if state.accounts.is_empty() {
            return Err(ProviderError::Rejected("no accounts".into()));
        }
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn get_network(&self) -> ProviderResult<Network> {
        let state = self.lock();
        match &state.network_error {
            Some(message) => Err(ProviderError::Rpc(message.clone())),
            None => Ok(Network { chain_id: state.chain_id }),
        }
    }

    async fn get_balance(&self, address: &str) -> ProviderResult<u128> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        Ok(state.balances.get(&(address.to_ascii_lowercase(), state.chain_id)).copied().unwrap_or(0))
    }

    fn signer(&self, address: &str) -> Arc<dyn Signer> {
        Arc::new(MemorySigner::new(address))
    }

    async fn switch_chain(&self, chain_id: u64) -> ProviderResult<Network> {
        self.set_chain(chain_id);
        Ok(Network { chain_id })
    }

    fn events(&self) -> Option<&dyn ProviderEvents> {
        if self.emits_events { Some(self) } else { None }
    }
}

impl ProviderEvents for MemoryProvider {
    fn on(&self, listener: EventListener) -> Subscription {
        self.listeners.add(move |event: &ProviderEvent| listener(event.clone()))
    }
}

/// HMAC-SHA256 signer keyed by the account address.
pub struct MemorySigner {
    address: String,
    key: [u8; 32],
}

impl MemorySigner {
    pub fn new(address: &str) -> Self {
        let address = address.to_ascii_lowercase();
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(format!("beeconnect-memory:{}", address).as_bytes()));
        Self { address, key }
    }
}

#[async_trait]
impl Signer for MemorySigner {
    fn address(&self) -> &str { &self.address }

    async fn sign_message(&self, message: &[u8]) -> ProviderResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| ProviderError::Rpc(e.to_string()))?;
        mac.update(message);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Connector over an optional [`MemoryProvider`]; `None` models a missing wallet.
pub struct MemoryConnector {
    id: String,
    name: String,
    provider: Option<Arc<MemoryProvider>>,
    disconnects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(id: impl Into<String>, provider: Option<Arc<MemoryProvider>>) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, provider, disconnects: AtomicUsize::new(0) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = name.into(); self }
    pub fn disconnect_count(&self) -> usize { self.disconnects.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn id(&self) -> &str { &self.id }
    fn name(&self) -> &str { &self.name }

    async fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.provider.clone().map(|p| p as Arc<dyn Provider>)
    }

    async fn is_authorized(&self) -> bool {
        self.provider.as_ref().map(|p| p.is_authorized()).unwrap_or(false)
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejection_and_authorization() {
        let provider = MemoryProvider::with_account("0xAbC", 1);
        provider.reject_requests(true);
        assert!(matches!(provider.request_accounts().await, Err(ProviderError::Rejected(_))));
        assert!(!provider.is_authorized());

        provider.reject_requests(false);
        assert_eq!(provider.request_accounts().await.unwrap(), vec!["0xAbC".to_string()]);
        assert!(provider.is_authorized());
        assert_eq!(provider.prompt_count(), 2);
    }

    #[tokio::test]
    async fn signatures_are_deterministic_per_account() {
        let a = MemorySigner::new("0xAAA");
        let b = MemorySigner::new("0xaaa");
        let c = MemorySigner::new("0xbbb");
        let sig = a.sign_message(b"hello").await.unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, b.sign_message(b"hello").await.unwrap());
        assert_ne!(sig, c.sign_message(b"hello").await.unwrap());
    }

    #[test]
    fn providers_without_emitter_report_none() {
        let provider = MemoryProvider::with_account("0x1", 1).without_events();
        assert!(provider.events().is_none());
        provider.set_chain(5);
        assert_eq!(provider.chain_id(), 5);
    }
}
