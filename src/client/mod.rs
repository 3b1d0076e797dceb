//! Client - owns the store, the active provider session and the query cache
//!
//! ```text
//! Client
//!   ├── ClientStore        (Session + fetching/assets, single update path)
//!   ├── SessionManager     (connector → provider → authorization)
//!   ├── active session     (connector, provider, bridge subscription)
//!   ├── ClientStorage      (connection flags, cache snapshot)
//!   └── QueryCache         (balance results, persisted by PersistHandle)
//! ```
//!
//! At most one session is active. Establishing a new one releases the
//! previous bridge subscription first; re-establishing on the same provider
//! keeps the existing subscription so events are never delivered twice.
//!
//! Connect attempts claim a [`ConnectTicket`] when they start. Only the
//! holder of the newest ticket may establish, whichever hook started it.

mod config;

pub use config::{ClientConfig, Persistence};

use crate::bridge::{self, BridgeSubscription, SessionSink};
use crate::cache::{now_ms, MemoryQueryCache, QueryCache, QueryKey};
use crate::core::keys::{entity, storage as keys};
use crate::core::units::format_ether;
use crate::core::Subscription;
use crate::errors::Result;
use crate::persist::{persist_query_client, ClientStorage, NoopStorage, PersistHandle, Persister, SyncStoragePersister};
use crate::provider::{Connector, Provider};
use crate::session::{AcquiredSession, Session, SessionManager, SessionStatus};
use crate::store::{ClientState, ClientStore, StatePatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

/// Outcome of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub address: String,
    pub chain_id: u64,
    pub connector: String,
}

/// Claim on the right to establish, see [`Client::claim_connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTicket(u64);

impl From<&AcquiredSession> for ConnectResult {
    fn from(acquired: &AcquiredSession) -> Self {
        ConnectResult {
            address: acquired.address.clone(),
            chain_id: acquired.chain_id,
            connector: acquired.connector.id().to_string(),
        }
    }
}

struct ActiveSession {
    connector: Arc<dyn Connector>,
    provider: Arc<dyn Provider>,
    bridge: Option<BridgeSubscription>,
}

struct ClientInner {
    config: ClientConfig,
    store: ClientStore,
    storage: ClientStorage,
    query_cache: Arc<dyn QueryCache>,
    persist: Option<PersistHandle>,
    sessions: SessionManager,
    active: Mutex<Option<ActiveSession>>,
    connect_epoch: AtomicU64,
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Build a client: storage, query cache and, unless disabled, cache persistence.
/// The stored cache snapshot is restored before this returns.
pub fn create_client(config: ClientConfig) -> Client {
    let raw_storage = config.storage.clone().unwrap_or_else(|| Arc::new(NoopStorage));
    let storage = ClientStorage::new(raw_storage);
    let query_cache: Arc<dyn QueryCache> = config.query_cache.clone().unwrap_or_else(|| Arc::new(MemoryQueryCache::new()));

    let persister: Option<Arc<dyn Persister>> = match &config.persistence {
        Persistence::Storage => Some(Arc::new(SyncStoragePersister::new(storage.clone()))),
        Persistence::Disabled => None,
        Persistence::Custom(persister) => Some(persister.clone()),
    };
    let persist = persister.map(|p| persist_query_client(query_cache.clone(), p, config.persist_options.clone()));

    debug!(?config, "client created");
    Client {
        inner: Arc::new(ClientInner {
            config,
            store: ClientStore::new(),
            storage,
            query_cache,
            persist,
            sessions: SessionManager::new(),
            active: Mutex::new(None),
            connect_epoch: AtomicU64::new(0),
        }),
    }
}

impl Client {
    pub fn config(&self) -> &ClientConfig { &self.inner.config }
    pub fn store(&self) -> &ClientStore { &self.inner.store }
    pub fn state(&self) -> ClientState { self.inner.store.current_state() }
    pub fn session(&self) -> Session { self.inner.store.session() }
    pub fn storage(&self) -> &ClientStorage { &self.inner.storage }
    pub fn query_cache(&self) -> &Arc<dyn QueryCache> { &self.inner.query_cache }
    pub fn persist_handle(&self) -> Option<&PersistHandle> { self.inner.persist.as_ref() }

    /// Single subscription point for state changes.
    pub fn subscribe(&self, listener: impl Fn(&ClientState) + Send + Sync + 'static) -> Subscription {
        self.inner.store.on_change(listener)
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] { &self.inner.config.connectors }

    pub fn connector(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors().iter().find(|c| c.id() == id).cloned()
    }

    pub fn active_connector(&self) -> Option<Arc<dyn Connector>> {
        self.inner.active().as_ref().map(|a| a.connector.clone())
    }

    /// Authorize against `connector` without touching the store.
    pub async fn acquire(&self, connector: Arc<dyn Connector>, chain_id: Option<u64>) -> Result<AcquiredSession> {
        self.inner.sessions.acquire(connector, chain_id).await
    }

    /// Start a connect attempt. Supersedes every ticket claimed before.
    pub fn claim_connect(&self) -> ConnectTicket {
        ConnectTicket(self.inner.connect_epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether no connect attempt started after `ticket` was claimed.
    pub fn owns_connect(&self, ticket: ConnectTicket) -> bool {
        self.inner.connect_epoch.load(Ordering::SeqCst) == ticket.0
    }

    /// Commit an acquired session: bridge, store, connection flags, balance.
    pub async fn establish(&self, acquired: AcquiredSession) -> ConnectResult {
        let AcquiredSession { connector, provider, address, chain_id, signer } = acquired;
        let previous = {
            let mut active = self.inner.active();
            let reusable = active
                .as_mut()
                .filter(|a| a.bridge.as_ref().map(|b| b.is_for(&provider) && b.is_active()).unwrap_or(false))
                .and_then(|a| a.bridge.take());
            let bridge = reusable.or_else(|| {
                let sink = Arc::downgrade(&self.inner);
                let sink: Weak<dyn SessionSink> = sink;
                bridge::subscribe(provider.clone(), sink)
            });
            active.replace(ActiveSession { connector: connector.clone(), provider, bridge })
        };
        if let Some(previous) = previous {
            if let Some(bridge) = &previous.bridge {
                bridge.unsubscribe();
            }
            if previous.connector.id() != connector.id() {
                if let Err(e) = previous.connector.disconnect().await {
                    warn!(connector = previous.connector.id(), error = %e, "replaced connector disconnect failed");
                }
            }
        }

        self.inner.storage.set_item(keys::CONNECTED, &true);
        self.inner.storage.set_item(keys::WALLET, connector.id());
        info!(connector = connector.id(), address = %address, chain_id, "connected");

        let patch = StatePatch::new()
            .address(Some(address.clone()))
            .chain_id(chain_id)
            .connector(Some(connector.id().to_string()))
            .signer(Some(signer))
            .status(SessionStatus::Connected);
        self.inner.update_session(patch).await;
        ConnectResult { address, chain_id, connector: connector.id().to_string() }
    }

    /// Acquire and establish in one step. The session shows `connecting`
    /// while authorization is pending if nothing was connected before.
    /// A connect started meanwhile takes precedence: the result is returned
    /// but the session is left to the newer attempt.
    pub async fn connect(&self, connector: Arc<dyn Connector>, chain_id: Option<u64>) -> Result<ConnectResult> {
        let ticket = self.claim_connect();
        let marked = self.inner.store.session().is_disconnected()
            && self.inner.store.apply_update(StatePatch::new().status(SessionStatus::Connecting));
        match self.acquire(connector, chain_id).await {
            Ok(acquired) if !self.owns_connect(ticket) => {
                info!(connector = acquired.connector.id(), "superseded connect resolved, session untouched");
                Ok(ConnectResult::from(&acquired))
            }
            Ok(acquired) => Ok(self.establish(acquired).await),
            Err(e) => {
                if marked && self.inner.store.session().status == SessionStatus::Connecting {
                    self.inner.store.apply_update(StatePatch::new().status(SessionStatus::Disconnected));
                }
                Err(e)
            }
        }
    }

    /// Release listeners, disconnect the connector and reset the session.
    pub async fn disconnect(&self) -> Result<()> {
        let connector = self.inner.release("disconnect");
        if let Some(connector) = connector {
            if let Err(e) = connector.disconnect().await {
                warn!(connector = connector.id(), error = %e, "connector disconnect failed");
            }
        }
        Ok(())
    }

    /// Restore the last session without prompting. Failures are logged and
    /// leave the session disconnected. Does nothing while a session is live
    /// or being connected.
    pub async fn auto_connect(&self) -> Option<ConnectResult> {
        if !self.session().is_disconnected() {
            debug!("auto-connect: session already active");
            return None;
        }
        if !self.inner.storage.get_item::<bool>(keys::CONNECTED).unwrap_or(false) {
            debug!("auto-connect: no previous session");
            return None;
        }
        let last = self.inner.storage.get_item::<String>(keys::WALLET);
        let mut connectors = self.connectors().to_vec();
        if let Some(last) = &last {
            connectors.sort_by_key(|c| c.id() != last.as_str());
        }

        self.inner.store.apply_update(StatePatch::new().status(SessionStatus::Reconnecting));
        for connector in connectors {
            if !connector.is_authorized().await {
                continue;
            }
            match self.acquire(connector.clone(), None).await {
                Ok(acquired) => {
                    if self.inner.store.session().status != SessionStatus::Reconnecting {
                        debug!("auto-connect: session changed meanwhile, skipping");
                        return None;
                    }
                    return Some(self.establish(acquired).await);
                }
                Err(e) => warn!(connector = connector.id(), error = %e, "auto-connect failed"),
            }
        }

        let nothing_active = self.inner.active().is_none();
        if nothing_active && self.inner.store.session().status == SessionStatus::Reconnecting {
            self.inner.store.apply_update(StatePatch::disconnected());
        }
        None
    }

    /// Refresh `assets` for the current account and chain.
    pub async fn refresh_assets(&self) {
        self.inner.update_session(StatePatch::new()).await;
    }

    /// Wait until every provider event delivered so far has been applied.
    pub async fn settled(&self) {
        let tracker = self.inner.active().as_ref().and_then(|a| a.bridge.as_ref().map(|b| b.tracker()));
        if let Some(tracker) = tracker {
            tracker.settled().await;
        }
    }

    /// True while provider events are being listened to.
    pub fn is_listening(&self) -> bool {
        self.inner.active().as_ref().and_then(|a| a.bridge.as_ref()).map(|b| b.is_active()).unwrap_or(false)
    }
}

/// Query key of the native balance of `address` on `chain_id`.
pub fn balance_key(address: &str, chain_id: u64) -> QueryKey {
    QueryKey::entity(entity::BALANCE).field("address", address).field("chainId", chain_id)
}

impl ClientInner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Drop the active session and reset the store. Returns its connector.
    fn release(&self, reason: &str) -> Option<Arc<dyn Connector>> {
        let previous = self.active().take();
        if let Some(bridge) = previous.as_ref().and_then(|a| a.bridge.as_ref()) {
            bridge.unsubscribe();
        }
        self.store.apply_update(StatePatch::disconnected());
        self.storage.remove_item(keys::CONNECTED);
        self.storage.remove_item(keys::WALLET);
        info!(reason, "disconnected");
        previous.map(|a| a.connector)
    }

    /// Apply `patch` together with the cached balance of the resulting
    /// account as one notification. A missing or stale balance is then
    /// fetched and applied as a second one.
    async fn update_session(&self, patch: StatePatch) {
        let provider = {
            let active = self.active();
            active.as_ref().map(|a| a.provider.clone())
        };
        let mut fetch = None;
        self.store.batch(|b| {
            b.apply(patch);
            let session = &b.state().session;
            let (Some(address), true) = (session.address.clone(), provider.is_some()) else {
                return;
            };
            let chain_id = session.chain_id;
            let key = balance_key(&address, chain_id);
            let cached = self.query_cache.get(&key);
            let fresh = cached.as_ref().map(|e| e.age_ms(now_ms()) < self.config.stale_time).unwrap_or(false);
            let assets = cached.and_then(|e| e.data.as_str().map(String::from));
            b.apply(StatePatch::new().assets(assets).fetching(!fresh));
            if fresh {
                debug!(address = %address, chain_id, "balance served from cache");
            } else {
                fetch = Some((address, chain_id, key));
            }
        });
        let (Some((address, chain_id, key)), Some(provider)) = (fetch, provider) else {
            return;
        };

        let current = |store: &ClientStore| {
            let s = store.session();
            s.address.as_deref() == Some(address.as_str()) && s.chain_id == chain_id
        };
        match provider.get_balance(&address).await {
            Ok(wei) => {
                let formatted = format_ether(wei);
                self.query_cache.set(key, Value::String(formatted.clone()), self.config.cache_time);
                if current(&self.store) {
                    self.store.apply_update(StatePatch::new().assets(Some(formatted)).fetching(false));
                }
            }
            Err(e) => {
                warn!(address = %address, chain_id, error = %e, "balance fetch failed");
                if current(&self.store) {
                    self.store.apply_update(StatePatch::new().fetching(false));
                }
            }
        }
    }
}

#[async_trait]
impl SessionSink for ClientInner {
    async fn update_session(&self, patch: StatePatch) {
        ClientInner::update_session(self, patch).await;
    }

    async fn end_session(&self, reason: &'static str) {
        self.release(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStorage;
    use crate::provider::{MemoryConnector, MemoryProvider};

    fn client_with(provider: Arc<MemoryProvider>, storage: Arc<MemoryStorage>) -> (Client, Arc<dyn Connector>) {
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider)));
        let client = create_client(ClientConfig::new().with_connector(connector.clone()).with_storage(storage));
        (client, connector)
    }

    #[tokio::test]
    async fn connect_sets_session_flags_and_assets() {
        let provider = Arc::new(MemoryProvider::with_account("0xAA", 97).with_balance("0xaa", 97, 2_000_000_000_000_000_000));
        let storage = Arc::new(MemoryStorage::new());
        let (client, connector) = client_with(provider.clone(), storage.clone());

        let result = client.connect(connector, None).await.unwrap();
        assert_eq!(result, ConnectResult { address: "0xaa".into(), chain_id: 97, connector: "injected".into() });

        let state = client.state();
        assert!(state.session.is_connected());
        assert_eq!(state.assets.as_deref(), Some("2.0"));
        assert!(!state.fetching);
        assert!(client.is_listening());
        assert_eq!(storage.raw("beeconnect.connected").as_deref(), Some("true"));
        assert_eq!(storage.raw("beeconnect.wallet").as_deref(), Some("\"injected\""));
    }

    #[tokio::test]
    async fn failed_connect_restores_disconnected() {
        let provider = Arc::new(MemoryProvider::with_account("0xAA", 1));
        provider.reject_requests(true);
        let (client, connector) = client_with(provider, Arc::new(MemoryStorage::new()));

        assert_eq!(client.connect(connector, None).await.unwrap_err(), crate::ConnectError::UserRejected);
        assert_eq!(client.session().status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reconnecting_same_provider_keeps_one_listener() {
        let provider = Arc::new(MemoryProvider::with_account("0xAA", 1));
        let (client, connector) = client_with(provider.clone(), Arc::new(MemoryStorage::new()));

        client.connect(connector.clone(), None).await.unwrap();
        client.connect(connector, None).await.unwrap();
        assert_eq!(provider.listener_count(), 1);

        client.disconnect().await.unwrap();
        assert_eq!(provider.listener_count(), 0);
        assert!(!client.is_listening());
    }

    #[tokio::test]
    async fn fresh_cached_balance_skips_the_provider() {
        let provider = Arc::new(MemoryProvider::with_account("0xAA", 1).with_balance("0xaa", 1, 1));
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
        let client = create_client(ClientConfig::new().with_connector(connector.clone()).with_stale_time(60_000));
        client.query_cache().set(balance_key("0xaa", 1), Value::String("5.0".into()), 60_000);

        client.connect(connector, None).await.unwrap();
        assert_eq!(client.state().assets.as_deref(), Some("5.0"));
        assert_eq!(provider.balance_calls(), 0);
    }
}
