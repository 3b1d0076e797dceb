//! Persist - durable snapshots of the query cache
//!
//! ```text
//! startup:   storage["beeconnect.cache"] ──restore──▶ PersistedClient ──hydrate──▶ QueryCache
//! mutation:  QueryCache event ──dehydrate(filter)──▶ PersistedClient ──persist──▶ storage
//! ```
//!
//! The filter drops entries with `cache_time == 0` and entries whose key
//! discriminator carries `persist: false`. Snapshots older than `max_age`
//! or written with a different `buster` are discarded on restore. Storage
//! failures never reach callers: the persister logs them and stops writing.

mod storage;

#[cfg(feature = "native")]
pub use storage::FileStorage;
pub use storage::{ClientStorage, MemoryStorage, NoopStorage, Storage, StorageResult};

use crate::cache::{now_ms, CacheEntry, DehydratedState, QueryCache};
use crate::core::keys::{storage as keys, DEFAULT_MAX_AGE_MS};
use crate::core::Subscription;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Envelope written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedClient {
    pub timestamp: i64,
    #[serde(default)]
    pub buster: String,
    pub client_state: DehydratedState,
}

pub trait Persister: Send + Sync {
    fn persist_client(&self, client: &PersistedClient);
    /// `None` when nothing usable is stored.
    fn restore_client(&self) -> Option<PersistedClient>;
    fn remove_client(&self);
}

/// Persister over synchronous [`ClientStorage`], one key for the whole snapshot.
pub struct SyncStoragePersister {
    storage: ClientStorage,
    key: String,
    degraded: AtomicBool,
}

impl SyncStoragePersister {
    pub fn new(storage: ClientStorage) -> Self {
        Self::with_key(storage, keys::CACHE)
    }

    pub fn with_key(storage: ClientStorage, key: impl Into<String>) -> Self {
        Self { storage, key: key.into(), degraded: AtomicBool::new(false) }
    }

    pub fn key(&self) -> &str { &self.key }

    /// True once a write failed; no further writes are attempted.
    pub fn is_degraded(&self) -> bool { self.degraded.load(Ordering::SeqCst) }
}

impl Persister for SyncStoragePersister {
    fn persist_client(&self, client: &PersistedClient) {
        if self.is_degraded() {
            return;
        }
        if !self.storage.set_item(&self.key, client) {
            warn!(key = %self.key, "cache persistence disabled after write failure");
            self.degraded.store(true, Ordering::SeqCst);
        }
    }

    fn restore_client(&self) -> Option<PersistedClient> {
        self.storage.get_item(&self.key)
    }

    fn remove_client(&self) {
        self.storage.remove_item(&self.key);
    }
}

pub type DehydrateFilter = Arc<dyn Fn(&CacheEntry) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PersistOptions {
    /// Milliseconds after which a stored snapshot is discarded.
    pub max_age: u64,
    /// Snapshots written with another buster are discarded.
    pub buster: String,
    pub should_dehydrate: DehydrateFilter,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self { max_age: DEFAULT_MAX_AGE_MS, buster: String::new(), should_dehydrate: Arc::new(should_dehydrate) }
    }
}

impl PersistOptions {
    pub fn with_max_age(mut self, max_age: u64) -> Self { self.max_age = max_age; self }
    pub fn with_buster(mut self, buster: impl Into<String>) -> Self { self.buster = buster.into(); self }
    pub fn with_filter(mut self, filter: impl Fn(&CacheEntry) -> bool + Send + Sync + 'static) -> Self {
        self.should_dehydrate = Arc::new(filter);
        self
    }
}

impl std::fmt::Debug for PersistOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistOptions").field("max_age", &self.max_age).field("buster", &self.buster).finish()
    }
}

/// Default snapshot filter.
pub fn should_dehydrate(entry: &CacheEntry) -> bool {
    entry.cache_time != 0 && entry.query_key.persist()
}

/// Keeps the cache subscription alive; dropping it stops persistence.
pub struct PersistHandle {
    cache: Arc<dyn QueryCache>,
    persister: Arc<dyn Persister>,
    options: PersistOptions,
    subscription: Subscription,
}

impl PersistHandle {
    /// Write the current snapshot immediately.
    pub fn persist_now(&self) {
        persist(self.cache.as_ref(), self.persister.as_ref(), &self.options);
    }

    pub fn unsubscribe(&self) { self.subscription.unsubscribe(); }
    pub fn is_active(&self) -> bool { self.subscription.is_active() }
}

fn persist(cache: &dyn QueryCache, persister: &dyn Persister, options: &PersistOptions) {
    let client_state = cache.dehydrate(&*options.should_dehydrate);
    debug!(queries = client_state.queries.len(), "persisting cache snapshot");
    persister.persist_client(&PersistedClient { timestamp: now_ms(), buster: options.buster.clone(), client_state });
}

/// Restore the stored snapshot into `cache`. Returns the number of entries offered.
pub fn restore(cache: &dyn QueryCache, persister: &dyn Persister, options: &PersistOptions) -> usize {
    let Some(stored) = persister.restore_client() else {
        return 0;
    };
    let age = now_ms().saturating_sub(stored.timestamp);
    if age > i64::try_from(options.max_age).unwrap_or(i64::MAX) || stored.buster != options.buster {
        info!(age_ms = age, "discarding outdated cache snapshot");
        persister.remove_client();
        return 0;
    }
    let count = stored.client_state.queries.len();
    cache.hydrate(stored.client_state);
    count
}

/// Restore, then persist on every cache mutation.
pub fn persist_query_client(cache: Arc<dyn QueryCache>, persister: Arc<dyn Persister>, options: PersistOptions) -> PersistHandle {
    let restored = restore(cache.as_ref(), persister.as_ref(), &options);
    debug!(restored, "cache restored");

    let weak_cache = Arc::downgrade(&cache);
    let listener_persister = persister.clone();
    let listener_options = options.clone();
    let subscription = cache.subscribe(Box::new(move |_event| {
        if let Some(cache) = weak_cache.upgrade() {
            persist(cache.as_ref(), listener_persister.as_ref(), &listener_options);
        }
    }));

    PersistHandle { cache, persister, options, subscription }
}
