//! Client configuration - passed from the application

use crate::cache::QueryCache;
use crate::core::keys::DEFAULT_CACHE_TIME_MS;
use crate::persist::{PersistOptions, Persister, Storage};
use crate::provider::Connector;
use std::sync::Arc;

/// Which persister backs the query cache.
#[derive(Clone, Default)]
pub enum Persistence {
    /// Snapshot under `cache` in the client storage.
    #[default]
    Storage,
    Disabled,
    Custom(Arc<dyn Persister>),
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Silently restore the last session when the client is installed.
    pub auto_connect: bool,
    pub connectors: Vec<Arc<dyn Connector>>,
    /// Durable storage. `None` keeps nothing across restarts.
    pub storage: Option<Arc<dyn Storage>>,
    /// Query cache engine. `None` uses an in-memory cache.
    pub query_cache: Option<Arc<dyn QueryCache>>,
    pub persistence: Persistence,
    pub persist_options: PersistOptions,
    /// Milliseconds a cached query result stays valid.
    pub cache_time: u64,
    /// Milliseconds a cached result is served without refetching.
    pub stale_time: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            connectors: Vec::new(),
            storage: None,
            query_cache: None,
            persistence: Persistence::default(),
            persist_options: PersistOptions::default(),
            cache_time: DEFAULT_CACHE_TIME_MS,
            stale_time: 0,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self { self.auto_connect = auto_connect; self }
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self { self.connectors.push(connector); self }
    pub fn with_connectors(mut self, connectors: Vec<Arc<dyn Connector>>) -> Self { self.connectors = connectors; self }
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self { self.storage = Some(storage); self }
    pub fn with_query_cache(mut self, cache: Arc<dyn QueryCache>) -> Self { self.query_cache = Some(cache); self }
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self { self.persistence = Persistence::Custom(persister); self }
    pub fn without_persister(mut self) -> Self { self.persistence = Persistence::Disabled; self }
    pub fn with_persist_options(mut self, options: PersistOptions) -> Self { self.persist_options = options; self }
    pub fn with_cache_time(mut self, ms: u64) -> Self { self.cache_time = ms; self }
    pub fn with_stale_time(mut self, ms: u64) -> Self { self.stale_time = ms; self }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("auto_connect", &self.auto_connect)
            .field("connectors", &self.connectors.iter().map(|c| c.id().to_string()).collect::<Vec<_>>())
            .field("storage", &self.storage.is_some())
            .field("persist_options", &self.persist_options)
            .field("cache_time", &self.cache_time)
            .field("stale_time", &self.stale_time)
            .finish()
    }
}
