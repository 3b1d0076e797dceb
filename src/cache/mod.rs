//! Query cache boundary
//!
//! The connection layer reads and writes request results through
//! [`QueryCache`]; the persister only needs its dehydrate/hydrate/subscribe
//! hooks. [`MemoryQueryCache`] is the in-process engine used by default.
//!
//! Query keys are ordered tuples whose first element is a discriminator
//! record, e.g. `[{"entity": "balance", "address": "0x..", "chainId": 1}]`.
//! A discriminator with `"persist": false` keeps the entry out of durable
//! snapshots.

use crate::core::{ListenerSet, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    /// Key whose discriminator is `{"entity": entity}`.
    pub fn entity(entity: &str) -> Self {
        Self(vec![json!({ "entity": entity })])
    }

    pub fn from_parts(parts: Vec<Value>) -> Self { Self(parts) }

    /// Add a field to the discriminator record.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.discriminator_mut().insert(name.to_string(), value.into());
        self
    }

    /// Append a positional element after the discriminator.
    pub fn push(mut self, part: impl Into<Value>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Mark the entry as excluded from durable snapshots.
    pub fn no_persist(self) -> Self { self.field("persist", false) }

    pub fn discriminator(&self) -> Option<&Value> { self.0.first() }
    pub fn parts(&self) -> &[Value] { &self.0 }

    /// Only an explicit `persist: false` opts out.
    pub fn persist(&self) -> bool {
        self.discriminator().and_then(|d| d.get("persist")).and_then(Value::as_bool) != Some(false)
    }

    /// Stable hash used as the map key.
    pub fn query_hash(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }

    fn discriminator_mut(&mut self) -> &mut Map<String, Value> {
        if !matches!(self.0.first(), Some(Value::Object(_))) {
            self.0.insert(0, Value::Object(Map::new()));
        }
        match self.0.first_mut() {
            Some(Value::Object(map)) => map,
            _ => unreachable!("discriminator inserted above"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub query_key: QueryKey,
    pub data: Value,
    /// Milliseconds the entry stays valid after `data_updated_at`. Zero: never persisted.
    pub cache_time: u64,
    pub data_updated_at: i64,
}

impl CacheEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.data_updated_at.saturating_add(i64::try_from(self.cache_time).unwrap_or(i64::MAX)) <= now_ms
    }

    pub fn age_ms(&self, now_ms: i64) -> u64 {
        now_ms.saturating_sub(self.data_updated_at).max(0) as u64
    }
}

/// Serializable cache snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DehydratedState {
    pub queries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(QueryKey),
    Removed(QueryKey),
    Hydrated(usize),
}

pub type CacheListener = Box<dyn Fn(&CacheEvent) + Send + Sync>;

pub trait QueryCache: Send + Sync {
    /// Valid entry for `key`, if any.
    fn get(&self, key: &QueryKey) -> Option<CacheEntry>;
    fn set(&self, key: QueryKey, data: Value, cache_time: u64);
    fn remove(&self, key: &QueryKey);
    fn dehydrate(&self, should_dehydrate: &dyn Fn(&CacheEntry) -> bool) -> DehydratedState;
    fn hydrate(&self, state: DehydratedState);
    /// Called after every mutation of the cache.
    fn subscribe(&self, listener: CacheListener) -> Subscription;
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Default)]
pub struct MemoryQueryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    listeners: ListenerSet<CacheEvent>,
}

impl MemoryQueryCache {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl QueryCache for MemoryQueryCache {
    fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        let mut entries = self.lock();
        let hash = key.query_hash();
        let expired = entries.get(&hash)?.is_expired(now_ms());
        if expired {
            entries.remove(&hash);
            return None;
        }
        entries.get(&hash).cloned()
    }

    fn set(&self, key: QueryKey, data: Value, cache_time: u64) {
        let entry = CacheEntry { query_key: key.clone(), data, cache_time, data_updated_at: now_ms() };
        self.lock().insert(key.query_hash(), entry);
        self.listeners.emit(&CacheEvent::Updated(key));
    }

    fn remove(&self, key: &QueryKey) {
        let removed = self.lock().remove(&key.query_hash()).is_some();
        if removed {
            self.listeners.emit(&CacheEvent::Removed(key.clone()));
        }
    }

    fn dehydrate(&self, should_dehydrate: &dyn Fn(&CacheEntry) -> bool) -> DehydratedState {
        let entries = self.lock();
        let mut queries: Vec<CacheEntry> = entries.values().filter(|e| should_dehydrate(e)).cloned().collect();
        queries.sort_by(|a, b| a.query_key.query_hash().cmp(&b.query_key.query_hash()));
        DehydratedState { queries }
    }

    /// Entries already newer in the cache are kept.
    fn hydrate(&self, state: DehydratedState) {
        let now = now_ms();
        let mut restored = 0;
        {
            let mut entries = self.lock();
            for entry in state.queries {
                if entry.is_expired(now) {
                    continue;
                }
                let hash = entry.query_key.query_hash();
                let newer = entries.get(&hash).map(|e| e.data_updated_at >= entry.data_updated_at).unwrap_or(false);
                if !newer {
                    entries.insert(hash, entry);
                    restored += 1;
                }
            }
        }
        self.listeners.emit(&CacheEvent::Hydrated(restored));
    }

    fn subscribe(&self, listener: CacheListener) -> Subscription {
        self.listeners.add(move |event: &CacheEvent| listener(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn persist_flag_defaults_to_true() {
        assert!(QueryKey::entity("balance").persist());
        assert!(QueryKey::entity("balance").field("persist", true).persist());
        assert!(!QueryKey::entity("balance").no_persist().persist());
        assert!(QueryKey::from_parts(vec![json!("bare")]).persist());
    }

    #[test]
    fn field_on_non_record_key_inserts_discriminator() {
        let key = QueryKey::from_parts(vec![json!("bare")]).field("entity", "x");
        assert_eq!(key.parts(), &[json!({"entity": "x"}), json!("bare")]);
    }

    #[test]
    fn zero_cache_time_entries_expire_immediately() {
        let cache = MemoryQueryCache::new();
        let key = QueryKey::entity("block");
        cache.set(key.clone(), json!(1), 0);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn unbounded_cache_time_never_expires() {
        let entry = CacheEntry { query_key: QueryKey::entity("balance"), data: json!("1.0"), cache_time: u64::MAX, data_updated_at: 0 };
        assert!(!entry.is_expired(now_ms()));
        assert!(!entry.is_expired(i64::MAX - 1));
    }

    #[test]
    fn hydrate_keeps_newer_entries_and_notifies_once() {
        let cache = MemoryQueryCache::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let _sub = cache.subscribe(Box::new(move |e| seen.lock().unwrap().push(e.clone())));

        let key = QueryKey::entity("balance").field("address", "0xabc");
        cache.set(key.clone(), json!("2.0"), 60_000);
        let stale = CacheEntry { query_key: key.clone(), data: json!("1.0"), cache_time: 60_000, data_updated_at: now_ms() - 1_000 };
        let other = CacheEntry { query_key: QueryKey::entity("ens"), data: json!("bee.eth"), cache_time: 60_000, data_updated_at: now_ms() };
        cache.hydrate(DehydratedState { queries: vec![stale, other] });

        assert_eq!(cache.get(&key).unwrap().data, json!("2.0"));
        assert_eq!(cache.get(&QueryKey::entity("ens")).unwrap().data, json!("bee.eth"));
        assert_eq!(events.lock().unwrap().last(), Some(&CacheEvent::Hydrated(1)));
    }
}
