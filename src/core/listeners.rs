//! Listener fan-out list shared by the store, the query cache and providers.

use super::subscription::Subscription;
use std::sync::{Arc, Mutex};

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// Ordered set of listeners. Emission runs on a snapshot taken outside the lock,
/// so listeners may subscribe, unsubscribe or read the emitter re-entrantly.
pub struct ListenerSet<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { next_id: 0, listeners: Vec::new() })) }
    }

    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push((id, Arc::new(listener)));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(|p| p.into_inner());
                inner.listeners.retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.listeners.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ListenerSet<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}
