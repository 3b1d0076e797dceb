//! ClientStore - single writable source of truth for connection state
//!
//! Every change to the [`Session`] and the derived balance state goes
//! through [`ClientStore::apply_update`] or [`ClientStore::batch`]. Listeners
//! are notified synchronously, after the merge, outside the lock, and only
//! when the merged state differs from the previous one.
//!
//! ```text
//! bridge / mutations / auto-connect
//!          │  StatePatch
//!          ▼
//!     ClientStore ── merge ── changed? ──▶ on_change listeners (watchers, ReactiveClient)
//! ```

use crate::core::{ListenerSet, Subscription};
use crate::session::{Session, SessionStatus, SignerHandle};
use std::sync::{Mutex, MutexGuard};

/// Session plus derived balance state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientState {
    pub session: Session,
    /// A balance fetch is in flight.
    pub fetching: bool,
    /// Formatted native balance of the connected account.
    pub assets: Option<String>,
}

/// Partial update. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    address: Option<Option<String>>,
    chain_id: Option<u64>,
    connector: Option<Option<String>>,
    signer: Option<Option<SignerHandle>>,
    status: Option<SessionStatus>,
    fetching: Option<bool>,
    assets: Option<Option<String>>,
}

impl StatePatch {
    pub fn new() -> Self { Self::default() }

    /// Reset to a disconnected session, keeping the last chain.
    pub fn disconnected() -> Self {
        Self::new()
            .address(None)
            .connector(None)
            .signer(None)
            .status(SessionStatus::Disconnected)
            .fetching(false)
            .assets(None)
    }

    pub fn address(mut self, address: Option<String>) -> Self { self.address = Some(address); self }
    pub fn chain_id(mut self, chain_id: u64) -> Self { self.chain_id = Some(chain_id); self }
    pub fn connector(mut self, connector: Option<String>) -> Self { self.connector = Some(connector); self }
    pub fn signer(mut self, signer: Option<SignerHandle>) -> Self { self.signer = Some(signer); self }
    pub fn status(mut self, status: SessionStatus) -> Self { self.status = Some(status); self }
    pub fn fetching(mut self, fetching: bool) -> Self { self.fetching = Some(fetching); self }
    pub fn assets(mut self, assets: Option<String>) -> Self { self.assets = Some(assets); self }

    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.chain_id.is_none()
            && self.connector.is_none()
            && self.signer.is_none()
            && self.status.is_none()
            && self.fetching.is_none()
            && self.assets.is_none()
    }

    fn merge_into(self, state: &mut ClientState) {
        let session = &mut state.session;
        if let Some(address) = self.address { session.address = address; }
        if let Some(chain_id) = self.chain_id { session.chain_id = chain_id; }
        if let Some(connector) = self.connector { session.connector = connector; }
        if let Some(signer) = self.signer { session.signer = signer; }
        if let Some(status) = self.status { session.status = status; }
        if let Some(fetching) = self.fetching { state.fetching = fetching; }
        if let Some(assets) = self.assets { state.assets = assets; }
    }
}

/// Patches applied within one [`ClientStore::batch`] call.
pub struct Batch<'a> {
    state: &'a mut ClientState,
}

impl Batch<'_> {
    pub fn apply(&mut self, patch: StatePatch) -> &mut Self {
        patch.merge_into(self.state);
        self
    }

    /// State as merged so far.
    pub fn state(&self) -> &ClientState { self.state }
}

pub struct ClientStore {
    state: Mutex<ClientState>,
    listeners: ListenerSet<ClientState>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::with_state(ClientState::default())
    }

    pub fn with_state(state: ClientState) -> Self {
        Self { state: Mutex::new(state), listeners: ListenerSet::new() }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn current_state(&self) -> ClientState { self.lock().clone() }
    pub fn session(&self) -> Session { self.lock().session.clone() }

    /// Called with the new state after every effective change.
    pub fn on_change(&self, listener: impl Fn(&ClientState) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(listener)
    }

    pub fn listener_count(&self) -> usize { self.listeners.len() }

    /// Merge one patch. Returns whether listeners were notified.
    pub fn apply_update(&self, patch: StatePatch) -> bool {
        self.batch(|batch| { batch.apply(patch); })
    }

    /// Merge several patches as one logical event: at most one notification.
    pub fn batch(&self, f: impl FnOnce(&mut Batch<'_>)) -> bool {
        let changed = {
            let mut guard = self.lock();
            let before = guard.clone();
            f(&mut Batch { state: &mut *guard });
            (*guard != before).then(|| guard.clone())
        };
        match changed {
            Some(state) => {
                self.listeners.emit(&state);
                true
            }
            None => false,
        }
    }
}

impl Default for ClientStore {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(store: &ClientStore) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = store.on_change(move |_| { c.fetch_add(1, Ordering::SeqCst); });
        (count, sub)
    }

    #[test]
    fn identical_patches_do_not_notify() {
        let store = ClientStore::new();
        let (count, _sub) = counting(&store);
        assert!(store.apply_update(StatePatch::new().chain_id(56)));
        assert!(!store.apply_update(StatePatch::new().chain_id(56)));
        assert!(!store.apply_update(StatePatch::new()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.session().chain_id, 56);
    }

    #[test]
    fn batch_coalesces_notifications() {
        let store = ClientStore::new();
        let (count, _sub) = counting(&store);
        store.batch(|b| {
            b.apply(StatePatch::new().address(Some("0xabc".into())))
                .apply(StatePatch::new().status(SessionStatus::Connected))
                .apply(StatePatch::new().chain_id(5));
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let session = store.session();
        assert_eq!(session.address.as_deref(), Some("0xabc"));
        assert!(session.is_connected());
    }

    #[test]
    fn listeners_see_merged_state_and_can_read_store() {
        let store = Arc::new(ClientStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (s, inner) = (seen.clone(), store.clone());
        let _sub = store.on_change(move |state| {
            assert_eq!(inner.current_state(), *state);
            s.lock().unwrap().push(state.session.status);
        });
        store.apply_update(StatePatch::new().status(SessionStatus::Reconnecting));
        store.apply_update(StatePatch::new().status(SessionStatus::Connected));
        store.apply_update(StatePatch::disconnected());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionStatus::Reconnecting, SessionStatus::Connected, SessionStatus::Disconnected]
        );
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let store = ClientStore::new();
        let (count, sub) = counting(&store);
        drop(sub);
        store.apply_update(StatePatch::new().fetching(true));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(store.listener_count(), 0);
    }
}
