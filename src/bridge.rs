//! Event bridge - provider callbacks to ordered store updates
//!
//! One listener is registered on the provider's emitter. It only forwards
//! events into a channel, so nothing raised while handling an event can
//! reach the provider's dispatch loop. A single task drains the channel in
//! delivery order and turns each event into store updates through a
//! [`SessionSink`]:
//!
//! | Event | Effect |
//! |-------|--------|
//! | `accountsChanged([])` | session ends (disconnected, address and signer cleared) |
//! | `accountsChanged([a, ..])` | `address = a`, balance refresh |
//! | `chainChanged` | chain id re-read from the provider, balance refresh |
//!
//! A session change and the cached balance for it reach listeners as one
//! notification; only a fetched balance follows separately.
//! | `close` | session ends |

use crate::core::Subscription;
use crate::provider::{Provider, ProviderEvent};
use crate::session::{normalize_address, SignerHandle};
use crate::store::StatePatch;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Target of bridged events.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Merge `patch` and refresh the balance of the resulting account.
    async fn update_session(&self, patch: StatePatch);
    /// The provider reported the session is gone.
    async fn end_session(&self, reason: &'static str);
}

struct BridgeShared {
    active: AtomicBool,
    received: AtomicU64,
    processed: watch::Sender<u64>,
    provider: Arc<dyn Provider>,
}

/// Awaits processing of every event delivered so far.
#[derive(Clone)]
pub struct SettleTracker {
    shared: Arc<BridgeShared>,
}

impl SettleTracker {
    pub async fn settled(&self) {
        let target = self.shared.received.load(Ordering::SeqCst);
        let mut processed = self.shared.processed.subscribe();
        let _ = processed.wait_for(|n| *n >= target).await;
    }
}

/// Live listener registration. Unsubscribes on drop.
pub struct BridgeSubscription {
    shared: Arc<BridgeShared>,
    listener: Subscription,
}

impl BridgeSubscription {
    /// Idempotent. Events still queued are dropped unhandled.
    pub fn unsubscribe(&self) {
        if self.shared.active.swap(false, Ordering::SeqCst) {
            debug!("provider listeners released");
        }
        self.listener.unsubscribe();
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn is_for(&self, provider: &Arc<dyn Provider>) -> bool {
        Arc::as_ptr(&self.shared.provider) as *const () == Arc::as_ptr(provider) as *const ()
    }

    pub fn tracker(&self) -> SettleTracker {
        SettleTracker { shared: self.shared.clone() }
    }
}

impl Drop for BridgeSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Attach to `provider`'s events. `None` when the provider has no emitter.
pub fn subscribe(provider: Arc<dyn Provider>, sink: Weak<dyn SessionSink>) -> Option<BridgeSubscription> {
    let events = provider.events()?;
    let (processed, _) = watch::channel(0u64);
    let shared = Arc::new(BridgeShared {
        active: AtomicBool::new(true),
        received: AtomicU64::new(0),
        processed,
        provider: provider.clone(),
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<ProviderEvent>();
    let forward = shared.clone();
    let listener = events.on(Arc::new(move |event| {
        if forward.active.load(Ordering::SeqCst) && tx.send(event).is_ok() {
            forward.received.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let worker = shared.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if worker.active.load(Ordering::SeqCst) {
                let name = event.name();
                let handled = AssertUnwindSafe(handle_event(&worker.provider, &sink, event)).catch_unwind().await;
                if handled.is_err() {
                    warn!(event = name, "provider event handler panicked, event dropped");
                }
            }
            worker.processed.send_modify(|n| *n += 1);
        }
    });

    Some(BridgeSubscription { shared, listener })
}

async fn handle_event(provider: &Arc<dyn Provider>, sink: &Weak<dyn SessionSink>, event: ProviderEvent) {
    let Some(sink) = sink.upgrade() else {
        return;
    };
    debug!(event = event.name(), "provider event");
    match event {
        ProviderEvent::AccountsChanged(accounts) => match accounts.first() {
            None => sink.end_session("accountsChanged([])").await,
            Some(account) => {
                let address = normalize_address(account);
                let signer = SignerHandle::new(provider.signer(&address));
                sink.update_session(StatePatch::new().address(Some(address)).signer(Some(signer))).await;
            }
        },
        ProviderEvent::ChainChanged => match provider.get_network().await {
            Ok(network) => sink.update_session(StatePatch::new().chain_id(network.chain_id)).await,
            Err(e) => warn!(error = %e, "chainChanged: network read failed"),
        },
        ProviderEvent::Close => sink.end_session("close").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use crate::session::SessionStatus;
    use crate::store::ClientStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        store: ClientStore,
        log: Mutex<Vec<String>>,
        panic_on_refresh: AtomicBool,
    }

    #[async_trait]
    impl SessionSink for RecordingSink {
        async fn update_session(&self, patch: StatePatch) {
            if self.panic_on_refresh.swap(false, Ordering::SeqCst) {
                panic!("refresh failed");
            }
            self.store.apply_update(patch);
            let session = self.store.session();
            self.log.lock().unwrap().push(format!("refresh {} {}", session.address.unwrap_or_default(), session.chain_id));
        }

        async fn end_session(&self, reason: &'static str) {
            self.store.apply_update(StatePatch::disconnected());
            self.log.lock().unwrap().push(format!("end {}", reason));
        }
    }

    fn attach(provider: &Arc<MemoryProvider>) -> (Arc<RecordingSink>, BridgeSubscription) {
        let sink = Arc::new(RecordingSink::default());
        sink.store.apply_update(StatePatch::new().status(SessionStatus::Connected).address(Some("0xa".into())));
        let weak = Arc::downgrade(&sink);
        let weak: Weak<dyn SessionSink> = weak;
        let sub = subscribe(provider.clone(), weak).expect("emitter");
        (sink, sub)
    }

    #[tokio::test]
    async fn events_are_applied_in_delivery_order() {
        let provider = Arc::new(MemoryProvider::with_account("0xA", 1));
        let (sink, sub) = attach(&provider);

        provider.set_accounts(vec!["0xB".into()]);
        provider.set_chain(56);
        sub.tracker().settled().await;

        assert_eq!(*sink.log.lock().unwrap(), vec!["refresh 0xb 1", "refresh 0xb 56"]);
        assert_eq!(sink.store.session().chain_id, 56);
    }

    #[tokio::test]
    async fn empty_accounts_end_the_session() {
        let provider = Arc::new(MemoryProvider::with_account("0xA", 1));
        let (sink, sub) = attach(&provider);

        provider.set_accounts(vec![]);
        provider.set_accounts(vec![]);
        sub.tracker().settled().await;

        let session = sink.store.session();
        assert_eq!(session.status, SessionStatus::Disconnected);
        assert_eq!(session.address, None);
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_delivery() {
        let provider = Arc::new(MemoryProvider::with_account("0xA", 1));
        let (sink, sub) = attach(&provider);
        sink.panic_on_refresh.store(true, Ordering::SeqCst);

        provider.set_chain(5);
        provider.set_chain(10);
        sub.tracker().settled().await;

        assert_eq!(*sink.log.lock().unwrap(), vec!["refresh 0xa 10"]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_releases_listener() {
        let provider = Arc::new(MemoryProvider::with_account("0xA", 1));
        let (sink, sub) = attach(&provider);
        assert_eq!(provider.listener_count(), 1);
        assert!(sub.is_for(&(provider.clone() as Arc<dyn Provider>)));

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(provider.listener_count(), 0);

        provider.set_chain(5);
        sub.tracker().settled().await;
        assert!(sink.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn providers_without_emitter_yield_no_subscription() {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::with_account("0xA", 1).without_events());
        let sink = Arc::new(RecordingSink::default());
        let weak = Arc::downgrade(&sink);
        let weak: Weak<dyn SessionSink> = weak;
        assert!(subscribe(provider, weak).is_none());
    }
}
