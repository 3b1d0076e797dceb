//! Account transition watcher
//!
//! Compares each store change against the previous snapshot and fires
//! edge-triggered callbacks:
//!
//! | Previous | Current | Callback |
//! |----------|---------|----------|
//! | not connected | connected | `on_connect { is_reconnected: previous == reconnecting }` |
//! | connected | disconnected | `on_disconnect` |
//!
//! The first snapshot is the state at the time the watcher is created, so a
//! session that is already connected does not fire `on_connect`.

use crate::client::Client;
use crate::core::Subscription;
use crate::errors::Result;
use crate::plugin::{use_client, App};
use crate::session::{Session, SessionStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectInfo {
    pub address: String,
    pub connector: Option<String>,
    pub is_reconnected: bool,
}

pub type OnConnect = Arc<dyn Fn(&ConnectInfo) + Send + Sync>;
pub type OnDisconnect = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct AccountConfig {
    pub on_connect: Option<OnConnect>,
    pub on_disconnect: Option<OnDisconnect>,
}

impl AccountConfig {
    pub fn new() -> Self { Self::default() }

    pub fn on_connect(mut self, f: impl Fn(&ConnectInfo) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn on_disconnect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }
}

/// Live watcher. Dropping it detaches the callbacks.
pub struct UseAccount {
    client: Client,
    subscription: Subscription,
}

pub fn use_account(app: &App, config: AccountConfig) -> Result<UseAccount> {
    let client = use_client(app)?.client().clone();
    let previous = Mutex::new(client.session());

    let subscription = client.subscribe(move |state| {
        let current = &state.session;
        let prev = {
            let mut previous = previous.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *previous, current.clone())
        };
        on_transition(&config, &prev, current);
    });
    Ok(UseAccount { client, subscription })
}

fn on_transition(config: &AccountConfig, prev: &Session, current: &Session) {
    match (prev.status, current.status) {
        (p, SessionStatus::Connected) if p != SessionStatus::Connected => {
            let Some(address) = current.address.clone() else {
                return;
            };
            let info = ConnectInfo {
                address,
                connector: current.connector.clone(),
                is_reconnected: p == SessionStatus::Reconnecting,
            };
            debug!(address = %info.address, is_reconnected = info.is_reconnected, "account connected");
            if let Some(on_connect) = &config.on_connect {
                on_connect(&info);
            }
        }
        (SessionStatus::Connected, SessionStatus::Disconnected) => {
            debug!("account disconnected");
            if let Some(on_disconnect) = &config.on_disconnect {
                on_disconnect();
            }
        }
        _ => {}
    }
}

impl UseAccount {
    pub fn account(&self) -> Session { self.client.session() }
    pub fn is_active(&self) -> bool { self.subscription.is_active() }

    /// Stop watching. Same as dropping.
    pub fn stop(self) {
        self.subscription.unsubscribe();
    }
}
