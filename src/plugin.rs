//! App context - installs one client per application
//!
//! ```text
//! App::use_plugin(ClientPlugin)
//!   ├── stores the client as the app's ReactiveClient
//!   ├── store.on_change ──▶ revision += 1   (released on unmount)
//!   └── auto_connect?  ──▶ spawned, awaited by App::ready()
//! ```
//!
//! Hooks (`use_connect`, `use_account`, ...) resolve the client through
//! [`use_client`] and fail with [`ConnectError::NotInitialized`] before the
//! plugin is installed.

use crate::client::Client;
use crate::core::Subscription;
use crate::errors::{ConnectError, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Something that can be installed into an [`App`].
pub trait Plugin {
    fn install(self, app: &App);
}

/// Client handle whose revision advances on every store change.
#[derive(Clone)]
pub struct ReactiveClient {
    client: Client,
    revision: watch::Receiver<u64>,
}

impl ReactiveClient {
    pub fn client(&self) -> &Client { &self.client }

    pub fn revision(&self) -> u64 { *self.revision.borrow() }

    /// Wait for the next store change. `false` once the app is unmounted.
    pub async fn changed(&mut self) -> bool {
        self.revision.changed().await.is_ok()
    }
}

impl std::ops::Deref for ReactiveClient {
    type Target = Client;
    fn deref(&self) -> &Client { &self.client }
}

struct Installed {
    reactive: ReactiveClient,
    revision: Arc<watch::Sender<u64>>,
    subscription: Subscription,
}

/// Host application context.
pub struct App {
    name: String,
    installed: Mutex<Option<Installed>>,
    startup: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), installed: Mutex::new(None), startup: Mutex::new(Vec::new()) }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn use_plugin(&self, plugin: impl Plugin) -> &Self {
        plugin.install(self);
        self
    }

    pub fn is_mounted(&self) -> bool { self.installed().is_some() }

    /// Wait for startup work queued by plugins.
    pub async fn ready(&self) {
        let handles: Vec<_> = self.startup().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(app = %self.name, error = %e, "startup task failed");
            }
        }
    }

    /// Release the client subscription and remove the client from the context.
    pub fn unmount(&self) {
        if let Some(installed) = self.installed().take() {
            installed.subscription.unsubscribe();
            drop(installed.revision);
            info!(app = %self.name, "client unmounted");
        }
    }

    fn installed(&self) -> MutexGuard<'_, Option<Installed>> {
        self.installed.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn startup(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.startup.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// The app's client, or [`ConnectError::NotInitialized`].
pub fn use_client(app: &App) -> Result<ReactiveClient> {
    app.installed()
        .as_ref()
        .map(|i| i.reactive.clone())
        .ok_or(ConnectError::NotInitialized)
}

/// Installs a [`Client`] into an [`App`].
pub struct ClientPlugin {
    client: Client,
}

impl ClientPlugin {
    pub fn new(client: Client) -> Self { Self { client } }
}

impl Plugin for ClientPlugin {
    fn install(self, app: &App) {
        let client = self.client;
        let (revision, rx) = watch::channel(0u64);
        let revision = Arc::new(revision);
        let bump = revision.clone();
        let subscription = client.subscribe(move |_| {
            bump.send_modify(|n| *n += 1);
        });

        if client.config().auto_connect {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let client = client.clone();
                    let task = handle.spawn(async move {
                        if let Some(result) = client.auto_connect().await {
                            debug!(connector = %result.connector, "auto-connect restored session");
                        }
                    });
                    app.startup().push(task);
                }
                Err(_) => warn!(app = %app.name, "no async runtime, auto-connect skipped"),
            }
        }

        let reactive = ReactiveClient { client, revision: rx };
        let previous = app.installed().replace(Installed { reactive, revision, subscription });
        if let Some(previous) = previous {
            previous.subscription.unsubscribe();
            debug!(app = %app.name, "replaced installed client");
        }
        info!(app = %app.name, "client installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{create_client, ClientConfig};
    use crate::store::StatePatch;

    #[test]
    fn use_client_requires_plugin() {
        let app = App::new("test");
        assert!(matches!(use_client(&app), Err(ConnectError::NotInitialized)));
        app.use_plugin(ClientPlugin::new(create_client(ClientConfig::new())));
        assert!(use_client(&app).is_ok());
    }

    #[tokio::test]
    async fn revision_follows_store_changes() {
        let client = create_client(ClientConfig::new());
        let app = App::new("test");
        app.use_plugin(ClientPlugin::new(client.clone()));
        let mut reactive = use_client(&app).unwrap();

        client.store().apply_update(StatePatch::new().chain_id(10));
        assert!(reactive.changed().await);
        assert_eq!(reactive.revision(), 1);

        // No change, no revision.
        client.store().apply_update(StatePatch::new().chain_id(10));
        assert_eq!(reactive.revision(), 1);
    }

    #[tokio::test]
    async fn unmount_releases_subscription() {
        let client = create_client(ClientConfig::new());
        let app = App::new("test");
        app.use_plugin(ClientPlugin::new(client.clone()));
        let mut reactive = use_client(&app).unwrap();
        let listeners = client.store().listener_count();

        app.unmount();
        assert_eq!(client.store().listener_count(), listeners - 1);
        assert!(!reactive.changed().await);
        assert!(matches!(use_client(&app), Err(ConnectError::NotInitialized)));
    }
}
