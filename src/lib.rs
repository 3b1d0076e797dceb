//! Beeconnect: wallet connection state for applications. One session, one store, one cache.
//!
//! # Architecture
//!
//! ```text
//! App (host context)
//!   │
//!   └── ClientPlugin ──▶ Client
//!         │
//!         ├── SessionManager   connector → provider → accounts, chain, signer
//!         ├── Bridge           provider events → ordered store updates
//!         ├── ClientStore      Session + fetching/assets, change notifications
//!         ├── QueryCache       balance results
//!         │     └── PersistHandle ──▶ Persister ──▶ ClientStorage ──▶ Storage
//!         └── ClientStorage    connection flags for auto-connect
//!
//! Hooks on the App:
//!   use_connect / use_disconnect   mutation attempts (last started wins)
//!   use_account                    edge-triggered connect/disconnect callbacks
//!   use_client                     ReactiveClient (revision per store change)
//! ```
//!
//! # Session transitions
//!
//! | From | Event | To |
//! |------|-------|----|
//! | disconnected | connect | connecting → connected |
//! | disconnected | auto-connect | reconnecting → connected |
//! | connected | `accountsChanged([])` / `close` / disconnect | disconnected |
//! | connected | `accountsChanged([a])` / `chainChanged` | connected (fields updated) |
//!
//! # Features
//!
//! - `native` - file storage, log subscriber, `beeconnect` CLI
//!
//! # Usage
//!
//! ```ignore
//! use beeconnect::{create_client, use_connect, App, ClientConfig, ClientPlugin, ConnectArgs, UseConnectConfig};
//!
//! let app = App::new("myapp");
//! app.use_plugin(ClientPlugin::new(create_client(
//!     ClientConfig::new().with_connector(injected).with_auto_connect(true),
//! )));
//! app.ready().await;
//!
//! let connect = use_connect(&app, UseConnectConfig::new())?;
//! let result = connect.connect_async(ConnectArgs::new().with_connector(injected)).await?;
//! ```

// =============================================================================
// Shared modules
// =============================================================================
pub mod core;
pub mod errors;
pub mod provider;
pub mod session;
pub mod store;
pub mod bridge;
pub mod cache;
pub mod persist;
pub mod client;
pub mod mutation;
pub mod account;
pub mod plugin;

// =============================================================================
// Native-only modules
// =============================================================================
#[cfg(feature = "native")]
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================
pub use crate::core::Subscription;
pub use errors::{ConnectError, ProviderError, Result, StorageError};
pub use provider::{Connector, MemoryConnector, MemoryProvider, Network, Provider, ProviderEvent, Signer};
pub use session::{Session, SessionStatus};
pub use store::{ClientState, ClientStore, StatePatch};
pub use cache::{MemoryQueryCache, QueryCache, QueryKey};
pub use persist::{
    persist_query_client, ClientStorage, MemoryStorage, NoopStorage, PersistOptions, PersistedClient, Persister,
    Storage, SyncStoragePersister,
};
pub use client::{balance_key, create_client, Client, ClientConfig, ConnectResult, ConnectTicket, Persistence};
pub use mutation::{
    use_connect, use_disconnect, ConnectArgs, MutationConfig, MutationState, MutationStatus, UseConnect, UseConnectConfig,
    UseDisconnect, UseDisconnectConfig,
};
pub use account::{use_account, AccountConfig, ConnectInfo, UseAccount};
pub use plugin::{use_client, App, ClientPlugin, Plugin, ReactiveClient};

#[cfg(feature = "native")]
pub use persist::FileStorage;
