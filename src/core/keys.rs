//! Storage keys, query-key entities and environment variables
//!
//! Centralized registry so the client, the persister and the CLI agree
//! on where things live.

/// Client storage keys (prefixed with [`storage::PREFIX`] on disk)
pub mod storage {
    pub const PREFIX: &str = "beeconnect";
    pub const CACHE: &str = "cache";
    pub const CONNECTED: &str = "connected";
    pub const WALLET: &str = "wallet";

    pub const ALL: &[&str] = &[CACHE, CONNECTED, WALLET];
}

/// Discriminator `entity` values used as the first element of query keys
pub mod entity {
    pub const BALANCE: &str = "balance";
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
}

/// Environment variables
pub mod env {
    pub const ROOT: &str = "BEECONNECT_ROOT";
    pub const LOG_JSON: &str = "BEECONNECT_LOG_JSON";
    pub const LOG_FORMAT: &str = "BEECONNECT_LOG_FORMAT";
    pub const APP: &str = "BEECONNECT_APP";
}

/// Default cache lifetime for queries (24 hours)
pub const DEFAULT_CACHE_TIME_MS: u64 = 1_000 * 60 * 60 * 24;

/// Default max age of a persisted snapshot (24 hours)
pub const DEFAULT_MAX_AGE_MS: u64 = 1_000 * 60 * 60 * 24;

/// Chain used before any provider has reported one
pub const DEFAULT_CHAIN_ID: u64 = 1;
