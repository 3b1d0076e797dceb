//! Connect mutation

use super::{AttemptGuard, AttemptHandle, Mutation, MutationConfig, MutationState, MutationStatus};
use crate::client::{Client, ConnectResult, ConnectTicket};
use crate::core::keys::entity;
use crate::errors::{ConnectError, Result};
use crate::plugin::{use_client, App};
use crate::provider::Connector;
use std::sync::Arc;
use tracing::info;

/// Connect arguments. Unset fields fall back to the hook's defaults.
#[derive(Clone, Default)]
pub struct ConnectArgs {
    pub connector: Option<Arc<dyn Connector>>,
    pub chain_id: Option<u64>,
}

impl ConnectArgs {
    pub fn new() -> Self { Self::default() }
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self { self.connector = Some(connector); self }
    pub fn with_chain_id(mut self, chain_id: u64) -> Self { self.chain_id = Some(chain_id); self }

    /// Call-time values over `defaults`.
    pub fn merged_over(self, defaults: &ConnectArgs) -> ConnectArgs {
        ConnectArgs {
            connector: self.connector.or_else(|| defaults.connector.clone()),
            chain_id: self.chain_id.or(defaults.chain_id),
        }
    }
}

impl std::fmt::Debug for ConnectArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectArgs")
            .field("connector", &self.connector.as_ref().map(|c| c.id().to_string()))
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UseConnectConfig {
    pub defaults: ConnectArgs,
    pub mutation: MutationConfig<ConnectArgs, ConnectResult>,
}

impl UseConnectConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self { self.defaults.connector = Some(connector); self }
    pub fn with_chain_id(mut self, chain_id: u64) -> Self { self.defaults.chain_id = Some(chain_id); self }
    pub fn with_callbacks(mut self, mutation: MutationConfig<ConnectArgs, ConnectResult>) -> Self { self.mutation = mutation; self }
}

pub struct UseConnect {
    client: Client,
    defaults: ConnectArgs,
    mutation: Mutation<ConnectArgs, ConnectResult>,
}

/// Connect hook bound to the app's client.
pub fn use_connect(app: &App, config: UseConnectConfig) -> Result<UseConnect> {
    let client = use_client(app)?.client().clone();
    Ok(UseConnect { client, defaults: config.defaults, mutation: Mutation::new(entity::CONNECT, config.mutation) })
}

impl UseConnect {
    /// Start a connect attempt in the background. It supersedes attempts
    /// started earlier by any hook of the same client.
    pub fn connect(&self, args: ConnectArgs) -> AttemptHandle<ConnectArgs, ConnectResult> {
        let client = self.client.clone();
        let ticket = client.claim_connect();
        self.mutation.mutate(args.merged_over(&self.defaults), move |args, guard| run(client, args, guard, ticket))
    }

    pub async fn connect_async(&self, args: ConnectArgs) -> Result<ConnectResult> {
        let client = self.client.clone();
        let ticket = client.claim_connect();
        let args = args.merged_over(&self.defaults);
        self.mutation.mutate_async(args, move |args, guard| run(client, args, guard, ticket)).await
    }

    /// Connector of the visible attempt while it is pending.
    pub fn pending_connector(&self) -> Option<Arc<dyn Connector>> {
        let state = self.mutation.state();
        match state.status {
            MutationStatus::Pending => state.variables.and_then(|v| v.connector),
            _ => None,
        }
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] { self.client.connectors() }

    pub fn state(&self) -> MutationState<ConnectArgs, ConnectResult> { self.mutation.state() }
    pub fn status(&self) -> MutationStatus { self.mutation.status() }
    pub fn data(&self) -> Option<ConnectResult> { self.mutation.data() }
    pub fn error(&self) -> Option<ConnectError> { self.mutation.error() }
    pub fn variables(&self) -> Option<ConnectArgs> { self.mutation.variables() }
    pub fn reset(&self) { self.mutation.reset() }
    pub fn mutation(&self) -> &Mutation<ConnectArgs, ConnectResult> { &self.mutation }
}

async fn run(client: Client, args: ConnectArgs, guard: AttemptGuard, ticket: ConnectTicket) -> Result<ConnectResult> {
    let connector = args.connector.ok_or(ConnectError::MissingConnector)?;
    let acquired = client.acquire(connector, args.chain_id).await?;

    if !guard.is_latest() || !client.owns_connect(ticket) {
        info!(attempt = guard.id(), connector = acquired.connector.id(), "superseded connect resolved, session untouched");
        return Ok(ConnectResult::from(&acquired));
    }
    Ok(client.establish(acquired).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{create_client, ClientConfig};
    use crate::plugin::ClientPlugin;
    use crate::provider::{MemoryConnector, MemoryProvider};
    use crate::session::SessionStatus;

    fn setup() -> (App, Arc<MemoryProvider>, Arc<dyn Connector>) {
        let provider = Arc::new(MemoryProvider::with_account("0xAbC", 5));
        let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
        let app = App::new("test");
        app.use_plugin(ClientPlugin::new(create_client(ClientConfig::new().with_connector(connector.clone()))));
        (app, provider, connector)
    }

    #[tokio::test]
    async fn call_args_override_defaults() {
        let (app, _provider, connector) = setup();
        let hook = use_connect(&app, UseConnectConfig::new().with_connector(connector).with_chain_id(5)).unwrap();

        let result = hook.connect_async(ConnectArgs::new()).await.unwrap();
        assert_eq!(result.address, "0xabc");
        assert_eq!(result.chain_id, 5);
        assert_eq!(use_client(&app).unwrap().session().status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn missing_connector_fails_before_prompting() {
        let (app, provider, _) = setup();
        let hook = use_connect(&app, UseConnectConfig::new()).unwrap();

        assert_eq!(hook.connect_async(ConnectArgs::new()).await, Err(ConnectError::MissingConnector));
        assert_eq!(hook.error(), Some(ConnectError::MissingConnector));
        assert_eq!(provider.prompt_count(), 0);
    }

    #[tokio::test]
    async fn rejection_is_recorded_on_the_attempt_only() {
        let (app, provider, connector) = setup();
        provider.reject_requests(true);
        let hook = use_connect(&app, UseConnectConfig::new()).unwrap();
        let client = use_client(&app).unwrap();
        let before = client.state();

        let mut handle = hook.connect(ConnectArgs::new().with_connector(connector));
        assert_eq!(handle.result().await, Err(ConnectError::UserRejected));
        assert_eq!(client.state(), before);
        assert!(hook.pending_connector().is_none());
    }
}
