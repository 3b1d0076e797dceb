//! Disconnect mutation

use super::{AttemptHandle, Mutation, MutationConfig, MutationStatus};
use crate::client::Client;
use crate::core::keys::entity;
use crate::errors::{ConnectError, Result};
use crate::plugin::{use_client, App};

#[derive(Debug, Clone, Default)]
pub struct UseDisconnectConfig {
    pub mutation: MutationConfig<(), ()>,
}

impl UseDisconnectConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_callbacks(mut self, mutation: MutationConfig<(), ()>) -> Self { self.mutation = mutation; self }
}

pub struct UseDisconnect {
    client: Client,
    mutation: Mutation<(), ()>,
}

pub fn use_disconnect(app: &App, config: UseDisconnectConfig) -> Result<UseDisconnect> {
    let client = use_client(app)?.client().clone();
    Ok(UseDisconnect { client, mutation: Mutation::new(entity::DISCONNECT, config.mutation) })
}

impl UseDisconnect {
    pub fn disconnect(&self) -> AttemptHandle<(), ()> {
        let client = self.client.clone();
        self.mutation.mutate((), move |_, _| async move { client.disconnect().await })
    }

    pub async fn disconnect_async(&self) -> Result<()> {
        let client = self.client.clone();
        self.mutation.mutate_async((), move |_, _| async move { client.disconnect().await }).await
    }

    pub fn status(&self) -> MutationStatus { self.mutation.status() }
    pub fn error(&self) -> Option<ConnectError> { self.mutation.error() }
    pub fn reset(&self) { self.mutation.reset() }
    pub fn mutation(&self) -> &Mutation<(), ()> { &self.mutation }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{create_client, ClientConfig};
    use crate::plugin::ClientPlugin;
    use crate::provider::{Connector, MemoryConnector, MemoryProvider};
    use std::sync::Arc;

    #[tokio::test]
    async fn disconnect_resets_session_and_calls_connector() {
        let provider = Arc::new(MemoryProvider::with_account("0x01", 1));
        let memory = Arc::new(MemoryConnector::new("injected", Some(provider.clone())));
        let connector: Arc<dyn Connector> = memory.clone();
        let client = create_client(ClientConfig::new().with_connector(connector.clone()));
        let app = App::new("test");
        app.use_plugin(ClientPlugin::new(client.clone()));

        client.connect(connector, None).await.unwrap();
        let hook = use_disconnect(&app, UseDisconnectConfig::new()).unwrap();
        hook.disconnect_async().await.unwrap();

        assert!(client.session().is_disconnected());
        assert_eq!(client.session().address, None);
        assert_eq!(memory.disconnect_count(), 1);
        assert_eq!(provider.listener_count(), 0);
        assert_eq!(hook.status(), MutationStatus::Success);
    }
}
