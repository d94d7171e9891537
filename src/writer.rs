//! Writer lifecycle: connect, bootstrap, start, wait

use crate::dispatcher::{Dispatcher, DispatcherHandle};
use crate::sample::Sample;
use crate::schema::SchemaRegistry;
use crate::store::Store;
use crate::{Config, Error, Result};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// A connected writer, ready to consume samples.
pub struct Writer {
    dispatcher: Dispatcher,
}

impl Writer {
    /// Check the store is reachable and preload the schema registry from
    /// its catalog. Failure here is fatal for the caller.
    pub async fn connect(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        if let Err(e) = store.ping().await {
            error!(error = %e, "Connecting to store failed");
            return Err(Error::Connection(e));
        }

        let registry = Arc::new(SchemaRegistry::new());
        registry
            .bootstrap_from_store(
                store.as_ref(),
                &config.schema.database,
                &config.schema.normalizer(),
            )
            .await?;

        info!(
            database = %config.schema.database,
            cluster = %config.schema.cluster,
            known_metrics = registry.len(),
            "Writer connected"
        );

        Ok(Self {
            dispatcher: Dispatcher::new(config.dispatcher, &config.schema, store, registry),
        })
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        self.dispatcher.registry()
    }

    /// Start consuming `rx`. Close every sender to stop the writer, then
    /// wait on the returned handle.
    pub fn start(self, rx: mpsc::Receiver<Sample>) -> DispatcherHandle {
        self.dispatcher.spawn(rx)
    }
}
