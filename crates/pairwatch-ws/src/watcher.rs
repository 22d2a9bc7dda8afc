//! Top-level entry point: supervisor, buffer, dispatcher and retry wired
//! together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pairwatch_core::buffer;
use pairwatch_core::config::WatcherConfig;
use pairwatch_core::dispatch::{BatchDispatcher, DispatchStats, EventHandler};
use pairwatch_core::error::WatchError;
use pairwatch_core::event::SubscriptionSpec;
use pairwatch_core::policy::{AdmissionController, RetryConfig, RetryOrchestrator};

use crate::supervisor::ConnectionSupervisor;
use crate::transport::Connector;

pub struct Watcher {
    supervisor: ConnectionSupervisor,
    dispatcher: Arc<BatchDispatcher>,
    buffer_capacity: usize,
    retry: RetryConfig,
}

impl Watcher {
    /// Build a watcher for every factory in `config`, feeding `handler`.
    pub fn new(config: &WatcherConfig, connector: Arc<dyn Connector>, handler: Arc<dyn EventHandler>) -> Self {
        Self::with_spec(config, config.subscription_spec(), connector, handler)
    }

    pub fn with_spec(
        config: &WatcherConfig,
        spec: SubscriptionSpec,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(config.admission.clone()));
        Self {
            supervisor: ConnectionSupervisor::new(connector, admission, spec, config.supervisor.clone()),
            dispatcher: Arc::new(BatchDispatcher::new(config.batch.clone(), handler)),
            buffer_capacity: config.buffer.capacity,
            retry: config.retry.clone(),
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    ///
    /// On shutdown the receive loop stops first, then the buffer signals end
    /// of stream and the dispatcher finishes the batch it already holds.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), WatchError> {
        let buffer_shutdown = shutdown.child_token();
        let (tx, mut rx) = buffer::channel(self.buffer_capacity, buffer_shutdown.clone());

        let dispatcher = self.dispatcher.clone();
        let consumer = tokio::spawn(async move { dispatcher.run(&mut rx).await });

        let mut orchestrator = RetryOrchestrator::new(self.retry.clone());
        let result = orchestrator
            .run(&shutdown, || self.supervisor.run(&tx, &shutdown))
            .await;

        buffer_shutdown.cancel();
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "dispatcher task failed");
        }

        match &result {
            Ok(()) => tracing::info!(stats = ?self.dispatcher.stats(), "watcher stopped"),
            Err(e) => tracing::error!(error = %e, "watcher stopped with a fatal error"),
        }
        result
    }
}
