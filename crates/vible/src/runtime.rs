//! Wires stores, the workflow engine and the gateway into one process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vible_core::config::VibleConfig;
use vible_core::email::EmailSender;
use vible_core::error::{Result, VibleError};
use vible_core::{Clock, SystemClock};
use vible_runtime::email::sender_from_config;
use vible_runtime::store::{PgStore, Stores};
use vible_runtime::{
    ConnectionRegistry, Database, EventBus, GatewayServer, GatewayState, MessageDispatcher,
    MigrationRunner, WorkflowExecutor, WorkflowRegistry, WorkflowScheduler, WorkflowWorker,
};

use crate::workflows::{register_all, WorkflowDeps};

/// The Vible runtime.
pub struct Vible {
    config: VibleConfig,
    clock: Arc<dyn Clock>,
    email: Option<Arc<dyn EmailSender>>,
    shutdown: CancellationToken,
}

impl Vible {
    pub fn builder() -> VibleBuilder {
        VibleBuilder::new()
    }

    pub fn config(&self) -> &VibleConfig {
        &self.config
    }

    /// Token that stops the runtime when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C or [`Vible::shutdown`].
    pub async fn run(self) -> Result<()> {
        tracing::info!(project = %self.config.project.name, "Vible runtime starting");

        let (stores, db) = self.connect_stores().await?;

        let email = match self.email.clone() {
            Some(email) => email,
            None => sender_from_config(&self.config.email)?,
        };
        let deps = WorkflowDeps::new(&stores, email, self.config.app.frontend_url.clone());

        let mut registry = WorkflowRegistry::new();
        register_all(&mut registry, &deps)?;
        tracing::info!(workflows = ?registry.ids(), "Workflows registered");
        let registry = Arc::new(registry);

        let executor = Arc::new(WorkflowExecutor::new(
            registry.clone(),
            stores.runs.clone(),
            self.clock.clone(),
            &self.config.executor,
        ));
        let (bus, queue) = EventBus::new(registry, stores.runs.clone(), self.clock.clone());
        let worker = WorkflowWorker::new(
            executor,
            bus.clone(),
            self.config.executor.max_concurrent_runs,
        );
        let scheduler = WorkflowScheduler::new(
            bus.clone(),
            stores.runs.clone(),
            self.clock.clone(),
            self.config.scheduler.clone(),
        );

        let recovered = scheduler.recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Re-queued unfinished runs");
        }

        let connections = Arc::new(ConnectionRegistry::new(self.config.gateway.stream_buffer));
        let dispatcher = Arc::new(MessageDispatcher::new(
            stores.messages.clone(),
            stores.users.clone(),
            connections,
            self.clock.clone(),
        ));
        let gateway = GatewayServer::new(
            self.config.gateway.clone(),
            GatewayState {
                dispatcher,
                bus,
                keep_alive: Duration::from_secs(self.config.gateway.keep_alive_secs),
                shutdown: self.shutdown.clone(),
            },
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        {
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run(queue, shutdown).await;
            }));
        }

        {
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                scheduler.run(shutdown).await;
            }));
        }

        {
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = gateway.run().await {
                    tracing::error!(error = %e, "Gateway stopped");
                    shutdown.cancel();
                }
            }));
        }

        tracing::info!(port = self.config.gateway.port, "Vible runtime started");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("Shutdown requested");
            }
        }

        self.shutdown.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(db) = db {
            db.close().await;
        }

        tracing::info!("Vible runtime stopped");
        Ok(())
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// PostgreSQL when a URL is configured, otherwise in-memory stores.
    async fn connect_stores(&self) -> Result<(Stores, Option<Database>)> {
        if !self.config.database.is_configured() {
            tracing::warn!("No database configured; using in-memory stores");
            return Ok((Stores::memory(), None));
        }

        let db = Database::from_config(&self.config.database).await?;
        let applied = MigrationRunner::new(db.pool().clone()).run().await?;
        if !applied.is_empty() {
            tracing::info!(migrations = ?applied, "Migrations applied");
        }

        let stores = Stores::from_shared(Arc::new(PgStore::new(db.pool().clone())));
        Ok((stores, Some(db)))
    }
}

/// Builder for configuring the Vible runtime.
pub struct VibleBuilder {
    config: Option<VibleConfig>,
    clock: Arc<dyn Clock>,
    email: Option<Arc<dyn EmailSender>>,
}

impl VibleBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            clock: Arc::new(SystemClock),
            email: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: VibleConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the wall clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use this sender instead of the one selected by `[email]`.
    pub fn email_sender(mut self, email: Arc<dyn EmailSender>) -> Self {
        self.email = Some(email);
        self
    }

    pub fn build(self) -> Result<Vible> {
        let config = self
            .config
            .ok_or_else(|| VibleError::Config("Configuration is required".to_string()))?;
        config.validate()?;

        Ok(Vible {
            config,
            clock: self.clock,
            email: self.email,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for VibleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_config() {
        assert!(VibleBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = VibleConfig::default();
        config.executor.max_concurrent_runs = 0;
        assert!(Vible::builder().config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut config = VibleConfig::default();
        config.gateway.port = 0;

        let vible = Vible::builder().config(config).build().unwrap();
        let token = vible.shutdown_token();
        let handle = tokio::spawn(vible.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
